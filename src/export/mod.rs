pub mod geojson;
pub mod svg;

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use eframe::egui::{Pos2, Rect, Vec2};
use log::{info, warn};

use crate::map::TileFetcher;
use crate::tree::painter::ZoomStyle;
use crate::tree::scene_graph::{build_map_scene, build_tree_scene, SceneGraph};
use crate::tree::selection::ViewTransform;
use crate::tree::skia_renderer::{decode_png, SkiaRenderer, TileImage};
use crate::tree::viewer::Viewer;

/// Whole tree at scale 1, independent of the on-screen zoom.
pub fn tree_scene(viewer: &Viewer) -> Option<SceneGraph> {
    let mut frame = viewer.tree_frame()?.clone();
    frame.transform = ViewTransform::IDENTITY;
    frame.style = ZoomStyle::for_scale(viewer.settings.node_radius, 1.0);
    let (width, height) = frame.view_size;
    Some(build_tree_scene(
        &frame,
        Vec2::new(width, height),
        viewer.legend_placement(),
    ))
}

pub fn map_scene(viewer: &Viewer, size: Vec2) -> SceneGraph {
    build_map_scene(viewer.map_frame(), &viewer.map_view(), size)
}

pub fn export_tree_svg(viewer: &Viewer, path: &Path) -> Result<()> {
    let scene = tree_scene(viewer).ok_or_else(|| anyhow!("no tree is loaded"))?;
    svg::export_svg(&scene, path)
        .with_context(|| format!("failed to save SVG: {}", path.display()))?;
    info!("Exported tree SVG to {}", path.display());
    Ok(())
}

pub fn export_map_geojson(viewer: &Viewer, path: &Path) -> Result<()> {
    let tree = viewer.tree().ok_or_else(|| anyhow!("no tree is loaded"))?;
    geojson::export_geojson(tree, viewer.geo(), path)?;
    info!(
        "Exported {} located node(s) to {}",
        viewer.geo().located(),
        path.display()
    );
    Ok(())
}

/// Rasterise the map surface. With `with_tiles` the visible basemap tiles are
/// downloaded and drawn underneath; tiles that fail are left blank.
pub fn export_map_png(viewer: &Viewer, size: Vec2, path: &Path, with_tiles: bool) -> Result<()> {
    let scene = map_scene(viewer, size);
    let tiles = if with_tiles {
        fetch_tile_images(viewer, size)
    } else {
        Vec::new()
    };
    SkiaRenderer::default()
        .save_png(&scene, &tiles, path)
        .with_context(|| format!("failed to write map image: {}", path.display()))?;
    info!(
        "Exported map image ({}x{}, {} tile(s)) to {}",
        size.x,
        size.y,
        tiles.len(),
        path.display()
    );
    Ok(())
}

fn fetch_tile_images(viewer: &Viewer, size: Vec2) -> Vec<TileImage> {
    let fetcher = match TileFetcher::new(viewer.basemap().clone()) {
        Ok(fetcher) => fetcher,
        Err(err) => {
            warn!("Basemap unavailable for export: {err}");
            return Vec::new();
        }
    };
    let rect = Rect::from_min_size(Pos2::ZERO, size);
    let slots = viewer.map_view().visible_tiles(rect);
    fetcher
        .fetch_slots(&slots)
        .into_iter()
        .filter_map(|(slot, bytes)| match decode_png(&bytes) {
            Ok(pixmap) => Some(TileImage {
                rect: slot.rect,
                pixmap,
            }),
            Err(err) => {
                warn!("Tile {}/{}/{} not decodable: {err}", slot.z, slot.x, slot.y);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::fixtures::*;
    use crate::tree::viewer::VizSettings;
    use chrono::NaiveDate;

    #[test]
    fn tree_scene_ignores_screen_zoom() {
        let mut viewer = Viewer::new(VizSettings {
            latest_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..VizSettings::default()
        });
        assert!(tree_scene(&viewer).is_none());
        viewer.load_payload(&cherry()).unwrap();
        viewer.zoom_tree((0.0, 0.0), 3.0);
        let scene = tree_scene(&viewer).unwrap();
        let (width, height) = viewer.tree_frame().unwrap().view_size;
        assert_eq!(scene.size, Vec2::new(width, height));
    }
}
