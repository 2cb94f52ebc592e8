use std::path::Path;

use eframe::egui::{self, Color32, Rect};
use thiserror::Error;
use tiny_skia::{
    Color, FillRule, LineCap, Paint, PathBuilder, Pixmap, PixmapPaint, Stroke, StrokeDash,
    Transform,
};

use super::scene_graph::{SceneGraph, ScenePrimitive, StrokeStyle};

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("Failed to create Skia pixmap of {width}x{height}")]
    Pixmap { width: u32, height: u32 },
    #[error("Failed to encode PNG: {0}")]
    Encode(String),
    #[error("Failed to decode tile image: {0}")]
    Decode(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A decoded basemap tile and its destination on the surface.
pub struct TileImage {
    pub rect: Rect,
    pub pixmap: Pixmap,
}

/// Rasterises scene graphs with tiny-skia. Text primitives are skipped; the
/// raster path carries geometry only.
pub struct SkiaRenderer {
    pub scale: f32,
}

impl Default for SkiaRenderer {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

impl SkiaRenderer {
    pub fn render(&self, scene: &SceneGraph, tiles: &[TileImage]) -> Result<Pixmap, RasterError> {
        let ppp = self.scale.clamp(0.25, 4.0);
        let width = ((scene.size.x * ppp).round().max(1.0)) as u32;
        let height = ((scene.size.y * ppp).round().max(1.0)) as u32;
        let mut pixmap =
            Pixmap::new(width, height).ok_or(RasterError::Pixmap { width, height })?;
        pixmap.fill(Color::WHITE);

        for tile in tiles {
            let sx = tile.rect.width() * ppp / tile.pixmap.width().max(1) as f32;
            let sy = tile.rect.height() * ppp / tile.pixmap.height().max(1) as f32;
            let transform = Transform::from_row(
                sx,
                0.0,
                0.0,
                sy,
                tile.rect.min.x * ppp,
                tile.rect.min.y * ppp,
            );
            pixmap.draw_pixmap(0, 0, tile.pixmap.as_ref(), &PixmapPaint::default(), transform, None);
        }

        for primitive in &scene.primitives {
            render_primitive(&mut pixmap, primitive, ppp);
        }
        Ok(pixmap)
    }

    pub fn save_png(
        &self,
        scene: &SceneGraph,
        tiles: &[TileImage],
        path: &Path,
    ) -> Result<(), RasterError> {
        let pixmap = self.render(scene, tiles)?;
        let bytes = pixmap
            .encode_png()
            .map_err(|err| RasterError::Encode(err.to_string()))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

/// PNG bytes to a pixmap (basemap tiles).
pub fn decode_png(bytes: &[u8]) -> Result<Pixmap, RasterError> {
    Pixmap::decode_png(bytes).map_err(|err| RasterError::Decode(err.to_string()))
}

/// Pixmap to an egui texture image.
pub fn to_color_image(pixmap: &Pixmap) -> egui::ColorImage {
    let rgba = premultiplied_rgba_to_unmultiplied(pixmap.data());
    egui::ColorImage::from_rgba_unmultiplied(
        [pixmap.width() as usize, pixmap.height() as usize],
        &rgba,
    )
}

fn fill(pixmap: &mut Pixmap, path: &tiny_skia::Path, color: Color32) {
    let mut paint = Paint::default();
    paint.set_color(to_skia_color(color));
    paint.anti_alias = true;
    pixmap.fill_path(path, &paint, FillRule::Winding, Transform::identity(), None);
}

fn render_primitive(pixmap: &mut Pixmap, primitive: &ScenePrimitive, ppp: f32) {
    match primitive {
        ScenePrimitive::FillRect { rect, color } => {
            let Some(ts_rect) = tiny_skia::Rect::from_xywh(
                rect.min.x * ppp,
                rect.min.y * ppp,
                (rect.width() * ppp).max(0.0),
                (rect.height() * ppp).max(0.0),
            ) else {
                return;
            };
            let mut paint = Paint::default();
            paint.set_color(to_skia_color(*color));
            pixmap.fill_rect(ts_rect, &paint, Transform::identity(), None);
        }
        ScenePrimitive::FillCircle {
            center,
            radius,
            color,
        } => {
            if let Some(path) = PathBuilder::from_circle(center.x * ppp, center.y * ppp, (radius * ppp).max(0.5)) {
                fill(pixmap, &path, *color);
            }
        }
        ScenePrimitive::StrokeCircle {
            center,
            radius,
            style,
        } => {
            if let Some(path) = PathBuilder::from_circle(center.x * ppp, center.y * ppp, (radius * ppp).max(0.5)) {
                stroke_path(pixmap, &path, style, ppp);
            }
        }
        ScenePrimitive::FillPolygon { points, color } => {
            if points.len() < 3 {
                return;
            }
            let mut pb = PathBuilder::new();
            pb.move_to(points[0].x * ppp, points[0].y * ppp);
            for p in points.iter().skip(1) {
                pb.line_to(p.x * ppp, p.y * ppp);
            }
            pb.close();
            if let Some(path) = pb.finish() {
                fill(pixmap, &path, *color);
            }
        }
        ScenePrimitive::StrokeLine { from, to, style } => {
            let mut pb = PathBuilder::new();
            pb.move_to(from.x * ppp, from.y * ppp);
            pb.line_to(to.x * ppp, to.y * ppp);
            if let Some(path) = pb.finish() {
                stroke_path(pixmap, &path, style, ppp);
            }
        }
        ScenePrimitive::StrokePolyline { points, style } => {
            if points.len() < 2 {
                return;
            }
            let mut pb = PathBuilder::new();
            pb.move_to(points[0].x * ppp, points[0].y * ppp);
            for p in points.iter().skip(1) {
                pb.line_to(p.x * ppp, p.y * ppp);
            }
            if let Some(path) = pb.finish() {
                stroke_path(pixmap, &path, style, ppp);
            }
        }
        ScenePrimitive::Text { .. } => {}
    }
}

fn stroke_path(pixmap: &mut Pixmap, path: &tiny_skia::Path, style: &StrokeStyle, ppp: f32) {
    let mut paint = Paint::default();
    paint.set_color(to_skia_color(style.color));
    paint.anti_alias = true;

    let mut stroke = Stroke {
        width: (style.width * ppp).max(0.5),
        line_cap: LineCap::Round,
        ..Stroke::default()
    };
    if let Some((dash, gap)) = style.dash {
        stroke.dash = StrokeDash::new(vec![(dash * ppp).max(1.0), (gap * ppp).max(1.0)], 0.0);
    }

    pixmap.stroke_path(path, &paint, &stroke, Transform::identity(), None);
}

fn to_skia_color(color: Color32) -> Color {
    let [r, g, b, a] = color.to_srgba_unmultiplied();
    Color::from_rgba8(r, g, b, a)
}

fn premultiplied_rgba_to_unmultiplied(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for rgba in data.chunks_exact(4) {
        let a = rgba[3] as u32;
        if a == 0 {
            out.extend_from_slice(&[0, 0, 0, 0]);
            continue;
        }
        let un = |c: u8| ((c as u32 * 255 + a / 2) / a).min(255) as u8;
        out.extend_from_slice(&[un(rgba[0]), un(rgba[1]), un(rgba[2]), a as u8]);
    }
    out
}
