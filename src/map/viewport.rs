use std::f64::consts::PI;

use eframe::egui::{Pos2, Rect, Vec2};

use super::{GeoBounds, GeoPoint};

pub const TILE_SIZE: f64 = 256.0;
pub const MIN_ZOOM: f64 = 0.0;
pub const MAX_ZOOM: f64 = 18.0;
pub const FIT_PADDING: f32 = 20.0;
const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Web Mercator centre/zoom viewport owned by the map surface. It is never
/// coupled to the tree transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapViewport {
    pub center: GeoPoint,
    pub zoom: f64,
}

impl Default for MapViewport {
    fn default() -> Self {
        Self::world()
    }
}

/// A basemap tile and where it lands on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileSlot {
    pub z: u32,
    pub x: u32,
    pub y: u32,
    pub rect: Rect,
}

/// Projected pixel coordinates at `zoom`.
pub fn project(point: GeoPoint, zoom: f64) -> (f64, f64) {
    let scale = TILE_SIZE * 2f64.powf(zoom);
    let lat = point.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let x = (point.lon + 180.0) / 360.0 * scale;
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * scale;
    (x, y)
}

pub fn unproject(x: f64, y: f64, zoom: f64) -> GeoPoint {
    let scale = TILE_SIZE * 2f64.powf(zoom);
    let lon = x / scale * 360.0 - 180.0;
    let n = PI - 2.0 * PI * y / scale;
    let lat = n.sinh().atan().to_degrees();
    GeoPoint::new(lat, lon)
}

impl MapViewport {
    pub fn world() -> Self {
        Self {
            center: GeoPoint::new(0.0, 0.0),
            zoom: 2.0,
        }
    }

    /// Largest whole zoom that fits `bounds` inside `size` minus padding,
    /// centred on the projected bounds. Falls back to the world view.
    pub fn fit(bounds: Option<GeoBounds>, size: Vec2, padding: f32) -> Self {
        let Some(bounds) = bounds else {
            return Self::world();
        };
        let avail_w = (size.x - 2.0 * padding).max(1.0) as f64;
        let avail_h = (size.y - 2.0 * padding).max(1.0) as f64;
        let south_west = GeoPoint::new(bounds.south, bounds.west);
        let north_east = GeoPoint::new(bounds.north, bounds.east);
        let (x0, y0) = project(south_west, 0.0);
        let (x1, y1) = project(north_east, 0.0);
        let span_w = (x1 - x0).abs();
        let span_h = (y1 - y0).abs();

        let zoom = if span_w <= f64::EPSILON && span_h <= f64::EPSILON {
            MAX_ZOOM
        } else {
            let scale = (avail_w / span_w.max(f64::EPSILON)).min(avail_h / span_h.max(f64::EPSILON));
            scale.log2().floor().clamp(MIN_ZOOM, MAX_ZOOM)
        };
        let center = unproject((x0 + x1) / 2.0, (y0 + y1) / 2.0, 0.0);
        Self { center, zoom }
    }

    /// Screen position of `point` in a surface of `rect`.
    pub fn to_screen(&self, point: GeoPoint, rect: Rect) -> Pos2 {
        let (cx, cy) = project(self.center, self.zoom);
        let (px, py) = project(point, self.zoom);
        let origin = rect.center();
        Pos2::new(origin.x + (px - cx) as f32, origin.y + (py - cy) as f32)
    }

    pub fn from_screen(&self, pos: Pos2, rect: Rect) -> GeoPoint {
        let (cx, cy) = project(self.center, self.zoom);
        let origin = rect.center();
        unproject(
            cx + (pos.x - origin.x) as f64,
            cy + (pos.y - origin.y) as f64,
            self.zoom,
        )
    }

    pub fn pan(&mut self, delta: Vec2) {
        let (cx, cy) = project(self.center, self.zoom);
        self.center = unproject(cx - delta.x as f64, cy - delta.y as f64, self.zoom);
    }

    /// Zoom by `delta` levels keeping the geographic point under `anchor`.
    pub fn zoom_at(&mut self, anchor: Pos2, rect: Rect, delta: f64) {
        let fixed = self.from_screen(anchor, rect);
        self.zoom = (self.zoom + delta).clamp(MIN_ZOOM, MAX_ZOOM);
        let (fx, fy) = project(fixed, self.zoom);
        let origin = rect.center();
        self.center = unproject(
            fx - (anchor.x - origin.x) as f64,
            fy - (anchor.y - origin.y) as f64,
            self.zoom,
        );
    }

    /// Tiles covering `rect` at the nearest whole zoom level.
    pub fn visible_tiles(&self, rect: Rect) -> Vec<TileSlot> {
        let z = self.zoom.round().clamp(MIN_ZOOM, MAX_ZOOM) as u32;
        let tile_px = TILE_SIZE * 2f64.powf(self.zoom - z as f64);
        let count = 1u32 << z;
        let (cx, cy) = project(self.center, self.zoom);
        let left = cx - rect.width() as f64 / 2.0;
        let top = cy - rect.height() as f64 / 2.0;
        let first_x = (left / tile_px).floor() as i64;
        let last_x = ((left + rect.width() as f64) / tile_px).floor() as i64;
        let first_y = ((top / tile_px).floor() as i64).max(0);
        let last_y = (((top + rect.height() as f64) / tile_px).floor() as i64).min(count as i64 - 1);

        let mut slots = Vec::new();
        for ty in first_y..=last_y {
            for tx in first_x..=last_x {
                let min = Pos2::new(
                    rect.min.x + (tx as f64 * tile_px - left) as f32,
                    rect.min.y + (ty as f64 * tile_px - top) as f32,
                );
                slots.push(TileSlot {
                    z,
                    x: tx.rem_euclid(count as i64) as u32,
                    y: ty as u32,
                    rect: Rect::from_min_size(min, Vec2::splat(tile_px as f32)),
                });
            }
        }
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface() -> Rect {
        Rect::from_min_size(Pos2::ZERO, Vec2::new(800.0, 600.0))
    }

    #[test]
    fn projection_round_trips() {
        let point = GeoPoint::new(51.5, -0.12);
        let (x, y) = project(point, 5.0);
        let back = unproject(x, y, 5.0);
        assert!((back.lat - point.lat).abs() < 1e-9);
        assert!((back.lon - point.lon).abs() < 1e-9);
        assert_eq!(project(GeoPoint::new(0.0, 0.0), 0.0), (128.0, 128.0));
    }

    #[test]
    fn fit_without_bounds_is_world_view() {
        assert_eq!(
            MapViewport::fit(None, surface().size(), FIT_PADDING),
            MapViewport::world()
        );
    }

    #[test]
    fn fit_keeps_bounds_on_screen() {
        let bounds = GeoBounds {
            south: -10.0,
            west: 20.0,
            north: 15.0,
            east: 60.0,
        };
        let viewport = MapViewport::fit(Some(bounds), surface().size(), FIT_PADDING);
        assert!(viewport.zoom >= 1.0 && viewport.zoom <= MAX_ZOOM);
        for point in [GeoPoint::new(-10.0, 20.0), GeoPoint::new(15.0, 60.0)] {
            let pos = viewport.to_screen(point, surface());
            assert!(surface().shrink(FIT_PADDING - 0.5).contains(pos), "{pos:?}");
        }
    }

    #[test]
    fn single_point_fits_at_max_zoom() {
        let point = GeoPoint::new(1.0, 2.0);
        let bounds = GeoBounds::from_points([&point]);
        let viewport = MapViewport::fit(bounds, surface().size(), FIT_PADDING);
        assert_eq!(viewport.zoom, MAX_ZOOM);
        let pos = viewport.to_screen(point, surface());
        assert!((pos - surface().center()).length() < 1e-2);
    }

    #[test]
    fn zoom_keeps_anchor_fixed() {
        let mut viewport = MapViewport::world();
        let anchor = Pos2::new(600.0, 200.0);
        let before = viewport.from_screen(anchor, surface());
        viewport.zoom_at(anchor, surface(), 1.5);
        let after = viewport.to_screen(before, surface());
        assert!((after - anchor).length() < 1e-2);
    }

    #[test]
    fn world_view_tiles_cover_surface() {
        let tiles = MapViewport::world().visible_tiles(surface());
        assert!(!tiles.is_empty());
        assert!(tiles.iter().all(|tile| tile.z == 2 && tile.x < 4 && tile.y < 4));
    }
}
