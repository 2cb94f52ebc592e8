use std::collections::{HashMap, HashSet};
use std::sync::mpsc;

use eframe::egui;
use log::{debug, warn};

use crate::map::{BasemapConfig, TileFetcher};
use crate::tree::skia_renderer::{decode_png, to_color_image};

const MAX_IN_FLIGHT: usize = 12;

/// Background basemap tile loader. Each tile is fetched and decoded on its own
/// thread; `poll` moves finished tiles into textures once per frame.
pub struct TileCache {
    fetcher: Option<TileFetcher>,
    basemap: BasemapConfig,
    pending: HashMap<String, mpsc::Receiver<Option<egui::ColorImage>>>,
    loaded: HashMap<String, egui::TextureHandle>,
    failed: HashSet<String>,
}

impl TileCache {
    pub fn new(basemap: BasemapConfig) -> Self {
        let fetcher = match TileFetcher::new(basemap.clone()) {
            Ok(fetcher) => Some(fetcher),
            Err(err) => {
                warn!("Tile client unavailable: {err}");
                None
            }
        };
        Self {
            fetcher,
            basemap,
            pending: HashMap::new(),
            loaded: HashMap::new(),
            failed: HashSet::new(),
        }
    }

    /// Swap the tile source; cached tiles of the old source are dropped.
    pub fn sync_basemap(&mut self, basemap: &BasemapConfig) {
        if &self.basemap != basemap {
            debug!("Tile source changed to {}", basemap.tile_url);
            *self = Self::new(basemap.clone());
        }
    }

    /// Request a tile in the background unless it is known or in flight.
    pub fn request(&mut self, z: u32, x: u32, y: u32) {
        let url = self.basemap.tile_url(z, x, y);
        if self.loaded.contains_key(&url)
            || self.pending.contains_key(&url)
            || self.failed.contains(&url)
            || self.pending.len() >= MAX_IN_FLIGHT
        {
            return;
        }
        let Some(fetcher) = self.fetcher.clone() else {
            return;
        };

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let image = match fetcher.fetch(z, x, y) {
                Ok(bytes) => match decode_png(&bytes) {
                    Ok(pixmap) => Some(to_color_image(&pixmap)),
                    Err(err) => {
                        warn!("Tile {z}/{x}/{y} not decodable: {err}");
                        None
                    }
                },
                Err(err) => {
                    warn!("Tile {z}/{x}/{y} failed: {err}");
                    None
                }
            };
            let _ = tx.send(image);
        });

        self.pending.insert(url, rx);
    }

    /// Poll for completed downloads. Call every frame.
    pub fn poll(&mut self, ctx: &egui::Context) {
        let mut completed = Vec::new();
        for (url, rx) in &self.pending {
            match rx.try_recv() {
                Ok(Some(image)) => {
                    let texture = ctx.load_texture(url.clone(), image, egui::TextureOptions::LINEAR);
                    self.loaded.insert(url.clone(), texture);
                    completed.push(url.clone());
                }
                Ok(None) | Err(mpsc::TryRecvError::Disconnected) => {
                    self.failed.insert(url.clone());
                    completed.push(url.clone());
                }
                Err(mpsc::TryRecvError::Empty) => {}
            }
        }
        for url in completed {
            self.pending.remove(&url);
        }
    }

    pub fn get(&self, z: u32, x: u32, y: u32) -> Option<&egui::TextureHandle> {
        self.loaded.get(&self.basemap.tile_url(z, x, y))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_basemap() -> BasemapConfig {
        BasemapConfig::parse(r#"{"name":"local","tileUrl":"http://127.0.0.1:9/{z}/{x}/{y}.png"}"#)
            .unwrap()
    }

    #[test]
    fn requests_are_deduplicated() {
        let mut cache = TileCache::new(unreachable_basemap());
        cache.request(2, 1, 1);
        cache.request(2, 1, 1);
        assert_eq!(cache.pending_count(), 1);
    }

    #[test]
    fn changing_basemap_clears_state() {
        let mut cache = TileCache::new(unreachable_basemap());
        cache.request(1, 0, 0);
        cache.sync_basemap(&BasemapConfig::default());
        assert_eq!(cache.pending_count(), 0);
        cache.sync_basemap(&BasemapConfig::default());
        assert!(cache.get(1, 0, 0).is_none());
    }
}
