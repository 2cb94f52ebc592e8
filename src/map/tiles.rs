use std::time::Duration;

use log::{debug, warn};
use reqwest::blocking::Client;
use thiserror::Error;

use super::viewport::TileSlot;
use super::BasemapConfig;

const TILE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum TileError {
    #[error("tile request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("tile server answered {status} for {url}")]
    Status { status: u16, url: String },
}

/// Blocking tile downloader. Callers run it off the UI thread.
#[derive(Debug, Clone)]
pub struct TileFetcher {
    client: Client,
    config: BasemapConfig,
}

impl TileFetcher {
    pub fn new(config: BasemapConfig) -> Result<Self, TileError> {
        let client = Client::builder()
            .user_agent(concat!("phylomap/", env!("CARGO_PKG_VERSION")))
            .timeout(TILE_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn fetch(&self, z: u32, x: u32, y: u32) -> Result<Vec<u8>, TileError> {
        let url = self.config.tile_url(z, x, y);
        debug!("GET {url}");
        let response = self.client.get(&url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(TileError::Status {
                status: status.as_u16(),
                url,
            });
        }
        Ok(response.bytes()?.to_vec())
    }

    /// Fetch every slot; failures are logged and skipped.
    pub fn fetch_slots(&self, slots: &[TileSlot]) -> Vec<(TileSlot, Vec<u8>)> {
        slots
            .iter()
            .filter_map(|slot| match self.fetch(slot.z, slot.x, slot.y) {
                Ok(bytes) => Some((*slot, bytes)),
                Err(err) => {
                    warn!("Skipping tile {}/{}/{}: {err}", slot.z, slot.x, slot.y);
                    None
                }
            })
            .collect()
    }
}
