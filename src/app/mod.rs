use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use eframe::{egui, NativeOptions};
use log::{error, info, warn};

use crate::gui::PhylomapGui;
use crate::map::HpdMode;
use crate::remote::BackendClient;
use crate::tree::color::{parse_hex_color, ColorDirection, TraitRequest, DEFAULT_TIP_COLOR};
use crate::tree::dates::parse_date;
use crate::tree::layout::{LayoutMode, SortOrder};
use crate::tree::viewer::{Viewer, VizSettings};
use crate::{io, ui};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "phylomap",
    version,
    about = "Linked time-scaled tree and geographic map viewer for phylogeographic trees."
)]
pub struct AppConfig {
    /// Tree payload (JSON with `nodes`, `edges` and optional `metadata`).
    #[arg(value_name = "PAYLOAD")]
    pub payload_path: Option<PathBuf>,

    /// Analysis backend base URL used to fetch, upload and analyse trees.
    #[arg(long, env = "PHYLOMAP_SERVER", value_name = "URL")]
    pub server: Option<String>,

    /// Stored tree to request from the backend instead of its default tree.
    #[arg(long, value_name = "NAME")]
    pub filename: Option<String>,

    /// Upload a tree file to the backend and load what it returns.
    #[arg(long, value_name = "TREE_FILE")]
    pub upload: Option<PathBuf>,

    /// CSV/TSV metadata table merged onto nodes by identifier.
    #[arg(long, value_name = "TABLE")]
    pub metadata: Option<PathBuf>,

    /// Basemap configuration JSON file (`tileUrl`, optional `name`, `options`).
    #[arg(long, value_name = "JSON")]
    pub basemap: Option<PathBuf>,

    /// Most recent sampling date (YYYY-MM-DD, YYYY-MM or YYYY).
    #[arg(long, value_name = "DATE")]
    pub latest_date: Option<String>,

    #[arg(long, value_enum, default_value_t = LayoutMode::Time)]
    pub layout: LayoutMode,

    #[arg(long, value_enum, default_value_t = SortOrder::Increasing)]
    pub sort: SortOrder,

    /// Attribute key to colour by, or `auto`.
    #[arg(long, default_value = "auto", value_name = "KEY")]
    pub color_trait: String,

    #[arg(long, value_enum, default_value_t = ColorDirection::Increasing)]
    pub color_direction: ColorDirection,

    /// Fill colour for uncoloured tips, as `#rrggbb`.
    #[arg(long, value_name = "HEX")]
    pub tip_color: Option<String>,

    #[arg(long, value_enum, default_value_t = HpdMode::None)]
    pub hpd: HpdMode,

    /// Draw leaf labels.
    #[arg(long)]
    pub labels: bool,

    /// Write the tree view as SVG.
    #[arg(short, long, value_name = "SVG")]
    pub output: Option<PathBuf>,

    /// Write located nodes and edges as GeoJSON.
    #[arg(long, value_name = "GEOJSON")]
    pub geojson: Option<PathBuf>,

    /// Write the map view as PNG.
    #[arg(long, value_name = "PNG")]
    pub map_image: Option<PathBuf>,

    /// Draw basemap tiles under the exported map image.
    #[arg(long)]
    pub with_tiles: bool,

    /// Write the payload, merged metadata included, back out as JSON.
    #[arg(long, value_name = "JSON")]
    pub save_payload: Option<PathBuf>,

    /// Run the backend discrete-trait analysis for the loaded file.
    #[arg(long)]
    pub discrete: bool,

    /// Fetch the backend migration matrix for the loaded file.
    #[arg(long)]
    pub matrix: bool,

    /// Compare stored trees on the backend (two or more names).
    #[arg(long, value_name = "NAME", num_args = 2..)]
    pub compare: Vec<String>,

    /// Number of migration paths to request (1-25).
    #[arg(long, value_name = "N")]
    pub top_k: Option<u32>,

    /// Window width in pixels
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Window height in pixels
    #[arg(long, default_value_t = 820)]
    pub height: u32,

    /// Run without launching the GUI; print a summary and write exports.
    #[arg(long)]
    pub headless: bool,

    /// Force launch of the egui window even when exports are requested.
    #[arg(long)]
    pub gui: bool,

    /// Ignore display detection safeguards and attempt to launch the GUI anyway.
    #[arg(long)]
    pub force_gui: bool,
}

impl AppConfig {
    pub fn latest_date(&self) -> Result<Option<NaiveDate>> {
        match self.latest_date.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_date(raw)
                .map(Some)
                .ok_or_else(|| anyhow!("could not parse --latest-date '{raw}'")),
        }
    }

    pub fn settings(&self) -> Result<VizSettings> {
        let tip_color = match self.tip_color.as_deref() {
            Some(raw) => parse_hex_color(raw).ok_or_else(|| anyhow!("invalid --tip-color '{raw}'"))?,
            None => DEFAULT_TIP_COLOR,
        };
        Ok(VizSettings {
            color_trait: TraitRequest::parse(&self.color_trait),
            color_direction: self.color_direction,
            layout_mode: self.layout,
            sort: self.sort,
            show_labels: self.labels,
            latest_date: self.latest_date()?,
            tip_color,
            hpd_mode: self.hpd,
            ..VizSettings::default()
        })
    }

    pub fn backend(&self) -> Result<Option<BackendClient>> {
        self.server
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .map(BackendClient::new)
            .transpose()
            .context("failed to build backend client")
    }

    /// True when the run asks for exports or backend analyses.
    fn wants_batch(&self) -> bool {
        self.output.is_some()
            || self.geojson.is_some()
            || self.map_image.is_some()
            || self.save_payload.is_some()
            || self.discrete
            || self.matrix
            || self.compare.len() >= 2
    }
}

#[cfg(target_os = "macos")]
mod macos {
    use std::ffi::c_uint;

    #[link(name = "CoreGraphics", kind = "framework")]
    extern "C" {
        fn CGMainDisplayID() -> c_uint;
        fn CGDisplayPixelsWide(display: c_uint) -> usize;
    }

    pub unsafe fn primary_display_width() -> Option<usize> {
        let id = CGMainDisplayID();
        if id == 0 {
            return None;
        }
        Some(CGDisplayPixelsWide(id))
    }
}

pub struct PhylomapApp;

impl PhylomapApp {
    pub fn run(config: &AppConfig) -> Result<()> {
        // Exports or analyses imply a batch run unless a window is asked for
        let wants_gui =
            (!config.headless && !config.wants_batch()) || config.gui || config.force_gui;

        if !wants_gui {
            return Self::run_headless(config);
        }

        if !config.force_gui && !Self::display_available() {
            warn!("GUI requested but no display was detected; falling back to headless mode.");
            return Self::run_headless(config);
        }

        let mut native_options = NativeOptions::default();
        info!("Launching egui window ({}x{}).", config.width, config.height);
        native_options.viewport = egui::ViewportBuilder::default()
            .with_title("phylomap")
            .with_inner_size(egui::vec2(config.width as f32, config.height as f32))
            .with_drag_and_drop(true);

        let initial_config = config.clone();
        match eframe::run_native(
            "phylomap",
            native_options,
            Box::new(move |cc| Ok(Box::new(PhylomapGui::new(cc, initial_config)))),
        ) {
            Ok(result) => Ok(result),
            Err(err) => {
                error!("Failed to launch egui window: {}", err);
                if config.payload_path.is_some() || config.server.is_some() {
                    warn!("Falling back to headless mode.");
                    Self::run_headless(config)
                } else {
                    Err(anyhow!(err.to_string()))
                }
            }
        }
    }

    fn display_available() -> bool {
        #[cfg(target_os = "macos")]
        {
            unsafe {
                macos::primary_display_width()
                    .map(|width| width > 0)
                    .unwrap_or(false)
            }
        }
        #[cfg(any(
            target_os = "linux",
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "netbsd"
        ))]
        {
            std::env::var("DISPLAY").is_ok() || std::env::var("WAYLAND_DISPLAY").is_ok()
        }
        #[cfg(target_os = "windows")]
        {
            true
        }
        #[cfg(not(any(
            target_os = "macos",
            target_os = "linux",
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "netbsd",
            target_os = "windows"
        )))]
        {
            false
        }
    }

    /// Viewer with the basemap applied and, when one is reachable, a tree
    /// and metadata loaded. Shared by the headless run and GUI start-up.
    pub fn prepare_viewer(config: &AppConfig, backend: Option<&BackendClient>) -> Result<Viewer> {
        let mut viewer = Viewer::new(config.settings()?);

        if let Some(path) = &config.basemap {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read basemap: {}", path.display()))?;
            viewer.apply_basemap(&raw)?;
        }

        if let Some(path) = &config.payload_path {
            let payload = io::load_payload(path)?;
            viewer.load_payload(&payload)?;
        } else if let Some(client) = backend {
            let filename = match &config.upload {
                Some(path) => Some(client.upload_tree(path)?),
                None => config.filename.clone(),
            };
            let payload = client
                .fetch_tree(filename.as_deref())
                .map_err(|err| anyhow!("Failed to load tree: {err}"))?;
            viewer.load_payload(&payload)?;
        }

        if let Some(path) = &config.metadata {
            let table = io::load_metadata_table(path)?;
            viewer.merge_metadata(table);
        }

        Ok(viewer)
    }

    fn run_headless(config: &AppConfig) -> Result<()> {
        let backend = config.backend()?;
        if config.payload_path.is_none() && backend.is_none() {
            return Err(anyhow!(
                "headless mode requires a PAYLOAD argument or --server"
            ));
        }
        let viewer = Self::prepare_viewer(config, backend.as_ref())?;
        ui::render_summary(&viewer);
        ui::export(&viewer, config)?;
        if let Some(client) = &backend {
            ui::run_analyses(client, config)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_settings() {
        let config = AppConfig::parse_from([
            "phylomap",
            "tree.json",
            "--layout",
            "cladogram",
            "--sort",
            "decreasing",
            "--color-trait",
            "region",
            "--tip-color",
            "#ff0000",
            "--latest-date",
            "2021-06",
            "--hpd",
            "location80",
        ]);
        let settings = config.settings().unwrap();
        assert_eq!(settings.layout_mode, LayoutMode::Cladogram);
        assert_eq!(settings.sort, SortOrder::Decreasing);
        assert_eq!(settings.color_trait, TraitRequest::Key(String::from("region")));
        assert_eq!(settings.tip_color, egui::Color32::from_rgb(255, 0, 0));
        assert_eq!(settings.latest_date, NaiveDate::from_ymd_opt(2021, 6, 1));
        assert_eq!(settings.hpd_mode, HpdMode::Location80);
    }

    #[test]
    fn defaults_match_viewer_defaults() {
        let config = AppConfig::parse_from(["phylomap"]);
        let settings = config.settings().unwrap();
        let defaults = VizSettings::default();
        assert_eq!(settings.sort, defaults.sort);
        assert_eq!(settings.color_trait, TraitRequest::Auto);
        assert!(!config.wants_batch());
    }

    #[test]
    fn analyses_and_exports_imply_batch_run() {
        for args in [
            vec!["phylomap", "tree.json", "--discrete"],
            vec!["phylomap", "--matrix"],
            vec!["phylomap", "--compare", "a.tree", "b.tree"],
            vec!["phylomap", "tree.json", "--output", "tree.svg"],
        ] {
            let config = AppConfig::parse_from(args.clone());
            assert!(config.wants_batch(), "{args:?}");
        }
    }

    #[test]
    fn rejects_unparseable_date() {
        let config = AppConfig::parse_from(["phylomap", "--latest-date", "soon"]);
        assert!(config.settings().is_err());
    }
}
