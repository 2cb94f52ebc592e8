mod canvas;
mod tiles;

use std::fs;
use std::path::{Path, PathBuf};

use eframe::egui::{self, Color32, Pos2, Rect, RichText, Vec2};
use log::{error, info, warn};

use crate::app::{AppConfig, PhylomapApp};
use crate::export;
use crate::io;
use crate::map::HpdMode;
use crate::remote::{
    Comparison, ComparisonList, DiscreteAnalysis, MigrationMatrix, RemoteError, RemoteRequest,
    RemoteResponse, RemoteWorker, DEFAULT_TOP_K, MAX_TOP_K,
};
use crate::tree::color::{ColorDirection, TraitRequest};
use crate::tree::dates::{format_date, parse_date};
use crate::tree::layout::{LayoutMode, SortOrder};
use crate::tree::scene_graph::{build_map_scene, build_tree_scene, legend_rect};
use crate::tree::viewer::{
    StatusKind, Viewer, MAX_NODE_RADIUS, MAX_VERTICAL_SCALE, MIN_NODE_RADIUS, MIN_VERTICAL_SCALE,
};
use crate::tree::NodeId;
use tiles::TileCache;

const HOVER_TOLERANCE: f32 = 8.0;
const MARKER_PICK_RADIUS: f32 = 9.0;
const SUMMARY_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
enum TreeDrag {
    Pan,
    Legend,
    Brush(Pos2),
}

pub struct PhylomapGui {
    config: AppConfig,
    viewer: Viewer,
    tiles: TileCache,
    remote: Option<RemoteWorker>,
    stored_filename: Option<String>,
    payload_input: String,
    metadata_input: String,
    basemap_input: String,
    upload_input: String,
    support_input: String,
    export_dir: String,
    export_tiles: bool,
    latest_date_input: String,
    summary_search: String,
    top_k: u32,
    comparison: ComparisonList,
    analysis: Option<DiscreteAnalysis>,
    matrix: Option<MigrationMatrix>,
    compared: Option<Comparison>,
    tree_drag: Option<TreeDrag>,
    brush_preview: Option<Rect>,
    map_popup: Option<NodeId>,
    last_tree_width: f32,
    last_map_size: Vec2,
}

impl PhylomapGui {
    pub fn new(cc: &eframe::CreationContext<'_>, config: AppConfig) -> Self {
        let backend = match config.backend() {
            Ok(backend) => backend,
            Err(err) => {
                error!("{err:#}");
                None
            }
        };
        let mut viewer = match PhylomapApp::prepare_viewer(&config, None) {
            Ok(viewer) => viewer,
            Err(err) => {
                error!("Start-up load failed: {err:#}");
                let mut viewer = Viewer::new(config.settings().unwrap_or_default());
                viewer.report_error(format!("{err:#}"));
                viewer
            }
        };
        if viewer.tree().is_none() && backend.is_none() {
            viewer.set_status("Load a tree payload to begin.");
        }

        let remote = backend.map(|client| {
            let ctx = cc.egui_ctx.clone();
            RemoteWorker::new(client).with_wake(move || ctx.request_repaint())
        });

        let latest_date_input = viewer
            .settings
            .latest_date
            .map(format_date)
            .unwrap_or_default();
        let mut app = Self {
            tiles: TileCache::new(viewer.basemap().clone()),
            viewer,
            remote,
            stored_filename: config.filename.clone(),
            payload_input: path_text(config.payload_path.as_deref()),
            metadata_input: path_text(config.metadata.as_deref()),
            basemap_input: String::new(),
            upload_input: path_text(config.upload.as_deref()),
            support_input: String::new(),
            export_dir: String::from("."),
            export_tiles: config.with_tiles,
            latest_date_input,
            summary_search: String::new(),
            top_k: config.top_k.unwrap_or(DEFAULT_TOP_K),
            comparison: ComparisonList::default(),
            analysis: None,
            matrix: None,
            compared: None,
            tree_drag: None,
            brush_preview: None,
            map_popup: None,
            last_tree_width: 0.0,
            last_map_size: Vec2::ZERO,
            config,
        };

        if app.remote.is_some() && app.config.payload_path.is_none() {
            let request = match app.config.upload.clone() {
                Some(path) => RemoteRequest::Upload { path },
                None => RemoteRequest::FetchTree {
                    filename: app.config.filename.clone(),
                },
            };
            app.submit(request);
        }
        app
    }

    fn load_payload_file(&mut self, path: &Path) {
        match io::load_payload(path) {
            Ok(payload) => {
                if self.viewer.load_payload(&payload).is_ok() {
                    self.after_tree_loaded();
                    self.viewer
                        .set_status(format!("Loaded {}", path.display()));
                    info!("Loaded payload {}", path.display());
                }
            }
            Err(err) => self.viewer.report_error(format!("{err:#}")),
        }
    }

    fn load_metadata_file(&mut self, path: &Path) {
        match io::load_metadata_table(path) {
            Ok(table) => {
                self.viewer.merge_metadata(table);
            }
            Err(err) => self.viewer.report_error(format!("{err:#}")),
        }
    }

    fn after_tree_loaded(&mut self) {
        self.map_popup = None;
        self.tree_drag = None;
        self.brush_preview = None;
        self.latest_date_input = self
            .viewer
            .settings
            .latest_date
            .map(format_date)
            .unwrap_or_default();
    }

    fn submit(&mut self, request: RemoteRequest) {
        match self.remote.as_mut() {
            Some(worker) => {
                self.viewer.set_status(format!("{}…", request.describe()));
                worker.submit(request);
            }
            None => self
                .viewer
                .report_error("No analysis backend configured (use --server)."),
        }
    }

    fn consume_dropped_files(&mut self, ctx: &egui::Context) {
        let dropped: Vec<PathBuf> = ctx.input(|i| {
            i.raw
                .dropped_files
                .iter()
                .filter_map(|file| file.path.clone())
                .collect()
        });
        for path in dropped {
            let extension = path
                .extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            match extension.as_str() {
                "json" => {
                    self.payload_input = path_text(Some(&path));
                    self.load_payload_file(&path);
                }
                "csv" | "tsv" | "txt" => {
                    self.metadata_input = path_text(Some(&path));
                    self.load_metadata_file(&path);
                }
                _ if self.remote.is_some() => {
                    self.upload_input = path_text(Some(&path));
                    self.submit(RemoteRequest::Upload { path });
                }
                _ => {
                    warn!("Ignoring dropped file {}", path.display());
                    self.viewer
                        .report_error(format!("Unsupported file: {}", path.display()));
                }
            }
        }
    }

    fn drain_remote(&mut self) {
        let responses = match self.remote.as_mut() {
            Some(worker) => worker.drain(),
            None => return,
        };
        for response in responses {
            self.handle_response(response);
        }
    }

    fn handle_response(&mut self, response: RemoteResponse) {
        match response {
            RemoteResponse::Tree { filename, result } => match result {
                Ok(payload) => {
                    if self.viewer.load_payload(&payload).is_ok() {
                        self.after_tree_loaded();
                        let name = filename.clone().unwrap_or_else(|| String::from("default tree"));
                        self.viewer.set_status(format!("Loaded {name}"));
                        self.stored_filename = filename;
                    }
                }
                Err(RemoteError::NoDefaultTree { message }) => self.viewer.report_error(message),
                Err(err) => self.viewer.report_error(format!("Failed to load tree: {err}")),
            },
            RemoteResponse::Uploaded { stored, tree } => match stored {
                Ok(stored) => {
                    self.comparison.add(&stored);
                    self.stored_filename = Some(stored.clone());
                    match tree {
                        Some(Ok(payload)) => {
                            if self.viewer.load_payload(&payload).is_ok() {
                                self.after_tree_loaded();
                                self.viewer.set_status(format!("Uploaded and loaded {stored}"));
                            }
                        }
                        Some(Err(err)) => {
                            self.viewer.report_error(format!("Failed to load tree: {err}"))
                        }
                        None => {}
                    }
                }
                Err(err) => self.viewer.report_error(format!("Upload failed: {err}")),
            },
            RemoteResponse::Discrete(result) => match result {
                Ok(analysis) => {
                    self.viewer.set_status(format!(
                        "Discrete analysis {} ready ({} path(s)).",
                        analysis.analysis_id,
                        analysis.top_paths.len()
                    ));
                    self.analysis = Some(analysis);
                }
                Err(err) => self
                    .viewer
                    .report_error(format!("Discrete analysis failed: {err}")),
            },
            RemoteResponse::Matrix(result) => match result {
                Ok(matrix) => {
                    self.viewer.set_status(matrix.summary());
                    self.matrix = Some(matrix);
                }
                Err(err) => self
                    .viewer
                    .report_error(format!("Failed to load migration matrix: {err}")),
            },
            RemoteResponse::Compared(result) => match result {
                Ok(comparison) => {
                    self.viewer.set_status(format!(
                        "Compared {} tree(s); {} path difference(s).",
                        comparison.trees.len(),
                        comparison.path_differences.len()
                    ));
                    self.compared = Some(comparison);
                }
                Err(err) => self.viewer.report_error(format!("Comparison failed: {err}")),
            },
        }
    }

    fn export_path(&self, name: &str) -> PathBuf {
        let dir = self.export_dir.trim();
        let dir = if dir.is_empty() { "." } else { dir };
        Path::new(dir).join(name)
    }

    fn export_result(&mut self, what: &str, path: &Path, result: anyhow::Result<()>) {
        match result {
            Ok(()) => self
                .viewer
                .set_status(format!("Exported {what} to {}", path.display())),
            Err(err) => self
                .viewer
                .report_error(format!("Failed to export {what}: {err:#}")),
        }
    }

    // ---- side panel ------------------------------------------------------

    fn data_controls(&mut self, ui: &mut egui::Ui) {
        ui.label("Tree payload (JSON):");
        ui.horizontal(|ui| {
            ui.text_edit_singleline(&mut self.payload_input);
            if ui.button("Load").clicked() {
                let path = PathBuf::from(self.payload_input.trim());
                self.load_payload_file(&path);
            }
        });

        ui.label("Metadata table (CSV/TSV):");
        ui.horizontal(|ui| {
            ui.text_edit_singleline(&mut self.metadata_input);
            if ui.button("Merge").clicked() {
                let path = PathBuf::from(self.metadata_input.trim());
                self.load_metadata_file(&path);
            }
        });
        if ui
            .add_enabled(
                self.viewer.metadata().has_table(),
                egui::Button::new("Clear metadata"),
            )
            .clicked()
        {
            self.viewer.clear_metadata();
        }
    }

    fn backend_controls(&mut self, ui: &mut egui::Ui) {
        let Some(worker) = self.remote.as_ref() else {
            ui.label("Start with --server URL to enable uploads and analyses.");
            return;
        };
        ui.label(format!("Server: {}", worker.base_url()));
        if worker.is_busy() {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label(format!("{} request(s) in flight", worker.pending()));
            });
        }
        ui.label(format!(
            "Current file: {}",
            self.stored_filename.as_deref().unwrap_or("default")
        ));

        if ui.button("Fetch default tree").clicked() {
            self.submit(RemoteRequest::FetchTree { filename: None });
        }

        ui.label("Upload tree file:");
        ui.horizontal(|ui| {
            ui.text_edit_singleline(&mut self.upload_input);
            if ui.button("Upload").clicked() {
                let raw = self.upload_input.trim().to_string();
                if raw.is_empty() {
                    self.viewer.report_error("Choose a tree file to upload.");
                } else {
                    self.submit(RemoteRequest::Upload {
                        path: PathBuf::from(raw),
                    });
                }
            }
        });

        ui.separator();
        ui.horizontal(|ui| {
            ui.label("Top paths:");
            ui.add(egui::DragValue::new(&mut self.top_k).range(1..=MAX_TOP_K));
        });
        ui.label("Support file (optional):");
        ui.text_edit_singleline(&mut self.support_input);
        ui.horizontal(|ui| {
            if ui.button("Run discrete analysis").clicked() {
                let support = self.support_input.trim();
                self.submit(RemoteRequest::Discrete {
                    filename: self.stored_filename.clone(),
                    top_k: Some(self.top_k),
                    support_file: (!support.is_empty()).then(|| PathBuf::from(support)),
                });
            }
            if ui.button("Migration matrix").clicked() {
                self.submit(RemoteRequest::Matrix {
                    filename: self.stored_filename.clone(),
                });
            }
        });

        ui.separator();
        ui.label(RichText::new("Comparison").strong());
        if let Some(current) = self.stored_filename.clone() {
            if ui.button("Add current file").clicked() {
                self.comparison.add(&current);
            }
        }
        let mut remove = None;
        for (index, item) in self.comparison.items.iter_mut().enumerate() {
            ui.horizontal(|ui| {
                ui.checkbox(&mut item.selected, "");
                ui.add(egui::TextEdit::singleline(&mut item.label).desired_width(90.0))
                    .on_hover_text(item.filename.as_str());
                if ui.small_button("✕").clicked() {
                    remove = Some(index);
                }
            });
        }
        if let Some(index) = remove {
            self.comparison.remove(index);
        }
        let label = format!("Compare selected ({})", self.comparison.selected_count());
        if ui.button(label).clicked() {
            match self.comparison.request(Some(self.top_k)) {
                Ok(request) => self.submit(RemoteRequest::Compare(request)),
                Err(err) => self.viewer.report_error(err.to_string()),
            }
        }
    }

    fn color_controls(&mut self, ui: &mut egui::Ui) {
        let options = self.viewer.trait_options();
        let current = self.viewer.settings.color_trait.clone();
        let selected_text = match current.key() {
            None => String::from("Auto"),
            Some(key) => self.viewer.display_name(key),
        };
        let mut choice = current.clone();
        ui.label("Colour by:");
        egui::ComboBox::from_id_salt("color_trait_combo")
            .selected_text(selected_text)
            .show_ui(ui, |ui| {
                ui.selectable_value(&mut choice, TraitRequest::Auto, "Auto");
                for option in &options {
                    let text = format!(
                        "{} ({}, {:.0}%)",
                        option.label,
                        option.kind.label(),
                        option.coverage * 100.0
                    );
                    ui.selectable_value(&mut choice, TraitRequest::Key(option.key.clone()), text);
                }
            });
        if choice != current {
            self.viewer.set_color_trait(choice);
        }

        let numeric = self.viewer.colors().is_numeric();
        let mut direction = self.viewer.settings.color_direction;
        ui.add_enabled_ui(numeric, |ui| {
            ui.horizontal(|ui| {
                ui.label("Direction:");
                ui.selectable_value(&mut direction, ColorDirection::Increasing, "Increasing");
                ui.selectable_value(&mut direction, ColorDirection::Decreasing, "Decreasing");
            });
        });
        if direction != self.viewer.settings.color_direction {
            self.viewer.set_color_direction(direction);
        }

        let mut tip = self.viewer.settings.tip_color;
        ui.horizontal(|ui| {
            ui.label("Tip colour:");
            ui.color_edit_button_srgba(&mut tip);
        });
        if tip != self.viewer.settings.tip_color {
            self.viewer.set_tip_color(tip);
        }
    }

    fn layout_controls(&mut self, ui: &mut egui::Ui) {
        let mut mode = self.viewer.settings.layout_mode;
        ui.horizontal(|ui| {
            ui.label("Layout:");
            ui.selectable_value(&mut mode, LayoutMode::Time, "Time");
            ui.selectable_value(&mut mode, LayoutMode::Cladogram, "Cladogram");
        });
        if mode != self.viewer.settings.layout_mode {
            self.viewer.set_layout_mode(mode);
        }

        let mut sort = self.viewer.settings.sort;
        ui.horizontal(|ui| {
            ui.label("Order:");
            ui.selectable_value(&mut sort, SortOrder::Increasing, "Increasing");
            ui.selectable_value(&mut sort, SortOrder::Decreasing, "Decreasing");
        });
        if sort != self.viewer.settings.sort {
            self.viewer.set_sort(sort);
        }

        let mut scale = self.viewer.settings.vertical_scale;
        if ui
            .add(
                egui::Slider::new(&mut scale, MIN_VERTICAL_SCALE..=MAX_VERTICAL_SCALE)
                    .text("Vertical scale"),
            )
            .changed()
        {
            self.viewer.set_vertical_scale(scale);
        }

        let mut radius = self.viewer.settings.node_radius;
        if ui
            .add(egui::Slider::new(&mut radius, MIN_NODE_RADIUS..=MAX_NODE_RADIUS).text("Node size"))
            .changed()
        {
            self.viewer.set_node_radius(radius);
        }

        let mut labels = self.viewer.settings.show_labels;
        if ui.checkbox(&mut labels, "Leaf labels").changed() {
            self.viewer.set_show_labels(labels);
        }

        ui.label("Most recent sample date:");
        ui.horizontal(|ui| {
            ui.add(
                egui::TextEdit::singleline(&mut self.latest_date_input)
                    .hint_text("YYYY-MM-DD")
                    .desired_width(100.0),
            );
            if ui.button("Apply").clicked() {
                let raw = self.latest_date_input.trim();
                if raw.is_empty() {
                    self.viewer.set_latest_date(None);
                } else if let Some(date) = parse_date(raw) {
                    self.viewer.set_latest_date(Some(date));
                    self.latest_date_input = format_date(date);
                } else {
                    self.viewer
                        .report_error(format!("Could not parse date '{raw}'."));
                }
            }
        });
        if let Some(date) = self.viewer.reference_date() {
            ui.label(format!("Reference: {}", format_date(date)));
        }

        if ui.button("Reset tree view").clicked() {
            self.viewer.reset_tree_view();
        }
    }

    fn selection_controls(&mut self, ui: &mut egui::Ui) {
        let mut brush = self.viewer.brush_enabled();
        if ui.checkbox(&mut brush, "Brush selection").changed() {
            self.viewer.set_brush_enabled(brush);
            self.brush_preview = None;
        }
        if ui
            .add_enabled(
                !self.viewer.selection().is_empty(),
                egui::Button::new("Clear selection"),
            )
            .clicked()
        {
            self.viewer.clear_selection();
        }
    }

    fn map_controls(&mut self, ui: &mut egui::Ui) {
        let mut hpd = self.viewer.settings.hpd_mode;
        ui.horizontal(|ui| {
            ui.label("Regions:");
            ui.selectable_value(&mut hpd, HpdMode::None, "None");
            ui.selectable_value(&mut hpd, HpdMode::Location80, "80% HPD");
        });
        if hpd != self.viewer.settings.hpd_mode {
            self.viewer.set_hpd_mode(hpd);
        }
        let mut hpd_color = self.viewer.settings.hpd_color;
        ui.horizontal(|ui| {
            ui.label("Region colour:");
            ui.color_edit_button_srgba(&mut hpd_color);
        });
        if hpd_color != self.viewer.settings.hpd_color {
            self.viewer.set_hpd_color(hpd_color);
        }

        ui.label(format!("Basemap: {}", self.viewer.basemap().name));
        ui.add(
            egui::TextEdit::multiline(&mut self.basemap_input)
                .hint_text(r#"{"name": "…", "tileUrl": "https://…/{z}/{x}/{y}.png"}"#)
                .desired_rows(3),
        );
        ui.horizontal(|ui| {
            if ui.button("Apply").clicked() {
                let raw = match fs::read_to_string(self.basemap_input.trim()) {
                    Ok(contents) => contents,
                    Err(_) => self.basemap_input.clone(),
                };
                if let Err(err) = self.viewer.apply_basemap(&raw) {
                    warn!("Basemap rejected: {err}");
                }
            }
            if ui.button("Reset").clicked() {
                self.viewer.reset_basemap();
                self.basemap_input.clear();
            }
            if ui.button("Fit map").clicked() {
                self.viewer.reset_map_view();
            }
        });
    }

    fn export_controls(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label("Folder:");
            ui.text_edit_singleline(&mut self.export_dir);
        });
        let has_tree = self.viewer.tree().is_some();
        ui.add_enabled_ui(has_tree, |ui| {
            if ui.button("Tree SVG").clicked() {
                let path = self.export_path("phylomap-tree.svg");
                let result = export::export_tree_svg(&self.viewer, &path);
                self.export_result("tree SVG", &path, result);
            }
            if ui.button("Map GeoJSON").clicked() {
                let path = self.export_path("phylomap-map.geojson");
                let result = export::export_map_geojson(&self.viewer, &path);
                self.export_result("GeoJSON", &path, result);
            }
            ui.horizontal(|ui| {
                if ui.button("Map PNG").clicked() {
                    let path = self.export_path("phylomap-map.png");
                    let size = self.last_map_size.max(Vec2::splat(1.0));
                    let result = export::export_map_png(&self.viewer, size, &path, self.export_tiles);
                    self.export_result("map image", &path, result);
                }
                ui.checkbox(&mut self.export_tiles, "with tiles");
            });
            if ui.button("Payload JSON").clicked() {
                let path = self.export_path("phylomap-payload.json");
                let result = match self.viewer.payload() {
                    Some(payload) => io::save_payload(&payload, &path),
                    None => Ok(()),
                };
                self.export_result("payload", &path, result);
            }
        });
    }

    // ---- details panel ---------------------------------------------------

    fn details_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Selection");
        for line in self.viewer.selection_details().lines() {
            ui.label(line);
        }

        ui.separator();
        ui.heading("Attributes");
        ui.add(egui::TextEdit::singleline(&mut self.summary_search).hint_text("Filter attributes"));
        let summary = self
            .viewer
            .trait_summary(&self.summary_search, Some(SUMMARY_LIMIT));
        if summary.is_empty() {
            ui.label("No attributes match.");
        }
        for entry in summary {
            let title = format!("{} ({})", self.viewer.display_name(&entry.key), entry.total);
            egui::CollapsingHeader::new(title)
                .id_salt(("summary", entry.key.as_str()))
                .show(ui, |ui| {
                    for (value, count) in entry.values.iter().take(SUMMARY_LIMIT) {
                        ui.label(format!("{value}: {count}"));
                    }
                    if entry.values.len() > SUMMARY_LIMIT {
                        ui.label(format!("… {} more", entry.values.len() - SUMMARY_LIMIT));
                    }
                });
        }

        if let Some(analysis) = &self.analysis {
            ui.separator();
            ui.heading("Discrete analysis");
            for root in &analysis.root_distribution {
                ui.label(format!("Root {}: {:.3}", root.location, root.probability));
            }
            for (rank, path) in analysis.top_paths.iter().enumerate() {
                let mut line = format!(
                    "{}. {} → {} ({:.2})",
                    rank + 1,
                    path.src,
                    path.dst,
                    path.weight
                );
                if let Some(year) = path.time_median {
                    line.push_str(&format!(" ~{year:.1}"));
                }
                if let Some(bf) = path.bayes_factor {
                    line.push_str(&format!(" BF {bf:.1}"));
                }
                ui.label(line);
            }
        }

        if let Some(matrix) = &self.matrix {
            ui.separator();
            ui.heading("Migration matrix");
            ui.label(matrix.summary());
            egui::Grid::new("migration_matrix").striped(true).show(ui, |ui| {
                ui.label("");
                for target in &matrix.targets {
                    ui.label(RichText::new(target).small());
                }
                ui.end_row();
                for (source, row) in matrix.sources.iter().zip(&matrix.counts) {
                    ui.label(RichText::new(source).small());
                    for value in row {
                        ui.label(crate::tree::format_number(*value));
                    }
                    ui.end_row();
                }
            });
        }

        if let Some(comparison) = &self.compared {
            ui.separator();
            ui.heading("Comparison");
            for difference in &comparison.path_differences {
                let leader = difference
                    .leading_label
                    .as_deref()
                    .map(|label| format!(", led by {label}"))
                    .unwrap_or_default();
                ui.label(format!(
                    "{} → {}: Δ {:.2}{}",
                    difference.src, difference.dst, difference.delta, leader
                ))
                .on_hover_text(
                    difference
                        .weights
                        .iter()
                        .map(|weight| format!("{}: {:.2}", weight.label, weight.weight))
                        .collect::<Vec<_>>()
                        .join("\n"),
                );
            }
        }
    }

    // ---- timeline --------------------------------------------------------

    fn timeline_bar(&mut self, ui: &mut egui::Ui) {
        let Some(domain) = self.viewer.timeline().domain() else {
            ui.label(self.viewer.timeline_label());
            return;
        };
        ui.horizontal(|ui| {
            let playing = self.viewer.timeline().is_playing();
            if ui.button(if playing { "Pause" } else { "Play" }).clicked() {
                self.viewer.toggle_play();
            }
            let mut year = self.viewer.timeline().cursor().unwrap_or(domain.min);
            let width = (ui.available_width() - 260.0).max(120.0);
            ui.spacing_mut().slider_width = width;
            let slider = egui::Slider::new(&mut year, domain.min..=domain.max)
                .show_value(false)
                .smart_aim(false);
            if ui.add(slider).changed() {
                self.viewer.scrub(year);
            }
            ui.label(self.viewer.timeline_label());
            if ui
                .add_enabled(
                    self.viewer.timeline().filter_active(),
                    egui::Button::new("Show all"),
                )
                .clicked()
            {
                self.viewer.disable_time_filter();
            }
        });
    }

    // ---- surfaces --------------------------------------------------------

    fn tree_surface(&mut self, ui: &mut egui::Ui) {
        let size = ui.available_size();
        let (response, painter) = ui.allocate_painter(size, egui::Sense::click_and_drag());
        let rect = response.rect;
        if (rect.width() - self.last_tree_width).abs() > 1.0 {
            self.last_tree_width = rect.width();
            self.viewer.set_plot_width(rect.width());
        }

        let Some(frame) = self.viewer.tree_frame() else {
            painter.text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                "No tree loaded",
                egui::FontId::proportional(16.0),
                Color32::GRAY,
            );
            return;
        };
        let scene = build_tree_scene(frame, rect.size(), self.viewer.legend_placement());
        let legend_bounds = legend_rect(&frame.legend, self.viewer.legend_placement());
        let painter = painter.with_clip_rect(rect);
        canvas::paint_scene(&painter, &scene, rect.min.to_vec2());

        let local = |pos: Pos2| pos - rect.min.to_vec2();
        let hover = response.hover_pos().map(local);
        let over_legend = |pos: Option<Pos2>| {
            pos.zip(legend_bounds)
                .is_some_and(|(pos, bounds)| bounds.contains(pos))
        };

        if let Some(pos) = hover {
            let tooltip = frame
                .hover_node((pos.x, pos.y), HOVER_TOLERANCE)
                .map(|glyph| glyph.tooltip.clone());
            let scroll = ui.input(|i| i.raw_scroll_delta.y);
            if scroll != 0.0 {
                if over_legend(Some(pos)) {
                    self.viewer.wheel_legend(scroll);
                } else {
                    self.viewer.zoom_tree((pos.x, pos.y), (scroll * 0.002).exp());
                }
            }
            if let Some(lines) = tooltip.filter(|_| self.tree_drag.is_none()) {
                response.clone().on_hover_ui_at_pointer(|ui| {
                    for line in lines {
                        ui.label(line);
                    }
                });
            }
        }

        if response.drag_started() {
            let start = response.interact_pointer_pos().map(local);
            self.tree_drag = Some(match start {
                Some(pos) if over_legend(Some(pos)) => TreeDrag::Legend,
                Some(pos) if self.viewer.brush_enabled() => TreeDrag::Brush(pos),
                _ => TreeDrag::Pan,
            });
        }
        if response.dragged() {
            let delta = response.drag_delta();
            match self.tree_drag {
                Some(TreeDrag::Legend) => self.viewer.drag_legend(delta.x, delta.y),
                Some(TreeDrag::Pan) => self.viewer.pan_tree(delta.x, delta.y),
                Some(TreeDrag::Brush(start)) => {
                    self.brush_preview = response
                        .interact_pointer_pos()
                        .map(|pos| Rect::from_two_pos(start, local(pos)));
                }
                None => {}
            }
        }
        if response.drag_stopped() {
            if let (Some(TreeDrag::Brush(_)), Some(selection)) =
                (self.tree_drag, self.brush_preview.take())
            {
                self.viewer.brush(selection);
            }
            self.tree_drag = None;
        }
        if let Some(selection) = self.brush_preview {
            canvas::paint_brush(&painter, selection.translate(rect.min.to_vec2()));
        }

        if response.clicked() {
            if let Some(pos) = response.interact_pointer_pos().map(local) {
                let additive = ui.input(|i| i.modifiers.shift || i.modifiers.command);
                let hit = self
                    .viewer
                    .tree_frame()
                    .and_then(|frame| frame.hit_leaf((pos.x, pos.y)));
                match hit {
                    Some(id) => {
                        self.viewer.click_node(id, additive);
                    }
                    None if self.viewer.brush_enabled() => {
                        self.viewer.brush_cleared();
                    }
                    None => {
                        self.viewer.click_tree_background();
                    }
                }
            }
        }
        if response.double_clicked() {
            self.viewer.reset_tree_view();
        }
    }

    fn map_surface(&mut self, ui: &mut egui::Ui) {
        let size = ui.available_size();
        let (response, painter) = ui.allocate_painter(size, egui::Sense::click_and_drag());
        let rect = response.rect;
        let painter = painter.with_clip_rect(rect);
        if (rect.size() - self.last_map_size).length() > 1.0 {
            let first = self.last_map_size == Vec2::ZERO;
            self.last_map_size = rect.size();
            self.viewer.set_map_size(rect.size());
            if first {
                self.viewer.reset_map_view();
            }
        }
        let local_rect = Rect::from_min_size(Pos2::ZERO, rect.size());
        let view = self.viewer.map_view();

        painter.rect_filled(rect, 0.0, Color32::from_rgb(0xe5, 0xe7, 0xeb));
        let uv = Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0));
        for slot in view.visible_tiles(local_rect) {
            self.tiles.request(slot.z, slot.x, slot.y);
            if let Some(texture) = self.tiles.get(slot.z, slot.x, slot.y) {
                painter.image(
                    texture.id(),
                    slot.rect.translate(rect.min.to_vec2()),
                    uv,
                    Color32::WHITE,
                );
            }
        }

        let scene = build_map_scene(self.viewer.map_frame(), &view, rect.size());
        canvas::paint_scene(&painter, &scene, rect.min.to_vec2());

        if let Some(attribution) = self.viewer.basemap().attribution() {
            painter.text(
                rect.right_bottom() - Vec2::new(4.0, 4.0),
                egui::Align2::RIGHT_BOTTOM,
                strip_markup(attribution),
                egui::FontId::proportional(10.0),
                Color32::from_rgb(0x37, 0x41, 0x51),
            );
        }

        if response.dragged() {
            self.viewer.pan_map(response.drag_delta());
        }
        if let Some(pos) = response.hover_pos() {
            let scroll = ui.input(|i| i.raw_scroll_delta.y);
            if scroll != 0.0 {
                self.viewer
                    .zoom_map(pos - rect.min.to_vec2(), local_rect, (scroll / 240.0) as f64);
            }
        }

        if response.clicked() {
            self.map_popup = response.interact_pointer_pos().and_then(|pos| {
                let pos = pos - rect.min.to_vec2();
                self.viewer
                    .map_frame()
                    .visible_markers()
                    .map(|marker| (marker.node, view.to_screen(marker.point, local_rect)))
                    .map(|(node, at)| (node, at.distance(pos)))
                    .filter(|(_, distance)| *distance <= MARKER_PICK_RADIUS)
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(node, _)| node)
            });
        }

        if let Some(node) = self.map_popup {
            let anchor = self
                .viewer
                .geo()
                .coord(node)
                .map(|point| view.to_screen(point, local_rect) + rect.min.to_vec2());
            let lines = self.viewer.node_popup(node);
            match anchor {
                Some(anchor) if rect.contains(anchor) && !lines.is_empty() => {
                    egui::Area::new(egui::Id::new("map_popup"))
                        .fixed_pos(anchor + Vec2::new(10.0, -10.0))
                        .order(egui::Order::Foreground)
                        .show(ui.ctx(), |ui| {
                            egui::Frame::popup(ui.style()).show(ui, |ui| {
                                for line in lines {
                                    ui.label(line);
                                }
                            });
                        });
                }
                _ => self.map_popup = None,
            }
        }
    }
}

fn path_text(path: Option<&Path>) -> String {
    path.map(|path| path.display().to_string())
        .unwrap_or_default()
}

/// Attribution strings are often HTML; keep the text only.
fn strip_markup(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut in_tag = false;
    for ch in raw.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    text.replace("&copy;", "©").replace("&amp;", "&")
}

impl eframe::App for PhylomapGui {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.consume_dropped_files(ctx);
        self.drain_remote();
        self.tiles.sync_basemap(self.viewer.basemap());
        self.tiles.poll(ctx);

        if self.viewer.timeline().is_playing() {
            let now = ctx.input(|i| i.time);
            if self.viewer.tick(now) {
                ctx.request_repaint();
            }
        }
        if self.tiles.pending_count() > 0 {
            ctx.request_repaint_after(std::time::Duration::from_millis(100));
        }

        egui::SidePanel::left("controls_panel")
            .resizable(true)
            .default_width(250.0)
            .min_width(200.0)
            .max_width(340.0)
            .show(ctx, |ui| {
                ui.visuals_mut().collapsing_header_frame = true;
                egui::ScrollArea::vertical()
                    .auto_shrink([false, false])
                    .show(ui, |ui| {
                        egui::CollapsingHeader::new(RichText::new("Data").strong())
                            .id_salt("controls_data")
                            .default_open(true)
                            .show(ui, |ui| self.data_controls(ui));
                        egui::CollapsingHeader::new(RichText::new("Backend").strong())
                            .id_salt("controls_backend")
                            .default_open(self.remote.is_some())
                            .show(ui, |ui| self.backend_controls(ui));
                        egui::CollapsingHeader::new(RichText::new("Colour").strong())
                            .id_salt("controls_colour")
                            .default_open(true)
                            .show(ui, |ui| self.color_controls(ui));
                        egui::CollapsingHeader::new(RichText::new("Layout").strong())
                            .id_salt("controls_layout")
                            .default_open(true)
                            .show(ui, |ui| self.layout_controls(ui));
                        egui::CollapsingHeader::new(RichText::new("Selection").strong())
                            .id_salt("controls_selection")
                            .default_open(true)
                            .show(ui, |ui| self.selection_controls(ui));
                        egui::CollapsingHeader::new(RichText::new("Map").strong())
                            .id_salt("controls_map")
                            .show(ui, |ui| self.map_controls(ui));
                        egui::CollapsingHeader::new(RichText::new("Export").strong())
                            .id_salt("controls_export")
                            .show(ui, |ui| self.export_controls(ui));
                    });
            });

        egui::SidePanel::right("details_panel")
            .resizable(true)
            .default_width(260.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical()
                    .auto_shrink([false, false])
                    .show(ui, |ui| self.details_panel(ui));
            });

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            if let Some(status) = self.viewer.status() {
                let color = match status.kind {
                    StatusKind::Info => ui.visuals().text_color(),
                    StatusKind::Error => Color32::from_rgb(0xb9, 0x1c, 0x1c),
                };
                ui.colored_label(color, status.message.as_str());
            }
        });

        egui::TopBottomPanel::bottom("timeline_bar").show(ctx, |ui| self.timeline_bar(ui));

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.columns(2, |columns| {
                self.tree_surface(&mut columns[0]);
                self.map_surface(&mut columns[1]);
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribution_markup_is_stripped() {
        assert_eq!(
            strip_markup(r#"&copy; <a href="https://osm.org">OpenStreetMap</a> contributors"#),
            "© OpenStreetMap contributors"
        );
    }
}
