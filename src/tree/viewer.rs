use std::collections::HashSet;

use chrono::NaiveDate;
use eframe::egui::{Color32, Pos2, Rect, Vec2};
use log::{debug, info, warn};

use super::color::{
    trait_display_name, ColorConfig, ColorDirection, LegendPlacement, TraitRequest,
    DEFAULT_TIP_COLOR,
};
use super::dates::{decimal_year, format_date, resolve_reference_date};
use super::layout::{LayoutMode, LayoutOptions, SortOrder, TreeLayout, DEFAULT_PLOT_WIDTH};
use super::metadata::{MergeReport, MetadataState, MetadataTable};
use super::painter::{TreeFrame, TreeInputs};
use super::selection::{SelectionCoordinator, ViewTransform};
use super::traits::{filter_summary, summarize, TraitOption, TraitStats, TraitSummaryEntry};
use super::{format_number, NodeId, StructureError, Tree, TreePayload};
use crate::map::viewport::FIT_PADDING;
use crate::map::{
    default_hpd_color, BasemapConfig, BasemapError, GeoIndex, HpdMode, MapFrame, MapInputs,
    MapViewport,
};
use crate::timeline::Timeline;

pub const MIN_NODE_RADIUS: f32 = 2.0;
pub const MAX_NODE_RADIUS: f32 = 12.0;
pub const MIN_VERTICAL_SCALE: f32 = 0.5;
pub const MAX_VERTICAL_SCALE: f32 = 4.0;
const DETAIL_LABEL_LIMIT: usize = 5;
const DEFAULT_MAP_SIZE: Vec2 = Vec2::new(900.0, 520.0);

/// User-controlled visual settings.
#[derive(Debug, Clone, PartialEq)]
pub struct VizSettings {
    pub color_trait: TraitRequest,
    pub color_direction: ColorDirection,
    pub layout_mode: LayoutMode,
    pub sort: SortOrder,
    pub vertical_scale: f32,
    pub show_labels: bool,
    pub node_radius: f32,
    pub latest_date: Option<NaiveDate>,
    pub tip_color: Color32,
    pub hpd_mode: HpdMode,
    pub hpd_color: Color32,
    pub plot_width: f32,
}

impl Default for VizSettings {
    fn default() -> Self {
        Self {
            color_trait: TraitRequest::Auto,
            color_direction: ColorDirection::Increasing,
            layout_mode: LayoutMode::default(),
            sort: SortOrder::default(),
            vertical_scale: 1.0,
            show_labels: false,
            node_radius: 5.0,
            latest_date: None,
            tip_color: DEFAULT_TIP_COLOR,
            hpd_mode: HpdMode::None,
            hpd_color: default_hpd_color(),
            plot_width: DEFAULT_PLOT_WIDTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub kind: StatusKind,
    pub message: String,
}

/// What the selection panel shows.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionDetails {
    Empty,
    Single {
        node: NodeId,
        lines: Vec<String>,
    },
    Multi {
        count: usize,
        labels: Vec<String>,
        truncated: bool,
        total: usize,
    },
}

impl SelectionDetails {
    pub fn lines(&self) -> Vec<String> {
        match self {
            SelectionDetails::Empty => {
                vec![String::from("Select nodes in the tree to see their details.")]
            }
            SelectionDetails::Single { lines, .. } => lines.clone(),
            SelectionDetails::Multi {
                count,
                labels,
                truncated,
                total,
            } => {
                let mut names = labels.join(", ");
                if *truncated {
                    names.push_str(", …");
                }
                vec![
                    format!("{count} nodes selected"),
                    names,
                    format!("Total nodes in tree: {total}"),
                ]
            }
        }
    }
}

/// Owns every piece of shared interaction state and pushes each mutation
/// through trait analysis, colouring, layout, timeline and both render
/// frames before returning.
#[derive(Debug)]
pub struct Viewer {
    pub settings: VizSettings,
    tree: Option<Tree>,
    stats: TraitStats,
    summary: Vec<TraitSummaryEntry>,
    colors: ColorConfig,
    layout: Option<TreeLayout>,
    reference_date: Option<NaiveDate>,
    selection: SelectionCoordinator,
    transform: ViewTransform,
    timeline: Timeline,
    metadata: MetadataState,
    geo: GeoIndex,
    basemap: BasemapConfig,
    map_view: MapViewport,
    map_size: Vec2,
    legend: LegendPlacement,
    tree_frame: Option<TreeFrame>,
    map_frame: MapFrame,
    status: Option<StatusLine>,
}

impl Default for Viewer {
    fn default() -> Self {
        Self::new(VizSettings::default())
    }
}

impl Viewer {
    pub fn new(settings: VizSettings) -> Self {
        Self {
            colors: ColorConfig::fallback(settings.tip_color),
            settings,
            tree: None,
            stats: TraitStats::default(),
            summary: Vec::new(),
            layout: None,
            reference_date: None,
            selection: SelectionCoordinator::default(),
            transform: ViewTransform::IDENTITY,
            timeline: Timeline::default(),
            metadata: MetadataState::default(),
            geo: GeoIndex::default(),
            basemap: BasemapConfig::default(),
            map_view: MapViewport::world(),
            map_size: DEFAULT_MAP_SIZE,
            legend: LegendPlacement::default(),
            tree_frame: None,
            map_frame: MapFrame::default(),
            status: None,
        }
    }

    // ---- accessors -------------------------------------------------------

    pub fn tree(&self) -> Option<&Tree> {
        self.tree.as_ref()
    }

    pub fn stats(&self) -> &TraitStats {
        &self.stats
    }

    pub fn colors(&self) -> &ColorConfig {
        &self.colors
    }

    pub fn layout(&self) -> Option<&TreeLayout> {
        self.layout.as_ref()
    }

    pub fn selection(&self) -> &HashSet<NodeId> {
        self.selection.selected()
    }

    pub fn brush_enabled(&self) -> bool {
        self.selection.brush_enabled()
    }

    pub fn transform(&self) -> ViewTransform {
        self.transform
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn metadata(&self) -> &MetadataState {
        &self.metadata
    }

    pub fn geo(&self) -> &GeoIndex {
        &self.geo
    }

    pub fn basemap(&self) -> &BasemapConfig {
        &self.basemap
    }

    pub fn map_view(&self) -> MapViewport {
        self.map_view
    }

    pub fn legend_placement(&self) -> &LegendPlacement {
        &self.legend
    }

    pub fn tree_frame(&self) -> Option<&TreeFrame> {
        self.tree_frame.as_ref()
    }

    pub fn map_frame(&self) -> &MapFrame {
        &self.map_frame
    }

    pub fn reference_date(&self) -> Option<NaiveDate> {
        self.reference_date
    }

    pub fn status(&self) -> Option<&StatusLine> {
        self.status.as_ref()
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status = Some(StatusLine {
            kind: StatusKind::Info,
            message: message.into(),
        });
    }

    pub fn report_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.status = Some(StatusLine {
            kind: StatusKind::Error,
            message,
        });
    }

    pub fn display_name(&self, key: &str) -> String {
        trait_display_name(key, self.metadata.display_name(key))
    }

    /// Current tree with merged metadata, in wire form.
    pub fn payload(&self) -> Option<TreePayload> {
        self.tree.as_ref().map(Tree::to_payload)
    }

    // ---- payload ---------------------------------------------------------

    /// Replace the tree. A structurally invalid payload leaves every piece of
    /// state, and the frames on screen, untouched.
    pub fn load_payload(&mut self, payload: &TreePayload) -> Result<(), StructureError> {
        let mut tree = match Tree::from_payload(payload) {
            Ok(tree) => tree,
            Err(err) => {
                self.report_error(format!("Failed to render tree: {err}"));
                return Err(err);
            }
        };

        self.metadata.detach();
        if self.metadata.has_table() {
            let report = self.metadata.merge(&mut tree);
            debug!("Re-applied metadata to new tree: {} match(es)", report.matched);
        }

        info!(
            "Loaded tree with {} nodes ({} leaves)",
            tree.len(),
            tree.leaf_count()
        );
        let leaves = tree.leaf_count();
        let total = tree.len();
        self.tree = Some(tree);
        self.selection.clear();
        self.selection.retain_valid(total);
        self.transform = ViewTransform::IDENTITY;
        self.refresh_all();
        self.map_view = MapViewport::fit(self.geo.bounds(), self.map_size, FIT_PADDING);
        self.set_status(format!("Loaded {total} nodes ({leaves} leaves)."));
        Ok(())
    }

    // ---- pipeline --------------------------------------------------------

    /// Full propagation: analysis, colour, layout, geography, timeline and frames.
    fn refresh_all(&mut self) {
        self.analyze();
        self.recolor();
        self.relayout();
        self.regeo();
        self.retime();
        self.render_frames();
    }

    fn analyze(&mut self) {
        let Some(tree) = self.tree.as_ref() else {
            self.stats = TraitStats::default();
            self.summary.clear();
            return;
        };
        self.stats = TraitStats::analyze(tree);
        self.summary = summarize(tree);
        debug!("Analyzed {} trait(s)", self.stats.len());
    }

    fn recolor(&mut self) {
        let missing = self
            .settings
            .color_trait
            .key()
            .is_some_and(|key| self.stats.get(key).is_none());
        if missing {
            debug!("Colour trait {:?} is gone; falling back to auto", self.settings.color_trait);
            self.settings.color_trait = TraitRequest::Auto;
        }
        let metadata = &self.metadata;
        self.colors = ColorConfig::resolve(
            &self.stats,
            &self.settings.color_trait,
            self.settings.color_direction,
            metadata.merged_keys(),
            |key| trait_display_name(key, metadata.display_name(key)),
            self.settings.tip_color,
        );
        if !self.colors.is_numeric() {
            self.settings.color_direction = ColorDirection::Increasing;
        }
    }

    fn relayout(&mut self) {
        let Some(tree) = self.tree.as_ref() else {
            self.layout = None;
            self.reference_date = None;
            return;
        };
        let reference_date = resolve_reference_date(self.settings.latest_date, tree);
        self.reference_date = Some(reference_date);
        self.layout = Some(TreeLayout::build(
            tree,
            &LayoutOptions {
                mode: self.settings.layout_mode,
                sort: self.settings.sort,
                vertical_scale: self.settings.vertical_scale,
                width: self.settings.plot_width,
                reference_date,
            },
        ));
    }

    fn regeo(&mut self) {
        self.geo = self.tree.as_ref().map(GeoIndex::build).unwrap_or_default();
    }

    fn retime(&mut self) {
        match (self.tree.as_ref(), self.reference_date) {
            (Some(tree), Some(date)) => {
                self.timeline
                    .rebuild(tree, self.geo.coords(), decimal_year(date));
            }
            _ => self.timeline = Timeline::default(),
        }
    }

    fn render_frames(&mut self) {
        let (Some(tree), Some(layout)) = (self.tree.as_ref(), self.layout.as_ref()) else {
            self.tree_frame = None;
            self.map_frame = MapFrame::default();
            return;
        };
        self.tree_frame = Some(TreeFrame::build(&TreeInputs {
            tree,
            layout,
            colors: &self.colors,
            selection: self.selection.selected(),
            transform: self.transform,
            node_radius: self.settings.node_radius,
            show_labels: self.settings.show_labels,
        }));
        self.map_frame = MapFrame::build(&MapInputs {
            tree,
            geo: &self.geo,
            colors: &self.colors,
            selection: self.selection.selected(),
            brush_enabled: self.selection.brush_enabled(),
            timeline: &self.timeline,
            node_radius: self.settings.node_radius,
            hpd_mode: self.settings.hpd_mode,
            hpd_color: self.settings.hpd_color,
        });
    }

    // ---- colour & layout settings ----------------------------------------

    pub fn set_color_trait(&mut self, request: TraitRequest) {
        self.settings.color_trait = request;
        self.recolor();
        self.render_frames();
    }

    pub fn set_color_direction(&mut self, direction: ColorDirection) {
        self.settings.color_direction = direction;
        self.recolor();
        self.render_frames();
    }

    pub fn set_tip_color(&mut self, color: Color32) {
        self.settings.tip_color = color;
        self.recolor();
        self.render_frames();
    }

    pub fn set_layout_mode(&mut self, mode: LayoutMode) {
        self.settings.layout_mode = mode;
        self.relayout();
        self.render_frames();
    }

    pub fn set_sort(&mut self, sort: SortOrder) {
        self.settings.sort = sort;
        self.relayout();
        self.render_frames();
    }

    pub fn set_vertical_scale(&mut self, scale: f32) {
        self.settings.vertical_scale = scale.clamp(MIN_VERTICAL_SCALE, MAX_VERTICAL_SCALE);
        self.relayout();
        self.render_frames();
    }

    pub fn set_plot_width(&mut self, width: f32) {
        if !width.is_finite() || width <= 0.0 {
            return;
        }
        self.settings.plot_width = width;
        self.relayout();
        self.render_frames();
    }

    /// New reference date moves the time axis and rebuilds the timeline.
    pub fn set_latest_date(&mut self, date: Option<NaiveDate>) {
        self.settings.latest_date = date;
        self.relayout();
        self.retime();
        self.render_frames();
        if let Some(date) = self.reference_date {
            info!("Reference date set to {}", format_date(date));
        }
    }

    pub fn set_show_labels(&mut self, show: bool) {
        self.settings.show_labels = show;
        self.render_frames();
    }

    pub fn set_node_radius(&mut self, radius: f32) {
        self.settings.node_radius = radius.clamp(MIN_NODE_RADIUS, MAX_NODE_RADIUS);
        self.render_frames();
    }

    pub fn set_hpd_mode(&mut self, mode: HpdMode) {
        self.settings.hpd_mode = mode;
        self.render_frames();
    }

    pub fn set_hpd_color(&mut self, color: Color32) {
        self.settings.hpd_color = color;
        self.render_frames();
    }

    // ---- selection -------------------------------------------------------

    pub fn click_node(&mut self, id: NodeId, additive: bool) -> bool {
        if self.tree.as_ref().map_or(true, |tree| id >= tree.len()) {
            return false;
        }
        let changed = self.selection.toggle(id, additive);
        if changed {
            self.render_frames();
        }
        changed
    }

    pub fn click_tree_background(&mut self) -> bool {
        let changed = self.selection.click_background();
        if changed {
            self.render_frames();
        }
        changed
    }

    /// Brush rectangle in tree-surface coordinates.
    pub fn brush(&mut self, rect: Rect) -> bool {
        let (Some(tree), Some(layout)) = (self.tree.as_ref(), self.layout.as_ref()) else {
            return false;
        };
        let changed = self.selection.brush(tree, layout, &self.transform, rect);
        if changed {
            debug!("Brush selected {} node(s)", self.selection.selected().len());
            self.render_frames();
        }
        changed
    }

    pub fn brush_cleared(&mut self) -> bool {
        let changed = self.selection.brush_cleared();
        self.render_frames();
        changed
    }

    pub fn set_brush_enabled(&mut self, enabled: bool) {
        self.selection.set_brush_enabled(enabled);
        self.render_frames();
    }

    pub fn clear_selection(&mut self) -> bool {
        let changed = self.selection.clear();
        if changed {
            self.render_frames();
        }
        changed
    }

    // ---- timeline --------------------------------------------------------

    pub fn scrub(&mut self, year: f64) -> bool {
        let changed = self.timeline.scrub(year);
        if changed {
            self.render_frames();
        }
        changed
    }

    pub fn toggle_play(&mut self) -> bool {
        let changed = self.timeline.toggle_play();
        if changed {
            self.render_frames();
        }
        changed
    }

    pub fn disable_time_filter(&mut self) {
        self.timeline.disable_filter();
        self.render_frames();
    }

    /// One animation frame. Returns true while another frame is wanted.
    pub fn tick(&mut self, now_seconds: f64) -> bool {
        if self.timeline.tick(now_seconds) {
            self.render_frames();
        }
        self.timeline.is_playing()
    }

    // ---- metadata --------------------------------------------------------

    /// Load a table and merge it. Without a tree the table is kept and applied
    /// on the next successful load.
    pub fn merge_metadata(&mut self, table: MetadataTable) -> MergeReport {
        let source = table
            .source
            .clone()
            .unwrap_or_else(|| String::from("metadata"));
        self.metadata.load(table);
        let Some(tree) = self.tree.as_mut() else {
            self.set_status(format!("Loaded {source}; it will apply once a tree is loaded."));
            return MergeReport::default();
        };
        let report = self.metadata.merge(tree);
        self.refresh_after_metadata();
        if report.matched == 0 {
            self.report_error(format!("{source}: no rows matched any node."));
        } else {
            self.set_status(format!(
                "{source}: merged {} column(s) onto {} node(s).",
                report.keys.len(),
                report.matched
            ));
        }
        report
    }

    pub fn clear_metadata(&mut self) {
        self.metadata.clear(self.tree.as_mut());
        self.refresh_after_metadata();
        self.set_status("Metadata cleared.");
        info!("Metadata cleared");
    }

    fn refresh_after_metadata(&mut self) {
        self.analyze();
        self.recolor();
        self.relayout();
        self.regeo();
        self.retime();
        self.render_frames();
    }

    // ---- basemap ---------------------------------------------------------

    /// Parse and apply a basemap configuration. On failure the current
    /// basemap stays.
    pub fn apply_basemap(&mut self, raw: &str) -> Result<(), BasemapError> {
        match BasemapConfig::parse(raw) {
            Ok(config) => {
                info!("Basemap set to {} ({})", config.name, config.tile_url);
                self.set_status(format!("Basemap: {}", config.name));
                self.set_basemap(config);
                Ok(())
            }
            Err(err) => {
                self.report_error(format!("Basemap not applied: {err}"));
                Err(err)
            }
        }
    }

    pub fn set_basemap(&mut self, config: BasemapConfig) {
        self.basemap = config;
        self.clamp_map_zoom();
    }

    pub fn reset_basemap(&mut self) {
        self.set_basemap(BasemapConfig::default());
        self.set_status("Basemap reset to OpenStreetMap.");
    }

    // ---- viewports -------------------------------------------------------

    pub fn zoom_tree(&mut self, anchor: (f32, f32), factor: f32) {
        self.transform.zoom_at(anchor, factor);
        self.render_frames();
    }

    pub fn pan_tree(&mut self, dx: f32, dy: f32) {
        self.transform.pan(dx, dy);
        self.render_frames();
    }

    pub fn reset_tree_view(&mut self) {
        self.transform = ViewTransform::IDENTITY;
        self.render_frames();
    }

    pub fn set_map_size(&mut self, size: Vec2) {
        if size.x > 0.0 && size.y > 0.0 {
            self.map_size = size;
        }
    }

    pub fn pan_map(&mut self, delta: Vec2) {
        self.map_view.pan(delta);
    }

    pub fn zoom_map(&mut self, anchor: Pos2, rect: Rect, delta: f64) {
        self.map_view.zoom_at(anchor, rect, delta);
        self.clamp_map_zoom();
    }

    /// Fit to the coordinate bounds, or the world view when nothing is located.
    pub fn reset_map_view(&mut self) {
        self.map_view = MapViewport::fit(self.geo.bounds(), self.map_size, FIT_PADDING);
        self.clamp_map_zoom();
    }

    fn clamp_map_zoom(&mut self) {
        let max = self.basemap.max_zoom() as f64;
        if self.map_view.zoom > max {
            self.map_view.zoom = max;
        }
    }

    pub fn drag_legend(&mut self, dx: f32, dy: f32) {
        self.legend.drag_by(dx, dy);
    }

    pub fn wheel_legend(&mut self, delta_y: f32) -> bool {
        self.legend.wheel(delta_y)
    }

    // ---- derived outputs -------------------------------------------------

    pub fn trait_options(&self) -> Vec<TraitOption> {
        self.stats
            .options(self.metadata.merged_keys(), |key| self.display_name(key))
    }

    pub fn trait_summary(&self, search: &str, limit: Option<usize>) -> Vec<TraitSummaryEntry> {
        filter_summary(&self.summary, search, limit, |key| self.display_name(key))
    }

    /// Label, age, approximate calendar year and merged metadata values.
    pub fn node_popup(&self, id: NodeId) -> Vec<String> {
        let Some(tree) = self.tree.as_ref() else {
            return Vec::new();
        };
        let Some(node) = tree.node(id) else {
            return Vec::new();
        };
        let mut lines = vec![node.display_name().to_string()];
        if let Some(age) = tree.age(id).filter(|age| age.is_finite()) {
            lines.push(format!("Time before present: {}", format_number(age)));
            if let Some(date) = self.reference_date {
                lines.push(format!("Approximate year: {:.2}", decimal_year(date) - age));
            }
        }
        for key in self.metadata.applied() {
            if let Some(value) = node.trait_value(key) {
                lines.push(format!("{}: {}", self.display_name(key), value.display()));
            }
        }
        lines
    }

    pub fn selection_details(&self) -> SelectionDetails {
        let Some(tree) = self.tree.as_ref() else {
            return SelectionDetails::Empty;
        };
        let mut selected: Vec<NodeId> = self.selection.selected().iter().copied().collect();
        selected.sort_unstable();
        match selected.as_slice() {
            [] => SelectionDetails::Empty,
            [single] => SelectionDetails::Single {
                node: *single,
                lines: self.node_popup(*single),
            },
            many => SelectionDetails::Multi {
                count: many.len(),
                labels: many
                    .iter()
                    .take(DETAIL_LABEL_LIMIT)
                    .filter_map(|&id| tree.node(id))
                    .map(|node| node.display_name().to_string())
                    .collect(),
                truncated: many.len() > DETAIL_LABEL_LIMIT,
                total: tree.len(),
            },
        }
    }

    pub fn timeline_label(&self) -> String {
        self.timeline.label()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::fixtures::*;
    use crate::tree::metadata::MetadataColumn;
    use crate::tree::AttrValue;

    fn viewer() -> Viewer {
        let mut viewer = Viewer::new(VizSettings {
            latest_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..VizSettings::default()
        });
        viewer.load_payload(&cherry()).unwrap();
        viewer
    }

    fn country_table(rows: &[(&str, &str)]) -> MetadataTable {
        MetadataTable {
            id_field: String::from("sample_id"),
            columns: vec![MetadataColumn {
                header: String::from("Country"),
                key: String::from("country"),
            }],
            records: rows
                .iter()
                .map(|(id, value)| (id.to_lowercase(), vec![Some(AttrValue::text(*value))]))
                .collect(),
            source: Some(String::from("meta.csv")),
        }
    }

    #[test]
    fn load_propagates_through_every_component() {
        let viewer = viewer();
        assert_eq!(viewer.colors().trait_key.as_deref(), Some("height"));
        assert!(viewer.layout().is_some());
        assert_eq!(viewer.tree_frame().unwrap().glyphs.len(), 3);
        let domain = viewer.timeline().domain().unwrap();
        assert_eq!((domain.min, domain.max), (2016.0, 2024.0));
        assert_eq!(viewer.status().unwrap().kind, StatusKind::Info);
    }

    #[test]
    fn default_sort_is_increasing() {
        assert_eq!(SortOrder::default(), SortOrder::Increasing);
        assert_eq!(VizSettings::default().sort, SortOrder::Increasing);
        assert_eq!(VizSettings::default().layout_mode, LayoutMode::Time);
    }

    #[test]
    fn failed_load_keeps_previous_state() {
        let mut viewer = viewer();
        let before = viewer.tree_frame().cloned();
        let broken = payload(vec![node("X", None, None), node("Y", None, None)]);
        assert!(viewer.load_payload(&broken).is_err());
        assert_eq!(viewer.tree().unwrap().len(), 3);
        assert_eq!(viewer.tree_frame().cloned(), before);
        assert_eq!(viewer.status().unwrap().kind, StatusKind::Error);
    }

    #[test]
    fn reload_clears_selection() {
        let mut viewer = viewer();
        let a = viewer.tree().unwrap().lookup("A").unwrap();
        viewer.click_node(a, false);
        assert!(!viewer.selection().is_empty());
        viewer.load_payload(&two_clades()).unwrap();
        assert!(viewer.selection().is_empty());
    }

    #[test]
    fn single_selection_details() {
        let mut viewer = viewer();
        let a = viewer.tree().unwrap().lookup("A").unwrap();
        viewer.click_node(a, false);
        assert_eq!(
            viewer.selection_details().lines(),
            vec!["A", "Time before present: 5", "Approximate year: 2019.00"]
        );
        assert!(viewer.tree_frame().unwrap().glyphs[a].selected);
    }

    #[test]
    fn multi_selection_details_truncate_labels() {
        let mut viewer = Viewer::new(VizSettings {
            latest_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..VizSettings::default()
        });
        viewer.load_payload(&two_clades()).unwrap();
        viewer.set_brush_enabled(true);
        viewer.brush(Rect::from_min_max(Pos2::new(-1e4, -1e4), Pos2::new(1e4, 1e4)));
        match viewer.selection_details() {
            SelectionDetails::Multi {
                count,
                labels,
                truncated,
                total,
            } => {
                assert_eq!(count, 7);
                assert_eq!(labels.len(), 5);
                assert!(truncated);
                assert_eq!(total, 7);
            }
            other => panic!("unexpected details {other:?}"),
        }
    }

    #[test]
    fn metadata_merge_and_clear_reset_trait_request() {
        let mut viewer = viewer();
        let report = viewer.merge_metadata(country_table(&[("A", "Kenya"), ("B", "Peru")]));
        assert_eq!(report.matched, 2);
        assert_eq!(viewer.trait_options()[0].key, "country");
        assert_eq!(viewer.trait_options()[0].label, "Country");

        viewer.set_color_trait(TraitRequest::Key(String::from("country")));
        assert_eq!(viewer.colors().trait_key.as_deref(), Some("country"));
        let a = viewer.tree().unwrap().lookup("A").unwrap();
        assert_eq!(viewer.node_popup(a).last().unwrap(), "Country: Kenya");

        viewer.clear_metadata();
        assert_eq!(viewer.settings.color_trait, TraitRequest::Auto);
        assert_eq!(viewer.colors().trait_key.as_deref(), Some("height"));
    }

    #[test]
    fn direction_resets_for_categorical_colouring() {
        let mut viewer = viewer();
        viewer.merge_metadata(country_table(&[("A", "Kenya"), ("B", "Peru")]));
        viewer.set_color_direction(ColorDirection::Decreasing);
        assert_eq!(viewer.settings.color_direction, ColorDirection::Decreasing);
        viewer.set_color_trait(TraitRequest::Key(String::from("country")));
        assert_eq!(viewer.settings.color_direction, ColorDirection::Increasing);
    }

    #[test]
    fn metadata_before_tree_applies_on_load() {
        let mut viewer = Viewer::new(VizSettings {
            latest_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..VizSettings::default()
        });
        assert_eq!(
            viewer.merge_metadata(country_table(&[("A", "Kenya")])),
            MergeReport::default()
        );
        viewer.load_payload(&cherry()).unwrap();
        assert!(viewer.metadata().merged_keys().contains("country"));
    }

    #[test]
    fn timeline_playback_through_viewer() {
        let mut viewer = viewer();
        assert!(viewer.scrub(2018.0));
        assert!(viewer.timeline().filter_active());
        assert!(viewer.toggle_play());
        assert!(viewer.tick(0.0));
        assert!(viewer.tick(1.0));
        let cursor = viewer.timeline().cursor().unwrap();
        assert!(cursor > 2016.0 && cursor < 2024.0);
        assert!(!viewer.tick(100.0));
        assert_eq!(viewer.timeline().cursor(), Some(2024.0));
    }

    #[test]
    fn bad_basemap_keeps_current() {
        let mut viewer = viewer();
        assert!(viewer.apply_basemap("https://example.org/tiles.png").is_err());
        assert_eq!(viewer.basemap().name, "OpenStreetMap");
        viewer
            .apply_basemap(r#"{"name":"Topo","tileUrl":"https://t/{z}/{x}/{y}.png","maxZoom":5}"#)
            .unwrap();
        assert_eq!(viewer.basemap().max_zoom(), 5);
        viewer.zoom_map(Pos2::new(0.0, 0.0), Rect::from_min_size(Pos2::ZERO, Vec2::splat(100.0)), 10.0);
        assert!(viewer.map_view().zoom <= 5.0);
    }

    #[test]
    fn tree_zoom_rescales_styles() {
        let mut viewer = viewer();
        viewer.zoom_tree((0.0, 0.0), 4.0);
        assert_eq!(viewer.tree_frame().unwrap().transform.k, 4.0);
        viewer.reset_tree_view();
        assert_eq!(viewer.transform(), ViewTransform::IDENTITY);
    }
}
