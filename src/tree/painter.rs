use std::collections::HashSet;

use eframe::egui::Color32;

use super::color::{hex_color, ColorConfig, Legend};
use super::layout::{AxisTick, LayoutMode, TreeLayout, TREE_MARGIN};
use super::selection::ViewTransform;
use super::{format_number, NodeId, Tree};

pub const BRANCH_COLOR: u32 = 0xcbd5f5;
pub const BRANCH_OPACITY: f32 = 0.85;
pub const LEAF_STROKE_COLOR: Color32 = Color32::from_rgb(0x0f, 0x17, 0x2a);
pub const LEAF_STROKE_WIDTH: f32 = 0.6;
pub const LABEL_COLOR: Color32 = Color32::from_rgb(0x1f, 0x29, 0x37);
pub const GRID_COLOR: Color32 = Color32::from_rgb(0xe5, 0xe7, 0xeb);
pub const GRID_OPACITY: f32 = 0.6;
pub const SELECTED_COLOR: Color32 = Color32::from_rgb(0xbe, 0x12, 0x3c);
pub const BASE_LABEL_SIZE: f32 = 11.0;

/// Sizes in view space for the current zoom scale. Multiplying by the
/// scale gives the on-screen size, so glyphs stay legible when zoomed out
/// and do not balloon when zoomed in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomStyle {
    pub node_radius: f32,
    pub label_size: f32,
    pub label_offset: f32,
    pub branch_width: f32,
    pub grid_width: f32,
}

impl ZoomStyle {
    pub fn for_scale(node_radius: f32, k: f32) -> Self {
        let k = if k.is_finite() && k > 0.0 { k } else { 1.0 };
        Self {
            node_radius: (node_radius / k).max(1.5),
            label_size: (BASE_LABEL_SIZE / k).clamp(7.0, 18.0),
            label_offset: (node_radius + 6.0) / k,
            branch_width: (1.3 / k).max(0.6),
            grid_width: (1.0 / k).max(0.4),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeGlyph {
    pub id: NodeId,
    /// View-space position (margin included, transform not applied).
    pub position: (f32, f32),
    pub fill: Color32,
    pub leaf: bool,
    pub selected: bool,
    pub label: String,
    pub tooltip: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BranchPath {
    pub parent: NodeId,
    pub child: NodeId,
    pub points: Vec<(f32, f32)>,
    pub selected: bool,
}

/// Immutable description of one tree render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeFrame {
    pub view_size: (f32, f32),
    pub plot_origin: (f32, f32),
    pub plot_size: (f32, f32),
    pub transform: ViewTransform,
    pub style: ZoomStyle,
    pub show_labels: bool,
    pub glyphs: Vec<NodeGlyph>,
    pub branches: Vec<BranchPath>,
    pub axis_ticks: Vec<AxisTick>,
    pub axis_label: String,
    pub grid_lines: Vec<f32>,
    pub legend: Legend,
}

pub struct TreeInputs<'a> {
    pub tree: &'a Tree,
    pub layout: &'a TreeLayout,
    pub colors: &'a ColorConfig,
    pub selection: &'a HashSet<NodeId>,
    pub transform: ViewTransform,
    pub node_radius: f32,
    pub show_labels: bool,
}

/// Tooltip lines: label, age and the colouring trait value.
pub fn node_tooltip(tree: &Tree, colors: &ColorConfig, id: NodeId) -> Vec<String> {
    let Some(node) = tree.node(id) else {
        return Vec::new();
    };
    let mut lines = vec![node.display_name().to_string()];
    if let Some(age) = node.time_before_present.filter(|age| age.is_finite()) {
        lines.push(format!("Time before present: {}", format_number(age)));
    }
    if let Some(description) = colors.describe(tree, id) {
        lines.push(description);
    }
    lines
}

impl TreeFrame {
    pub fn build(inputs: &TreeInputs<'_>) -> Self {
        let TreeInputs {
            tree,
            layout,
            colors,
            selection,
            transform,
            node_radius,
            show_labels,
        } = *inputs;

        let glyphs = (0..tree.len())
            .filter_map(|id| {
                let position = layout.view_position(id)?;
                let node = tree.node(id)?;
                Some(NodeGlyph {
                    id,
                    position,
                    fill: colors.color_for(tree, id),
                    leaf: node.is_leaf(),
                    selected: selection.contains(&id),
                    label: node.display_name().to_string(),
                    tooltip: node_tooltip(tree, colors, id),
                })
            })
            .collect();

        let branches = layout
            .continuous_branches
            .iter()
            .map(|branch| BranchPath {
                parent: branch.parent,
                child: branch.child,
                points: branch
                    .points
                    .iter()
                    .map(|&(x, y)| (x + TREE_MARGIN.left, y + TREE_MARGIN.top))
                    .collect(),
                selected: selection.contains(&branch.parent) && selection.contains(&branch.child),
            })
            .collect();

        let axis_ticks = layout
            .axis_ticks
            .iter()
            .map(|tick| AxisTick {
                x: tick.x + TREE_MARGIN.left,
                ..tick.clone()
            })
            .collect();
        let grid_lines = match layout.mode {
            LayoutMode::Time => layout
                .grid_ticks
                .iter()
                .map(|x| x + TREE_MARGIN.left)
                .collect(),
            LayoutMode::Cladogram => Vec::new(),
        };

        Self {
            view_size: layout.view_size(),
            plot_origin: (TREE_MARGIN.left, TREE_MARGIN.top),
            plot_size: (layout.width, layout.height),
            transform,
            style: ZoomStyle::for_scale(node_radius, transform.k),
            show_labels,
            glyphs,
            branches,
            axis_ticks,
            axis_label: layout.axis_label.clone(),
            grid_lines,
            legend: colors.legend(),
        }
    }

    pub fn branch_color(&self) -> Color32 {
        hex_color(BRANCH_COLOR)
    }

    /// Leaf glyph under `screen` (already relative to the surface origin).
    pub fn hit_leaf(&self, screen: (f32, f32)) -> Option<NodeId> {
        let radius = (self.style.node_radius * self.transform.k).max(4.0) + 2.0;
        self.glyphs
            .iter()
            .filter(|glyph| glyph.leaf)
            .map(|glyph| {
                let (x, y) = self.transform.apply(glyph.position);
                let distance = ((x - screen.0).powi(2) + (y - screen.1).powi(2)).sqrt();
                (glyph.id, distance)
            })
            .filter(|(_, distance)| *distance <= radius)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Nearest node of any kind, for tooltips.
    pub fn hover_node(&self, screen: (f32, f32), tolerance: f32) -> Option<&NodeGlyph> {
        self.glyphs
            .iter()
            .map(|glyph| {
                let (x, y) = self.transform.apply(glyph.position);
                (glyph, ((x - screen.0).powi(2) + (y - screen.1).powi(2)).sqrt())
            })
            .filter(|(_, distance)| *distance <= tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(glyph, _)| glyph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::color::DEFAULT_TIP_COLOR;
    use crate::tree::fixtures::*;
    use crate::tree::layout::{LayoutOptions, SortOrder};
    use chrono::NaiveDate;

    fn frame(selection: &HashSet<NodeId>, k: f32) -> (Tree, TreeFrame) {
        let tree = Tree::from_payload(&cherry()).unwrap();
        let layout = TreeLayout::build(
            &tree,
            &LayoutOptions {
                mode: LayoutMode::Time,
                sort: SortOrder::Increasing,
                vertical_scale: 1.0,
                width: 600.0,
                reference_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            },
        );
        let colors = ColorConfig::fallback(DEFAULT_TIP_COLOR);
        let transform = ViewTransform {
            k,
            ..ViewTransform::IDENTITY
        };
        let frame = TreeFrame::build(&TreeInputs {
            tree: &tree,
            layout: &layout,
            colors: &colors,
            selection,
            transform,
            node_radius: 5.0,
            show_labels: true,
        });
        (tree, frame)
    }

    #[test]
    fn zoom_styles_follow_scale() {
        let style = ZoomStyle::for_scale(5.0, 1.0);
        assert_eq!(style.node_radius, 5.0);
        assert_eq!(style.label_size, 11.0);
        assert_eq!(style.branch_width, 1.3);
        let zoomed = ZoomStyle::for_scale(5.0, 16.0);
        assert_eq!(zoomed.node_radius, 1.5);
        assert_eq!(zoomed.label_size, 7.0);
        assert_eq!(zoomed.branch_width, 0.6);
        assert_eq!(zoomed.grid_width, 0.4);
        assert_eq!(ZoomStyle::for_scale(5.0, 0.5).label_size, 18.0);
    }

    #[test]
    fn branch_selected_only_when_both_ends_are() {
        let tree = Tree::from_payload(&cherry()).unwrap();
        let a = tree.lookup("A").unwrap();
        let (_, frame) = frame(&HashSet::from([a]), 1.0);
        assert!(frame.branches.iter().all(|branch| !branch.selected));
        let (_, frame) = self::frame(&HashSet::from([a, tree.root]), 1.0);
        assert_eq!(frame.branches.iter().filter(|b| b.selected).count(), 1);
    }

    #[test]
    fn glyphs_carry_tooltips_and_hit_testing() {
        let (tree, frame) = frame(&HashSet::new(), 1.0);
        let b = tree.lookup("B").unwrap();
        let glyph = frame.glyphs.iter().find(|glyph| glyph.id == b).unwrap();
        assert!(glyph.leaf);
        assert_eq!(glyph.tooltip, vec!["B", "Time before present: 0"]);
        assert_eq!(frame.hit_leaf(glyph.position), Some(b));
        assert_eq!(frame.hit_leaf((0.0, 0.0)), None);
        assert!(!frame.grid_lines.is_empty());
        assert!(frame.axis_label.starts_with("Calendar year"));
    }
}
