use chrono::NaiveDate;
use clap::ValueEnum;

use super::dates::{decimal_year, format_date};
use super::{format_number, NodeId, Tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LayoutMode {
    /// Horizontal position follows calendar year.
    #[default]
    Time,
    /// Horizontal position follows tree depth.
    Cladogram,
}

/// Child ordering by descendant-leaf count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SortOrder {
    #[default]
    Increasing,
    Decreasing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margin {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

pub const TREE_MARGIN: Margin = Margin {
    top: 40.0,
    right: 110.0,
    bottom: 56.0,
    left: 260.0,
};

pub const DEFAULT_PLOT_WIDTH: f32 = 1100.0;
const MIN_PLOT_HEIGHT: f32 = 520.0;
const TIME_ROW_HEIGHT: f32 = 18.0;
const CLADOGRAM_ROW_HEIGHT: f32 = 14.0;

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutOptions {
    pub mode: LayoutMode,
    pub sort: SortOrder,
    pub vertical_scale: f32,
    pub width: f32,
    pub reference_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AxisTick {
    pub x: f32,
    pub value: f64,
    pub label: String,
}

/// Elbow polyline from a parent to one child: parent, corner, child.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousBranch {
    pub points: Vec<(f32, f32)>,
    pub parent: NodeId,
    pub child: NodeId,
}

/// Plot-area coordinates for every node. Add [`TREE_MARGIN`] for view space.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeLayout {
    pub positions: Vec<(f32, f32)>,
    pub edges: Vec<(NodeId, NodeId)>,
    pub continuous_branches: Vec<ContinuousBranch>,
    pub leaf_order: Vec<NodeId>,
    pub width: f32,
    pub height: f32,
    pub leaf_count: usize,
    pub mode: LayoutMode,
    /// Horizontal scale domain (calendar years or depth units).
    pub domain: (f64, f64),
    pub reference_year: f64,
    /// Calendar year per node in time mode.
    pub years: Vec<Option<f64>>,
    pub axis_ticks: Vec<AxisTick>,
    pub grid_ticks: Vec<f32>,
    pub axis_label: String,
}

impl TreeLayout {
    pub fn build(tree: &Tree, options: &LayoutOptions) -> Self {
        let width = if options.width > 0.0 {
            options.width
        } else {
            DEFAULT_PLOT_WIDTH
        };
        let children = tree.sorted_children(options.sort == SortOrder::Increasing);

        let mut leaf_order = Vec::new();
        let mut preorder = Vec::with_capacity(tree.len());
        let mut stack = vec![tree.root];
        while let Some(current) = stack.pop() {
            preorder.push(current);
            if children[current].is_empty() {
                leaf_order.push(current);
            }
            stack.extend(children[current].iter().rev().copied());
        }
        let leaf_count = leaf_order.len();

        let base_row = match options.mode {
            LayoutMode::Time => TIME_ROW_HEIGHT,
            LayoutMode::Cladogram => CLADOGRAM_ROW_HEIGHT,
        };
        let row_height = base_row * options.vertical_scale.max(0.05);
        let height = (row_height * leaf_count.max(1) as f32).max(MIN_PLOT_HEIGHT);

        let mut positions = vec![(0.0f32, 0.0f32); tree.len()];

        let spacing = if leaf_count > 1 {
            height / (leaf_count - 1) as f32
        } else {
            0.0
        };
        for (index, &leaf) in leaf_order.iter().enumerate() {
            positions[leaf].1 = if leaf_count > 1 {
                index as f32 * spacing
            } else {
                height * 0.5
            };
        }
        for &id in preorder.iter().rev() {
            if let (Some(first), Some(last)) = (children[id].first(), children[id].last()) {
                positions[id].1 = (positions[*first].1 + positions[*last].1) * 0.5;
            }
        }

        let reference_year = decimal_year(options.reference_date);
        let mut years = vec![None; tree.len()];
        let (domain, axis_label) = match options.mode {
            LayoutMode::Cladogram => {
                let depths = tree.depths();
                let max_depth = depths.iter().copied().max().unwrap_or(0).max(1) as f32;
                for &id in &preorder {
                    positions[id].0 = depths[id] as f32 / max_depth * width;
                }
                (
                    (0.0, max_depth as f64),
                    String::from("Tree depth (cladogram)"),
                )
            }
            LayoutMode::Time => {
                for (id, year) in years.iter_mut().enumerate() {
                    *year = tree.age(id).map(|age| reference_year - age);
                }
                let (mut lo, mut hi) = years
                    .iter()
                    .flatten()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &y| {
                        (lo.min(y), hi.max(y))
                    });
                if !lo.is_finite() || !hi.is_finite() {
                    lo = reference_year - 10.0;
                    hi = reference_year;
                }
                if lo == hi {
                    hi = lo + 1.0;
                }
                let (lo, hi) = nice_domain(lo, hi, 10);
                let span = hi - lo;
                for &id in &preorder {
                    positions[id].0 = match years[id] {
                        Some(year) => ((year - lo) / span) as f32 * width,
                        None => tree.nodes[id]
                            .parent
                            .map(|parent| positions[parent].0)
                            .unwrap_or(0.0),
                    };
                }
                (
                    (lo, hi),
                    format!(
                        "Calendar year (latest {})",
                        format_date(options.reference_date)
                    ),
                )
            }
        };

        let axis_count = ((width / 140.0).floor() as usize).clamp(4, 12);
        let axis_ticks = ticks(domain.0, domain.1, axis_count)
            .into_iter()
            .map(|value| AxisTick {
                x: scale_x(domain, width, value),
                value,
                label: tick_label(value, tick_step(domain.0, domain.1, axis_count)),
            })
            .collect();
        let grid_ticks = match options.mode {
            LayoutMode::Time => {
                let grid_count = ((width / 120.0).floor() as usize).clamp(4, 12);
                ticks(domain.0, domain.1, grid_count)
                    .into_iter()
                    .map(|value| scale_x(domain, width, value))
                    .collect()
            }
            LayoutMode::Cladogram => Vec::new(),
        };

        let mut edges = Vec::with_capacity(tree.len().saturating_sub(1));
        let mut continuous_branches = Vec::with_capacity(tree.len().saturating_sub(1));
        for &parent in &preorder {
            for &child in &children[parent] {
                edges.push((parent, child));
                let (xp, yp) = positions[parent];
                let (xc, yc) = positions[child];
                continuous_branches.push(ContinuousBranch {
                    points: vec![(xp, yp), (xp, yc), (xc, yc)],
                    parent,
                    child,
                });
            }
        }

        Self {
            positions,
            edges,
            continuous_branches,
            leaf_order,
            width,
            height,
            leaf_count,
            mode: options.mode,
            domain,
            reference_year,
            years,
            axis_ticks,
            grid_ticks,
            axis_label,
        }
    }

    /// Full drawing size including margins.
    pub fn view_size(&self) -> (f32, f32) {
        (
            self.width + TREE_MARGIN.left + TREE_MARGIN.right,
            self.height + TREE_MARGIN.top + TREE_MARGIN.bottom,
        )
    }

    /// Node position in view space (plot position plus margin), before the
    /// viewport transform.
    pub fn view_position(&self, id: NodeId) -> Option<(f32, f32)> {
        self.positions
            .get(id)
            .map(|&(x, y)| (x + TREE_MARGIN.left, y + TREE_MARGIN.top))
    }

    /// Inverse of the horizontal scale.
    pub fn value_at(&self, x: f32) -> f64 {
        let (lo, hi) = self.domain;
        lo + (x / self.width) as f64 * (hi - lo)
    }
}

fn scale_x(domain: (f64, f64), width: f32, value: f64) -> f32 {
    let span = domain.1 - domain.0;
    if span.abs() < f64::EPSILON {
        return 0.0;
    }
    ((value - domain.0) / span) as f32 * width
}

/// Step between roughly `count` ticks, snapped to 1, 2 or 5 times a power of ten.
pub fn tick_step(start: f64, stop: f64, count: usize) -> f64 {
    let raw = (stop - start).abs() / count.max(1) as f64;
    if !(raw > 0.0) || !raw.is_finite() {
        return 1.0;
    }
    let power = raw.log10().floor();
    let magnitude = 10f64.powf(power);
    let error = raw / magnitude;
    let factor = if error >= 50f64.sqrt() {
        10.0
    } else if error >= 10f64.sqrt() {
        5.0
    } else if error >= 2f64.sqrt() {
        2.0
    } else {
        1.0
    };
    factor * magnitude
}

/// Expands the domain outward to whole tick steps.
pub fn nice_domain(min: f64, max: f64, count: usize) -> (f64, f64) {
    if !(max > min) {
        return (min, max);
    }
    let (mut lo, mut hi) = (min, max);
    let mut previous: Option<f64> = None;
    for _ in 0..10 {
        let step = tick_step(lo, hi, count);
        if previous == Some(step) {
            break;
        }
        lo = (lo / step).floor() * step;
        hi = (hi / step).ceil() * step;
        previous = Some(step);
    }
    (lo, hi)
}

pub fn ticks(min: f64, max: f64, count: usize) -> Vec<f64> {
    if !(max > min) {
        return Vec::new();
    }
    let step = tick_step(min, max, count);
    let first = (min / step).ceil() as i64;
    let last = (max / step).floor() as i64;
    (first..=last).map(|i| i as f64 * step).collect()
}

fn tick_label(value: f64, step: f64) -> String {
    if step >= 1.0 {
        return format!("{}", value.round() as i64);
    }
    let decimals = (-step.log10()).ceil().max(0.0) as usize;
    let label = format!("{value:.decimals$}");
    if label.parse::<f64>().map_or(false, |v| v == 0.0) {
        return format_number(0.0);
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::fixtures::*;

    fn options(mode: LayoutMode) -> LayoutOptions {
        LayoutOptions {
            mode,
            sort: SortOrder::Decreasing,
            vertical_scale: 1.0,
            width: DEFAULT_PLOT_WIDTH,
            reference_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        }
    }

    #[test]
    fn time_layout_places_nodes_by_calendar_year() {
        let tree = Tree::from_payload(&cherry()).unwrap();
        let layout = TreeLayout::build(&tree, &options(LayoutMode::Time));
        let a = tree.lookup("A").unwrap();
        let b = tree.lookup("B").unwrap();
        assert_eq!(layout.years[b], Some(2024.0));
        assert_eq!(layout.years[a], Some(2019.0));
        assert!((layout.value_at(layout.positions[b].0) - 2024.0).abs() < 1e-3);
        assert!((layout.value_at(layout.positions[a].0) - 2019.0).abs() < 1e-3);
        assert!(layout.axis_label.contains("2024-01-01"));
        assert!(!layout.grid_ticks.is_empty());
    }

    #[test]
    fn layout_is_a_bijection_and_idempotent() {
        let tree = Tree::from_payload(&two_clades()).unwrap();
        let first = TreeLayout::build(&tree, &options(LayoutMode::Time));
        let second = TreeLayout::build(&tree, &options(LayoutMode::Time));
        assert_eq!(first, second);
        assert_eq!(first.positions.len(), tree.len());
        assert_eq!(first.edges.len(), tree.len() - 1);
        assert!(first
            .positions
            .iter()
            .all(|(x, y)| x.is_finite() && y.is_finite()));

        let mut leaf_rows: Vec<f32> = first
            .leaf_order
            .iter()
            .map(|&leaf| first.positions[leaf].1)
            .collect();
        leaf_rows.dedup();
        assert_eq!(leaf_rows.len(), tree.leaf_count());
    }

    #[test]
    fn sort_order_flips_leaf_order() {
        let mut payload = two_clades();
        payload.nodes.push(node("E", Some("Q"), Some(0.0)));
        let tree = Tree::from_payload(&payload).unwrap();
        let mut opts = options(LayoutMode::Cladogram);
        let decreasing = TreeLayout::build(&tree, &opts);
        opts.sort = SortOrder::Increasing;
        let increasing = TreeLayout::build(&tree, &opts);
        let key = |layout: &TreeLayout| tree.nodes[layout.leaf_order[0]].key.clone();
        assert_eq!(key(&decreasing), "C");
        assert_eq!(key(&increasing), "A");
    }

    #[test]
    fn cladogram_uses_depth() {
        let tree = Tree::from_payload(&two_clades()).unwrap();
        let layout = TreeLayout::build(&tree, &options(LayoutMode::Cladogram));
        let leaf = tree.lookup("A").unwrap();
        let internal = tree.lookup("R").unwrap();
        assert_eq!(layout.positions[tree.root].0, 0.0);
        assert_eq!(layout.positions[leaf].0, DEFAULT_PLOT_WIDTH);
        assert_eq!(layout.positions[internal].0, DEFAULT_PLOT_WIDTH / 2.0);
        assert!(layout.grid_ticks.is_empty());
        assert_eq!(layout.axis_label, "Tree depth (cladogram)");
    }

    #[test]
    fn degenerate_time_domain_is_widened() {
        let tree = Tree::from_payload(&payload(vec![
            node("R", None, Some(0.0)),
            node("A", Some("R"), Some(0.0)),
        ]))
        .unwrap();
        let layout = TreeLayout::build(&tree, &options(LayoutMode::Time));
        assert!(layout.domain.1 > layout.domain.0);
        assert!(layout.positions.iter().all(|(x, _)| x.is_finite()));
    }

    #[test]
    fn parent_sits_between_first_and_last_child() {
        let tree = Tree::from_payload(&cherry()).unwrap();
        let layout = TreeLayout::build(&tree, &options(LayoutMode::Time));
        let a = layout.positions[tree.lookup("A").unwrap()].1;
        let b = layout.positions[tree.lookup("B").unwrap()].1;
        assert_eq!(layout.positions[tree.root].1, (a + b) / 2.0);
        assert_eq!(layout.height, 520.0);
        let branch = &layout.continuous_branches[0];
        assert_eq!(branch.points.len(), 3);
        assert_eq!(branch.points[1].0, branch.points[0].0);
    }

    #[test]
    fn nice_ticks() {
        assert_eq!(nice_domain(2016.3, 2023.7, 10), (2016.0, 2024.0));
        assert_eq!(ticks(0.0, 10.0, 5), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
        assert_eq!(tick_label(2.5, 0.5), "2.5");
        assert_eq!(tick_label(2020.0, 1.0), "2020");
    }
}
