use std::collections::HashSet;

use eframe::egui::{Pos2, Rect};

use super::layout::TreeLayout;
use super::{NodeId, Tree};

pub const MIN_ZOOM: f32 = 0.5;
pub const MAX_ZOOM: f32 = 16.0;

/// Scale + translate applied to the tree surface (view space -> screen).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    pub k: f32,
    pub x: f32,
    pub y: f32,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ViewTransform {
    pub const IDENTITY: Self = Self {
        k: 1.0,
        x: 0.0,
        y: 0.0,
    };

    pub fn apply(&self, point: (f32, f32)) -> (f32, f32) {
        (point.0 * self.k + self.x, point.1 * self.k + self.y)
    }

    pub fn invert(&self, point: (f32, f32)) -> (f32, f32) {
        ((point.0 - self.x) / self.k, (point.1 - self.y) / self.k)
    }

    /// Zoom by `factor` keeping `anchor` fixed on screen.
    pub fn zoom_at(&mut self, anchor: (f32, f32), factor: f32) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let fixed = self.invert(anchor);
        self.k = (self.k * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        self.x = anchor.0 - fixed.0 * self.k;
        self.y = anchor.1 - fixed.1 * self.k;
    }

    pub fn pan(&mut self, dx: f32, dy: f32) {
        self.x += dx;
        self.y += dy;
    }
}

/// Owns the selected node set and the brush mode. Every mutation returns
/// whether the selection changed so the caller can propagate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionCoordinator {
    selected: HashSet<NodeId>,
    brush_enabled: bool,
    last_brushed: HashSet<NodeId>,
}

impl SelectionCoordinator {
    pub fn selected(&self) -> &HashSet<NodeId> {
        &self.selected
    }

    pub fn is_selected(&self, id: NodeId) -> bool {
        self.selected.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn brush_enabled(&self) -> bool {
        self.brush_enabled
    }

    pub fn last_brushed(&self) -> &HashSet<NodeId> {
        &self.last_brushed
    }

    pub fn set_brush_enabled(&mut self, enabled: bool) {
        self.brush_enabled = enabled;
        if !enabled {
            self.last_brushed.clear();
        }
    }

    /// Plain click replaces the selection (or clears it when clicking the
    /// sole selected node); additive click toggles membership.
    pub fn toggle(&mut self, id: NodeId, additive: bool) -> bool {
        if additive {
            if !self.selected.remove(&id) {
                self.selected.insert(id);
            }
        } else {
            let sole = self.selected.len() == 1 && self.selected.contains(&id);
            self.selected.clear();
            if !sole {
                self.selected.insert(id);
            }
            self.last_brushed.clear();
        }
        true
    }

    pub fn clear(&mut self) -> bool {
        if self.selected.is_empty() {
            return false;
        }
        self.selected.clear();
        self.last_brushed.clear();
        true
    }

    /// Click on empty tree surface; ignored while brushing.
    pub fn click_background(&mut self) -> bool {
        if self.brush_enabled {
            return false;
        }
        self.clear()
    }

    /// Rectangle in screen space against positions after the viewport
    /// transform. The raw hit set is branch-restricted before it replaces
    /// the selection.
    pub fn brush(
        &mut self,
        tree: &Tree,
        layout: &TreeLayout,
        transform: &ViewTransform,
        rect: Rect,
    ) -> bool {
        if !self.brush_enabled {
            return false;
        }
        let hits = brush_hits(layout, transform, rect);
        let restricted = restrict_to_branch(tree, &hits);
        self.last_brushed = restricted.clone();
        self.selected = restricted;
        true
    }

    /// Brush released without a rectangle.
    pub fn brush_cleared(&mut self) -> bool {
        self.last_brushed.clear();
        self.clear()
    }

    /// Drops identifiers that no longer exist after a reload.
    pub fn retain_valid(&mut self, len: usize) {
        self.selected.retain(|&id| id < len);
        self.last_brushed.retain(|&id| id < len);
    }
}

/// Nodes whose transformed view position lies inside `rect` (inclusive).
pub fn brush_hits(layout: &TreeLayout, transform: &ViewTransform, rect: Rect) -> Vec<NodeId> {
    (0..layout.positions.len())
        .filter(|&id| {
            layout
                .view_position(id)
                .map(|point| {
                    let (x, y) = transform.apply(point);
                    rect.contains(Pos2::new(x, y))
                })
                .unwrap_or(false)
        })
        .collect()
}

/// Expand/contract a raw hit set to one connected subtree: take the leaf
/// hits (or every hit when none is a leaf), fold their lowest common
/// ancestor pairwise, then keep every node on a path from a chosen leaf up
/// to that ancestor plus every hit beneath it, joined to the ancestor.
///
/// A hit below the ancestor brings its whole path up to the ancestor, not
/// just itself, so intermediate unhit nodes join the selection. Hits outside
/// the ancestor's subtree are dropped.
///
/// Each fold step walks two ancestor chains, so the whole restriction costs
/// O(leaves x depth). That is fine at interactive tree sizes.
pub fn restrict_to_branch(tree: &Tree, hits: &[NodeId]) -> HashSet<NodeId> {
    let hits: Vec<NodeId> = hits.iter().copied().filter(|&id| id < tree.len()).collect();
    let leaves: Vec<NodeId> = hits
        .iter()
        .copied()
        .filter(|&id| tree.nodes[id].is_leaf())
        .collect();
    let anchors = if leaves.is_empty() { &hits } else { &leaves };
    let Some((&first, rest)) = anchors.split_first() else {
        return HashSet::new();
    };

    let branch_root = rest.iter().fold(first, |acc, &leaf| tree.lca(acc, leaf));

    let mut restricted = HashSet::new();
    let add_path = |start: NodeId, restricted: &mut HashSet<NodeId>| {
        let mut current = Some(start);
        while let Some(id) = current {
            if !restricted.insert(id) && id != start {
                break;
            }
            if id == branch_root {
                break;
            }
            current = tree.nodes[id].parent;
        }
    };

    for &anchor in anchors {
        add_path(anchor, &mut restricted);
    }
    for &hit in &hits {
        if tree.is_descendant(hit, branch_root) {
            add_path(hit, &mut restricted);
        }
    }
    restricted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::fixtures::*;
    use crate::tree::layout::{LayoutMode, LayoutOptions, SortOrder, DEFAULT_PLOT_WIDTH};
    use chrono::NaiveDate;

    fn ids(tree: &Tree, keys: &[&str]) -> HashSet<NodeId> {
        keys.iter().map(|key| tree.lookup(key).unwrap()).collect()
    }

    fn layout(tree: &Tree) -> TreeLayout {
        TreeLayout::build(
            tree,
            &LayoutOptions {
                mode: LayoutMode::Time,
                sort: SortOrder::Decreasing,
                vertical_scale: 1.0,
                width: DEFAULT_PLOT_WIDTH,
                reference_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            },
        )
    }

    #[test]
    fn toggle_semantics() {
        let mut selection = SelectionCoordinator::default();
        selection.toggle(1, false);
        assert_eq!(selection.selected().len(), 1);
        selection.toggle(2, false);
        assert!(selection.is_selected(2) && !selection.is_selected(1));
        selection.toggle(2, false);
        assert!(selection.is_empty());
        selection.toggle(1, true);
        selection.toggle(3, true);
        assert_eq!(selection.selected().len(), 2);
        selection.toggle(1, true);
        assert!(!selection.is_selected(1) && selection.is_selected(3));
    }

    #[test]
    fn background_click_is_ignored_while_brushing() {
        let mut selection = SelectionCoordinator::default();
        selection.toggle(1, false);
        selection.set_brush_enabled(true);
        assert!(!selection.click_background());
        assert!(selection.is_selected(1));
        selection.set_brush_enabled(false);
        assert!(selection.click_background());
        assert!(selection.is_empty());
    }

    #[test]
    fn restriction_excludes_unrelated_internal_hit() {
        let tree = Tree::from_payload(&two_clades()).unwrap();
        let hits: Vec<NodeId> = ids(&tree, &["A", "B", "Q"]).into_iter().collect();
        assert_eq!(restrict_to_branch(&tree, &hits), ids(&tree, &["A", "B", "R"]));
    }

    #[test]
    fn restriction_spans_lca_across_clades() {
        let tree = Tree::from_payload(&two_clades()).unwrap();
        let hits: Vec<NodeId> = ids(&tree, &["A", "C"]).into_iter().collect();
        let restricted = restrict_to_branch(&tree, &hits);
        assert_eq!(restricted, ids(&tree, &["A", "R", "Root", "Q", "C"]));
    }

    #[test]
    fn internal_hit_below_ancestor_brings_its_path() {
        let tree = Tree::from_payload(&payload(vec![
            node("Root", None, Some(10.0)),
            node("R", Some("Root"), Some(6.0)),
            node("Q", Some("Root"), Some(7.0)),
            node("A", Some("R"), Some(1.0)),
            node("C", Some("Q"), Some(2.0)),
            node("S", Some("R"), Some(5.0)),
            node("T", Some("S"), Some(4.0)),
            node("E", Some("T"), Some(0.0)),
        ]))
        .unwrap();
        let hits: Vec<NodeId> = ids(&tree, &["A", "C", "T"]).into_iter().collect();
        assert_eq!(
            restrict_to_branch(&tree, &hits),
            ids(&tree, &["A", "R", "Root", "Q", "C", "T", "S"])
        );
    }

    #[test]
    fn restriction_without_leaves_uses_all_hits() {
        let tree = Tree::from_payload(&two_clades()).unwrap();
        let hits: Vec<NodeId> = ids(&tree, &["R", "Q"]).into_iter().collect();
        assert_eq!(
            restrict_to_branch(&tree, &hits),
            ids(&tree, &["R", "Q", "Root"])
        );
    }

    #[test]
    fn restricted_selection_is_connected_superset_of_leaf_hits() {
        let tree = Tree::from_payload(&two_clades()).unwrap();
        let hits: Vec<NodeId> = ids(&tree, &["A", "D", "R"]).into_iter().collect();
        let restricted = restrict_to_branch(&tree, &hits);
        for key in ["A", "D"] {
            assert!(restricted.contains(&tree.lookup(key).unwrap()));
        }
        let roots: Vec<&NodeId> = restricted
            .iter()
            .filter(|id| {
                tree.nodes[**id]
                    .parent
                    .map_or(true, |parent| !restricted.contains(&parent))
            })
            .collect();
        assert_eq!(roots.len(), 1);
    }

    #[test]
    fn brush_uses_transformed_positions() {
        let tree = Tree::from_payload(&cherry()).unwrap();
        let layout = layout(&tree);
        let b = tree.lookup("B").unwrap();
        let (bx, by) = layout.view_position(b).unwrap();

        let mut transform = ViewTransform::default();
        transform.pan(10.0, 20.0);
        let mut selection = SelectionCoordinator::default();
        assert!(!selection.brush(&tree, &layout, &transform, Rect::NOTHING));

        selection.set_brush_enabled(true);
        let rect = Rect::from_two_pos(
            Pos2::new(bx + 10.0 - 1.0, by + 20.0 - 1.0),
            Pos2::new(bx + 10.0, by + 20.0),
        );
        selection.brush(&tree, &layout, &transform, rect);
        assert_eq!(selection.selected(), &HashSet::from([b]));

        selection.brush_cleared();
        assert!(selection.is_empty());
    }

    #[test]
    fn zoom_is_anchored_and_clamped() {
        let mut transform = ViewTransform::default();
        transform.zoom_at((100.0, 50.0), 2.0);
        let back = transform.apply(transform.invert((100.0, 50.0)));
        assert!((back.0 - 100.0).abs() < 1e-4 && (back.1 - 50.0).abs() < 1e-4);
        assert_eq!(transform.apply((100.0, 50.0)), (100.0, 50.0));
        transform.zoom_at((0.0, 0.0), 1000.0);
        assert_eq!(transform.k, MAX_ZOOM);
        transform.zoom_at((0.0, 0.0), 0.0001);
        assert_eq!(transform.k, MIN_ZOOM);
    }
}
