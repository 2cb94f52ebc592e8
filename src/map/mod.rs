use std::collections::{BTreeMap, HashSet};

use eframe::egui::Color32;
use serde::{Deserialize, Serialize};

use crate::timeline::Timeline;
use crate::tree::color::{hex_color, ColorConfig};
use crate::tree::{AttrValue, NodeId, Scalar, Tree, TreeNode};

pub mod basemap;
pub mod tiles;
pub mod viewport;

pub use basemap::{BasemapConfig, BasemapError};
pub use tiles::{TileError, TileFetcher};
pub use viewport::MapViewport;

/// Attribute keys probed for coordinates, in priority order.
pub const LAT_KEYS: [&str; 4] = ["location_lat", "latitude", "lat", "location1"];
pub const LON_KEYS: [&str; 5] = ["location_lon", "longitude", "lon", "long", "location2"];

pub const HIGHLIGHT_COLOR: Color32 = Color32::from_rgb(0xbe, 0x12, 0x3c);
pub const INTERNAL_MARKER_COLOR: Color32 = Color32::from_rgb(0x0f, 0x17, 0x2a);
pub const EDGE_COLOR: Color32 = Color32::from_rgb(0x33, 0x41, 0x55);
pub const APPEARANCE_COLOR: Color32 = Color32::from_rgb(0xfb, 0x71, 0x85);
pub const EVENT_COLOR: Color32 = Color32::from_rgb(0x25, 0x63, 0xeb);
pub const DEFAULT_HPD_COLOR: u32 = 0xf97316;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl GeoBounds {
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> Option<Self> {
        points.into_iter().fold(None, |bounds, point| {
            Some(match bounds {
                None => GeoBounds {
                    south: point.lat,
                    west: point.lon,
                    north: point.lat,
                    east: point.lon,
                },
                Some(bounds) => GeoBounds {
                    south: bounds.south.min(point.lat),
                    west: bounds.west.min(point.lon),
                    north: bounds.north.max(point.lat),
                    east: bounds.east.max(point.lon),
                },
            })
        })
    }
}

/// Credible-region overlay mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum HpdMode {
    #[default]
    None,
    /// 80% HPD location polygons (`location1_80%HPD_N` / `location2_80%HPD_N`).
    Location80,
}

fn first_number(node: &TreeNode, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| node.traits.get(*key).and_then(AttrValue::as_number))
}

/// First latitude/longitude pair among the known aliases. Only numeric
/// attribute values count.
pub fn extract_coordinates(node: &TreeNode) -> Option<GeoPoint> {
    let lat = first_number(node, &LAT_KEYS)?;
    let lon = first_number(node, &LON_KEYS)?;
    Some(GeoPoint::new(lat, lon))
}

fn numeric_entries(value: &AttrValue) -> Vec<f64> {
    match value {
        AttrValue::List(items) => items
            .iter()
            .filter_map(|item| match item {
                AttrValue::Scalar(Scalar::Number(value)) => Some(*value),
                AttrValue::Scalar(Scalar::Text(text)) => text.trim().parse().ok(),
                _ => None,
            })
            .filter(|value: &f64| value.is_finite())
            .collect(),
        _ => Vec::new(),
    }
}

/// Splits `location{1,2}_80%HPD_{bucket}` into axis and bucket.
fn hpd_key(key: &str) -> Option<(char, u32)> {
    let rest = key.strip_prefix("location")?;
    let mut chars = rest.chars();
    let axis = chars.next().filter(|axis| matches!(axis, '1' | '2'))?;
    let bucket = chars.as_str().strip_prefix("_80%HPD_")?;
    if bucket.is_empty() || !bucket.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((axis, bucket.parse().ok()?))
}

/// Pairs same-bucket latitude/longitude bound arrays into closed rings.
/// Buckets with unequal lengths or fewer than three points are skipped.
pub fn extract_hpd_polygons(node: &TreeNode) -> Vec<Vec<GeoPoint>> {
    let mut lats: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    let mut lons: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for (key, value) in &node.traits {
        let Some((axis, bucket)) = hpd_key(key) else {
            continue;
        };
        let values = numeric_entries(value);
        if values.is_empty() {
            continue;
        }
        match axis {
            '1' => lats.insert(bucket, values),
            _ => lons.insert(bucket, values),
        };
    }

    lats.into_iter()
        .filter_map(|(bucket, lat_list)| {
            let lon_list = lons.get(&bucket)?;
            if lat_list.len() != lon_list.len() || lat_list.len() < 3 {
                return None;
            }
            let mut ring: Vec<GeoPoint> = lat_list
                .iter()
                .zip(lon_list)
                .map(|(&lat, &lon)| GeoPoint::new(lat, lon))
                .collect();
            let first = ring[0];
            let last = ring[ring.len() - 1];
            if (first.lat - last.lat).abs() > 1e-6 || (first.lon - last.lon).abs() > 1e-6 {
                ring.push(first);
            }
            Some(ring)
        })
        .collect()
}

/// Per-node coordinates and credible regions, rebuilt on every payload or
/// metadata change.
#[derive(Debug, Clone, Default)]
pub struct GeoIndex {
    coords: Vec<Option<GeoPoint>>,
    polygons: Vec<Vec<Vec<GeoPoint>>>,
    bounds: Option<GeoBounds>,
}

impl GeoIndex {
    pub fn build(tree: &Tree) -> Self {
        let coords: Vec<Option<GeoPoint>> = tree.nodes.iter().map(extract_coordinates).collect();
        let polygons = tree.nodes.iter().map(extract_hpd_polygons).collect();
        let bounds = GeoBounds::from_points(coords.iter().flatten());
        Self {
            coords,
            polygons,
            bounds,
        }
    }

    pub fn coords(&self) -> &[Option<GeoPoint>] {
        &self.coords
    }

    pub fn coord(&self, id: NodeId) -> Option<GeoPoint> {
        self.coords.get(id).copied().flatten()
    }

    pub fn polygons(&self, id: NodeId) -> &[Vec<GeoPoint>] {
        self.polygons.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn bounds(&self) -> Option<GeoBounds> {
        self.bounds
    }

    pub fn located(&self) -> usize {
        self.coords.iter().flatten().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerStyle {
    pub radius: f32,
    pub stroke: Color32,
    pub stroke_width: f32,
    pub opacity: f32,
    pub fill: Color32,
    pub fill_opacity: f32,
    pub dashed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapMarker {
    pub node: NodeId,
    pub point: GeoPoint,
    pub leaf: bool,
    pub style: MarkerStyle,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapEdge {
    pub parent: NodeId,
    pub child: NodeId,
    pub from: GeoPoint,
    pub to: GeoPoint,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapLine {
    pub from: GeoPoint,
    pub to: GeoPoint,
    pub color: Color32,
    pub width: f32,
    pub opacity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapPolygon {
    pub node: NodeId,
    pub ring: Vec<GeoPoint>,
}

/// Cumulative animation state at the timeline cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnimationLayer {
    pub appearances: Vec<(NodeId, GeoPoint)>,
    pub appearance_radius: f32,
    pub events: Vec<MapLine>,
    pub latest: Option<MapLine>,
}

/// Immutable description of one map render pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapFrame {
    pub markers: Vec<MapMarker>,
    pub edges: Vec<MapEdge>,
    pub polygons: Vec<MapPolygon>,
    pub hpd_color: Color32,
    pub animation: Option<AnimationLayer>,
    pub highlight_markers: Vec<MapMarker>,
    pub highlight_edges: Vec<MapLine>,
    pub bounds: Option<GeoBounds>,
}

/// Everything the map pass reads from the shared state.
pub struct MapInputs<'a> {
    pub tree: &'a Tree,
    pub geo: &'a GeoIndex,
    pub colors: &'a ColorConfig,
    pub selection: &'a HashSet<NodeId>,
    pub brush_enabled: bool,
    pub timeline: &'a Timeline,
    pub node_radius: f32,
    pub hpd_mode: HpdMode,
    pub hpd_color: Color32,
}

impl MapFrame {
    pub fn build(inputs: &MapInputs<'_>) -> Self {
        let MapInputs {
            tree,
            geo,
            colors,
            selection,
            brush_enabled,
            timeline,
            node_radius,
            hpd_mode,
            hpd_color,
        } = *inputs;

        let mut markers = Vec::new();
        let mut displayed = HashSet::new();
        for node in &tree.nodes {
            let Some(point) = geo.coord(node.id) else {
                continue;
            };
            let leaf = node.is_leaf();
            let selected = selection.contains(&node.id);
            let brush_hidden = brush_enabled && !selected;
            let visible = !brush_hidden && timeline.is_node_visible(node.id);
            let mut style = base_marker_style(leaf, colors.color_for(tree, node.id), node_radius);
            if visible && selected {
                style.radius = (style.radius + 1.5).max(if leaf { 5.5 } else { 6.5 });
                style.stroke_width += 0.6;
                if !leaf {
                    style.fill_opacity = style.fill_opacity.max(0.2);
                }
            }
            if visible {
                displayed.insert(node.id);
            }
            markers.push(MapMarker {
                node: node.id,
                point,
                leaf,
                style,
                visible,
            });
        }

        let edges = tree
            .edges
            .iter()
            .filter_map(|&(parent, child)| {
                let from = geo.coord(parent)?;
                let to = geo.coord(child)?;
                let brush_hidden =
                    brush_enabled && !(selection.contains(&parent) && selection.contains(&child));
                let visible = !brush_hidden
                    && timeline.is_edge_visible(parent, child)
                    && displayed.contains(&parent)
                    && displayed.contains(&child);
                Some(MapEdge {
                    parent,
                    child,
                    from,
                    to,
                    visible,
                })
            })
            .collect();

        let polygons = match hpd_mode {
            HpdMode::None => Vec::new(),
            HpdMode::Location80 => markers
                .iter()
                .filter(|marker| marker.visible)
                .flat_map(|marker| {
                    geo.polygons(marker.node).iter().map(|ring| MapPolygon {
                        node: marker.node,
                        ring: ring.clone(),
                    })
                })
                .collect(),
        };

        let animation = timeline
            .cursor()
            .filter(|_| timeline.domain().is_some())
            .map(|cutoff| animation_layer(timeline, selection, cutoff, node_radius));

        let (highlight_markers, highlight_edges) = highlight_overlay(tree, geo, selection, node_radius);

        Self {
            markers,
            edges,
            polygons,
            hpd_color,
            animation,
            highlight_markers,
            highlight_edges,
            bounds: geo.bounds(),
        }
    }

    pub fn visible_markers(&self) -> impl Iterator<Item = &MapMarker> {
        self.markers.iter().filter(|marker| marker.visible)
    }

    pub fn visible_edges(&self) -> impl Iterator<Item = &MapEdge> {
        self.edges.iter().filter(|edge| edge.visible)
    }
}

fn base_marker_style(leaf: bool, node_color: Color32, node_radius: f32) -> MarkerStyle {
    if leaf {
        MarkerStyle {
            radius: (node_radius + 1.0).max(3.0),
            stroke: node_color,
            stroke_width: 1.0,
            opacity: 0.9,
            fill: node_color,
            fill_opacity: 0.85,
            dashed: false,
        }
    } else {
        MarkerStyle {
            radius: (node_radius + 2.0).max(5.0),
            stroke: INTERNAL_MARKER_COLOR,
            stroke_width: 1.4,
            opacity: 0.9,
            fill: Color32::WHITE,
            fill_opacity: 0.15,
            dashed: true,
        }
    }
}

fn animation_layer(
    timeline: &Timeline,
    selection: &HashSet<NodeId>,
    cutoff: f64,
    node_radius: f32,
) -> AnimationLayer {
    let filter = !selection.is_empty();
    let appearances = timeline
        .appeared_by(cutoff)
        .filter(|appearance| !filter || selection.contains(&appearance.node))
        .filter_map(|appearance| appearance.coord.map(|coord| (appearance.node, coord)))
        .collect();

    let mut events = Vec::new();
    let mut latest: Option<MapLine> = None;
    let mut latest_year = f64::NEG_INFINITY;
    for event in timeline.events_ended_by(cutoff) {
        if filter && !(selection.contains(&event.parent) && selection.contains(&event.child)) {
            continue;
        }
        let (Some(from), Some(to)) = (event.start, event.end) else {
            continue;
        };
        events.push(MapLine {
            from,
            to,
            color: EVENT_COLOR,
            width: 2.4,
            opacity: 0.7,
        });
        if event.end_year > latest_year {
            latest_year = event.end_year;
            latest = Some(MapLine {
                from,
                to,
                color: HIGHLIGHT_COLOR,
                width: 3.2,
                opacity: 0.85,
            });
        }
    }

    AnimationLayer {
        appearances,
        appearance_radius: (node_radius + 1.0).max(5.0),
        events,
        latest,
    }
}

/// Selection overlay drawn above the base layer; base markers keep their
/// identity and only change style.
fn highlight_overlay(
    tree: &Tree,
    geo: &GeoIndex,
    selection: &HashSet<NodeId>,
    node_radius: f32,
) -> (Vec<MapMarker>, Vec<MapLine>) {
    let mut selected: Vec<NodeId> = selection.iter().copied().collect();
    selected.sort_unstable();
    let markers = selected
        .into_iter()
        .filter_map(|id| {
            let point = geo.coord(id)?;
            let leaf = tree.node(id)?.is_leaf();
            let style = if leaf {
                MarkerStyle {
                    radius: (node_radius + 2.5).max(6.5),
                    stroke: HIGHLIGHT_COLOR,
                    stroke_width: 2.0,
                    opacity: 0.9,
                    fill: Color32::TRANSPARENT,
                    fill_opacity: 0.0,
                    dashed: false,
                }
            } else {
                MarkerStyle {
                    radius: (node_radius + 3.5).max(7.5),
                    stroke: HIGHLIGHT_COLOR,
                    stroke_width: 1.8,
                    opacity: 0.9,
                    fill: Color32::TRANSPARENT,
                    fill_opacity: 0.0,
                    dashed: true,
                }
            };
            Some(MapMarker {
                node: id,
                point,
                leaf,
                style,
                visible: true,
            })
        })
        .collect();

    let lines = tree
        .edges
        .iter()
        .filter(|(parent, child)| selection.contains(parent) && selection.contains(child))
        .filter_map(|&(parent, child)| {
            Some(MapLine {
                from: geo.coord(parent)?,
                to: geo.coord(child)?,
                color: HIGHLIGHT_COLOR,
                width: 3.0,
                opacity: 0.85,
            })
        })
        .collect();
    (markers, lines)
}

pub fn default_hpd_color() -> Color32 {
    hex_color(DEFAULT_HPD_COLOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::fixtures::*;
    use crate::tree::NodeRecord;

    fn located(record: NodeRecord, lat: f64, lon: f64) -> NodeRecord {
        with_trait(
            with_trait(record, "location_lat", AttrValue::number(lat)),
            "location_lon",
            AttrValue::number(lon),
        )
    }

    fn geo_tree() -> Tree {
        Tree::from_payload(&payload(vec![
            located(node("R", None, Some(8.0)), 10.0, 20.0),
            located(node("A", Some("R"), Some(5.0)), -5.0, 30.0),
            node("B", Some("R"), Some(0.0)),
        ]))
        .unwrap()
    }

    fn frame(tree: &Tree, selection: &HashSet<NodeId>, brush: bool, timeline: &Timeline) -> MapFrame {
        let geo = GeoIndex::build(tree);
        MapFrame::build(&MapInputs {
            tree,
            geo: &geo,
            colors: &ColorConfig::default(),
            selection,
            brush_enabled: brush,
            timeline,
            node_radius: 4.0,
            hpd_mode: HpdMode::Location80,
            hpd_color: default_hpd_color(),
        })
    }

    #[test]
    fn coordinates_follow_alias_priority() {
        let tree = Tree::from_payload(&payload(vec![with_trait(
            with_trait(
                with_trait(node("R", None, None), "lat", AttrValue::number(1.0)),
                "latitude",
                AttrValue::number(2.0),
            ),
            "long",
            AttrValue::number(3.0),
        )]))
        .unwrap();
        assert_eq!(extract_coordinates(&tree.nodes[0]), Some(GeoPoint::new(2.0, 3.0)));

        let text = Tree::from_payload(&payload(vec![with_trait(
            with_trait(node("R", None, None), "lat", AttrValue::text("1")),
            "lon",
            AttrValue::number(3.0),
        )]))
        .unwrap();
        assert_eq!(extract_coordinates(&text.nodes[0]), None);
    }

    #[test]
    fn hpd_rings_are_paired_and_closed() {
        let list = |values: &[f64]| AttrValue::List(values.iter().map(|v| AttrValue::number(*v)).collect());
        let record = node("R", None, None);
        let record = with_trait(record, "location1_80%HPD_1", list(&[0.0, 0.0, 1.0]));
        let record = with_trait(record, "location2_80%HPD_1", list(&[0.0, 1.0, 1.0]));
        let record = with_trait(record, "location1_80%HPD_2", list(&[0.0, 1.0, 1.0, 0.0]));
        let record = with_trait(record, "location2_80%HPD_2", list(&[0.0, 0.0, 1.0]));
        let record = with_trait(record, "location1_80%HPD_3", list(&[0.0, 1.0]));
        let record = with_trait(record, "location2_80%HPD_3", list(&[0.0, 1.0]));
        let tree = Tree::from_payload(&payload(vec![record])).unwrap();
        let rings = extract_hpd_polygons(&tree.nodes[0]);
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0].len(), 4);
        assert_eq!(rings[0][0], rings[0][3]);
    }

    fn with_region(record: NodeRecord, lat: f64, lon: f64) -> NodeRecord {
        let list = |values: [f64; 3]| AttrValue::List(values.iter().map(|v| AttrValue::number(*v)).collect());
        let record = with_trait(record, "location1_80%HPD_1", list([lat, lat + 1.0, lat + 1.0]));
        with_trait(record, "location2_80%HPD_1", list([lon, lon, lon + 1.0]))
    }

    #[test]
    fn regions_follow_marker_visibility() {
        let tree = Tree::from_payload(&payload(vec![
            with_region(located(node("R", None, Some(8.0)), 10.0, 20.0), 10.0, 20.0),
            with_region(located(node("A", Some("R"), Some(5.0)), -5.0, 30.0), -5.0, 30.0),
            node("B", Some("R"), Some(0.0)),
        ]))
        .unwrap();
        let a = tree.lookup("A").unwrap();
        let owners = |frame: &MapFrame| {
            let mut nodes: Vec<NodeId> = frame.polygons.iter().map(|polygon| polygon.node).collect();
            nodes.sort_unstable();
            nodes
        };

        let open = frame(&tree, &HashSet::new(), false, &Timeline::default());
        assert_eq!(owners(&open), vec![tree.root, a]);
        assert!(open.polygons.iter().all(|polygon| polygon.ring.len() == 4));

        let geo = GeoIndex::build(&tree);
        let mut timeline = Timeline::build(&tree, geo.coords(), 2024.0);
        timeline.scrub(2017.0);
        let early = frame(&tree, &HashSet::new(), false, &timeline);
        assert_eq!(owners(&early), vec![tree.root]);

        let brushed = frame(&tree, &HashSet::from([a]), true, &Timeline::default());
        assert_eq!(owners(&brushed), vec![a]);

        let hidden = MapFrame::build(&MapInputs {
            tree: &tree,
            geo: &geo,
            colors: &ColorConfig::default(),
            selection: &HashSet::new(),
            brush_enabled: false,
            timeline: &Timeline::default(),
            node_radius: 4.0,
            hpd_mode: HpdMode::None,
            hpd_color: default_hpd_color(),
        });
        assert!(hidden.polygons.is_empty());
    }

    #[test]
    fn markers_only_for_located_nodes() {
        let tree = geo_tree();
        let timeline = Timeline::default();
        let frame = frame(&tree, &HashSet::new(), false, &timeline);
        assert_eq!(frame.markers.len(), 2);
        assert_eq!(frame.edges.len(), 1);
        let root = frame.markers.iter().find(|m| m.node == tree.root).unwrap();
        assert!(root.style.dashed && !root.leaf);
        assert!(frame.highlight_markers.is_empty());
        let bounds = frame.bounds.unwrap();
        assert_eq!((bounds.south, bounds.north), (-5.0, 10.0));
    }

    #[test]
    fn brush_gates_markers_and_edges() {
        let tree = geo_tree();
        let timeline = Timeline::default();
        let a = tree.lookup("A").unwrap();
        let selection = HashSet::from([a]);
        let frame = frame(&tree, &selection, true, &timeline);
        let visible: Vec<NodeId> = frame.visible_markers().map(|m| m.node).collect();
        assert_eq!(visible, vec![a]);
        assert_eq!(frame.visible_edges().count(), 0);
        assert_eq!(frame.highlight_markers.len(), 1);

        let open = MapFrame::build(&MapInputs {
            tree: &tree,
            geo: &GeoIndex::build(&tree),
            colors: &ColorConfig::default(),
            selection: &HashSet::new(),
            brush_enabled: true,
            timeline: &timeline,
            node_radius: 4.0,
            hpd_mode: HpdMode::None,
            hpd_color: default_hpd_color(),
        });
        assert_eq!(open.visible_markers().count(), 0);
    }

    #[test]
    fn timeline_gates_markers_and_feeds_animation() {
        let tree = geo_tree();
        let geo = GeoIndex::build(&tree);
        let mut timeline = Timeline::build(&tree, geo.coords(), 2024.0);
        timeline.scrub(2017.0);
        let frame = frame(&tree, &HashSet::new(), false, &timeline);
        let visible: Vec<NodeId> = frame.visible_markers().map(|m| m.node).collect();
        assert_eq!(visible, vec![tree.root]);
        let animation = frame.animation.unwrap();
        assert_eq!(animation.appearances.len(), 1);
        assert!(animation.events.is_empty());

        timeline.scrub(2024.0);
        let frame = self::frame(&tree, &HashSet::new(), false, &timeline);
        let animation = frame.animation.unwrap();
        assert_eq!(animation.events.len(), 1);
        assert!(animation.latest.is_some());
    }
}
