use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};

use crate::map::{GeoIndex, GeoPoint};
use crate::tree::Tree;

fn position(point: GeoPoint) -> Value {
    json!([point.lon, point.lat])
}

/// One Point per located node and one LineString per edge whose ends are
/// both located. Coordinates are `[lon, lat]`.
pub fn map_geojson(tree: &Tree, geo: &GeoIndex) -> Value {
    let mut features = Vec::new();

    for node in &tree.nodes {
        let Some(point) = geo.coord(node.id) else {
            continue;
        };
        let mut properties = Map::new();
        properties.insert(String::from("id"), Value::from(node.key.as_str()));
        properties.insert(
            String::from("label"),
            node.label.as_deref().map_or(Value::Null, Value::from),
        );
        properties.insert(String::from("leaf"), Value::from(node.is_leaf()));
        properties.insert(
            String::from("time_before_present"),
            node.time_before_present.map_or(Value::Null, Value::from),
        );
        properties.insert(
            String::from("time_from_root"),
            node.time_from_root.map_or(Value::Null, Value::from),
        );
        properties.insert(
            String::from("attributes"),
            serde_json::to_value(&node.traits).unwrap_or(Value::Null),
        );
        features.push(json!({
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": position(point) },
            "properties": properties,
        }));
    }

    for &(parent, child) in &tree.edges {
        let (Some(from), Some(to)) = (geo.coord(parent), geo.coord(child)) else {
            continue;
        };
        features.push(json!({
            "type": "Feature",
            "geometry": {
                "type": "LineString",
                "coordinates": [position(from), position(to)],
            },
            "properties": {
                "parent": tree.nodes[parent].key,
                "child": tree.nodes[child].key,
            },
        }));
    }

    json!({ "type": "FeatureCollection", "features": features })
}

pub fn export_geojson(tree: &Tree, geo: &GeoIndex, path: &Path) -> Result<()> {
    let collection = map_geojson(tree, geo);
    let text = serde_json::to_string_pretty(&collection)?;
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::fixtures::*;
    use crate::tree::AttrValue;

    fn located(record: crate::tree::NodeRecord, lat: f64, lon: f64) -> crate::tree::NodeRecord {
        with_trait(
            with_trait(record, "lat", AttrValue::number(lat)),
            "lon",
            AttrValue::number(lon),
        )
    }

    #[test]
    fn points_and_resolvable_lines() {
        let tree = Tree::from_payload(&payload(vec![
            located(node("R", None, Some(8.0)), -1.3, 36.8),
            located(node("A", Some("R"), Some(5.0)), -12.0, -77.0),
            node("B", Some("R"), Some(0.0)),
        ]))
        .unwrap();
        let geo = GeoIndex::build(&tree);
        let collection = map_geojson(&tree, &geo);
        let features = collection["features"].as_array().unwrap();
        assert_eq!(features.len(), 3);

        let points: Vec<&Value> = features
            .iter()
            .filter(|f| f["geometry"]["type"] == "Point")
            .collect();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0]["geometry"]["coordinates"], json!([36.8, -1.3]));
        assert_eq!(points[0]["properties"]["id"], "R");
        assert_eq!(points[0]["properties"]["attributes"]["lat"], json!(-1.3));

        let line = features
            .iter()
            .find(|f| f["geometry"]["type"] == "LineString")
            .unwrap();
        assert_eq!(line["properties"]["child"], "A");
    }
}
