use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, warn};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub mod color;
pub mod dates;
pub mod layout;
pub mod metadata;
pub mod painter;
pub mod scene_graph;
pub mod selection;
pub mod skia_renderer;
pub mod traits;
pub mod viewer;

/// Index of a node inside [`Tree::nodes`].
pub type NodeId = usize;

/// Open attribute bag carried by every node.
pub type AttributeBag = BTreeMap<String, AttrValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
    Text(String),
}

/// A raw attribute value as delivered by the tree backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Scalar(Scalar),
    List(Vec<AttrValue>),
}

impl AttrValue {
    pub fn text(value: impl Into<String>) -> Self {
        AttrValue::Scalar(Scalar::Text(value.into()))
    }

    pub fn number(value: f64) -> Self {
        AttrValue::Scalar(Scalar::Number(value))
    }

    pub fn boolean(value: bool) -> Self {
        AttrValue::Scalar(Scalar::Bool(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }

    /// Finite number stored directly in the bag, no string parsing.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttrValue::Scalar(Scalar::Number(value)) if value.is_finite() => Some(*value),
            _ => None,
        }
    }

    /// Human readable rendering; lists are joined with `, `.
    pub fn display(&self) -> String {
        match self {
            AttrValue::Null => String::new(),
            AttrValue::Scalar(Scalar::Bool(value)) => value.to_string(),
            AttrValue::Scalar(Scalar::Number(value)) => format_number(*value),
            AttrValue::Scalar(Scalar::Text(value)) => value.clone(),
            AttrValue::List(items) => items
                .iter()
                .map(AttrValue::display)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Compact number formatting shared by tooltips, legends and summaries.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return String::from("-");
    }
    if value.fract().abs() < 1e-9 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let abs = value.abs();
    if abs >= 100.0 {
        format!("{value:.1}")
    } else if abs >= 1.0 {
        format!("{value:.2}")
    } else {
        format!("{value:.3}")
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|value| !value.trim().is_empty()))
}

/// Node as delivered by `GET /api/tree`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub branch_length: Option<f64>,
    #[serde(default)]
    pub time_from_root: Option<f64>,
    #[serde(default)]
    pub time_before_present: Option<f64>,
    #[serde(default, alias = "attributes")]
    pub traits: AttributeBag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub parent_id: String,
    pub child_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub root_height: Option<f64>,
    #[serde(default)]
    pub tip_count: usize,
}

/// Raw tree payload: flat node list plus explicit edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreePayload {
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
    #[serde(default)]
    pub metadata: Option<PayloadMetadata>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StructureError {
    #[error("tree payload contains no nodes")]
    Empty,
    #[error("tree payload has no root (every node references a parent)")]
    MissingRoot,
    #[error("tree payload has {} roots ({})", .roots.len(), .roots.join(", "))]
    AmbiguousRoot { roots: Vec<String> },
    #[error("duplicate node identifier `{id}`")]
    DuplicateId { id: String },
    #[error("node `{node}` references unknown parent `{parent}`")]
    UnresolvedParent { node: String, parent: String },
    #[error("{unreachable} node(s) are not connected to the root (cycle in parent references)")]
    Cycle { unreachable: usize },
}

/// Node within the arena. `parent`/`children` are indices into the owning tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub id: NodeId,
    pub key: String,
    pub label: Option<String>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub branch_length: Option<f64>,
    pub time_from_root: Option<f64>,
    pub time_before_present: Option<f64>,
    pub traits: AttributeBag,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Label if present, otherwise the stable identifier.
    pub fn display_name(&self) -> &str {
        self.label
            .as_deref()
            .filter(|label| !label.is_empty())
            .unwrap_or(&self.key)
    }

    pub fn trait_value(&self, key: &str) -> Option<&AttrValue> {
        self.traits.get(key).filter(|value| !value.is_null())
    }
}

/// Rooted phylogeny stored as an arena of nodes indexed by [`NodeId`].
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub root: NodeId,
    pub nodes: Vec<TreeNode>,
    pub edges: Vec<(NodeId, NodeId)>,
    pub name: Option<String>,
    index: HashMap<String, NodeId>,
    max_time_from_root: Option<f64>,
}

impl Tree {
    /// Build the hierarchy from parent references. Fails on a missing or
    /// ambiguous root, unresolved parents, duplicate ids or cycles.
    pub fn from_payload(payload: &TreePayload) -> Result<Self, StructureError> {
        if payload.nodes.is_empty() {
            return Err(StructureError::Empty);
        }

        let mut index = HashMap::with_capacity(payload.nodes.len());
        for (position, record) in payload.nodes.iter().enumerate() {
            if index.insert(record.id.clone(), position).is_some() {
                return Err(StructureError::DuplicateId {
                    id: record.id.clone(),
                });
            }
        }

        let mut nodes: Vec<TreeNode> = payload
            .nodes
            .iter()
            .enumerate()
            .map(|(position, record)| TreeNode {
                id: position,
                key: record.id.clone(),
                label: record.label.clone(),
                parent: None,
                children: Vec::new(),
                branch_length: record.branch_length.filter(|v| v.is_finite()),
                time_from_root: record.time_from_root.filter(|v| v.is_finite()),
                time_before_present: record.time_before_present.filter(|v| v.is_finite()),
                traits: record.traits.clone(),
            })
            .collect();

        let mut roots = Vec::new();
        for (position, record) in payload.nodes.iter().enumerate() {
            match &record.parent_id {
                None => roots.push(position),
                Some(parent) => {
                    let parent_index =
                        *index
                            .get(parent)
                            .ok_or_else(|| StructureError::UnresolvedParent {
                                node: record.id.clone(),
                                parent: parent.clone(),
                            })?;
                    nodes[position].parent = Some(parent_index);
                    nodes[parent_index].children.push(position);
                }
            }
        }

        let root = match roots.as_slice() {
            [] => return Err(StructureError::MissingRoot),
            [root] => *root,
            many => {
                return Err(StructureError::AmbiguousRoot {
                    roots: many.iter().map(|&id| nodes[id].key.clone()).collect(),
                })
            }
        };

        let mut seen = vec![false; nodes.len()];
        let mut stack = vec![root];
        let mut reached = 0usize;
        while let Some(current) = stack.pop() {
            if seen[current] {
                continue;
            }
            seen[current] = true;
            reached += 1;
            stack.extend(nodes[current].children.iter().copied());
        }
        if reached != nodes.len() {
            return Err(StructureError::Cycle {
                unreachable: nodes.len() - reached,
            });
        }

        let edges = Self::resolve_edges(payload, &index, &nodes);
        let max_time_from_root = nodes
            .iter()
            .filter_map(|node| node.time_from_root)
            .fold(None, |acc: Option<f64>, value| {
                Some(acc.map_or(value, |current| current.max(value)))
            });

        debug!(
            "Built tree with {} nodes, {} edges, root `{}`",
            nodes.len(),
            edges.len(),
            nodes[root].key
        );

        Ok(Self {
            root,
            nodes,
            edges,
            name: payload.metadata.as_ref().and_then(|meta| meta.name.clone()),
            index,
            max_time_from_root,
        })
    }

    fn resolve_edges(
        payload: &TreePayload,
        index: &HashMap<String, NodeId>,
        nodes: &[TreeNode],
    ) -> Vec<(NodeId, NodeId)> {
        if payload.edges.is_empty() {
            return nodes
                .iter()
                .filter_map(|node| node.parent.map(|parent| (parent, node.id)))
                .collect();
        }

        let mut edges = Vec::with_capacity(payload.edges.len());
        let mut seen = HashSet::new();
        for edge in &payload.edges {
            match (index.get(&edge.parent_id), index.get(&edge.child_id)) {
                (Some(&parent), Some(&child)) => {
                    if seen.insert((parent, child)) {
                        edges.push((parent, child));
                    }
                }
                _ => warn!(
                    "Skipping edge {} -> {} with an unknown endpoint",
                    edge.parent_id, edge.child_id
                ),
            }
        }
        edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    pub fn lookup(&self, key: &str) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_leaf()).count()
    }

    /// Number of leaves beneath every node (a leaf counts itself).
    pub fn clade_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.nodes.len()];
        for id in self.postorder() {
            let node = &self.nodes[id];
            sizes[id] = if node.is_leaf() {
                1
            } else {
                node.children.iter().map(|&child| sizes[child]).sum()
            };
        }
        sizes
    }

    /// Parents before children.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(current) = stack.pop() {
            order.push(current);
            stack.extend(self.nodes[current].children.iter().rev().copied());
        }
        order
    }

    /// Children before parents.
    pub fn postorder(&self) -> Vec<NodeId> {
        let mut order = self.preorder();
        order.reverse();
        order
    }

    pub fn depths(&self) -> Vec<usize> {
        let mut depths = vec![0usize; self.nodes.len()];
        for id in self.preorder() {
            if let Some(parent) = self.nodes[id].parent {
                depths[id] = depths[parent] + 1;
            }
        }
        depths
    }

    /// Node itself followed by every ancestor up to the root.
    pub fn lineage(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            chain.push(node);
            current = self.nodes[node].parent;
        }
        chain
    }

    /// Lowest common ancestor by ancestor-chain intersection, O(depth).
    pub fn lca(&self, a: NodeId, b: NodeId) -> NodeId {
        let ancestors: HashSet<NodeId> = self.lineage(a).into_iter().collect();
        let mut current = Some(b);
        while let Some(node) = current {
            if ancestors.contains(&node) {
                return node;
            }
            current = self.nodes[node].parent;
        }
        self.root
    }

    /// True when `node` is `ancestor` or lies beneath it.
    pub fn is_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes[id].parent;
        }
        false
    }

    /// Age before present: `time_before_present`, otherwise the distance to the
    /// deepest node derived from `time_from_root`.
    pub fn age(&self, id: NodeId) -> Option<f64> {
        let node = self.nodes.get(id)?;
        node.time_before_present.or_else(|| {
            let max = self.max_time_from_root?;
            node.time_from_root.map(|tfr| max - tfr)
        })
    }

    /// Metric used for the synthetic `height` trait.
    pub fn height_metric(&self, id: NodeId) -> f64 {
        self.nodes
            .get(id)
            .and_then(|node| node.time_before_present.or(node.time_from_root))
            .unwrap_or(0.0)
    }

    /// Children of every node ordered by clade size; ties fall back to
    /// label/identifier order. The arena itself is left untouched.
    pub fn sorted_children(&self, increasing: bool) -> Vec<Vec<NodeId>> {
        let sizes = self.clade_sizes();
        self.nodes
            .iter()
            .map(|node| {
                let mut children = node.children.clone();
                children.sort_by(|&a, &b| {
                    let by_size = if increasing {
                        sizes[a].cmp(&sizes[b])
                    } else {
                        sizes[b].cmp(&sizes[a])
                    };
                    by_size.then_with(|| {
                        self.nodes[a]
                            .display_name()
                            .cmp(self.nodes[b].display_name())
                    })
                });
                children
            })
            .collect()
    }

    /// Reconstructs the wire form, including any merged traits.
    pub fn to_payload(&self) -> TreePayload {
        TreePayload {
            nodes: self
                .nodes
                .iter()
                .map(|node| NodeRecord {
                    id: node.key.clone(),
                    label: node.label.clone(),
                    parent_id: node.parent.map(|parent| self.nodes[parent].key.clone()),
                    branch_length: node.branch_length,
                    time_from_root: node.time_from_root,
                    time_before_present: node.time_before_present,
                    traits: node.traits.clone(),
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|&(parent, child)| EdgeRecord {
                    parent_id: self.nodes[parent].key.clone(),
                    child_id: self.nodes[child].key.clone(),
                })
                .collect(),
            metadata: Some(PayloadMetadata {
                name: self.name.clone(),
                root_height: self.age(self.root),
                tip_count: self.leaf_count(),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn node(id: &str, parent: Option<&str>, tbp: Option<f64>) -> NodeRecord {
        NodeRecord {
            id: id.to_string(),
            label: Some(id.to_string()),
            parent_id: parent.map(str::to_string),
            time_before_present: tbp,
            ..NodeRecord::default()
        }
    }

    pub fn with_trait(mut record: NodeRecord, key: &str, value: AttrValue) -> NodeRecord {
        record.traits.insert(key.to_string(), value);
        record
    }

    pub fn payload(nodes: Vec<NodeRecord>) -> TreePayload {
        TreePayload {
            nodes,
            edges: Vec::new(),
            metadata: None,
        }
    }

    /// R -> (A:5, B:0)
    pub fn cherry() -> TreePayload {
        payload(vec![
            node("R", None, Some(8.0)),
            node("A", Some("R"), Some(5.0)),
            node("B", Some("R"), Some(0.0)),
        ])
    }

    /// Root -> (R -> (A, B), Q -> (C, D))
    pub fn two_clades() -> TreePayload {
        payload(vec![
            node("Root", None, Some(10.0)),
            node("R", Some("Root"), Some(6.0)),
            node("Q", Some("Root"), Some(7.0)),
            node("A", Some("R"), Some(1.0)),
            node("B", Some("R"), Some(0.0)),
            node("C", Some("Q"), Some(2.0)),
            node("D", Some("Q"), Some(0.5)),
        ])
    }
}
