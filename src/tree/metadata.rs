use std::collections::{HashMap, HashSet};

use log::{debug, info};

use super::traits::label_prefix;
use super::{AttrValue, Tree, TreeNode};

/// One data column of an external table and the attribute key it maps to.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataColumn {
    pub header: String,
    pub key: String,
}

/// Identifier-keyed attribute table. Row values line up with `columns`;
/// `None` marks an empty cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataTable {
    pub id_field: String,
    pub columns: Vec<MetadataColumn>,
    pub records: HashMap<String, Vec<Option<AttrValue>>>,
    pub source: Option<String>,
}

impl MetadataTable {
    pub fn row(&self, identifier: &str) -> Option<&[Option<AttrValue>]> {
        self.records
            .get(&normalize_identifier(identifier))
            .map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub matched: usize,
    pub keys: Vec<String>,
}

/// Trim, strip one pair of surrounding quotes, lower-case.
pub fn normalize_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|quote| {
            trimmed
                .strip_prefix(*quote)
                .and_then(|rest| rest.strip_suffix(*quote))
        })
        .unwrap_or(trimmed);
    unquoted.trim().to_lowercase()
}

/// Lookup candidates in priority order: raw label, label without quote
/// characters, identifier, then the label prefix before `|` or `/`.
fn candidates(node: &TreeNode) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Some(label) = node.label.as_deref().filter(|label| !label.is_empty()) {
        candidates.push(label.to_string());
        candidates.push(label.replace(['"', '\''], ""));
    }
    candidates.push(node.key.clone());
    for raw in [node.label.as_deref(), Some(node.key.as_str())].into_iter().flatten() {
        if let Some(prefix) = label_prefix(raw).filter(|prefix| *prefix != raw) {
            candidates.push(prefix.to_string());
        }
    }
    candidates
}

/// Loaded table plus bookkeeping for the keys injected into node bags.
#[derive(Debug, Clone, Default)]
pub struct MetadataState {
    table: Option<MetadataTable>,
    applied: Vec<String>,
    merged_keys: HashSet<String>,
    display_names: HashMap<String, String>,
    /// Node, key and the value it held before the last merge wrote it.
    overwritten: Vec<(usize, String, Option<AttrValue>)>,
}

impl MetadataState {
    pub fn table(&self) -> Option<&MetadataTable> {
        self.table.as_ref()
    }

    pub fn has_table(&self) -> bool {
        self.table.is_some()
    }

    /// Keys injected by the last merge.
    pub fn merged_keys(&self) -> &HashSet<String> {
        &self.merged_keys
    }

    pub fn applied(&self) -> &[String] {
        &self.applied
    }

    pub fn display_name(&self, key: &str) -> Option<&str> {
        self.display_names.get(key).map(String::as_str)
    }

    /// Replace the table. The caller merges afterwards.
    pub fn load(&mut self, table: MetadataTable) {
        self.table = Some(table);
    }

    /// Undo the previous merge: each written cell gets back the value it
    /// held before, or disappears if it had none. Other nodes are untouched.
    pub fn retract(&mut self, tree: &mut Tree) {
        if self.overwritten.is_empty() && self.applied.is_empty() {
            return;
        }
        for (index, key, previous) in self.overwritten.drain(..).rev() {
            let Some(node) = tree.nodes.get_mut(index) else {
                continue;
            };
            match previous {
                Some(value) => {
                    node.traits.insert(key, value);
                }
                None => {
                    node.traits.remove(&key);
                }
            }
        }
        debug!("Retracted {} metadata column(s)", self.applied.len());
        self.applied.clear();
        self.merged_keys.clear();
    }

    /// Forget the previous merge without touching any tree. Used when the
    /// tree it was applied to has been replaced.
    pub fn detach(&mut self) {
        self.applied.clear();
        self.merged_keys.clear();
        self.overwritten.clear();
    }

    /// Drop the table and its injected keys.
    pub fn clear(&mut self, tree: Option<&mut Tree>) {
        if let Some(tree) = tree {
            self.retract(tree);
        }
        self.table = None;
        self.detach();
        self.display_names.clear();
    }

    /// Retract the previous merge, then write every non-empty cell of each
    /// matched row into the node's bag. Matches are resolved before any
    /// node is touched.
    pub fn merge(&mut self, tree: &mut Tree) -> MergeReport {
        let usable = self
            .table
            .as_ref()
            .filter(|table| !table.records.is_empty() && !table.columns.is_empty());
        let Some(table) = usable else {
            self.retract(tree);
            return MergeReport::default();
        };

        let assignments: Vec<(usize, &Vec<Option<AttrValue>>)> = tree
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(index, node)| {
                candidates(node)
                    .iter()
                    .map(|candidate| normalize_identifier(candidate))
                    .filter(|key| !key.is_empty())
                    .find_map(|key| table.records.get(&key))
                    .map(|row| (index, row))
            })
            .collect();

        let mut writes: Vec<(usize, String, AttrValue)> = Vec::new();
        let mut matched = 0;
        for (index, row) in assignments {
            let before = writes.len();
            for (column, value) in table.columns.iter().zip(row) {
                if let Some(value) = value.as_ref().filter(|value| !is_blank(value)) {
                    writes.push((index, column.key.clone(), value.clone()));
                }
            }
            if writes.len() > before {
                matched += 1;
            }
        }

        let mut keys: Vec<String> = Vec::new();
        let mut display_names = HashMap::new();
        for column in &table.columns {
            if writes.iter().any(|(_, key, _)| *key == column.key) && !keys.contains(&column.key) {
                keys.push(column.key.clone());
                display_names.insert(column.key.clone(), column.header.clone());
            }
        }

        self.retract(tree);
        for (index, key, value) in writes {
            let previous = tree.nodes[index].traits.insert(key.clone(), value);
            self.overwritten.push((index, key, previous));
        }
        self.merged_keys = keys.iter().cloned().collect();
        self.display_names.extend(display_names);
        self.applied = keys.clone();

        info!(
            "Merged metadata onto {matched} node(s) across {} column(s)",
            keys.len()
        );
        MergeReport { matched, keys }
    }
}

fn is_blank(value: &AttrValue) -> bool {
    match value {
        AttrValue::Null => true,
        AttrValue::Scalar(super::Scalar::Text(text)) => text.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::fixtures::*;

    fn table(rows: &[(&str, &str)]) -> MetadataTable {
        MetadataTable {
            id_field: String::from("sample_id"),
            columns: vec![MetadataColumn {
                header: String::from("Country"),
                key: String::from("country"),
            }],
            records: rows
                .iter()
                .map(|(id, country)| {
                    (
                        normalize_identifier(id),
                        vec![(!country.is_empty()).then(|| AttrValue::text(*country))],
                    )
                })
                .collect(),
            source: None,
        }
    }

    fn labelled_tree() -> Tree {
        let mut tip = node("n1", Some("root"), Some(0.0));
        tip.label = Some(String::from("S1|extra"));
        let mut other = node("n2", Some("root"), Some(1.0));
        other.label = Some(String::from("\"S2\""));
        Tree::from_payload(&payload(vec![node("root", None, Some(2.0)), tip, other])).unwrap()
    }

    #[test]
    fn normalizes_identifiers() {
        assert_eq!(normalize_identifier("  'S1' "), "s1");
        assert_eq!(normalize_identifier("\"Abc\""), "abc");
        assert_eq!(normalize_identifier("\"open"), "\"open");
    }

    #[test]
    fn matches_label_prefix_and_quoted_labels() {
        let mut tree = labelled_tree();
        let mut state = MetadataState::default();
        state.load(table(&[("S1", "Kenya"), ("s2", "Peru")]));
        let report = state.merge(&mut tree);
        assert_eq!(report.matched, 2);
        assert_eq!(report.keys, vec![String::from("country")]);
        let n1 = tree.lookup("n1").unwrap();
        assert_eq!(
            tree.nodes[n1].trait_value("country"),
            Some(&AttrValue::text("Kenya"))
        );
        assert_eq!(state.display_name("country"), Some("Country"));
        assert!(state.merged_keys().contains("country"));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut tree = labelled_tree();
        let mut state = MetadataState::default();
        state.load(table(&[("S1", "Kenya")]));
        state.merge(&mut tree);
        let once: Vec<_> = tree.nodes.iter().map(|node| node.traits.clone()).collect();
        state.merge(&mut tree);
        let twice: Vec<_> = tree.nodes.iter().map(|node| node.traits.clone()).collect();
        assert_eq!(once, twice);
    }

    #[test]
    fn remerge_keeps_native_values_on_unmatched_nodes() {
        let mut tree = labelled_tree();
        let n1 = tree.lookup("n1").unwrap();
        let n2 = tree.lookup("n2").unwrap();
        tree.nodes[n1]
            .traits
            .insert(String::from("country"), AttrValue::text("Unknown"));
        tree.nodes[n2]
            .traits
            .insert(String::from("country"), AttrValue::text("Chile"));

        let mut state = MetadataState::default();
        state.load(table(&[("S1", "Kenya")]));
        state.merge(&mut tree);
        let once: Vec<_> = tree.nodes.iter().map(|node| node.traits.clone()).collect();
        state.merge(&mut tree);
        let twice: Vec<_> = tree.nodes.iter().map(|node| node.traits.clone()).collect();
        assert_eq!(once, twice);
        assert_eq!(
            tree.nodes[n2].trait_value("country"),
            Some(&AttrValue::text("Chile"))
        );

        state.clear(Some(&mut tree));
        assert_eq!(
            tree.nodes[n1].trait_value("country"),
            Some(&AttrValue::text("Unknown"))
        );
        assert_eq!(
            tree.nodes[n2].trait_value("country"),
            Some(&AttrValue::text("Chile"))
        );
    }

    #[test]
    fn remerge_retracts_stale_keys() {
        let mut tree = labelled_tree();
        let mut state = MetadataState::default();
        state.load(table(&[("S1", "Kenya")]));
        state.merge(&mut tree);

        let mut next = table(&[("S1", "Kenya")]);
        next.columns[0].key = String::from("nation");
        state.load(next);
        state.merge(&mut tree);
        let n1 = tree.lookup("n1").unwrap();
        assert!(tree.nodes[n1].trait_value("country").is_none());
        assert!(tree.nodes[n1].trait_value("nation").is_some());
        assert_eq!(state.applied(), &[String::from("nation")]);
    }

    #[test]
    fn empty_cells_do_not_count_as_matches() {
        let mut tree = labelled_tree();
        let mut state = MetadataState::default();
        state.load(table(&[("S1", "")]));
        let report = state.merge(&mut tree);
        assert_eq!(report, MergeReport::default());
        state.clear(Some(&mut tree));
        assert!(!state.has_table());
    }
}
