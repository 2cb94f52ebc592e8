use std::collections::{BTreeMap, HashSet};

use super::{AttrValue, NodeId, Scalar, Tree};

/// Synthetic categorical trait built from the first label segment.
pub const LABEL_PREFIX_KEY: &str = "__label_prefix";
/// Synthetic numeric trait equal to each node's height metric.
pub const HEIGHT_KEY: &str = "height";
/// Categorical traits with more distinct values than this are not offered
/// for colouring unless they come from merged metadata.
pub const CATEGORY_LIMIT: usize = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TraitKind {
    Numeric,
    Categorical,
}

impl TraitKind {
    pub fn label(self) -> &'static str {
        match self {
            TraitKind::Numeric => "numeric",
            TraitKind::Categorical => "categorical",
        }
    }
}

/// One raw value after numeric-first resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Numeric(f64),
    Categorical(String),
}

/// Per-key statistics gathered from every node's attribute bag.
#[derive(Debug, Clone, PartialEq)]
pub struct TraitInfo {
    pub kind: TraitKind,
    /// Nodes exhibiting this key with a resolvable value.
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub values: BTreeMap<String, usize>,
}

impl TraitInfo {
    fn empty() -> Self {
        Self {
            kind: TraitKind::Categorical,
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            values: BTreeMap::new(),
        }
    }

    fn record(&mut self, value: Resolved) {
        self.count += 1;
        match value {
            Resolved::Numeric(number) => {
                self.kind = TraitKind::Numeric;
                self.min = self.min.min(number);
                self.max = self.max.max(number);
            }
            Resolved::Categorical(text) => {
                *self.values.entry(text).or_insert(0) += 1;
            }
        }
    }

    pub fn distinct(&self) -> usize {
        self.values.len()
    }

    pub fn has_range(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min != self.max
    }
}

/// Entry in the colour-trait picker.
#[derive(Debug, Clone, PartialEq)]
pub struct TraitOption {
    pub key: String,
    pub label: String,
    pub kind: TraitKind,
    pub coverage: f64,
}

/// Output of the trait analyzer. Rebuilt whenever the node set changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraitStats {
    pub total: usize,
    traits: BTreeMap<String, TraitInfo>,
}

impl TraitStats {
    pub fn analyze(tree: &Tree) -> Self {
        let mut traits: BTreeMap<String, TraitInfo> = BTreeMap::new();

        for node in &tree.nodes {
            for (key, value) in &node.traits {
                if let Some(resolved) = resolve_value(value) {
                    traits
                        .entry(key.clone())
                        .or_insert_with(TraitInfo::empty)
                        .record(resolved);
                }
            }

            if let Some(prefix) = node.label.as_deref().and_then(label_prefix) {
                traits
                    .entry(LABEL_PREFIX_KEY.to_string())
                    .or_insert_with(TraitInfo::empty)
                    .record(Resolved::Categorical(prefix.to_string()));
            }

            let height = tree.height_metric(node.id);
            if height.is_finite() {
                traits
                    .entry(HEIGHT_KEY.to_string())
                    .or_insert_with(TraitInfo::empty)
                    .record(Resolved::Numeric(height));
            }
        }

        for info in traits.values_mut() {
            if info.kind == TraitKind::Numeric && !(info.min.is_finite() && info.max.is_finite())
            {
                info.min = 0.0;
                info.max = 0.0;
            }
        }

        Self {
            total: tree.len(),
            traits,
        }
    }

    pub fn get(&self, key: &str) -> Option<&TraitInfo> {
        self.traits.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TraitInfo)> {
        self.traits.iter()
    }

    pub fn len(&self) -> usize {
        self.traits.len()
    }

    pub fn coverage(&self, key: &str) -> f64 {
        match self.traits.get(key) {
            Some(info) if self.total > 0 => info.count as f64 / self.total as f64,
            _ => 0.0,
        }
    }

    /// Whether `key` can drive colouring. The category ceiling is skipped for
    /// merged metadata keys and when `enforce_limit` is false.
    pub fn is_usable(&self, key: &str, merged: bool, enforce_limit: bool) -> bool {
        let Some(info) = self.traits.get(key) else {
            return false;
        };
        match info.kind {
            TraitKind::Numeric => info.has_range(),
            TraitKind::Categorical => {
                if info.distinct() < 2 {
                    return false;
                }
                !(enforce_limit && !merged && info.distinct() > CATEGORY_LIMIT)
            }
        }
    }

    /// Selectable traits: merged metadata first, ordinary traits next and
    /// `height` last, each group by coverage descending.
    pub fn options<F>(&self, merged: &HashSet<String>, display_name: F) -> Vec<TraitOption>
    where
        F: Fn(&str) -> String,
    {
        let priority = |key: &str| {
            if merged.contains(key) {
                0
            } else if key == HEIGHT_KEY {
                2
            } else {
                1
            }
        };

        let mut options: Vec<TraitOption> = self
            .traits
            .iter()
            .filter(|(key, _)| self.is_usable(key, merged.contains(key.as_str()), true))
            .map(|(key, info)| TraitOption {
                key: key.clone(),
                label: display_name(key),
                kind: info.kind,
                coverage: self.coverage(key),
            })
            .collect();

        options.sort_by(|a, b| {
            priority(&a.key)
                .cmp(&priority(&b.key))
                .then_with(|| b.coverage.total_cmp(&a.coverage))
        });
        options
    }
}

/// Numeric-first resolution. Lists yield their first resolvable element.
pub fn resolve_value(value: &AttrValue) -> Option<Resolved> {
    match value {
        AttrValue::Null => None,
        AttrValue::List(items) => items.iter().find_map(resolve_value),
        AttrValue::Scalar(scalar) => resolve_numeric_scalar(scalar)
            .map(Resolved::Numeric)
            .or_else(|| resolve_categorical_scalar(scalar).map(Resolved::Categorical)),
    }
}

pub fn resolve_numeric(value: &AttrValue) -> Option<f64> {
    match value {
        AttrValue::Null => None,
        AttrValue::List(items) => items.iter().find_map(resolve_numeric),
        AttrValue::Scalar(scalar) => resolve_numeric_scalar(scalar),
    }
}

pub fn resolve_categorical(value: &AttrValue) -> Option<String> {
    match value {
        AttrValue::Null => None,
        AttrValue::List(items) => items.iter().find_map(resolve_categorical),
        AttrValue::Scalar(scalar) => resolve_categorical_scalar(scalar),
    }
}

fn resolve_numeric_scalar(scalar: &Scalar) -> Option<f64> {
    match scalar {
        Scalar::Number(value) => value.is_finite().then_some(*value),
        Scalar::Text(text) => parse_decimal(text),
        Scalar::Bool(_) => None,
    }
}

fn resolve_categorical_scalar(scalar: &Scalar) -> Option<String> {
    match scalar {
        Scalar::Text(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Scalar::Bool(value) => Some(value.to_string()),
        Scalar::Number(value) => value.is_finite().then(|| format!("{value:.3}")),
    }
}

/// Bare signed decimal literal: `[-+]?\d*(\.\d+)?`, non-empty.
pub fn parse_decimal(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let unsigned = trimmed
        .strip_prefix('-')
        .or_else(|| trimmed.strip_prefix('+'))
        .unwrap_or(trimmed);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (unsigned, None),
    };
    let digits_ok = int_part.chars().all(|c| c.is_ascii_digit());
    let frac_ok = frac_part.map_or(true, |frac| {
        !frac.is_empty() && frac.chars().all(|c| c.is_ascii_digit())
    });
    if !digits_ok || !frac_ok || (int_part.is_empty() && frac_part.is_none()) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// First non-empty segment of a label split on `|` or `/`.
pub fn label_prefix(label: &str) -> Option<&str> {
    label.split(['|', '/']).find(|segment| !segment.is_empty())
}

/// Value of `key` on node `id` resolved for a trait of the given kind.
pub fn node_value(tree: &Tree, id: NodeId, key: &str, kind: TraitKind) -> Option<Resolved> {
    let node = tree.node(id)?;
    match key {
        LABEL_PREFIX_KEY => node
            .label
            .as_deref()
            .and_then(label_prefix)
            .map(|prefix| Resolved::Categorical(prefix.to_string())),
        HEIGHT_KEY => Some(Resolved::Numeric(tree.height_metric(id))),
        _ => {
            let raw = node.trait_value(key)?;
            match kind {
                TraitKind::Numeric => resolve_numeric(raw).map(Resolved::Numeric),
                TraitKind::Categorical => resolve_categorical(raw).map(Resolved::Categorical),
            }
        }
    }
}

/// Value counts for one attribute key, most frequent first.
#[derive(Debug, Clone, PartialEq)]
pub struct TraitSummaryEntry {
    pub key: String,
    pub total: usize,
    pub values: Vec<(String, usize)>,
}

/// Occurrence counts of stringified values per attribute key; list values
/// are counted element by element. Keys with the most occurrences first.
pub fn summarize(tree: &Tree) -> Vec<TraitSummaryEntry> {
    let mut summary: BTreeMap<&str, BTreeMap<String, usize>> = BTreeMap::new();
    for node in &tree.nodes {
        for (key, value) in &node.traits {
            let counts = summary.entry(key.as_str()).or_default();
            match value {
                AttrValue::List(items) => {
                    for item in items {
                        *counts.entry(stringify(item)).or_insert(0) += 1;
                    }
                }
                other => *counts.entry(stringify(other)).or_insert(0) += 1,
            }
        }
    }

    let mut entries: Vec<TraitSummaryEntry> = summary
        .into_iter()
        .map(|(key, counts)| {
            let total = counts.values().sum();
            let mut values: Vec<(String, usize)> = counts.into_iter().collect();
            values.sort_by(|a, b| b.1.cmp(&a.1));
            TraitSummaryEntry {
                key: key.to_string(),
                total,
                values,
            }
        })
        .collect();
    entries.sort_by(|a, b| b.total.cmp(&a.total));
    entries
}

/// Case-insensitive search over key and display name, with per-card truncation.
pub fn filter_summary<F>(
    entries: &[TraitSummaryEntry],
    search: &str,
    limit: Option<usize>,
    display_name: F,
) -> Vec<TraitSummaryEntry>
where
    F: Fn(&str) -> String,
{
    let needle = search.trim().to_lowercase();
    entries
        .iter()
        .filter(|entry| {
            needle.is_empty()
                || entry.key.to_lowercase().contains(&needle)
                || display_name(&entry.key).to_lowercase().contains(&needle)
        })
        .map(|entry| {
            let mut entry = entry.clone();
            if let Some(limit) = limit {
                entry.values.truncate(limit);
            }
            entry
        })
        .collect()
}

fn stringify(value: &AttrValue) -> String {
    match value {
        AttrValue::Null => String::new(),
        AttrValue::Scalar(Scalar::Number(number)) => {
            if number.fract() == 0.0 {
                format!("{}", *number as i64)
            } else {
                format!("{number:.3}")
            }
        }
        AttrValue::Scalar(Scalar::Bool(flag)) => flag.to_string(),
        AttrValue::Scalar(Scalar::Text(text)) => text.clone(),
        AttrValue::List(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}
