use std::collections::HashSet;

use clap::ValueEnum;
use eframe::egui::{Color32, Pos2};
use log::debug;

use super::traits::{node_value, Resolved, TraitKind, TraitStats, HEIGHT_KEY, LABEL_PREFIX_KEY};
use super::{format_number, NodeId, Tree};

pub const DEFAULT_TIP_COLOR: Color32 = Color32::from_rgb(0x25, 0x63, 0xeb);
pub const DEFAULT_INTERNAL_COLOR: Color32 = Color32::from_rgb(0x1b, 0x49, 0x65);

pub const LEGEND_MIN_SCALE: f32 = 0.7;
pub const LEGEND_MAX_SCALE: f32 = 2.5;
const LEGEND_GRADIENT_STEPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorDirection {
    #[default]
    Increasing,
    Decreasing,
}

/// Requested colouring trait: `auto` picks the best-covered usable trait.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TraitRequest {
    #[default]
    Auto,
    Key(String),
}

impl TraitRequest {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            TraitRequest::Auto
        } else {
            TraitRequest::Key(trimmed.to_string())
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            TraitRequest::Auto => None,
            TraitRequest::Key(key) => Some(key),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColorScale {
    /// No usable trait; leaves and internal nodes get fixed colours.
    Default,
    Numeric {
        min: f64,
        max: f64,
        direction: ColorDirection,
    },
    Categorical {
        values: Vec<String>,
        palette: Vec<Color32>,
    },
}

/// Resolved colouring shared by the tree and map surfaces in one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorConfig {
    pub trait_key: Option<String>,
    pub label: String,
    pub kind: TraitKind,
    pub scale: ColorScale,
    pub tip_color: Color32,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self::fallback(DEFAULT_TIP_COLOR)
    }
}

impl ColorConfig {
    pub fn fallback(tip_color: Color32) -> Self {
        Self {
            trait_key: None,
            label: String::from("Default"),
            kind: TraitKind::Categorical,
            scale: ColorScale::Default,
            tip_color,
        }
    }

    /// Select and validate the colouring trait. Explicit requests skip the
    /// category ceiling; `auto` takes the highest coverage, ties going to
    /// numeric traits and then to the alphabetically first key.
    pub fn resolve<F>(
        stats: &TraitStats,
        request: &TraitRequest,
        direction: ColorDirection,
        merged: &HashSet<String>,
        display_name: F,
        tip_color: Color32,
    ) -> Self
    where
        F: Fn(&str) -> String,
    {
        let explicit = request
            .key()
            .filter(|key| stats.is_usable(key, merged.contains(*key), false))
            .map(str::to_string);

        let selected = explicit.or_else(|| {
            let mut best: Option<(&String, f64, TraitKind)> = None;
            for (key, info) in stats.iter() {
                if !stats.is_usable(key, merged.contains(key.as_str()), true) {
                    continue;
                }
                let coverage = stats.coverage(key);
                let better = match best {
                    None => true,
                    Some((best_key, best_coverage, best_kind)) => {
                        coverage > best_coverage
                            || (coverage == best_coverage
                                && (info.kind, key.as_str()) < (best_kind, best_key.as_str()))
                    }
                };
                if better {
                    best = Some((key, coverage, info.kind));
                }
            }
            best.map(|(key, _, _)| key.clone())
        });

        let Some(key) = selected else {
            debug!("No usable colour trait; using default tip/internal colours");
            return Self::fallback(tip_color);
        };
        let Some(info) = stats.get(&key) else {
            return Self::fallback(tip_color);
        };

        let label = display_name(&key);
        let scale = match info.kind {
            TraitKind::Numeric => ColorScale::Numeric {
                min: info.min,
                max: info.max,
                direction,
            },
            TraitKind::Categorical => {
                let values: Vec<String> = info.values.keys().cloned().collect();
                let palette = build_palette(values.len());
                ColorScale::Categorical { values, palette }
            }
        };

        Self {
            trait_key: Some(key),
            label,
            kind: info.kind,
            scale,
            tip_color,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.scale, ColorScale::Numeric { .. })
    }

    fn default_color(&self, tree: &Tree, id: NodeId) -> Color32 {
        match tree.node(id) {
            Some(node) if node.is_leaf() => self.tip_color,
            _ => DEFAULT_INTERNAL_COLOR,
        }
    }

    /// Colour of node `id`; missing values fall back to the default scheme.
    pub fn color_for(&self, tree: &Tree, id: NodeId) -> Color32 {
        let Some(key) = self.trait_key.as_deref() else {
            return self.default_color(tree, id);
        };
        match (&self.scale, node_value(tree, id, key, self.kind)) {
            (ColorScale::Numeric { .. }, Some(Resolved::Numeric(value))) => {
                self.numeric_color(value)
            }
            (ColorScale::Categorical { values, palette }, Some(Resolved::Categorical(value))) => {
                values
                    .binary_search(&value)
                    .ok()
                    .and_then(|index| palette.get(index).copied())
                    .unwrap_or_else(|| self.default_color(tree, id))
            }
            _ => self.default_color(tree, id),
        }
    }

    pub fn numeric_color(&self, value: f64) -> Color32 {
        match self.scale {
            ColorScale::Numeric {
                min,
                max,
                direction,
            } => {
                let span = max - min;
                let t = if span.abs() < f64::EPSILON {
                    0.5
                } else {
                    (value - min) / span
                };
                let t = match direction {
                    ColorDirection::Increasing => t,
                    ColorDirection::Decreasing => 1.0 - t,
                };
                turbo(t)
            }
            _ => self.tip_color,
        }
    }

    /// Human readable value of the colouring trait on node `id`.
    pub fn describe(&self, tree: &Tree, id: NodeId) -> Option<String> {
        let key = self.trait_key.as_deref()?;
        let value = match node_value(tree, id, key, self.kind) {
            Some(Resolved::Numeric(value)) => format_number(value),
            Some(Resolved::Categorical(value)) => value,
            None => String::from("N/A"),
        };
        Some(format!("{}: {}", self.label, value))
    }

    pub fn legend(&self) -> Legend {
        let title = format!("Node colour: {}", self.label);
        match &self.scale {
            ColorScale::Default => Legend::None,
            ColorScale::Numeric { min, max, .. } => Legend::Gradient {
                title,
                stops: (0..=LEGEND_GRADIENT_STEPS)
                    .map(|i| {
                        let t = i as f64 / LEGEND_GRADIENT_STEPS as f64;
                        self.numeric_color(min + (max - min) * t)
                    })
                    .collect(),
                min_label: format_number(*min),
                max_label: format_number(*max),
            },
            ColorScale::Categorical { values, palette } => Legend::Swatches {
                title,
                entries: values.iter().cloned().zip(palette.iter().copied()).collect(),
            },
        }
    }
}

/// Display label for a trait key; merged metadata keys map back to the
/// original column header through `metadata_name`.
pub fn trait_display_name(key: &str, metadata_name: Option<&str>) -> String {
    match key {
        LABEL_PREFIX_KEY => String::from("Label Prefix (sample ID)"),
        HEIGHT_KEY => String::from("Height (time before present)"),
        _ => metadata_name.unwrap_or(key).to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Legend {
    None,
    Gradient {
        title: String,
        stops: Vec<Color32>,
        min_label: String,
        max_label: String,
    },
    Swatches {
        title: String,
        entries: Vec<(String, Color32)>,
    },
}

/// Where the legend sits on the tree surface; dragged and wheel-scaled by the user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegendPlacement {
    pub origin: Pos2,
    pub scale: f32,
}

impl Default for LegendPlacement {
    fn default() -> Self {
        Self {
            origin: Pos2::new(16.0, 40.0),
            scale: 1.0,
        }
    }
}

impl LegendPlacement {
    pub fn drag_by(&mut self, dx: f32, dy: f32) {
        self.origin.x += dx;
        self.origin.y += dy;
    }

    /// Wheel up grows, wheel down shrinks, in 0.15 steps.
    pub fn wheel(&mut self, delta_y: f32) -> bool {
        let step = if delta_y > 0.0 { 0.15 } else { -0.15 };
        let next = (self.scale + step).clamp(LEGEND_MIN_SCALE, LEGEND_MAX_SCALE);
        let changed = (next - self.scale).abs() > f32::EPSILON;
        self.scale = next;
        changed
    }
}

const BASE_PALETTE: [u32; 28] = [
    // Tableau10
    0x4e79a7, 0xf28e2c, 0xe15759, 0x76b7b2, 0x59a14f, 0xedc949, 0xaf7aa1, 0xff9da7, 0x9c755f,
    0xbab0ab, // Set3
    0x8dd3c7, 0xffffb3, 0xbebada, 0xfb8072, 0x80b1d3, 0xfdb462, 0xb3de69, 0xfccde5, 0xd9d9d9,
    0xbc80bd, 0xccebc5, 0xffed6f, // extras
    0x0f172a, 0x2563eb, 0xf97316, 0x0ea5e9, 0x22c55e, 0xfacc15,
];

const SPECTRAL: [u32; 11] = [
    0x9e0142, 0xd53e4f, 0xf46d43, 0xfdae61, 0xfee08b, 0xffffbf, 0xe6f598, 0xabdda4, 0x66c2a5,
    0x3288bd, 0x5e4fa2,
];

pub fn hex_color(rgb: u32) -> Color32 {
    Color32::from_rgb((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8)
}

/// Palette for `size` sorted categories. Beyond the base palette every
/// colour is sampled evenly along the spectral ramp.
pub fn build_palette(size: usize) -> Vec<Color32> {
    if size <= BASE_PALETTE.len() {
        return BASE_PALETTE[..size].iter().copied().map(hex_color).collect();
    }
    (0..size)
        .map(|i| spectral(i as f64 / (size - 1) as f64))
        .collect()
}

/// Turbo colormap polynomial approximation.
pub fn turbo(t: f64) -> Color32 {
    let t = t.clamp(0.0, 1.0);
    let channel = |v: f64| v.round().clamp(0.0, 255.0) as u8;
    let r = 34.61 + t * (1172.33 - t * (10793.56 - t * (33300.12 - t * (38394.49 - t * 14825.05))));
    let g = 23.31 + t * (557.33 + t * (1225.33 - t * (3574.96 - t * (1073.77 + t * 707.56))));
    let b = 27.2 + t * (3211.1 - t * (15327.97 - t * (27814.0 - t * (22569.18 - t * 6838.66))));
    Color32::from_rgb(channel(r), channel(g), channel(b))
}

/// Spectral ramp with uniform B-spline interpolation between stops.
pub fn spectral(t: f64) -> Color32 {
    let stops: Vec<[f64; 3]> = SPECTRAL
        .iter()
        .map(|&rgb| {
            [
                ((rgb >> 16) & 0xff) as f64,
                ((rgb >> 8) & 0xff) as f64,
                (rgb & 0xff) as f64,
            ]
        })
        .collect();
    let n = stops.len() - 1;
    let t = t.clamp(0.0, 1.0);
    let i = if t >= 1.0 {
        n - 1
    } else {
        ((t * n as f64).floor() as usize).min(n - 1)
    };
    let local = (t - i as f64 / n as f64) * n as f64;
    let mut rgb = [0u8; 3];
    for (c, out) in rgb.iter_mut().enumerate() {
        let v1 = stops[i][c];
        let v2 = stops[i + 1][c];
        let v0 = if i > 0 { stops[i - 1][c] } else { 2.0 * v1 - v2 };
        let v3 = if i < n - 1 { stops[i + 2][c] } else { 2.0 * v2 - v1 };
        *out = basis(local, v0, v1, v2, v3).round().clamp(0.0, 255.0) as u8;
    }
    Color32::from_rgb(rgb[0], rgb[1], rgb[2])
}

fn basis(t1: f64, v0: f64, v1: f64, v2: f64, v3: f64) -> f64 {
    let t2 = t1 * t1;
    let t3 = t2 * t1;
    ((1.0 - 3.0 * t1 + 3.0 * t2 - t3) * v0
        + (4.0 - 6.0 * t2 + 3.0 * t3) * v1
        + (1.0 + 3.0 * t1 + 3.0 * t2 - 3.0 * t3) * v2
        + t3 * v3)
        / 6.0
}

pub fn color_to_hex(color: Color32) -> String {
    let [r, g, b, _] = color.to_srgba_unmultiplied();
    format!("#{r:02x}{g:02x}{b:02x}")
}

/// Same hue with its alpha replaced by `opacity` in `[0, 1]`.
pub fn with_opacity(color: Color32, opacity: f32) -> Color32 {
    let [r, g, b, _] = color.to_srgba_unmultiplied();
    Color32::from_rgba_unmultiplied(r, g, b, (opacity.clamp(0.0, 1.0) * 255.0).round() as u8)
}

pub fn opacity(color: Color32) -> f32 {
    color.a() as f32 / 255.0
}

/// Parses `#rrggbb` / `rrggbb`.
pub fn parse_hex_color(raw: &str) -> Option<Color32> {
    let digits = raw.trim().trim_start_matches('#');
    if digits.len() != 6 {
        return None;
    }
    u32::from_str_radix(digits, 16).ok().map(hex_color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::fixtures::*;
    use crate::tree::{AttrValue, Tree};

    fn names(key: &str) -> String {
        trait_display_name(key, None)
    }

    fn region_tree() -> Tree {
        let mut nodes = vec![with_trait(
            node("N0", None, Some(10.0)),
            "region",
            AttrValue::text("x"),
        )];
        for i in 1..11 {
            let value = if i == 10 { "y" } else { "x" };
            nodes.push(with_trait(
                node(&format!("N{i}"), Some("N0"), Some(i as f64 * 0.5)),
                "region",
                AttrValue::text(value),
            ));
        }
        let mut payload = payload(nodes);
        for record in &mut payload.nodes {
            record.label = None;
        }
        Tree::from_payload(&payload).unwrap()
    }

    #[test]
    fn auto_tie_prefers_numeric_trait() {
        let tree = region_tree();
        let stats = TraitStats::analyze(&tree);
        assert_eq!(stats.coverage("region"), 1.0);
        assert_eq!(stats.coverage(HEIGHT_KEY), 1.0);
        let config = ColorConfig::resolve(
            &stats,
            &TraitRequest::Auto,
            ColorDirection::Increasing,
            &HashSet::new(),
            names,
            DEFAULT_TIP_COLOR,
        );
        assert_eq!(config.trait_key.as_deref(), Some(HEIGHT_KEY));
        assert_eq!(config.label, "Height (time before present)");
        assert!(config.is_numeric());
    }

    #[test]
    fn explicit_request_and_categorical_colors() {
        let tree = region_tree();
        let stats = TraitStats::analyze(&tree);
        let config = ColorConfig::resolve(
            &stats,
            &TraitRequest::parse("region"),
            ColorDirection::Increasing,
            &HashSet::new(),
            names,
            DEFAULT_TIP_COLOR,
        );
        assert_eq!(config.trait_key.as_deref(), Some("region"));
        let palette = build_palette(2);
        assert_eq!(config.color_for(&tree, 0), palette[0]);
        assert_eq!(config.color_for(&tree, 10), palette[1]);
        assert!(matches!(config.legend(), Legend::Swatches { ref entries, .. } if entries.len() == 2));
    }

    #[test]
    fn unusable_request_falls_back_to_auto() {
        let tree = region_tree();
        let stats = TraitStats::analyze(&tree);
        let config = ColorConfig::resolve(
            &stats,
            &TraitRequest::parse("missing"),
            ColorDirection::Increasing,
            &HashSet::new(),
            names,
            DEFAULT_TIP_COLOR,
        );
        assert_eq!(config.trait_key.as_deref(), Some(HEIGHT_KEY));
    }

    #[test]
    fn default_scheme_without_traits() {
        let tree = Tree::from_payload(&payload(vec![
            node("R", None, None),
            node("A", Some("R"), None),
        ]))
        .unwrap();
        let mut stripped = tree.clone();
        for node in &mut stripped.nodes {
            node.label = None;
        }
        let stats = TraitStats::analyze(&stripped);
        let config = ColorConfig::resolve(
            &stats,
            &TraitRequest::Auto,
            ColorDirection::Increasing,
            &HashSet::new(),
            names,
            DEFAULT_TIP_COLOR,
        );
        assert_eq!(config.scale, ColorScale::Default);
        assert_eq!(config.color_for(&stripped, 1), DEFAULT_TIP_COLOR);
        assert_eq!(config.color_for(&stripped, 0), DEFAULT_INTERNAL_COLOR);
        assert_eq!(config.legend(), Legend::None);
    }

    #[test]
    fn numeric_direction_reverses_ramp() {
        let mut config = ColorConfig::fallback(DEFAULT_TIP_COLOR);
        config.scale = ColorScale::Numeric {
            min: 0.0,
            max: 10.0,
            direction: ColorDirection::Increasing,
        };
        let low = config.numeric_color(0.0);
        let high = config.numeric_color(10.0);
        config.scale = ColorScale::Numeric {
            min: 0.0,
            max: 10.0,
            direction: ColorDirection::Decreasing,
        };
        assert_eq!(config.numeric_color(0.0), high);
        assert_eq!(config.numeric_color(10.0), low);
    }

    #[test]
    fn ramps_hit_known_endpoints() {
        assert_eq!(turbo(0.0), Color32::from_rgb(35, 23, 27));
        assert_eq!(spectral(0.0), hex_color(0x9e0142));
        assert_eq!(spectral(1.0), hex_color(0x5e4fa2));
        assert_eq!(build_palette(3)[0], hex_color(0x4e79a7));
        let large = build_palette(40);
        assert_eq!(large.len(), 40);
        assert_eq!(large[0], hex_color(0x9e0142));
    }

    #[test]
    fn legend_scale_is_clamped() {
        let mut placement = LegendPlacement::default();
        for _ in 0..20 {
            placement.wheel(1.0);
        }
        assert_eq!(placement.scale, LEGEND_MAX_SCALE);
        for _ in 0..20 {
            placement.wheel(-1.0);
        }
        assert_eq!(placement.scale, LEGEND_MIN_SCALE);
    }

    #[test]
    fn hex_round_trip() {
        let color = parse_hex_color("#f97316").unwrap();
        assert_eq!(color_to_hex(color), "#f97316");
        assert!(parse_hex_color("nope").is_none());
    }
}
