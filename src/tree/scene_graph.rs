use eframe::egui::{Align2, Color32, Pos2, Rect, Vec2};

use crate::map::{MapFrame, MapLine, MapMarker, MapViewport};

use super::color::{with_opacity, Legend, LegendPlacement};
use super::painter::{
    TreeFrame, BRANCH_OPACITY, GRID_COLOR, GRID_OPACITY, LABEL_COLOR, LEAF_STROKE_COLOR,
    LEAF_STROKE_WIDTH, SELECTED_COLOR,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    pub width: f32,
    pub color: Color32,
    pub dash: Option<(f32, f32)>,
}

impl StrokeStyle {
    pub fn solid(width: f32, color: Color32) -> Self {
        Self {
            width,
            color,
            dash: None,
        }
    }

    pub fn dashed(width: f32, color: Color32, dash: f32, gap: f32) -> Self {
        Self {
            width,
            color,
            dash: Some((dash, gap)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScenePrimitive {
    FillRect {
        rect: Rect,
        color: Color32,
    },
    FillCircle {
        center: Pos2,
        radius: f32,
        color: Color32,
    },
    StrokeCircle {
        center: Pos2,
        radius: f32,
        style: StrokeStyle,
    },
    FillPolygon {
        points: Vec<Pos2>,
        color: Color32,
    },
    StrokeLine {
        from: Pos2,
        to: Pos2,
        style: StrokeStyle,
    },
    StrokePolyline {
        points: Vec<Pos2>,
        style: StrokeStyle,
    },
    Text {
        text: String,
        anchor: Pos2,
        align: Align2,
        size: f32,
        color: Color32,
    },
}

/// Flat drawing list in surface coordinates (origin top-left).
#[derive(Debug, Clone, PartialEq)]
pub struct SceneGraph {
    pub size: Vec2,
    pub primitives: Vec<ScenePrimitive>,
}

const AXIS_COLOR: Color32 = Color32::from_rgb(0x1f, 0x29, 0x33);
const LEGEND_BACKGROUND: Color32 = Color32::from_rgba_premultiplied(242, 242, 242, 242);

pub fn build_tree_scene(frame: &TreeFrame, size: Vec2, legend: &LegendPlacement) -> SceneGraph {
    let t = frame.transform;
    let k = t.k;
    let to_screen = |p: (f32, f32)| {
        let (x, y) = t.apply(p);
        Pos2::new(x, y)
    };
    let mut primitives = vec![ScenePrimitive::FillRect {
        rect: Rect::from_min_size(Pos2::ZERO, size),
        color: Color32::WHITE,
    }];

    let (plot_x, plot_y) = frame.plot_origin;
    let (plot_w, plot_h) = frame.plot_size;
    let grid_style = StrokeStyle::dashed(
        frame.style.grid_width * k,
        with_opacity(GRID_COLOR, GRID_OPACITY),
        4.0,
        4.0,
    );
    for &x in &frame.grid_lines {
        primitives.push(ScenePrimitive::StrokeLine {
            from: to_screen((x, plot_y)),
            to: to_screen((x, plot_y + plot_h)),
            style: grid_style,
        });
    }

    let branch = StrokeStyle::solid(
        frame.style.branch_width * k,
        with_opacity(frame.branch_color(), BRANCH_OPACITY),
    );
    let selected_branch = StrokeStyle::solid(frame.style.branch_width * k * 1.8, SELECTED_COLOR);
    for path in frame.branches.iter().filter(|path| !path.selected) {
        primitives.push(ScenePrimitive::StrokePolyline {
            points: path.points.iter().copied().map(to_screen).collect(),
            style: branch,
        });
    }
    for path in frame.branches.iter().filter(|path| path.selected) {
        primitives.push(ScenePrimitive::StrokePolyline {
            points: path.points.iter().copied().map(to_screen).collect(),
            style: selected_branch,
        });
    }

    let radius = frame.style.node_radius * k;
    for glyph in frame.glyphs.iter().filter(|glyph| glyph.leaf) {
        let center = to_screen(glyph.position);
        primitives.push(ScenePrimitive::FillCircle {
            center,
            radius,
            color: with_opacity(glyph.fill, 0.98),
        });
        let outline = if glyph.selected {
            StrokeStyle::solid(2.0, SELECTED_COLOR)
        } else {
            StrokeStyle::solid(LEAF_STROKE_WIDTH, LEAF_STROKE_COLOR)
        };
        primitives.push(ScenePrimitive::StrokeCircle {
            center,
            radius,
            style: outline,
        });
        if frame.show_labels {
            primitives.push(ScenePrimitive::Text {
                text: glyph.label.clone(),
                anchor: Pos2::new(center.x + frame.style.label_offset * k, center.y),
                align: Align2::LEFT_CENTER,
                size: frame.style.label_size * k,
                color: with_opacity(LABEL_COLOR, 0.9),
            });
        }
    }
    for glyph in frame.glyphs.iter().filter(|glyph| !glyph.leaf && glyph.selected) {
        primitives.push(ScenePrimitive::StrokeCircle {
            center: to_screen(glyph.position),
            radius: radius * 0.8,
            style: StrokeStyle::dashed(1.5, SELECTED_COLOR, 3.0, 3.0),
        });
    }

    let axis_y = plot_y + plot_h;
    let axis_style = StrokeStyle::solid(1.0, AXIS_COLOR);
    primitives.push(ScenePrimitive::StrokeLine {
        from: to_screen((plot_x, axis_y)),
        to: to_screen((plot_x + plot_w, axis_y)),
        style: axis_style,
    });
    for tick in &frame.axis_ticks {
        let base = to_screen((tick.x, axis_y));
        primitives.push(ScenePrimitive::StrokeLine {
            from: base,
            to: Pos2::new(base.x, base.y + 6.0),
            style: axis_style,
        });
        primitives.push(ScenePrimitive::Text {
            text: tick.label.clone(),
            anchor: Pos2::new(base.x, base.y + 16.0),
            align: Align2::CENTER_CENTER,
            size: 10.0,
            color: AXIS_COLOR,
        });
    }
    let axis_end = to_screen((plot_x + plot_w, axis_y));
    primitives.push(ScenePrimitive::Text {
        text: frame.axis_label.clone(),
        anchor: Pos2::new(axis_end.x, axis_end.y + 36.0),
        align: Align2::RIGHT_CENTER,
        size: 12.0,
        color: AXIS_COLOR,
    });

    push_legend(&mut primitives, &frame.legend, legend);

    SceneGraph { size, primitives }
}

/// Legend bounds on the surface, used for drag hit-testing.
pub fn legend_rect(legend: &Legend, placement: &LegendPlacement) -> Option<Rect> {
    let s = placement.scale;
    let (width, height) = match legend {
        Legend::None => return None,
        Legend::Gradient { .. } => (176.0, 56.0),
        Legend::Swatches { entries, .. } => (176.0, 28.0 + entries.len() as f32 * 18.0),
    };
    Some(Rect::from_min_size(
        placement.origin - Vec2::new(8.0, 8.0) * s,
        Vec2::new(width, height) * s,
    ))
}

fn push_legend(primitives: &mut Vec<ScenePrimitive>, legend: &Legend, placement: &LegendPlacement) {
    let Some(rect) = legend_rect(legend, placement) else {
        return;
    };
    let s = placement.scale;
    let origin = placement.origin;
    primitives.push(ScenePrimitive::FillRect {
        rect,
        color: LEGEND_BACKGROUND,
    });
    match legend {
        Legend::None => {}
        Legend::Gradient {
            title,
            stops,
            min_label,
            max_label,
        } => {
            primitives.push(legend_text(title, origin + Vec2::new(0.0, 4.0) * s, 12.0 * s));
            let bar = Rect::from_min_size(origin + Vec2::new(0.0, 14.0) * s, Vec2::new(160.0, 12.0) * s);
            let segments = stops.len().saturating_sub(1).max(1);
            let step = bar.width() / segments as f32;
            for (index, color) in stops.iter().enumerate().take(segments) {
                primitives.push(ScenePrimitive::FillRect {
                    rect: Rect::from_min_size(
                        Pos2::new(bar.min.x + index as f32 * step, bar.min.y),
                        Vec2::new(step + 0.5, bar.height()),
                    ),
                    color: *color,
                });
            }
            primitives.push(ScenePrimitive::Text {
                text: min_label.clone(),
                anchor: Pos2::new(bar.min.x, bar.max.y + 8.0 * s),
                align: Align2::LEFT_CENTER,
                size: 11.0 * s,
                color: LABEL_COLOR,
            });
            primitives.push(ScenePrimitive::Text {
                text: max_label.clone(),
                anchor: Pos2::new(bar.max.x, bar.max.y + 8.0 * s),
                align: Align2::RIGHT_CENTER,
                size: 11.0 * s,
                color: LABEL_COLOR,
            });
        }
        Legend::Swatches { title, entries } => {
            primitives.push(legend_text(title, origin + Vec2::new(0.0, 4.0) * s, 12.0 * s));
            for (index, (value, color)) in entries.iter().enumerate() {
                let top = origin + Vec2::new(0.0, 14.0 + index as f32 * 18.0) * s;
                primitives.push(ScenePrimitive::FillRect {
                    rect: Rect::from_min_size(top, Vec2::splat(12.0 * s)),
                    color: *color,
                });
                primitives.push(ScenePrimitive::Text {
                    text: value.clone(),
                    anchor: top + Vec2::new(18.0, 6.0) * s,
                    align: Align2::LEFT_CENTER,
                    size: 11.0 * s,
                    color: LABEL_COLOR,
                });
            }
        }
    }
}

fn legend_text(text: &str, anchor: Pos2, size: f32) -> ScenePrimitive {
    ScenePrimitive::Text {
        text: text.to_string(),
        anchor,
        align: Align2::LEFT_CENTER,
        size,
        color: AXIS_COLOR,
    }
}

/// Map layers bottom to top: edges, markers, credible regions, animation,
/// selection overlay. Tiles are drawn by the host underneath.
pub fn build_map_scene(frame: &MapFrame, viewport: &MapViewport, size: Vec2) -> SceneGraph {
    let rect = Rect::from_min_size(Pos2::ZERO, size);
    let project = |point| viewport.to_screen(point, rect);
    let mut primitives = Vec::new();

    for edge in frame.visible_edges() {
        primitives.push(ScenePrimitive::StrokeLine {
            from: project(edge.from),
            to: project(edge.to),
            style: StrokeStyle::solid(1.0, with_opacity(crate::map::EDGE_COLOR, 0.25)),
        });
    }
    for marker in frame.visible_markers() {
        push_marker(&mut primitives, marker, project(marker.point));
    }
    let polygon_fill = with_opacity(frame.hpd_color, 0.5);
    let polygon_stroke = StrokeStyle::solid(1.0, with_opacity(frame.hpd_color, 0.65));
    for polygon in &frame.polygons {
        let points: Vec<Pos2> = polygon.ring.iter().copied().map(project).collect();
        primitives.push(ScenePrimitive::FillPolygon {
            points: points.clone(),
            color: polygon_fill,
        });
        primitives.push(ScenePrimitive::StrokePolyline {
            points,
            style: polygon_stroke,
        });
    }
    if let Some(animation) = &frame.animation {
        for line in animation.events.iter().chain(animation.latest.iter()) {
            push_line(&mut primitives, line, &project);
        }
        for (_, point) in &animation.appearances {
            let center = project(*point);
            primitives.push(ScenePrimitive::FillCircle {
                center,
                radius: animation.appearance_radius,
                color: with_opacity(crate::map::APPEARANCE_COLOR, 0.85),
            });
            primitives.push(ScenePrimitive::StrokeCircle {
                center,
                radius: animation.appearance_radius,
                style: StrokeStyle::solid(1.2, crate::map::INTERNAL_MARKER_COLOR),
            });
        }
    }
    for line in &frame.highlight_edges {
        push_line(&mut primitives, line, &project);
    }
    for marker in &frame.highlight_markers {
        push_marker(&mut primitives, marker, project(marker.point));
    }

    SceneGraph { size, primitives }
}

fn push_line(
    primitives: &mut Vec<ScenePrimitive>,
    line: &MapLine,
    project: &impl Fn(crate::map::GeoPoint) -> Pos2,
) {
    primitives.push(ScenePrimitive::StrokeLine {
        from: project(line.from),
        to: project(line.to),
        style: StrokeStyle::solid(line.width, with_opacity(line.color, line.opacity)),
    });
}

fn push_marker(primitives: &mut Vec<ScenePrimitive>, marker: &MapMarker, center: Pos2) {
    let style = &marker.style;
    if style.fill_opacity > 0.0 {
        primitives.push(ScenePrimitive::FillCircle {
            center,
            radius: style.radius,
            color: with_opacity(style.fill, style.fill_opacity),
        });
    }
    let color = with_opacity(style.stroke, style.opacity);
    primitives.push(ScenePrimitive::StrokeCircle {
        center,
        radius: style.radius,
        style: if style.dashed {
            StrokeStyle::dashed(style.stroke_width, color, 4.0, 4.0)
        } else {
            StrokeStyle::solid(style.stroke_width, color)
        },
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::color::hex_color;

    #[test]
    fn legend_rect_scales_with_placement() {
        let legend = Legend::Swatches {
            title: String::from("Node colour: region"),
            entries: vec![
                (String::from("x"), hex_color(0xff0000)),
                (String::from("y"), hex_color(0x00ff00)),
            ],
        };
        let placement = LegendPlacement::default();
        let rect = legend_rect(&legend, &placement).unwrap();
        assert_eq!(rect.height(), 64.0);
        let doubled = LegendPlacement {
            scale: 2.0,
            ..placement
        };
        assert_eq!(legend_rect(&legend, &doubled).unwrap().width(), 352.0);
        assert!(legend_rect(&Legend::None, &placement).is_none());
    }

    #[test]
    fn swatch_legend_emits_one_rect_per_entry() {
        let legend = Legend::Swatches {
            title: String::from("t"),
            entries: vec![(String::from("x"), hex_color(0xff0000))],
        };
        let mut primitives = Vec::new();
        push_legend(&mut primitives, &legend, &LegendPlacement::default());
        let rects = primitives
            .iter()
            .filter(|p| matches!(p, ScenePrimitive::FillRect { .. }))
            .count();
        assert_eq!(rects, 2);
    }
}
