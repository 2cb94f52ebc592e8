use std::path::Path;

use eframe::egui::{Align, Align2, Color32, Pos2};
use svg::node::element::{Circle, Group, Line, Polygon, Polyline, Rectangle, Text};
use svg::{Document, Node};

use crate::tree::color::{color_to_hex, opacity};
use crate::tree::scene_graph::{SceneGraph, ScenePrimitive, StrokeStyle};

/// Serialise a scene to an SVG document of the scene's size.
pub fn scene_to_document(scene: &SceneGraph) -> Document {
    let width = scene.size.x.max(1.0);
    let height = scene.size.y.max(1.0);
    let mut document = Document::new()
        .set("width", width)
        .set("height", height)
        .set("viewBox", (0, 0, width.ceil() as i32, height.ceil() as i32));

    let background = Rectangle::new()
        .set("width", "100%")
        .set("height", "100%")
        .set("fill", "white");
    document = document.add(background);

    let mut group = Group::new().set("id", "scene");
    for primitive in &scene.primitives {
        group = match primitive {
            ScenePrimitive::FillRect { rect, color } => group.add(
                Rectangle::new()
                    .set("x", rect.min.x)
                    .set("y", rect.min.y)
                    .set("width", rect.width())
                    .set("height", rect.height())
                    .set("fill", color_to_hex(*color))
                    .set("fill-opacity", opacity(*color)),
            ),
            ScenePrimitive::FillCircle {
                center,
                radius,
                color,
            } => group.add(
                Circle::new()
                    .set("cx", center.x)
                    .set("cy", center.y)
                    .set("r", *radius)
                    .set("fill", color_to_hex(*color))
                    .set("fill-opacity", opacity(*color)),
            ),
            ScenePrimitive::StrokeCircle {
                center,
                radius,
                style,
            } => group.add(stroked(
                Circle::new()
                    .set("cx", center.x)
                    .set("cy", center.y)
                    .set("r", *radius)
                    .set("fill", "none"),
                style,
            )),
            ScenePrimitive::FillPolygon { points, color } => group.add(
                Polygon::new()
                    .set("points", point_list(points))
                    .set("fill", color_to_hex(*color))
                    .set("fill-opacity", opacity(*color))
                    .set("stroke", "none"),
            ),
            ScenePrimitive::StrokeLine { from, to, style } => group.add(stroked(
                Line::new()
                    .set("x1", from.x)
                    .set("y1", from.y)
                    .set("x2", to.x)
                    .set("y2", to.y),
                style,
            )),
            ScenePrimitive::StrokePolyline { points, style } => group.add(stroked(
                Polyline::new()
                    .set("points", point_list(points))
                    .set("fill", "none"),
                style,
            )),
            ScenePrimitive::Text {
                text,
                anchor,
                align,
                size,
                color,
            } => group.add(text_element(text, *anchor, *align, *size, *color)),
        };
    }

    document.add(group)
}

pub fn export_svg(scene: &SceneGraph, path: &Path) -> std::io::Result<()> {
    svg::save(path, &scene_to_document(scene))
}

fn point_list(points: &[Pos2]) -> String {
    points
        .iter()
        .map(|p| format!("{:.2},{:.2}", p.x, p.y))
        .collect::<Vec<_>>()
        .join(" ")
}

fn stroked<T: Node>(mut element: T, style: &StrokeStyle) -> T {
    element.assign("stroke", color_to_hex(style.color));
    element.assign("stroke-opacity", opacity(style.color));
    element.assign("stroke-width", style.width);
    element.assign("stroke-linecap", "round");
    if let Some((dash, gap)) = style.dash {
        element.assign("stroke-dasharray", format!("{dash},{gap}"));
    }
    element
}

fn text_element(content: &str, anchor: Pos2, align: Align2, size: f32, color: Color32) -> Text {
    let text_anchor = match align.x() {
        Align::Min => "start",
        Align::Center => "middle",
        Align::Max => "end",
    };
    let baseline = match align.y() {
        Align::Min => "hanging",
        Align::Center => "middle",
        Align::Max => "auto",
    };
    Text::new("")
        .set("x", anchor.x)
        .set("y", anchor.y)
        .set("font-size", size)
        .set("font-family", "sans-serif")
        .set("fill", color_to_hex(color))
        .set("dominant-baseline", baseline)
        .set("text-anchor", text_anchor)
        .add(svg::node::Text::new(content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use eframe::egui::Vec2;

    #[test]
    fn writes_every_primitive_kind() {
        let scene = SceneGraph {
            size: Vec2::new(120.0, 80.0),
            primitives: vec![
                ScenePrimitive::FillCircle {
                    center: Pos2::new(10.0, 10.0),
                    radius: 4.0,
                    color: Color32::from_rgb(0x25, 0x63, 0xeb),
                },
                ScenePrimitive::StrokePolyline {
                    points: vec![Pos2::new(0.0, 0.0), Pos2::new(5.0, 0.0), Pos2::new(5.0, 9.0)],
                    style: StrokeStyle::dashed(1.5, Color32::BLACK, 4.0, 4.0),
                },
                ScenePrimitive::Text {
                    text: String::from("Kenya & Peru"),
                    anchor: Pos2::new(20.0, 20.0),
                    align: Align2::LEFT_CENTER,
                    size: 11.0,
                    color: Color32::BLACK,
                },
            ],
        };
        let rendered = scene_to_document(&scene).to_string();
        assert!(rendered.contains("<circle"));
        assert!(rendered.contains("#2563eb"));
        assert!(rendered.contains("stroke-dasharray=\"4,4\""));
        assert!(rendered.contains("0.00,0.00 5.00,0.00 5.00,9.00"));
        assert!(rendered.contains("text-anchor=\"start\""));
        assert!(rendered.contains("Kenya"));
    }
}
