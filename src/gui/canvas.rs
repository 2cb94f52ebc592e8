use eframe::egui::{self, Color32, FontId, Painter, Pos2, Rect, Shape, Stroke, Vec2};

use crate::tree::scene_graph::{SceneGraph, ScenePrimitive, StrokeStyle};

fn stroke_shapes(points: Vec<Pos2>, style: &StrokeStyle, out: &mut Vec<Shape>) {
    let stroke = Stroke::new(style.width, style.color);
    match style.dash {
        Some((dash, gap)) => out.extend(Shape::dashed_line(&points, stroke, dash, gap)),
        None => out.push(Shape::line(points, stroke)),
    }
}

/// Egui shapes for a scene whose origin sits at `offset` on screen.
pub fn scene_shapes(painter: &Painter, scene: &SceneGraph, offset: Vec2) -> Vec<Shape> {
    let mut shapes = Vec::with_capacity(scene.primitives.len());
    let at = |p: Pos2| p + offset;
    for primitive in &scene.primitives {
        match primitive {
            ScenePrimitive::FillRect { rect, color } => {
                shapes.push(Shape::rect_filled(rect.translate(offset), 0.0, *color));
            }
            ScenePrimitive::FillCircle {
                center,
                radius,
                color,
            } => shapes.push(Shape::circle_filled(at(*center), *radius, *color)),
            ScenePrimitive::StrokeCircle {
                center,
                radius,
                style,
            } => shapes.push(Shape::circle_stroke(
                at(*center),
                *radius,
                Stroke::new(style.width, style.color),
            )),
            // Region outlines can be concave; the fill is approximate.
            ScenePrimitive::FillPolygon { points, color } => shapes.push(Shape::convex_polygon(
                points.iter().map(|p| at(*p)).collect(),
                *color,
                Stroke::NONE,
            )),
            ScenePrimitive::StrokeLine { from, to, style } => {
                stroke_shapes(vec![at(*from), at(*to)], style, &mut shapes);
            }
            ScenePrimitive::StrokePolyline { points, style } => {
                stroke_shapes(points.iter().map(|p| at(*p)).collect(), style, &mut shapes);
            }
            ScenePrimitive::Text {
                text,
                anchor,
                align,
                size,
                color,
            } => {
                let galley = painter.layout_no_wrap(text.clone(), FontId::proportional(*size), *color);
                let rect = align.anchor_size(at(*anchor), galley.size());
                shapes.push(Shape::galley(rect.min, galley, *color));
            }
        }
    }
    shapes
}

pub fn paint_scene(painter: &Painter, scene: &SceneGraph, offset: Vec2) {
    painter.extend(scene_shapes(painter, scene, offset));
}

pub fn paint_brush(painter: &Painter, rect: Rect) {
    painter.rect(
        rect,
        0.0,
        Color32::from_rgba_unmultiplied(37, 99, 235, 40),
        Stroke::new(1.0, Color32::from_rgb(37, 99, 235)),
        egui::StrokeKind::Inside,
    );
}
