//! Display list built from a laid-out subtree
//!
//! Both rasterizers consume the same [`DisplayList`], which keeps the
//! primary and secondary capture strategies pixel-compatible.

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbaImage;

use crate::dom::{Document, NodeId};
use crate::platform::decode_data_url;
use crate::rendering::layout::{layout_subtree, LayoutKind, Rect, GLYPH_ADVANCE};
use crate::rendering::style::{parse_background, parse_border, parse_box_shadow, BoxShadow, Color, Fill, LinearGradient};
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        rect: Rect,
        color: Color,
    },
    Gradient {
        rect: Rect,
        gradient: LinearGradient,
        opacity: f32,
    },
    Image {
        rect: Rect,
        image: Arc<RgbaImage>,
        opacity: f32,
    },
    /// `rect` is the border box casting the shadow
    Shadow {
        rect: Rect,
        shadow: BoxShadow,
        opacity: f32,
    },
    Text {
        x: f32,
        y: f32,
        lines: Vec<String>,
        font_size: f32,
        line_height: f32,
        color: Color,
    },
}

/// Paint commands in logical pixels, back to front
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayList {
    pub width: f32,
    pub height: f32,
    pub background: Option<Color>,
    pub commands: Vec<PaintCommand>,
}

impl DisplayList {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Build the display list for `node` and its descendants.
///
/// Images are painted only when their `src` is a decodable `data:` URL;
/// anything else is treated as not yet loaded and left out.
pub fn build_display_list(doc: &Document, node: NodeId, background: Option<Color>) -> Result<DisplayList> {
    let (root, nodes) = layout_subtree(doc, node)?;
    let mut commands = Vec::new();
    let mut images: HashMap<String, Option<Arc<RgbaImage>>> = HashMap::new();

    for laid in &nodes {
        if laid.opacity <= 0.0 || laid.rect.is_empty() {
            continue;
        }
        if let LayoutKind::Text {
            lines,
            font_size,
            line_height,
            color,
        } = &laid.kind
        {
            commands.push(PaintCommand::Text {
                x: laid.rect.x,
                y: laid.rect.y,
                lines: lines.clone(),
                font_size: *font_size,
                line_height: *line_height,
                color: color.with_opacity(laid.opacity),
            });
            continue;
        }
        let style = doc.computed_style(laid.node);
        let get = |prop: &str| style.iter().find(|(k, _)| k == prop).map(|(_, v)| v.as_str());
        if get("visibility") == Some("hidden") {
            continue;
        }

        // CSS paints outer shadows below the background, first layer on top
        let shadows = get("box-shadow").map(parse_box_shadow).unwrap_or_default();
        for shadow in shadows.iter().rev().filter(|s| !s.inset) {
            commands.push(PaintCommand::Shadow {
                rect: laid.rect,
                shadow: *shadow,
                opacity: laid.opacity,
            });
        }

        // the background property applied last wins
        let fill = style
            .iter()
            .rev()
            .filter(|(k, _)| matches!(k.as_str(), "background" | "background-image" | "background-color"))
            .find_map(|(_, v)| parse_background(v));
        match fill {
            Some(Fill::Solid(color)) if !color.is_transparent() => commands.push(PaintCommand::SolidRect {
                rect: laid.rect,
                color: color.with_opacity(laid.opacity),
            }),
            Some(Fill::Linear(gradient)) => commands.push(PaintCommand::Gradient {
                rect: laid.rect,
                gradient,
                opacity: laid.opacity,
            }),
            _ => {}
        }

        if laid.kind == LayoutKind::Image {
            if let Some(src) = doc.attr(laid.node, "src") {
                let decoded = images
                    .entry(src.to_string())
                    .or_insert_with(|| decode_image_src(src))
                    .clone();
                if let Some(image) = decoded {
                    commands.push(PaintCommand::Image {
                        rect: laid.rect,
                        image,
                        opacity: laid.opacity,
                    });
                }
            }
        }

        for shadow in shadows.iter().rev().filter(|s| s.inset) {
            commands.push(PaintCommand::Shadow {
                rect: laid.rect,
                shadow: *shadow,
                opacity: laid.opacity,
            });
        }

        if let Some((width, color)) = get("border").and_then(parse_border) {
            push_border(&mut commands, laid.rect, width, color.with_opacity(laid.opacity));
        }
    }

    Ok(DisplayList {
        width: root.width,
        height: root.height,
        background,
        commands,
    })
}

fn decode_image_src(src: &str) -> Option<Arc<RgbaImage>> {
    let (_, bytes) = decode_data_url(src).ok()?;
    match image::load_from_memory(&bytes) {
        Ok(img) => Some(Arc::new(img.to_rgba8())),
        Err(e) => {
            log::debug!("[paint] skipping undecodable image: {}", e);
            None
        }
    }
}

fn push_border(commands: &mut Vec<PaintCommand>, rect: Rect, width: f32, color: Color) {
    let w = width.min(rect.width / 2.0).min(rect.height / 2.0);
    if w <= 0.0 || color.is_transparent() {
        return;
    }
    let edges = [
        Rect::new(rect.x, rect.y, rect.width, w),
        Rect::new(rect.x, rect.y + rect.height - w, rect.width, w),
        Rect::new(rect.x, rect.y + w, w, rect.height - 2.0 * w),
        Rect::new(rect.x + rect.width - w, rect.y + w, w, rect.height - 2.0 * w),
    ];
    for edge in edges {
        commands.push(PaintCommand::SolidRect { rect: edge, color });
    }
}

/// Shape of a shadow before blur: outer shadows grow the offset border box
/// by the spread, inset shadows cut a hole shrunk by it.
pub fn shadow_shape(rect: Rect, shadow: &BoxShadow) -> Rect {
    let s = if shadow.inset { -shadow.spread } else { shadow.spread };
    Rect::new(
        rect.x + shadow.offset_x - s,
        rect.y + shadow.offset_y - s,
        (rect.width + 2.0 * s).max(0.0),
        (rect.height + 2.0 * s).max(0.0),
    )
}

/// Area a shadow can touch
pub fn shadow_extent(rect: Rect, shadow: &BoxShadow) -> Rect {
    if shadow.inset {
        return rect;
    }
    let shape = shadow_shape(rect, shadow);
    let r = shadow.blur / 2.0;
    Rect::new(shape.x - r, shape.y - r, shape.width + 2.0 * r, shape.height + 2.0 * r)
}

/// Shadow coverage at the logical point `(x, y)`.
///
/// Blur is a linear ramp `blur` wide centred on each edge of the shape.
/// Outer shadows are clipped out of the border box, inset shadows to it.
pub fn shadow_coverage(rect: Rect, shadow: &BoxShadow, x: f32, y: f32) -> f32 {
    let in_box = x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height;
    let shape = shadow_shape(rect, shadow);
    let r = shadow.blur / 2.0;
    let cov = axis_coverage(x, shape.x, shape.x + shape.width, r) * axis_coverage(y, shape.y, shape.y + shape.height, r);
    match (shadow.inset, in_box) {
        (true, true) => 1.0 - cov,
        (false, false) => cov,
        _ => 0.0,
    }
}

fn axis_coverage(p: f32, a0: f32, a1: f32, r: f32) -> f32 {
    if a1 <= a0 {
        return 0.0;
    }
    if r <= 0.0 {
        return if p >= a0 && p < a1 { 1.0 } else { 0.0 };
    }
    let rise = ((p - (a0 - r)) / (2.0 * r)).clamp(0.0, 1.0);
    let fall = ((a1 + r - p) / (2.0 * r)).clamp(0.0, 1.0);
    rise.min(fall)
}

/// Boxes standing in for glyphs: one per non-whitespace character, centered
/// in its line.
pub fn glyph_boxes(x: f32, y: f32, lines: &[String], font_size: f32, line_height: f32) -> Vec<Rect> {
    let advance = font_size * GLYPH_ADVANCE;
    let glyph_h = font_size * 0.6;
    let mut boxes = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let top = y + i as f32 * line_height + (line_height - glyph_h) / 2.0;
        for (j, ch) in line.chars().enumerate() {
            if ch.is_whitespace() {
                continue;
            }
            let x0 = x + j as f32 * advance + advance * 0.15;
            boxes.push(Rect::new(x0, top, advance * 0.7, glyph_h));
        }
    }
    boxes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Viewport;

    fn doc(html: &str) -> Document {
        Document::parse(html, Viewport { width: 400, height: 300 })
    }

    #[test]
    fn background_and_border_commands() {
        let d = doc(r#"<div id="a" style="width: 100px; height: 50px; background: #ff0000; border: 2px solid #000"></div>"#);
        let a = d.query_selector("#a").unwrap();
        let list = build_display_list(&d, a, None).unwrap();
        assert_eq!(list.width, 100.0);
        assert_eq!(list.height, 50.0);
        assert_eq!(list.commands.len(), 5);
        match &list.commands[0] {
            PaintCommand::SolidRect { rect, color } => {
                assert_eq!(*rect, Rect::new(0.0, 0.0, 100.0, 50.0));
                assert_eq!(*color, Color::rgba(255, 0, 0, 255));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn hidden_and_transparent_nodes_paint_nothing() {
        let d = doc(r#"<div id="a" style="width: 10px; height: 10px"><div style="height: 5px; background: red; visibility: hidden"></div><div style="height: 5px; background: red; opacity: 0"></div></div>"#);
        let a = d.query_selector("#a").unwrap();
        let list = build_display_list(&d, a, Some(Color::WHITE)).unwrap();
        assert!(list.is_empty());
        assert_eq!(list.background, Some(Color::WHITE));
    }

    #[test]
    fn remote_images_are_not_painted() {
        let d = doc(r#"<div id="a" style="width: 10px; height: 10px"><img src="https://example.com/a.png" width="10" height="10"></div>"#);
        let a = d.query_selector("#a").unwrap();
        let list = build_display_list(&d, a, None).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn glyph_boxes_skip_spaces() {
        let boxes = glyph_boxes(0.0, 0.0, &["a b".to_string()], 10.0, 12.5);
        assert_eq!(boxes.len(), 2);
        assert!((boxes[1].x - (2.0 * 6.0 + 0.9)).abs() < 1e-4);
        assert!((boxes[0].y - 3.25).abs() < 1e-4);
    }

    #[test]
    fn shadows_bracket_the_background() {
        let d = doc(r#"<div id="a" style="width: 40px; height: 20px; background: #fff; box-shadow: inset 0 1px 0 #eee, 0 2px 4px rgba(0,0,0,0.5), 0 1px 0 #000"></div>"#);
        let a = d.query_selector("#a").unwrap();
        let list = build_display_list(&d, a, None).unwrap();
        let kinds: Vec<_> = list
            .commands
            .iter()
            .map(|c| match c {
                PaintCommand::Shadow { shadow, .. } if shadow.inset => "inset",
                PaintCommand::Shadow { shadow, .. } if shadow.offset_y == 1.0 => "lip",
                PaintCommand::Shadow { .. } => "drop",
                PaintCommand::SolidRect { .. } => "background",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["lip", "drop", "background", "inset"]);
    }

    #[test]
    fn stylesheet_rules_reach_the_display_list() {
        let d = doc(r##"<style>.card { background-color: #00ff00 } #a { border: 1px solid #000 }</style>
            <div id="a" class="card" style="width: 10px; height: 10px"></div>"##);
        let a = d.query_selector("#a").unwrap();
        let list = build_display_list(&d, a, None).unwrap();
        assert_eq!(list.commands.len(), 5);
        assert_eq!(
            list.commands[0],
            PaintCommand::SolidRect {
                rect: Rect::new(0.0, 0.0, 10.0, 10.0),
                color: Color::rgba(0, 255, 0, 255),
            }
        );
    }

    #[test]
    fn shadow_coverage_ramps_across_blur() {
        let rect = Rect::new(10.0, 10.0, 20.0, 10.0);
        let drop = BoxShadow {
            offset_x: 0.0,
            offset_y: 4.0,
            blur: 4.0,
            spread: 0.0,
            color: Color::BLACK,
            inset: false,
        };
        assert_eq!(shadow_coverage(rect, &drop, 20.0, 15.0), 0.0);
        assert_eq!(shadow_coverage(rect, &drop, 20.0, 21.0), 1.0);
        assert!((shadow_coverage(rect, &drop, 20.0, 24.0) - 0.5).abs() < 1e-4);
        assert_eq!(shadow_coverage(rect, &drop, 20.0, 26.5), 0.0);
        assert_eq!(shadow_extent(rect, &drop), Rect::new(8.0, 12.0, 24.0, 14.0));

        let lip = BoxShadow {
            offset_y: 2.0,
            blur: 0.0,
            inset: true,
            ..drop
        };
        assert_eq!(shadow_coverage(rect, &lip, 20.0, 10.5), 1.0);
        assert_eq!(shadow_coverage(rect, &lip, 20.0, 15.0), 0.0);
        assert_eq!(shadow_coverage(rect, &lip, 20.0, 31.0), 0.0);
    }
}
