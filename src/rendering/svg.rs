//! SVG serialization of display lists, rasterized through resvg.
//!
//! This is the compatibility path: it shares nothing with [`super::raster`]
//! beyond the display list, so a failure in one rasterizer does not take the
//! other down with it.

use std::fmt::Write;

use base64::Engine;
use image::{Rgba, RgbaImage};
use resvg::{tiny_skia, usvg};

use crate::rendering::layout::Rect;
use crate::rendering::paint::{glyph_boxes, shadow_shape, DisplayList, PaintCommand};
use crate::rendering::raster::{canvas_size, encode_png};
use crate::rendering::style::{BoxShadow, Color};
use crate::{Error, Result};

/// Serialize `list` as a standalone SVG document sized for `pixel_ratio`.
///
/// The `viewBox` stays in logical pixels; `width`/`height` carry the device
/// size so the rasterizer scales everything uniformly.
pub fn to_svg(list: &DisplayList, pixel_ratio: f32) -> Result<String> {
    let (w, h) = canvas_size(list.width, list.height, pixel_ratio)?;
    let mut svg = String::new();
    let _ = write!(
        svg,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" xmlns:xlink=\"http://www.w3.org/1999/xlink\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {} {}\" preserveAspectRatio=\"none\">",
        list.width.max(f32::EPSILON),
        list.height.max(f32::EPSILON),
    );
    if let Some(bg) = list.background {
        let _ = write!(
            svg,
            "<rect x=\"0\" y=\"0\" width=\"{}\" height=\"{}\" {}/>",
            list.width,
            list.height,
            fill_attrs(bg)
        );
    }

    for (i, cmd) in list.commands.iter().enumerate() {
        match cmd {
            PaintCommand::SolidRect { rect, color } => {
                let _ = write!(
                    svg,
                    "<rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" {}/>",
                    rect.x,
                    rect.y,
                    rect.width,
                    rect.height,
                    fill_attrs(*color)
                );
            }
            PaintCommand::Gradient { rect, gradient, opacity } => {
                let (dx, dy) = gradient.direction();
                let half = gradient.half_length(rect.width, rect.height);
                let cx = rect.x + rect.width / 2.0;
                let cy = rect.y + rect.height / 2.0;
                let _ = write!(
                    svg,
                    "<defs><linearGradient id=\"g{i}\" gradientUnits=\"userSpaceOnUse\" x1=\"{}\" y1=\"{}\" x2=\"{}\" y2=\"{}\">",
                    cx - dx * half,
                    cy - dy * half,
                    cx + dx * half,
                    cy + dy * half,
                );
                for stop in &gradient.stops {
                    let _ = write!(
                        svg,
                        "<stop offset=\"{}\" stop-color=\"{}\" stop-opacity=\"{}\"/>",
                        stop.offset.clamp(0.0, 1.0),
                        stop.color.to_hex(),
                        stop.color.alpha_f32()
                    );
                }
                let _ = write!(
                    svg,
                    "</linearGradient></defs><rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"url(#g{i})\" opacity=\"{}\"/>",
                    rect.x, rect.y, rect.width, rect.height, opacity
                );
            }
            PaintCommand::Image { rect, image, opacity } => {
                let png = encode_png(image)?;
                let encoded = base64::engine::general_purpose::STANDARD.encode(png);
                let _ = write!(
                    svg,
                    "<image x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" preserveAspectRatio=\"none\" opacity=\"{}\" xlink:href=\"data:image/png;base64,{}\"/>",
                    rect.x, rect.y, rect.width, rect.height, opacity, encoded
                );
            }
            PaintCommand::Shadow { rect, shadow, opacity } => {
                write_shadow(&mut svg, i, list, *rect, shadow, *opacity);
            }
            PaintCommand::Text {
                x,
                y,
                lines,
                font_size,
                line_height,
                color,
            } => {
                let fill = fill_attrs(*color);
                for glyph in glyph_boxes(*x, *y, lines, *font_size, *line_height) {
                    let _ = write!(
                        svg,
                        "<rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" {}/>",
                        glyph.x, glyph.y, glyph.width, glyph.height, fill
                    );
                }
            }
        }
    }
    svg.push_str("</svg>");
    Ok(svg)
}

/// Shadow shape filled, blurred with `feGaussianBlur` (sigma = blur / 2) and
/// clipped: outer shadows to everything but the border box, inset shadows to
/// the border box, where the shape is the hole of an even-odd ring.
fn write_shadow(svg: &mut String, i: usize, list: &DisplayList, rect: Rect, shadow: &BoxShadow, opacity: f32) {
    let color = shadow.color.with_opacity(opacity);
    if color.is_transparent() {
        return;
    }
    let shape = shadow_shape(rect, shadow);
    let sigma = shadow.blur / 2.0;
    let margin = 3.0 * sigma + 1.0;
    let bounds = rect.union(&shape);
    let region = Rect::new(
        bounds.x - margin,
        bounds.y - margin,
        bounds.width + 2.0 * margin,
        bounds.height + 2.0 * margin,
    );

    svg.push_str("<defs>");
    let filter = if sigma > 0.0 {
        let _ = write!(
            svg,
            "<filter id=\"s{i}\" filterUnits=\"userSpaceOnUse\" x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\"><feGaussianBlur stdDeviation=\"{}\"/></filter>",
            region.x, region.y, region.width, region.height, sigma
        );
        format!(" filter=\"url(#s{i})\"")
    } else {
        String::new()
    };
    let (clip, shape_path) = if shadow.inset {
        (rect_path(rect), format!("{}{}", rect_path(region), rect_path(shape)))
    } else {
        let page = Rect::new(0.0, 0.0, list.width, list.height);
        (
            format!("{}{}", rect_path(page.union(&region)), rect_path(rect)),
            rect_path(shape),
        )
    };
    let _ = write!(
        svg,
        "<clipPath id=\"c{i}\"><path clip-rule=\"evenodd\" d=\"{clip}\"/></clipPath></defs><g clip-path=\"url(#c{i})\"><path fill-rule=\"evenodd\" d=\"{shape_path}\" {}{filter}/></g>",
        fill_attrs(color)
    );
}

fn rect_path(r: Rect) -> String {
    format!("M{} {}H{}V{}H{}Z", r.x, r.y, r.x + r.width, r.y + r.height, r.x)
}

fn fill_attrs(color: Color) -> String {
    format!("fill=\"{}\" fill-opacity=\"{}\"", color.to_hex(), color.alpha_f32())
}

/// Rasterize an SVG document to PNG bytes
pub fn rasterize_svg(svg: &str) -> Result<Vec<u8>> {
    let opt = usvg::Options::default();
    let tree = usvg::Tree::from_str(svg, &opt).map_err(|e| Error::RenderError(format!("SVG parsing failed: {}", e)))?;

    let px_w = tree.size().width().ceil() as u32;
    let px_h = tree.size().height().ceil() as u32;
    let mut pixmap = tiny_skia::Pixmap::new(px_w.max(1), px_h.max(1))
        .ok_or_else(|| Error::RenderError("Failed to create pixmap".to_string()))?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    // tiny-skia stores premultiplied alpha
    let mut out = RgbaImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in out.pixels_mut().zip(pixmap.pixels()) {
        let c = src.demultiply();
        *dst = Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
    }
    encode_png(&out)
}

/// Serialize and rasterize in one step
pub fn render_png(list: &DisplayList, pixel_ratio: f32) -> Result<Vec<u8>> {
    let svg = to_svg(list, pixel_ratio)?;
    rasterize_svg(&svg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::layout::Rect;

    fn red_square() -> DisplayList {
        DisplayList {
            width: 10.0,
            height: 10.0,
            background: Some(Color::WHITE),
            commands: vec![PaintCommand::SolidRect {
                rect: Rect::new(0.0, 0.0, 5.0, 10.0),
                color: Color::rgba(255, 0, 0, 255),
            }],
        }
    }

    #[test]
    fn svg_declares_device_size_and_logical_viewbox() {
        let svg = to_svg(&red_square(), 3.0).unwrap();
        assert!(svg.contains("width=\"30\" height=\"30\""));
        assert!(svg.contains("viewBox=\"0 0 10 10\""));
        assert!(svg.contains("fill=\"#ff0000\""));
    }

    #[test]
    fn rasterized_svg_matches_canvas_size() {
        let png = render_png(&red_square(), 2.0).unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (20, 20));
        assert_eq!(img.get_pixel(2, 10).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(17, 10).0, [255, 255, 255, 255]);
    }

    #[test]
    fn drop_shadow_renders_below_the_box() {
        let rect = Rect::new(2.0, 0.0, 6.0, 4.0);
        let list = DisplayList {
            width: 10.0,
            height: 10.0,
            background: Some(Color::WHITE),
            commands: vec![
                PaintCommand::Shadow {
                    rect,
                    shadow: BoxShadow {
                        offset_x: 0.0,
                        offset_y: 3.0,
                        blur: 2.0,
                        spread: 0.0,
                        color: Color::BLACK,
                        inset: false,
                    },
                    opacity: 1.0,
                },
                PaintCommand::SolidRect {
                    rect,
                    color: Color::rgba(255, 0, 0, 255),
                },
            ],
        };
        let svg = to_svg(&list, 2.0).unwrap();
        assert!(svg.contains("feGaussianBlur stdDeviation=\"1\""));

        let img = image::load_from_memory(&rasterize_svg(&svg).unwrap()).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(10, 4).0, [255, 0, 0, 255]);
        assert!(img.get_pixel(10, 11).0[0] < 100, "{:?}", img.get_pixel(10, 11));
        assert!(img.get_pixel(0, 19).0.iter().all(|c| *c >= 250));
    }
}
