//! Direct RGBA rasterizer for display lists

use std::io::Cursor;

use image::{imageops, ImageFormat, Rgba, RgbaImage};

use crate::rendering::layout::Rect;
use crate::rendering::paint::{glyph_boxes, shadow_coverage, shadow_extent, DisplayList, PaintCommand};
use crate::rendering::style::{BoxShadow, Color, LinearGradient};
use crate::{Error, Result};

/// Largest canvas the rasterizers will allocate
pub const MAX_CANVAS_PIXELS: u64 = 64 * 1024 * 1024;

/// Output size in device pixels: `ceil(logical * pixel_ratio)`, at least 1x1
pub fn canvas_size(width: f32, height: f32, pixel_ratio: f32) -> Result<(u32, u32)> {
    if !(pixel_ratio.is_finite() && pixel_ratio > 0.0) {
        return Err(Error::RenderError(format!("invalid pixel ratio {}", pixel_ratio)));
    }
    let w = (width.max(0.0) * pixel_ratio).ceil().max(1.0);
    let h = (height.max(0.0) * pixel_ratio).ceil().max(1.0);
    if (w as u64).saturating_mul(h as u64) > MAX_CANVAS_PIXELS {
        return Err(Error::RenderError(format!("canvas {}x{} exceeds pixel limit", w, h)));
    }
    Ok((w as u32, h as u32))
}

/// Rasterize a display list at `pixel_ratio`
pub fn rasterize(list: &DisplayList, pixel_ratio: f32) -> Result<RgbaImage> {
    let (w, h) = canvas_size(list.width, list.height, pixel_ratio)?;
    let base = list.background.unwrap_or(Color::TRANSPARENT);
    let mut canvas = RgbaImage::from_pixel(w, h, Rgba([base.r, base.g, base.b, base.a]));

    for cmd in &list.commands {
        match cmd {
            PaintCommand::SolidRect { rect, color } => fill_rect(&mut canvas, rect.scaled(pixel_ratio), *color),
            PaintCommand::Gradient { rect, gradient, opacity } => {
                fill_gradient(&mut canvas, *rect, gradient, *opacity, pixel_ratio)
            }
            PaintCommand::Image { rect, image, opacity } => {
                let (x0, y0, x1, y1) = pixel_bounds(&canvas, rect.scaled(pixel_ratio));
                if x1 <= x0 || y1 <= y0 {
                    continue;
                }
                let scaled = imageops::resize(&**image, x1 - x0, y1 - y0, imageops::FilterType::Triangle);
                for (sx, sy, px) in scaled.enumerate_pixels() {
                    let c = Color::rgba(px[0], px[1], px[2], px[3]).with_opacity(*opacity);
                    blend_pixel(&mut canvas, x0 + sx, y0 + sy, c);
                }
            }
            PaintCommand::Shadow { rect, shadow, opacity } => {
                fill_shadow(&mut canvas, *rect, shadow, *opacity, pixel_ratio)
            }
            PaintCommand::Text {
                x,
                y,
                lines,
                font_size,
                line_height,
                color,
            } => {
                for glyph in glyph_boxes(*x, *y, lines, *font_size, *line_height) {
                    fill_rect(&mut canvas, glyph.scaled(pixel_ratio), *color);
                }
            }
        }
    }
    Ok(canvas)
}

/// Encode an RGBA buffer as PNG
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| Error::RenderError(format!("png encode failed: {}", e)))?;
    Ok(out.into_inner())
}

/// Rasterize and encode in one step
pub fn render_png(list: &DisplayList, pixel_ratio: f32) -> Result<Vec<u8>> {
    let canvas = rasterize(list, pixel_ratio)?;
    encode_png(&canvas)
}

fn pixel_bounds(canvas: &RgbaImage, rect: Rect) -> (u32, u32, u32, u32) {
    let clamp_x = |v: f32| v.round().clamp(0.0, canvas.width() as f32) as u32;
    let clamp_y = |v: f32| v.round().clamp(0.0, canvas.height() as f32) as u32;
    (
        clamp_x(rect.x),
        clamp_y(rect.y),
        clamp_x(rect.x + rect.width),
        clamp_y(rect.y + rect.height),
    )
}

fn fill_rect(canvas: &mut RgbaImage, rect: Rect, color: Color) {
    if color.is_transparent() {
        return;
    }
    let (x0, y0, x1, y1) = pixel_bounds(canvas, rect);
    for y in y0..y1 {
        for x in x0..x1 {
            blend_pixel(canvas, x, y, color);
        }
    }
}

fn fill_gradient(canvas: &mut RgbaImage, rect: Rect, gradient: &LinearGradient, opacity: f32, pixel_ratio: f32) {
    let (x0, y0, x1, y1) = pixel_bounds(canvas, rect.scaled(pixel_ratio));
    let (dx, dy) = gradient.direction();
    let half = gradient.half_length(rect.width, rect.height).max(f32::EPSILON);
    let cx = rect.x + rect.width / 2.0;
    let cy = rect.y + rect.height / 2.0;
    for y in y0..y1 {
        let ly = (y as f32 + 0.5) / pixel_ratio - cy;
        for x in x0..x1 {
            let lx = (x as f32 + 0.5) / pixel_ratio - cx;
            let t = (lx * dx + ly * dy) / (2.0 * half) + 0.5;
            blend_pixel(canvas, x, y, gradient.color_at(t).with_opacity(opacity));
        }
    }
}

fn fill_shadow(canvas: &mut RgbaImage, rect: Rect, shadow: &BoxShadow, opacity: f32, pixel_ratio: f32) {
    let color = shadow.color.with_opacity(opacity);
    if color.is_transparent() {
        return;
    }
    let (x0, y0, x1, y1) = pixel_bounds(canvas, shadow_extent(rect, shadow).scaled(pixel_ratio));
    for y in y0..y1 {
        let ly = (y as f32 + 0.5) / pixel_ratio;
        for x in x0..x1 {
            let lx = (x as f32 + 0.5) / pixel_ratio;
            let coverage = shadow_coverage(rect, shadow, lx, ly);
            if coverage > 0.0 {
                blend_pixel(canvas, x, y, color.with_opacity(coverage));
            }
        }
    }
}

/// Straight-alpha source-over
fn blend_pixel(canvas: &mut RgbaImage, x: u32, y: u32, src: Color) {
    if src.a == 0 {
        return;
    }
    let dst = canvas.get_pixel_mut(x, y);
    if src.a == 255 {
        *dst = Rgba([src.r, src.g, src.b, 255]);
        return;
    }
    let sa = src.alpha_f32();
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        *dst = Rgba([0, 0, 0, 0]);
        return;
    }
    let mix = |s: u8, d: u8| ((s as f32 * sa + d as f32 * da * (1.0 - sa)) / out_a).round().clamp(0.0, 255.0) as u8;
    *dst = Rgba([
        mix(src.r, dst[0]),
        mix(src.g, dst[1]),
        mix(src.b, dst[2]),
        (out_a * 255.0).round() as u8,
    ]);
}
