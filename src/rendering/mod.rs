//! Rendering module
//!
//! Lays out a subtree, turns it into a display list and rasterizes it with
//! one of two independent backends.

pub mod layout;
pub mod paint;
pub mod raster;
pub mod style;
pub mod svg;

use crate::Result;
use paint::DisplayList;

/// Backend that turns a display list into pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rasterizer {
    /// Straight RGBA painting with the `image` crate
    Direct,
    /// SVG serialization rasterized by resvg
    Svg,
}

impl Rasterizer {
    pub fn render(self, list: &DisplayList, pixel_ratio: f32) -> Result<Screenshot> {
        let (width, height) = raster::canvas_size(list.width, list.height, pixel_ratio)?;
        let png_data = match self {
            Rasterizer::Direct => raster::render_png(list, pixel_ratio)?,
            Rasterizer::Svg => svg::render_png(list, pixel_ratio)?,
        };
        Ok(Screenshot {
            width,
            height,
            png_data,
        })
    }
}

/// Encoded PNG plus its pixel dimensions
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    pub png_data: Vec<u8>,
}

impl Screenshot {
    pub fn is_empty(&self) -> bool {
        self.png_data.is_empty()
    }
}
