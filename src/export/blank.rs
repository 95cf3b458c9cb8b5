//! Blank-capture heuristic
//!
//! A capture is decoded into a small sample, then measured over the full
//! sample and over a center crop that ignores the outer border. It is only
//! called blank when a region is mostly transparent, or when both regions are
//! flat on every measure at once (channel spread, luma variance and edge
//! strength). Low-contrast designs with any visible structure pass.

use image::imageops::FilterType;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Tunable cutoffs for [`analyze_capture`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlankThresholds {
    /// Side of the square sample canvas
    pub sample_size: u32,
    /// Fraction trimmed from each edge for the center region
    pub inset_ratio: f32,
    /// Alpha at or below this counts as transparent
    pub alpha_cutoff: u8,
    /// Minimum fraction of opaque pixels per region
    pub min_opaque_ratio: f32,
    /// Sum of per-channel ranges below this is flat
    pub min_spread: u32,
    pub min_luma_variance: f64,
    /// Mean absolute luma step to the left/above neighbour
    pub min_edge_strength: f64,
}

impl Default for BlankThresholds {
    fn default() -> Self {
        Self {
            sample_size: 96,
            inset_ratio: 0.18,
            alpha_cutoff: 16,
            min_opaque_ratio: 0.08,
            min_spread: 24,
            min_luma_variance: 12.0,
            min_edge_strength: 1.5,
        }
    }
}

/// Measurements over one region of the sample
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionStats {
    pub pixels: u32,
    pub opaque: u32,
    pub spread: u32,
    pub luma_mean: f64,
    pub luma_variance: f64,
    pub edge_strength: f64,
}

impl RegionStats {
    pub fn opaque_ratio(&self) -> f64 {
        if self.pixels == 0 {
            0.0
        } else {
            self.opaque as f64 / self.pixels as f64
        }
    }

    fn is_flat(&self, t: &BlankThresholds) -> bool {
        self.spread < t.min_spread
            && self.luma_variance < t.min_luma_variance
            && self.edge_strength < t.min_edge_strength
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlankReport {
    pub full: RegionStats,
    pub center: RegionStats,
    pub blank: bool,
    pub reason: Option<String>,
}

/// Decode `bytes` and run the heuristic. Fails only when the buffer cannot
/// be decoded.
pub fn analyze_capture(bytes: &[u8], t: &BlankThresholds) -> Result<BlankReport> {
    let decoded = image::load_from_memory(bytes)?;
    let side = t.sample_size.max(4);
    let sample = image::imageops::resize(&decoded.to_rgba8(), side, side, FilterType::Triangle);

    let inset = ((side as f32) * t.inset_ratio.clamp(0.0, 0.45)).round() as u32;
    let full = region_stats(&sample, 0, 0, side, side, t.alpha_cutoff);
    let center = region_stats(&sample, inset, inset, side - inset, side - inset, t.alpha_cutoff);

    let min_opaque = t.min_opaque_ratio as f64;
    let reason = if full.opaque_ratio() < min_opaque {
        Some(format!("full region {:.1}% opaque", full.opaque_ratio() * 100.0))
    } else if center.opaque_ratio() < min_opaque {
        Some(format!("center region {:.1}% opaque", center.opaque_ratio() * 100.0))
    } else if full.is_flat(t) && center.is_flat(t) {
        Some(format!(
            "flat: spread {}, luma variance {:.2}, edge strength {:.2}",
            full.spread, full.luma_variance, full.edge_strength
        ))
    } else {
        None
    };

    Ok(BlankReport {
        full,
        center,
        blank: reason.is_some(),
        reason,
    })
}

/// Whether a capture should be rejected as blank. Undecodable buffers are blank.
pub fn is_likely_blank_capture(bytes: &[u8]) -> bool {
    is_blank_with(bytes, &BlankThresholds::default())
}

pub fn is_blank_with(bytes: &[u8], t: &BlankThresholds) -> bool {
    match analyze_capture(bytes, t) {
        Ok(report) => report.blank,
        Err(e) => {
            log::debug!("[blank] undecodable capture: {}", e);
            true
        }
    }
}

fn luma(px: &image::Rgba<u8>) -> f64 {
    0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64
}

/// Stats over `[x0, x1) x [y0, y1)`. Colour and edge measures use opaque
/// pixels only.
fn region_stats(img: &RgbaImage, x0: u32, y0: u32, x1: u32, y1: u32, alpha_cutoff: u8) -> RegionStats {
    let mut stats = RegionStats::default();
    let mut min = [u8::MAX; 3];
    let mut max = [u8::MIN; 3];
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut edge_sum = 0.0;
    let mut edge_count = 0u32;

    for y in y0..y1 {
        for x in x0..x1 {
            stats.pixels += 1;
            let px = img.get_pixel(x, y);
            if px[3] <= alpha_cutoff {
                continue;
            }
            stats.opaque += 1;
            for c in 0..3 {
                min[c] = min[c].min(px[c]);
                max[c] = max[c].max(px[c]);
            }
            let l = luma(px);
            sum += l;
            sum_sq += l * l;
            if x > x0 {
                edge_sum += (l - luma(img.get_pixel(x - 1, y))).abs();
                edge_count += 1;
            }
            if y > y0 {
                edge_sum += (l - luma(img.get_pixel(x, y - 1))).abs();
                edge_count += 1;
            }
        }
    }

    if stats.opaque > 0 {
        let n = stats.opaque as f64;
        stats.spread = (0..3).map(|c| (max[c] - min[c]) as u32).sum();
        stats.luma_mean = sum / n;
        stats.luma_variance = (sum_sq / n - stats.luma_mean * stats.luma_mean).max(0.0);
    }
    if edge_count > 0 {
        stats.edge_strength = edge_sum / edge_count as f64;
    }
    stats
}
