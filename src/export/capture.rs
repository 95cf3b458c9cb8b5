//! Raster capture engine
//!
//! Capture strategies are tried as an ordered plan of steps. Each step runs
//! one strategy against either the detached clone or the live node at a given
//! pixel ratio, with per-attempt timeout and linear backoff between failed
//! attempts. A candidate must clear the minimum size and the blank heuristic
//! before it is accepted.

use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;

use crate::dom::{NodeId, SharedDocument};
use crate::export::blank::is_blank_with;
use crate::platform::capabilities::Capabilities;
use crate::rendering::paint::build_display_list;
use crate::rendering::style::Color;
use crate::rendering::Rasterizer;
use crate::{Error, ExportConfig, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureOptions {
    pub background: Option<Color>,
    pub pixel_ratio: f32,
}

/// One way of turning a node into image bytes.
///
/// `Ok(None)` means the strategy ran but produced nothing usable; the engine
/// treats it like an error and retries.
#[async_trait(?Send)]
pub trait CaptureStrategy {
    fn name(&self) -> &'static str;

    async fn attempt_capture(
        &self,
        doc: &SharedDocument,
        node: NodeId,
        options: &CaptureOptions,
    ) -> Result<Option<Vec<u8>>>;
}

/// Lay out and paint under a short borrow, then rasterize on the blocking pool
async fn render_blocking(
    rasterizer: Rasterizer,
    doc: &SharedDocument,
    node: NodeId,
    options: &CaptureOptions,
) -> Result<Option<Vec<u8>>> {
    let list = {
        let d = doc.borrow();
        build_display_list(&d, node, options.background)?
    };
    let pixel_ratio = options.pixel_ratio;
    let shot = tokio::task::spawn_blocking(move || rasterizer.render(&list, pixel_ratio))
        .await
        .map_err(|e| Error::CaptureError(format!("rasterizer task failed: {}", e)))??;
    if shot.is_empty() {
        return Ok(None);
    }
    Ok(Some(shot.png_data))
}

/// Primary technique: direct RGBA painting
#[derive(Debug, Default, Clone, Copy)]
pub struct DomRasterStrategy;

#[async_trait(?Send)]
impl CaptureStrategy for DomRasterStrategy {
    fn name(&self) -> &'static str {
        "dom-raster"
    }

    async fn attempt_capture(
        &self,
        doc: &SharedDocument,
        node: NodeId,
        options: &CaptureOptions,
    ) -> Result<Option<Vec<u8>>> {
        render_blocking(Rasterizer::Direct, doc, node, options).await
    }
}

/// Secondary technique: SVG through resvg
#[derive(Debug, Default, Clone, Copy)]
pub struct SvgRasterStrategy;

#[async_trait(?Send)]
impl CaptureStrategy for SvgRasterStrategy {
    fn name(&self) -> &'static str {
        "svg-raster"
    }

    async fn attempt_capture(
        &self,
        doc: &SharedDocument,
        node: NodeId,
        options: &CaptureOptions,
    ) -> Result<Option<Vec<u8>>> {
        render_blocking(Rasterizer::Svg, doc, node, options).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTarget {
    Clone,
    Live,
}

#[derive(Clone)]
pub struct CaptureStep {
    /// Reported as `capturePath` when this step wins
    pub tag: &'static str,
    pub strategy: Rc<dyn CaptureStrategy>,
    pub target: CaptureTarget,
    pub pixel_ratio: f32,
}

impl std::fmt::Debug for CaptureStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureStep")
            .field("tag", &self.tag)
            .field("strategy", &self.strategy.name())
            .field("target", &self.target)
            .field("pixel_ratio", &self.pixel_ratio)
            .finish()
    }
}

/// An accepted capture
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub bytes: Vec<u8>,
    /// Tag of the step that produced `bytes`
    pub path: String,
    pub strategy: &'static str,
    pub passed_blank_check: bool,
}

pub struct CaptureEngine {
    config: ExportConfig,
    primary: Rc<dyn CaptureStrategy>,
    secondary: Rc<dyn CaptureStrategy>,
}

impl CaptureEngine {
    pub fn new(config: ExportConfig) -> Self {
        Self::with_strategies(config, Rc::new(DomRasterStrategy), Rc::new(SvgRasterStrategy))
    }

    pub fn with_strategies(
        config: ExportConfig,
        primary: Rc<dyn CaptureStrategy>,
        secondary: Rc<dyn CaptureStrategy>,
    ) -> Self {
        Self {
            config,
            primary,
            secondary,
        }
    }

    /// Ordered steps for a request at `pixel_ratio`
    pub fn plan(&self, pixel_ratio: f32) -> Vec<CaptureStep> {
        let reduced = pixel_ratio.min(self.config.reduced_pixel_ratio);
        let step = |tag, strategy: &Rc<dyn CaptureStrategy>, target, pixel_ratio| CaptureStep {
            tag,
            strategy: Rc::clone(strategy),
            target,
            pixel_ratio,
        };
        vec![
            step("clone-primary", &self.primary, CaptureTarget::Clone, pixel_ratio),
            step("live-primary", &self.primary, CaptureTarget::Live, pixel_ratio),
            step("clone-secondary", &self.secondary, CaptureTarget::Clone, reduced),
            step("live-secondary", &self.secondary, CaptureTarget::Live, reduced),
            step("clone-primary-reduced", &self.primary, CaptureTarget::Clone, reduced),
        ]
    }

    pub fn attempts_for(&self, caps: &Capabilities) -> u32 {
        let n = if caps.is_ios {
            self.config.ios_attempts
        } else {
            self.config.default_attempts
        };
        n.max(1)
    }

    /// Walk the plan until a step yields an accepted capture.
    ///
    /// Clone steps are skipped when `clone` is `None`. Exhaustion is an
    /// `Error::CaptureError`; no blank or undersized buffer is ever returned.
    pub async fn capture(
        &self,
        doc: &SharedDocument,
        live: NodeId,
        clone: Option<NodeId>,
        background: Option<Color>,
        pixel_ratio: f32,
        caps: &Capabilities,
    ) -> Result<CaptureResult> {
        let attempts = self.attempts_for(caps);
        let timeout = Duration::from_millis(self.config.capture_timeout_ms);

        for step in self.plan(pixel_ratio) {
            let node = match (step.target, clone) {
                (CaptureTarget::Clone, Some(n)) => n,
                (CaptureTarget::Clone, None) => {
                    log::debug!("[capture] {} skipped, no clone", step.tag);
                    continue;
                }
                (CaptureTarget::Live, _) => live,
            };
            let options = CaptureOptions {
                background,
                pixel_ratio: step.pixel_ratio,
            };

            for attempt in 1..=attempts {
                let outcome = tokio::time::timeout(timeout, step.strategy.attempt_capture(doc, node, &options)).await;
                let failure = match outcome {
                    Ok(Ok(Some(bytes))) if bytes.len() >= self.config.min_blob_bytes => {
                        if self.config.verify_blank && is_blank_with(&bytes, &self.config.blank) {
                            log::warn!("[capture] {} produced a blank image, moving on", step.tag);
                            break;
                        }
                        log::info!(
                            "[capture] {} accepted via {} ({} bytes, attempt {})",
                            step.tag,
                            step.strategy.name(),
                            bytes.len(),
                            attempt
                        );
                        return Ok(CaptureResult {
                            bytes,
                            path: step.tag.to_string(),
                            strategy: step.strategy.name(),
                            passed_blank_check: self.config.verify_blank,
                        });
                    }
                    Ok(Ok(Some(bytes))) => format!("undersized buffer ({} bytes)", bytes.len()),
                    Ok(Ok(None)) => "no output".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => format!("timed out after {}ms", self.config.capture_timeout_ms),
                };
                log::warn!(
                    "[capture] {} attempt {}/{} failed: {}",
                    step.tag,
                    attempt,
                    attempts,
                    failure
                );
                if attempt < attempts {
                    tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms * attempt as u64)).await;
                }
            }
        }
        Err(Error::CaptureError("all capture strategies exhausted".to_string()))
    }
}
