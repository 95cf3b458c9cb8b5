//! Podsnap Export Pipeline
//!
//! Captures a live widget subtree as a shareable PNG and hands it to the
//! best delivery channel the environment offers.
//!
//! # Pipeline
//!
//! 1. **Capability detection**: share/file-share support, iOS and mobile agents
//! 2. **Settle**: bounded wait for transitions and animations on the target
//! 3. **Detached clone**: frozen, self-contained copy with inlined images
//! 4. **Capture**: ordered strategy chain with retries and a blank-capture check
//! 5. **Delivery**: native share, blob download, data-URL download, long-press overlay
//!
//! Browser state is reached only through the [`platform::BrowserEnvironment`]
//! trait, so the whole pipeline runs against fakes in tests and against the
//! filesystem-backed [`platform::headless::HeadlessEnvironment`] from the CLI.
//!
//! # Example
//!
//! ```no_run
//! use podsnap::platform::headless::{HeadlessConfig, HeadlessEnvironment};
//! use podsnap::platform::BrowserEnvironment;
//! use podsnap::{ExportConfig, ExportRequest, Exporter};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let html = r#"<div id="export-target" style="width:300px;height:200px;background:#d03a2f">Now Playing</div>"#;
//! let env = HeadlessEnvironment::from_html(html, HeadlessConfig::default())?;
//! let target = env.document().borrow().query_selector("#export-target").ok_or("missing #export-target")?;
//!
//! let exporter = Exporter::new(&env, ExportConfig::default());
//! let result = exporter
//!     .export(ExportRequest::new(target, "ipod-0000-now-playing.png").pixel_ratio(4.0))
//!     .await?;
//! println!("{} via {:?}", result.success, result.method);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod dom;

// Stylesheet rules and selectors behind the document cascade
pub mod css;

// Layout, paint and the two rasterizers used by the built-in capture strategies
pub mod rendering;

// Environment seam: capabilities, headless backend, share/overlay types
pub mod platform;

pub mod export;

// Load/save interface for the export counter and widget state
pub mod storage;

pub use dom::{Document, NodeId, SharedDocument};
pub use export::blank::{is_likely_blank_capture, BlankThresholds};
pub use export::{ExportRequest, Exporter};
pub use platform::capabilities::{detect_export_capabilities, Capabilities};

/// Configuration for the export pipeline
///
/// The defaults bound worst-case latency (settle ceiling, image and capture
/// timeouts) and retry mobile WebKit more aggressively than other agents.
///
/// # Examples
///
/// ```
/// let cfg = podsnap::ExportConfig::default();
/// assert_eq!(cfg.settle_ceiling_ms, 900);
/// assert_eq!(cfg.min_blob_bytes, 1000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Upper bound for the transition/animation settle delay
    pub settle_ceiling_ms: u64,
    /// Per-image load timeout while embedding clone images
    pub image_load_timeout_ms: u64,
    /// Per-attempt rasterization timeout
    pub capture_timeout_ms: u64,
    /// Buffers smaller than this are rejected before the blank check
    pub min_blob_bytes: usize,
    /// Attempts per capture step on iOS agents
    pub ios_attempts: u32,
    /// Attempts per capture step elsewhere
    pub default_attempts: u32,
    /// Linear backoff unit between failed attempts
    pub retry_backoff_ms: u64,
    /// Pixel ratio cap used by the compatibility capture steps
    pub reduced_pixel_ratio: f32,
    /// Delay before a download object URL is revoked
    pub revoke_delay_ms: u64,
    /// Run the blank-capture heuristic on every candidate
    pub verify_blank: bool,
    /// Blank-capture heuristic thresholds
    pub blank: BlankThresholds,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            settle_ceiling_ms: 900,
            image_load_timeout_ms: 5000,
            capture_timeout_ms: 10_000,
            min_blob_bytes: 1000,
            ios_attempts: 3,
            default_attempts: 2,
            retry_backoff_ms: 300,
            reduced_pixel_ratio: 2.0,
            revoke_delay_ms: 1000,
            verify_blank: true,
            blank: BlankThresholds::default(),
        }
    }
}

/// Viewport dimensions of the live document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// State of one in-flight export, pushed to the caller's status callback.
///
/// Within one call the sequence only moves forward:
/// `Idle -> Preparing -> [Sharing] -> Success | Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Idle,
    Preparing,
    Sharing,
    Success,
    Error,
}

impl ExportStatus {
    /// Position in the forward-only status order
    pub fn rank(self) -> u8 {
        match self {
            ExportStatus::Idle => 0,
            ExportStatus::Preparing => 1,
            ExportStatus::Sharing => 2,
            ExportStatus::Success | ExportStatus::Error => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExportStatus::Success | ExportStatus::Error)
    }
}

/// Channel that delivered (or last tried to deliver) the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMethod {
    Share,
    Download,
    DataUrl,
    Manual,
}

/// Terminal, caller-visible record of one export call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub success: bool,
    pub method: ExportMethod,
    /// Tag of the capture step that produced the delivered image
    pub capture_path: Option<String>,
    pub blob_size: Option<usize>,
    /// SHA-256 of the delivered bytes, lowercase hex
    pub blob_digest: Option<String>,
    pub error: Option<String>,
}

impl ExportResult {
    /// Terminal failure with a human-readable suggestion
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            method: ExportMethod::Manual,
            capture_path: None,
            blob_size: None,
            blob_digest: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExportConfig::default();
        assert_eq!(config.ios_attempts, 3);
        assert_eq!(config.default_attempts, 2);
        assert!(config.verify_blank);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ExportConfig = serde_json::from_str(r#"{"min_blob_bytes": 0}"#).unwrap();
        assert_eq!(config.min_blob_bytes, 0);
        assert_eq!(config.capture_timeout_ms, 10_000);
    }

    #[test]
    fn test_status_order_is_forward_only() {
        assert!(ExportStatus::Idle.rank() < ExportStatus::Preparing.rank());
        assert!(ExportStatus::Preparing.rank() < ExportStatus::Sharing.rank());
        assert!(ExportStatus::Sharing.rank() < ExportStatus::Success.rank());
        assert_eq!(ExportStatus::Success.rank(), ExportStatus::Error.rank());
        assert!(ExportStatus::Error.is_terminal());
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let r = ExportResult::failure("Export failed");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["method"], "manual");
        assert_eq!(v["success"], false);
        assert!(v.get("capturePath").is_some());
        let m = serde_json::to_value(ExportMethod::DataUrl).unwrap();
        assert_eq!(m, "dataurl");
    }
}
