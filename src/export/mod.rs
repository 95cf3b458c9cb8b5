//! Export orchestrator
//!
//! [`Exporter::export`] runs one export call end to end:
//! capabilities, popup pre-open, settle, detached clone, capture, delivery.
//! The clone and any unused popup are released by guards, so cleanup happens
//! exactly once on every path.

pub mod blank;
pub mod capture;
pub mod clone;
pub mod deliver;
pub mod settle;

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::dom::NodeId;
use crate::platform::capabilities::detect_export_capabilities;
use crate::platform::{BrowserEnvironment, PopupHandle};
use crate::rendering::style::{parse_color, Color};
use crate::{Error, ExportConfig, ExportResult, ExportStatus, Result};

use capture::{CaptureEngine, CaptureStrategy};
use clone::DetachedClone;
use deliver::{Dispatcher, MANUAL_FALLBACK_MESSAGE};

/// Status callback
pub type StatusCallback = Box<dyn Fn(ExportStatus)>;

/// One user-initiated export
pub struct ExportRequest {
    pub target: NodeId,
    /// Caller-sanitized file name, e.g. `ipod-0007-have-a-destination.png`
    pub filename: String,
    /// CSS color painted under the capture; transparent when `None`
    pub background_color: Option<String>,
    pub pixel_ratio: f32,
    pub on_status: Option<StatusCallback>,
}

impl ExportRequest {
    pub fn new(target: NodeId, filename: impl Into<String>) -> Self {
        Self {
            target,
            filename: filename.into(),
            background_color: None,
            pixel_ratio: 4.0,
            on_status: None,
        }
    }

    pub fn background_color(mut self, color: impl Into<String>) -> Self {
        self.background_color = Some(color.into());
        self
    }

    pub fn pixel_ratio(mut self, ratio: f32) -> Self {
        self.pixel_ratio = ratio;
        self
    }

    pub fn on_status(mut self, callback: impl Fn(ExportStatus) + 'static) -> Self {
        self.on_status = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for ExportRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportRequest")
            .field("target", &self.target)
            .field("filename", &self.filename)
            .field("background_color", &self.background_color)
            .field("pixel_ratio", &self.pixel_ratio)
            .field("on_status", &self.on_status.is_some())
            .finish()
    }
}

/// Pushes status to the caller, dropping anything that would move backwards
/// or repeat.
pub struct StatusReporter<'a> {
    callback: Option<&'a dyn Fn(ExportStatus)>,
    current: Cell<ExportStatus>,
}

impl<'a> StatusReporter<'a> {
    pub fn new(callback: Option<&'a dyn Fn(ExportStatus)>) -> Self {
        Self {
            callback,
            current: Cell::new(ExportStatus::Idle),
        }
    }

    pub fn current(&self) -> ExportStatus {
        self.current.get()
    }

    /// Returns whether `status` was forwarded
    pub fn push(&self, status: ExportStatus) -> bool {
        if status.rank() <= self.current.get().rank() {
            log::debug!("[export] ignoring status {:?} after {:?}", status, self.current.get());
            return false;
        }
        self.current.set(status);
        if let Some(cb) = self.callback {
            cb(status);
        }
        true
    }
}

/// Closes the pre-opened popup on drop unless it carried the image
struct PopupGuard<'a> {
    env: &'a dyn BrowserEnvironment,
    handle: Option<PopupHandle>,
    keep: Cell<bool>,
}

impl<'a> PopupGuard<'a> {
    fn open(env: &'a dyn BrowserEnvironment, wanted: bool) -> Self {
        let handle = if wanted { env.open_popup() } else { None };
        if wanted && handle.is_none() {
            log::warn!("[export] popup blocked, download will use an anchor click");
        }
        Self {
            env,
            handle,
            keep: Cell::new(false),
        }
    }

    fn handle(&self) -> Option<PopupHandle> {
        self.handle
    }

    fn keep(&self) {
        self.keep.set(true);
    }
}

impl Drop for PopupGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            if !self.keep.get() {
                self.env.close_popup(handle);
            }
        }
    }
}

struct InFlight<'a>(&'a Cell<bool>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Runs export calls against one environment, one at a time
pub struct Exporter<'a> {
    env: &'a dyn BrowserEnvironment,
    config: ExportConfig,
    engine: CaptureEngine,
    in_flight: Cell<bool>,
}

impl<'a> Exporter<'a> {
    pub fn new(env: &'a dyn BrowserEnvironment, config: ExportConfig) -> Self {
        let engine = CaptureEngine::new(config.clone());
        Self {
            env,
            config,
            engine,
            in_flight: Cell::new(false),
        }
    }

    /// Replace the built-in capture strategies
    pub fn with_strategies(
        env: &'a dyn BrowserEnvironment,
        config: ExportConfig,
        primary: Rc<dyn CaptureStrategy>,
        secondary: Rc<dyn CaptureStrategy>,
    ) -> Self {
        let engine = CaptureEngine::with_strategies(config.clone(), primary, secondary);
        Self {
            env,
            config,
            engine,
            in_flight: Cell::new(false),
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.get()
    }

    /// Export `request.target` and deliver it.
    ///
    /// Capture and delivery problems never surface as `Err`: they end in an
    /// `ExportResult` with `success == false`. `Err` is reserved for caller
    /// mistakes: an overlapping call, a detached or non-element target, a
    /// non-positive pixel ratio or an unparsable background color.
    pub async fn export(&self, request: ExportRequest) -> Result<ExportResult> {
        if self.in_flight.get() {
            return Err(Error::ExportInFlight);
        }
        let background = self.validate(&request)?;
        self.in_flight.set(true);
        let _in_flight = InFlight(&self.in_flight);

        let caps = detect_export_capabilities(self.env);
        // Must happen before the first await to count as part of the user gesture
        let popup = PopupGuard::open(self.env, caps.is_ios && caps.is_mobile);
        let status = StatusReporter::new(request.on_status.as_deref());

        status.push(ExportStatus::Preparing);
        log::info!(
            "[export] starting {} at {}x (capabilities {:?})",
            request.filename,
            request.pixel_ratio,
            caps
        );

        settle::await_settle(
            self.env,
            request.target,
            Duration::from_millis(self.config.settle_ceiling_ms),
        )
        .await;

        let doc = self.env.document();
        let clone = match DetachedClone::build(&doc, request.target) {
            Ok(clone) => Some(clone),
            Err(e) => {
                log::warn!("[export] clone unavailable, capturing live node only: {}", e);
                None
            }
        };
        if let Some(clone) = &clone {
            let report = clone
                .embed_images(self.env, Duration::from_millis(self.config.image_load_timeout_ms))
                .await;
            log::debug!("[export] embedded {} images, skipped {}", report.embedded, report.skipped);
        }

        let captured = self
            .engine
            .capture(
                &doc,
                request.target,
                clone.as_ref().map(DetachedClone::node),
                background,
                request.pixel_ratio,
                &caps,
            )
            .await;

        let result = match captured {
            Ok(capture) => {
                let digest = hex::encode(Sha256::digest(&capture.bytes));
                let delivery = Dispatcher::new(self.env, &self.config)
                    .deliver(&capture.bytes, &request.filename, &caps, popup.handle(), &status)
                    .await;
                if delivery.used_popup {
                    popup.keep();
                }
                ExportResult {
                    success: delivery.success,
                    method: delivery.method,
                    capture_path: Some(capture.path),
                    blob_size: Some(capture.bytes.len()),
                    blob_digest: Some(digest),
                    error: delivery.error,
                }
            }
            Err(e) => {
                log::error!("[export] capture failed: {}", e);
                ExportResult::failure(MANUAL_FALLBACK_MESSAGE)
            }
        };
        drop(clone);
        drop(popup);

        status.push(if result.success {
            ExportStatus::Success
        } else {
            ExportStatus::Error
        });
        log::info!(
            "[export] finished {}",
            serde_json::to_string(&result).unwrap_or_else(|_| format!("{:?}", result))
        );
        Ok(result)
    }

    fn validate(&self, request: &ExportRequest) -> Result<Option<Color>> {
        if !(request.pixel_ratio.is_finite() && request.pixel_ratio > 0.0) {
            return Err(Error::ConfigError(format!(
                "pixel ratio must be positive, got {}",
                request.pixel_ratio
            )));
        }
        {
            let doc = self.env.document();
            let doc = doc.borrow();
            if !doc.is_element(request.target) || !doc.is_attached(request.target) {
                return Err(Error::InvalidTarget(format!(
                    "node {} is not an attached element",
                    request.target.index()
                )));
            }
        }
        request
            .background_color
            .as_deref()
            .map(|c| parse_color(c).ok_or_else(|| Error::ConfigError(format!("unrecognized background color {}", c))))
            .transpose()
    }
}
