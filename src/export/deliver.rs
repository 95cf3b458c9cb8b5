//! Delivery dispatcher
//!
//! Channels are tried in a fixed order and the first success wins:
//! native share, blob-URL download, data-URL download, then the iOS
//! long-press overlay. Channel errors are logged and fall through.

use std::time::Duration;

use crate::export::StatusReporter;
use crate::platform::capabilities::Capabilities;
use crate::platform::{encode_data_url, BrowserEnvironment, PopupHandle, SaveOverlay, SharePayload};
use crate::{Error, ExportConfig, ExportMethod, ExportStatus, Result};

pub const PNG_MIME: &str = "image/png";

/// Terminal failure message shown to the user
pub const MANUAL_FALLBACK_MESSAGE: &str = "Export failed. Try taking a screenshot manually.";

pub const LONG_PRESS_INSTRUCTIONS: &str = "Long-press the image, then tap \"Save Image\" (or \"Add to Photos\").";

/// Outcome of one delivery run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub method: ExportMethod,
    pub success: bool,
    /// The pre-opened popup carried the image and must stay open
    pub used_popup: bool,
    pub error: Option<String>,
}

impl Delivery {
    fn delivered(method: ExportMethod) -> Self {
        Self {
            method,
            success: true,
            used_popup: false,
            error: None,
        }
    }

    fn via_popup(method: ExportMethod) -> Self {
        Self {
            used_popup: true,
            ..Self::delivered(method)
        }
    }
}

pub struct Dispatcher<'a> {
    env: &'a dyn BrowserEnvironment,
    revoke_delay: Duration,
}

impl<'a> Dispatcher<'a> {
    pub fn new(env: &'a dyn BrowserEnvironment, config: &ExportConfig) -> Self {
        Self {
            env,
            revoke_delay: Duration::from_millis(config.revoke_delay_ms),
        }
    }

    /// Deliver an accepted capture. Never fails; exhaustion is reported as a
    /// `Manual` delivery with `success == false`.
    pub async fn deliver(
        &self,
        bytes: &[u8],
        filename: &str,
        caps: &Capabilities,
        popup: Option<PopupHandle>,
        status: &StatusReporter<'_>,
    ) -> Delivery {
        // Synthetic clicks are unreliable on iOS; the gesture-opened popup is used instead
        let popup = popup.filter(|_| caps.is_ios && caps.is_mobile);

        if caps.can_share_files && caps.is_mobile {
            status.push(ExportStatus::Sharing);
            match self.share(bytes, filename).await {
                Ok(()) => return Delivery::delivered(ExportMethod::Share),
                Err(Error::ShareAborted) => log::info!("[deliver] share cancelled by user, falling back to download"),
                Err(e) => log::warn!("[deliver] share failed, falling back to download: {}", e),
            }
        }

        match self.download_blob(bytes, filename, popup) {
            Ok(used_popup) => {
                return Delivery {
                    used_popup,
                    ..Delivery::delivered(ExportMethod::Download)
                }
            }
            Err(e) => log::warn!("[deliver] blob download failed: {}", e),
        }

        let data_url = encode_data_url(PNG_MIME, bytes);
        match self.open_href(&data_url, filename, popup) {
            Ok(true) => return Delivery::via_popup(ExportMethod::DataUrl),
            Ok(false) => return Delivery::delivered(ExportMethod::DataUrl),
            Err(e) => log::warn!("[deliver] data URL download failed: {}", e),
        }

        if caps.is_ios {
            let overlay = SaveOverlay {
                image_data_url: data_url,
                instructions: LONG_PRESS_INSTRUCTIONS.to_string(),
                filename: filename.to_string(),
            };
            match self.env.show_save_overlay(&overlay) {
                Ok(()) => return Delivery::delivered(ExportMethod::Manual),
                Err(e) => log::warn!("[deliver] save overlay failed: {}", e),
            }
        }

        Delivery {
            method: ExportMethod::Manual,
            success: false,
            used_popup: false,
            error: Some(MANUAL_FALLBACK_MESSAGE.to_string()),
        }
    }

    /// Files-only payload
    async fn share(&self, bytes: &[u8], filename: &str) -> Result<()> {
        let payload = SharePayload::single(filename, PNG_MIME, bytes.to_vec());
        self.env.share(payload).await
    }

    fn download_blob(&self, bytes: &[u8], filename: &str, popup: Option<PopupHandle>) -> Result<bool> {
        let url = self.env.create_object_url(bytes, PNG_MIME)?;
        let outcome = self.open_href(&url, filename, popup);
        // Revoked on every path
        self.env.revoke_object_url_later(&url, self.revoke_delay);
        outcome
    }

    /// Navigate the popup when there is one, otherwise click a download
    /// anchor. Returns whether the popup was used.
    fn open_href(&self, href: &str, filename: &str, popup: Option<PopupHandle>) -> Result<bool> {
        if let Some(handle) = popup {
            match self.env.navigate_popup(handle, href) {
                Ok(()) => return Ok(true),
                Err(e) => log::warn!("[deliver] popup navigation failed, clicking anchor: {}", e),
            }
        }
        self.env.click_download_anchor(href, filename)?;
        Ok(false)
    }
}
