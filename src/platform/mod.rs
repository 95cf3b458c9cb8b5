//! Platform surface the export pipeline runs against
//!
//! Everything the pipeline needs from a browser (the live document, user
//! agent, share sheet, object URLs, download anchors, popups, frame timing and
//! image loading) goes through [`BrowserEnvironment`]. The headless backend
//! drives it from the CLI; tests script it with fakes.

pub mod capabilities;
pub mod headless;

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;

use crate::dom::SharedDocument;
use crate::{Error, Result};

/// One file offered to the native share sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Share payload. Only files are ever shared, never title/text/url, since
/// some share targets drop the attachment when text is present.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SharePayload {
    pub files: Vec<ShareFile>,
}

impl SharePayload {
    pub fn single(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            files: vec![ShareFile {
                name: name.into(),
                mime: mime.into(),
                bytes,
            }],
        }
    }
}

/// Opaque handle to a popup window opened by the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PopupHandle(pub u64);

/// Full-screen long-press overlay shown as the last iOS fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveOverlay {
    pub image_data_url: String,
    pub instructions: String,
    pub filename: String,
}

/// Host browser capabilities and side effects.
///
/// Methods returning `Result` report "not available here" as
/// [`Error::Unsupported`]. A share sheet dismissed by the user is
/// [`Error::ShareAborted`], never a generic failure.
#[async_trait(?Send)]
pub trait BrowserEnvironment {
    /// The live document containing the export target
    fn document(&self) -> SharedDocument;

    fn user_agent(&self) -> Option<String>;

    /// Whether the global `MSStream` marker is present (old IE mobile spoofs iOS)
    fn has_ms_stream(&self) -> bool {
        false
    }

    fn has_share(&self) -> bool;

    fn has_can_share(&self) -> bool;

    /// Ask whether `payload` could be shared. May fail on some agents.
    fn can_share_files(&self, payload: &SharePayload) -> Result<bool>;

    /// Present the native share sheet
    async fn share(&self, payload: SharePayload) -> Result<()>;

    fn create_object_url(&self, bytes: &[u8], mime: &str) -> Result<String>;

    /// Revoke `url` after `delay` without blocking the caller
    fn revoke_object_url_later(&self, url: &str, delay: Duration);

    /// Create an anchor with `download = filename`, click it and remove it
    fn click_download_anchor(&self, href: &str, filename: &str) -> Result<()>;

    /// Open a blank window. Must be called synchronously from the user
    /// gesture, before the first await of an export call.
    fn open_popup(&self) -> Option<PopupHandle>;

    fn navigate_popup(&self, popup: PopupHandle, url: &str) -> Result<()>;

    fn close_popup(&self, popup: PopupHandle);

    fn show_save_overlay(&self, overlay: &SaveOverlay) -> Result<()>;

    /// Resolve after the next rendering frame
    async fn next_frame(&self);

    /// Fetch image bytes for `src` (data:, blob:, file: or http(s):)
    async fn load_image(&self, src: &str) -> Result<Vec<u8>>;
}

/// `data:<mime>;base64,<payload>`
pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Split a `data:` URL into its media type and decoded bytes
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>)> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| Error::DecodeError("not a data: URL".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| Error::DecodeError("data: URL without payload".to_string()))?;
    let mut parts = meta.split(';');
    let mime = parts.next().filter(|m| !m.is_empty()).unwrap_or("text/plain").to_string();
    let is_base64 = parts.any(|p| p.eq_ignore_ascii_case("base64"));
    let bytes = if is_base64 {
        let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(cleaned)
            .map_err(|e| Error::DecodeError(format!("bad base64 payload: {}", e)))?
    } else {
        payload.as_bytes().to_vec()
    };
    Ok((mime, bytes))
}

/// Environment with no browser features at all.
///
/// Capability probes return `false` and every side effect is
/// [`Error::Unsupported`], which drives the pipeline straight to its
/// terminal failure path.
pub struct NoopEnvironment {
    document: SharedDocument,
}

impl NoopEnvironment {
    pub fn new(document: SharedDocument) -> Self {
        NoopEnvironment { document }
    }
}

#[async_trait(?Send)]
impl BrowserEnvironment for NoopEnvironment {
    fn document(&self) -> SharedDocument {
        self.document.clone()
    }

    fn user_agent(&self) -> Option<String> {
        None
    }

    fn has_share(&self) -> bool {
        false
    }

    fn has_can_share(&self) -> bool {
        false
    }

    fn can_share_files(&self, _payload: &SharePayload) -> Result<bool> {
        Ok(false)
    }

    async fn share(&self, _payload: SharePayload) -> Result<()> {
        Err(Error::Unsupported("share".into()))
    }

    fn create_object_url(&self, _bytes: &[u8], _mime: &str) -> Result<String> {
        Err(Error::Unsupported("object URLs".into()))
    }

    fn revoke_object_url_later(&self, _url: &str, _delay: Duration) {}

    fn click_download_anchor(&self, _href: &str, _filename: &str) -> Result<()> {
        Err(Error::Unsupported("download anchors".into()))
    }

    fn open_popup(&self) -> Option<PopupHandle> {
        None
    }

    fn navigate_popup(&self, _popup: PopupHandle, _url: &str) -> Result<()> {
        Err(Error::Unsupported("popups".into()))
    }

    fn close_popup(&self, _popup: PopupHandle) {}

    fn show_save_overlay(&self, _overlay: &SaveOverlay) -> Result<()> {
        Err(Error::Unsupported("overlay".into()))
    }

    async fn next_frame(&self) {
        tokio::task::yield_now().await;
    }

    async fn load_image(&self, src: &str) -> Result<Vec<u8>> {
        if src.starts_with("data:") {
            return decode_data_url(src).map(|(_, bytes)| bytes);
        }
        Err(Error::Unsupported(format!("image loading for {}", src)))
    }
}
