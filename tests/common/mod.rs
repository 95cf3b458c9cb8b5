//! Shared scripted environment for the integration tests
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;

use podsnap::dom::{Document, NodeId, SharedDocument};
use podsnap::export::capture::{CaptureOptions, CaptureStrategy};
use podsnap::platform::{decode_data_url, BrowserEnvironment, PopupHandle, SaveOverlay, SharePayload};
use podsnap::{Error, ExportConfig, Result, Viewport};

pub const IPHONE_UA: &str =
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148";
pub const ANDROID_UA: &str =
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Mobile Safari/537.36";
pub const DESKTOP_UA: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// 300x200 colored rectangle with a nested text label
pub const WIDGET_HTML: &str = r##"<html><body>
<div id="export-target" style="width: 300px; height: 200px; padding: 12px; background: linear-gradient(90deg, #d03a2f, #2f6bd0); color: #ffffff; font-size: 16px">
  <div id="label" style="background-color: #1b1b1f; padding: 6px; border: 2px solid #f5f5f7">Have A Destination? Mac Miller</div>
</div>
</body></html>"##;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareBehavior {
    /// No `navigator.share` at all
    Missing,
    Succeeds,
    /// User dismisses the sheet
    Aborts,
    Fails,
}

#[derive(Debug, Clone)]
pub struct FakeOptions {
    pub user_agent: Option<String>,
    pub share: ShareBehavior,
    pub can_share_files: bool,
    /// `canShare` throws instead of answering
    pub can_share_throws: bool,
    pub object_urls: bool,
    pub blob_anchor: bool,
    pub data_anchor: bool,
    pub popups: bool,
    pub popup_navigation: bool,
    pub overlay: bool,
    /// Image sources whose load never settles
    pub hanging_images: Vec<String>,
    pub images: HashMap<String, Vec<u8>>,
}

impl Default for FakeOptions {
    fn default() -> Self {
        Self {
            user_agent: Some(DESKTOP_UA.to_string()),
            share: ShareBehavior::Missing,
            can_share_files: false,
            can_share_throws: false,
            object_urls: true,
            blob_anchor: true,
            data_anchor: true,
            popups: true,
            popup_navigation: true,
            overlay: true,
            hanging_images: Vec::new(),
            images: HashMap::new(),
        }
    }
}

impl FakeOptions {
    pub fn mobile_share(share: ShareBehavior) -> Self {
        Self {
            user_agent: Some(ANDROID_UA.to_string()),
            share,
            can_share_files: true,
            ..Self::default()
        }
    }

    pub fn iphone() -> Self {
        Self {
            user_agent: Some(IPHONE_UA.to_string()),
            ..Self::default()
        }
    }
}

/// Scripted environment that records every side effect as a short event
pub struct FakeEnvironment {
    document: SharedDocument,
    pub options: FakeOptions,
    events: RefCell<Vec<String>>,
    next_id: Cell<u64>,
    delivered: RefCell<Vec<Vec<u8>>>,
}

impl FakeEnvironment {
    pub fn new(html: &str, options: FakeOptions) -> Self {
        Self {
            document: Rc::new(RefCell::new(Document::parse(html, Viewport::default()))),
            options,
            events: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            delivered: RefCell::new(Vec::new()),
        }
    }

    pub fn widget(options: FakeOptions) -> Self {
        Self::new(WIDGET_HTML, options)
    }

    pub fn target(&self) -> NodeId {
        self.node("#export-target")
    }

    pub fn node(&self, selector: &str) -> NodeId {
        self.document
            .borrow()
            .query_selector(selector)
            .unwrap_or_else(|| panic!("fixture has no {}", selector))
    }

    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.events.borrow().iter().position(|e| e.starts_with(prefix))
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events.borrow().iter().filter(|e| e.starts_with(prefix)).count()
    }

    /// Bytes handed to a share sheet, anchor, popup or overlay
    pub fn delivered(&self) -> Vec<Vec<u8>> {
        self.delivered.borrow().clone()
    }

    pub fn clone_count(&self) -> usize {
        self.document.borrow().query_selector_all("[data-export-clone]").len()
    }

    pub fn outer_html(&self, node: NodeId) -> String {
        self.document.borrow().outer_html(node)
    }

    fn record(&self, event: impl Into<String>) {
        self.events.borrow_mut().push(event.into());
    }

    fn keep_bytes(&self, href: &str) {
        if let Ok((_, bytes)) = decode_data_url(href) {
            self.delivered.borrow_mut().push(bytes);
        }
    }

    fn next(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }
}

fn scheme(href: &str) -> &str {
    href.split(':').next().unwrap_or_default()
}

#[async_trait(?Send)]
impl BrowserEnvironment for FakeEnvironment {
    fn document(&self) -> SharedDocument {
        self.document.clone()
    }

    fn user_agent(&self) -> Option<String> {
        self.options.user_agent.clone()
    }

    fn has_share(&self) -> bool {
        self.options.share != ShareBehavior::Missing
    }

    fn has_can_share(&self) -> bool {
        self.options.share != ShareBehavior::Missing
    }

    fn can_share_files(&self, payload: &SharePayload) -> Result<bool> {
        if self.options.can_share_throws {
            return Err(Error::Other("canShare threw".into()));
        }
        Ok(self.options.can_share_files && !payload.files.is_empty())
    }

    async fn share(&self, payload: SharePayload) -> Result<()> {
        let names: Vec<_> = payload.files.iter().map(|f| f.name.as_str()).collect();
        self.record(format!("share:{}", names.join(",")));
        match self.options.share {
            ShareBehavior::Succeeds => {
                for file in payload.files {
                    self.delivered.borrow_mut().push(file.bytes);
                }
                Ok(())
            }
            ShareBehavior::Aborts => Err(Error::ShareAborted),
            ShareBehavior::Fails => Err(Error::DeliveryError("share sheet unavailable".into())),
            ShareBehavior::Missing => Err(Error::Unsupported("share".into())),
        }
    }

    fn create_object_url(&self, bytes: &[u8], mime: &str) -> Result<String> {
        if !self.options.object_urls {
            self.record("object-url:failed");
            return Err(Error::Unsupported("object URLs".into()));
        }
        let url = format!("blob:fake/{}", self.next());
        self.record(format!("object-url:{}:{}", mime, url));
        self.delivered.borrow_mut().push(bytes.to_vec());
        Ok(url)
    }

    fn revoke_object_url_later(&self, url: &str, delay: Duration) {
        self.record(format!("revoke:{}:{}ms", url, delay.as_millis()));
    }

    fn click_download_anchor(&self, href: &str, filename: &str) -> Result<()> {
        let allowed = match scheme(href) {
            "blob" => self.options.blob_anchor,
            "data" => self.options.data_anchor,
            _ => false,
        };
        if !allowed {
            self.record(format!("anchor-failed:{}", scheme(href)));
            return Err(Error::DeliveryError(format!("anchor click on {} ignored", scheme(href))));
        }
        self.record(format!("anchor:{}:{}", scheme(href), filename));
        self.keep_bytes(href);
        Ok(())
    }

    fn open_popup(&self) -> Option<PopupHandle> {
        if !self.options.popups {
            self.record("popup-blocked");
            return None;
        }
        let id = self.next();
        self.record(format!("popup-open:{}", id));
        Some(PopupHandle(id))
    }

    fn navigate_popup(&self, popup: PopupHandle, url: &str) -> Result<()> {
        if !self.options.popup_navigation {
            self.record(format!("popup-navigate-failed:{}", popup.0));
            return Err(Error::DeliveryError("popup closed".into()));
        }
        self.record(format!("popup-navigate:{}:{}", popup.0, scheme(url)));
        self.keep_bytes(url);
        Ok(())
    }

    fn close_popup(&self, popup: PopupHandle) {
        self.record(format!("popup-close:{}", popup.0));
    }

    fn show_save_overlay(&self, overlay: &SaveOverlay) -> Result<()> {
        if !self.options.overlay {
            self.record("overlay-failed");
            return Err(Error::Unsupported("overlay".into()));
        }
        self.record(format!("overlay:{}", overlay.filename));
        self.keep_bytes(&overlay.image_data_url);
        Ok(())
    }

    async fn next_frame(&self) {
        tokio::task::yield_now().await;
    }

    async fn load_image(&self, src: &str) -> Result<Vec<u8>> {
        self.record(format!("load:{}", src));
        if self.options.hanging_images.iter().any(|s| s == src) {
            std::future::pending::<()>().await;
        }
        if src.starts_with("data:") {
            return decode_data_url(src).map(|(_, bytes)| bytes);
        }
        self.options
            .images
            .get(src)
            .cloned()
            .ok_or_else(|| Error::NetworkError(format!("404 {}", src)))
    }
}

/// Config with short timeouts and backoff for tests
pub fn fast_config() -> ExportConfig {
    ExportConfig {
        retry_backoff_ms: 1,
        image_load_timeout_ms: 200,
        revoke_delay_ms: 1000,
        ..ExportConfig::default()
    }
}

pub fn encode_png(img: &image::RgbaImage) -> Vec<u8> {
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .expect("encode png");
    out
}

/// Large single-colour image: passes the size floor, fails the blank check
pub fn solid_png() -> Vec<u8> {
    encode_png(&image::RgbaImage::from_pixel(1024, 1024, image::Rgba([208, 58, 47, 255])))
}

pub enum Scripted {
    /// Always returns the same bytes
    Bytes(Vec<u8>),
    Fails,
}

/// Capture strategy with a fixed outcome that counts its calls
pub struct ScriptedStrategy {
    pub name: &'static str,
    pub outcome: Scripted,
    pub calls: Cell<u32>,
}

impl ScriptedStrategy {
    pub fn solid() -> Rc<Self> {
        Rc::new(Self {
            name: "scripted-solid",
            outcome: Scripted::Bytes(solid_png()),
            calls: Cell::new(0),
        })
    }

    pub fn failing() -> Rc<Self> {
        Rc::new(Self {
            name: "scripted-failing",
            outcome: Scripted::Fails,
            calls: Cell::new(0),
        })
    }
}

#[async_trait(?Send)]
impl CaptureStrategy for ScriptedStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn attempt_capture(&self, _: &SharedDocument, _: NodeId, _: &CaptureOptions) -> Result<Option<Vec<u8>>> {
        self.calls.set(self.calls.get() + 1);
        match &self.outcome {
            Scripted::Bytes(bytes) => Ok(Some(bytes.clone())),
            Scripted::Fails => Err(Error::RenderError("scripted failure".into())),
        }
    }
}
