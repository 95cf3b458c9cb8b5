//! Headless environment backed by the filesystem
//!
//! Downloads land in `output_dir`, object URLs live in memory and images are
//! loaded from `data:`, `blob:`, `file:` or (with the `http` feature) remote
//! URLs. There is no share sheet, popup or overlay: the delivery chain always
//! ends at the blob download.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::dom::{Document, SharedDocument};
use crate::platform::{decode_data_url, BrowserEnvironment, PopupHandle, SaveOverlay, SharePayload};
use crate::{Error, Result, Viewport};

/// Configuration for [`HeadlessEnvironment`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadlessConfig {
    /// User agent reported to capability detection
    pub user_agent: String,
    pub viewport: Viewport,
    /// Directory receiving downloaded files
    pub output_dir: PathBuf,
    /// Base for resolving relative image sources
    pub base_url: Option<String>,
    /// Simulated frame interval for `next_frame`
    pub frame_interval_ms: u64,
    /// Timeout for remote image requests
    pub http_timeout_ms: u64,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/115.0 podsnap/0.1".to_string(),
            viewport: Viewport::default(),
            output_dir: PathBuf::from("."),
            base_url: None,
            frame_interval_ms: 16,
            http_timeout_ms: 30_000,
        }
    }
}

type ObjectUrls = Arc<Mutex<HashMap<String, Vec<u8>>>>;

pub struct HeadlessEnvironment {
    config: HeadlessConfig,
    document: SharedDocument,
    object_urls: ObjectUrls,
    next_url_id: Cell<u64>,
    downloads: RefCell<Vec<PathBuf>>,
    #[cfg(feature = "http")]
    client: reqwest::Client,
}

impl HeadlessEnvironment {
    /// Parse `html` into a live document sized to the configured viewport
    pub fn from_html(html: &str, config: HeadlessConfig) -> Result<Self> {
        let document = Rc::new(RefCell::new(Document::parse(html, config.viewport)));

        #[cfg(feature = "http")]
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            document,
            object_urls: Arc::new(Mutex::new(HashMap::new())),
            next_url_id: Cell::new(0),
            downloads: RefCell::new(Vec::new()),
            #[cfg(feature = "http")]
            client,
        })
    }

    /// Load an HTML file. Relative image sources resolve against the file's
    /// directory unless `base_url` is already set.
    pub fn load_file(path: impl AsRef<Path>, mut config: HeadlessConfig) -> Result<Self> {
        let path = path.as_ref();
        let html = std::fs::read_to_string(path)?;
        if config.base_url.is_none() {
            let dir = std::fs::canonicalize(path)?
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/"));
            let base = Url::from_directory_path(&dir)
                .map_err(|_| Error::ConfigError(format!("cannot build base URL for {}", dir.display())))?;
            config.base_url = Some(base.to_string());
        }
        Self::from_html(&html, config)
    }

    pub fn config(&self) -> &HeadlessConfig {
        &self.config
    }

    /// Files written by download anchors, in order
    pub fn downloads(&self) -> Vec<PathBuf> {
        self.downloads.borrow().clone()
    }

    /// Object URLs not yet revoked
    pub fn object_url_count(&self) -> usize {
        self.object_urls.lock().map(|m| m.len()).unwrap_or(0)
    }

    fn object_url_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let urls = self
            .object_urls
            .lock()
            .map_err(|_| Error::Other("object URL table poisoned".into()))?;
        urls.get(url)
            .cloned()
            .ok_or_else(|| Error::DeliveryError(format!("unknown or revoked object URL {}", url)))
    }

    fn resolve(&self, src: &str) -> Result<Url> {
        if let Ok(url) = Url::parse(src) {
            return Ok(url);
        }
        let base = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| Error::NetworkError(format!("relative image source {} without base URL", src)))?;
        let base = Url::parse(base).map_err(|e| Error::ConfigError(format!("bad base URL {}: {}", base, e)))?;
        base.join(src)
            .map_err(|e| Error::NetworkError(format!("cannot resolve {}: {}", src, e)))
    }

    #[cfg(feature = "http")]
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        let resp = self.client.get(url.clone()).send().await?.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }

    #[cfg(not(feature = "http"))]
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        Err(Error::Unsupported(format!("remote image {} (built without http)", url)))
    }
}

#[async_trait(?Send)]
impl BrowserEnvironment for HeadlessEnvironment {
    fn document(&self) -> SharedDocument {
        self.document.clone()
    }

    fn user_agent(&self) -> Option<String> {
        Some(self.config.user_agent.clone())
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
        Err(Error::Unsupported("share sheet".into()))
    }

    fn create_object_url(&self, bytes: &[u8], _mime: &str) -> Result<String> {
        let id = self.next_url_id.get() + 1;
        self.next_url_id.set(id);
        let url = format!("blob:podsnap/{}", id);
        self.object_urls
            .lock()
            .map_err(|_| Error::Other("object URL table poisoned".into()))?
            .insert(url.clone(), bytes.to_vec());
        Ok(url)
    }

    fn revoke_object_url_later(&self, url: &str, delay: Duration) {
        let urls = Arc::clone(&self.object_urls);
        let url = url.to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Ok(mut m) = urls.lock() {
                        m.remove(&url);
                    }
                });
            }
            Err(_) => {
                if let Ok(mut m) = urls.lock() {
                    m.remove(&url);
                }
            }
        }
    }

    fn click_download_anchor(&self, href: &str, filename: &str) -> Result<()> {
        let bytes = if href.starts_with("blob:") {
            self.object_url_bytes(href)?
        } else if href.starts_with("data:") {
            decode_data_url(href)?.1
        } else {
            return Err(Error::Unsupported(format!("download from {}", href)));
        };

        let name = Path::new(filename)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "download.png".into());
        std::fs::create_dir_all(&self.config.output_dir)?;
        let path = self.config.output_dir.join(name);
        std::fs::write(&path, &bytes)?;
        log::info!("[headless] downloaded {} ({} bytes)", path.display(), bytes.len());
        self.downloads.borrow_mut().push(path);
        Ok(())
    }

    fn open_popup(&self) -> Option<PopupHandle> {
        None
    }

    fn navigate_popup(&self, _popup: PopupHandle, _url: &str) -> Result<()> {
        Err(Error::Unsupported("popups".into()))
    }

    fn close_popup(&self, _popup: PopupHandle) {}

    fn show_save_overlay(&self, _overlay: &SaveOverlay) -> Result<()> {
        Err(Error::Unsupported("save overlay".into()))
    }

    async fn next_frame(&self) {
        tokio::time::sleep(Duration::from_millis(self.config.frame_interval_ms)).await;
    }

    async fn load_image(&self, src: &str) -> Result<Vec<u8>> {
        if src.starts_with("data:") {
            return Ok(decode_data_url(src)?.1);
        }
        if src.starts_with("blob:") {
            return self.object_url_bytes(src);
        }
        let url = self.resolve(src)?;
        match url.scheme() {
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| Error::NetworkError(format!("bad file URL {}", url)))?;
                Ok(tokio::fs::read(path).await?)
            }
            "http" | "https" => self.fetch(&url).await,
            other => Err(Error::Unsupported(format!("image scheme {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_in(dir: &Path) -> HeadlessEnvironment {
        let config = HeadlessConfig {
            output_dir: dir.to_path_buf(),
            frame_interval_ms: 0,
            ..Default::default()
        };
        HeadlessEnvironment::from_html(r#"<div id="t">hi</div>"#, config).unwrap()
    }

    #[tokio::test]
    async fn blob_download_writes_file_and_revokes() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_in(dir.path());
        let url = env.create_object_url(b"png-bytes", "image/png").unwrap();
        assert!(url.starts_with("blob:podsnap/"));
        env.click_download_anchor(&url, "../escape/out.png").unwrap();

        let written = dir.path().join("out.png");
        assert_eq!(std::fs::read(&written).unwrap(), b"png-bytes");
        assert_eq!(env.downloads(), vec![written]);

        env.revoke_object_url_later(&url, Duration::from_millis(5));
        assert_eq!(env.object_url_count(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(env.object_url_count(), 0);
    }

    #[tokio::test]
    async fn relative_images_resolve_against_base() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("art.bin"), [7u8, 8, 9]).unwrap();
        let page = dir.path().join("page.html");
        std::fs::write(&page, r#"<img src="art.bin">"#).unwrap();

        let env = HeadlessEnvironment::load_file(&page, HeadlessConfig::default()).unwrap();
        assert_eq!(env.load_image("art.bin").await.unwrap(), vec![7, 8, 9]);
        assert!(env.load_image("missing.bin").await.is_err());
    }

    #[test]
    fn headless_has_no_share_or_popup() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_in(dir.path());
        assert!(!env.has_share());
        assert!(env.open_popup().is_none());
        assert!(env.user_agent().unwrap().contains("podsnap"));
    }
}
