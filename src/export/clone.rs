//! Detached, animation-frozen copy of the export target
//!
//! The clone sits at the viewport origin behind all content (extreme negative
//! `z-index`) instead of at a far negative offset, which clipped shadows on
//! some renderers. It carries explicit pixel dimensions taken from the live
//! node, and removes itself from the document when dropped.

use std::time::Duration;

use futures::future::join_all;

use crate::dom::{NodeId, SharedDocument};
use crate::platform::{encode_data_url, BrowserEnvironment};
use crate::rendering::layout::{inherited_for, measure};
use crate::{Error, Result};

/// Marks the clone root as an export artifact
pub const EXPORT_CLONE_ATTR: &str = "data-export-clone";
/// Names the visual layer of an element for shadow substitution
pub const EXPORT_LAYER_ATTR: &str = "data-export-layer";
/// Marks the injected freeze stylesheet
pub const FREEZE_STYLE_ATTR: &str = "data-export-freeze";

const FREEZE_STYLE: &str = "[data-export-clone], [data-export-clone] * { animation: none !important; transition: none !important; caret-color: transparent !important; }";

const BEHIND_EVERYTHING: &str = "-2147483647";

/// Shadows that survive flattening, per `data-export-layer` value.
///
/// - `shell`: top highlight and bottom lip only; the drop shadow is left to the page background
/// - `wheel`: tight contact shadow plus rim highlights
/// - `wheel-center`: same recipe as the wheel at a smaller radius
/// - `screen`: hard bezel edge with a short falloff
/// - `artwork`: soft drop shadow clipped to the bottom edge
pub const EXPORT_SAFE_SHADOWS: &[(&str, &str)] = &[
    (
        "shell",
        "inset 0 2px 0 rgba(255,255,255,0.5), inset 0 -1px 0 rgba(0,0,0,0.08)",
    ),
    (
        "wheel",
        "0 8px 12px -12px rgba(0,0,0,0.26), inset 0 1px 0 rgba(255,255,255,0.92), inset 0 -1px 0 rgba(0,0,0,0.05)",
    ),
    (
        "wheel-center",
        "0 4px 8px -10px rgba(0,0,0,0.38), 0 1px 2px rgba(0,0,0,0.07), inset 0 1px 0 rgba(255,255,255,0.95)",
    ),
    ("screen", "0 2px 0 rgba(0,0,0,0.82), 0 1px 3px rgba(0,0,0,0.22)"),
    ("artwork", "0 3px 8px -6px rgba(0,0,0,0.35)"),
];

pub fn export_safe_shadow(layer: &str) -> Option<&'static str> {
    EXPORT_SAFE_SHADOWS
        .iter()
        .find(|(name, _)| *name == layer)
        .map(|(_, shadow)| *shadow)
}

/// Outcome of inlining the clone's images
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbedReport {
    pub embedded: usize,
    pub skipped: usize,
}

/// Off-screen copy of the export target, attached to `<body>` while alive
pub struct DetachedClone {
    doc: SharedDocument,
    node: NodeId,
}

impl DetachedClone {
    /// Deep-clone `target`, freeze it and attach it to `<body>`
    pub fn build(doc: &SharedDocument, target: NodeId) -> Result<Self> {
        let mut d = doc.borrow_mut();
        let rect = measure(&d, target)
            .ok_or_else(|| Error::InvalidTarget(format!("node {} is not rendered", target.index())))?;
        let inherited = inherited_for(&d, target);
        let clone = d.deep_clone(target)?;

        for id in d.descendants(clone) {
            if d.is_element(id) {
                d.remove_style_where(id, |p| p.starts_with("animation") || p.starts_with("transition"));
            }
        }

        let had_color = d.computed_value(clone, "color").is_some();
        let had_font_size = d.computed_value(clone, "font-size").is_some();
        for (prop, value) in [
            ("position", "fixed".to_string()),
            ("left", "0px".to_string()),
            ("top", "0px".to_string()),
            ("margin", "0px".to_string()),
            ("z-index", BEHIND_EVERYTHING.to_string()),
            ("pointer-events", "none".to_string()),
            ("width", format!("{}px", rect.width)),
            ("height", format!("{}px", rect.height)),
        ] {
            d.set_style(clone, prop, &value)?;
        }
        if !had_color {
            let c = inherited.color;
            let value = format!("rgba({}, {}, {}, {})", c.r, c.g, c.b, c.alpha_f32());
            d.set_style(clone, "color", &value)?;
        }
        if !had_font_size {
            d.set_style(clone, "font-size", &format!("{}px", inherited.font_size))?;
        }
        d.set_attr(clone, EXPORT_CLONE_ATTR, "true")?;

        for layer in d.elements_with_attr(clone, EXPORT_LAYER_ATTR) {
            let name = d.attr(layer, EXPORT_LAYER_ATTR).unwrap_or_default().to_string();
            if let Some(shadow) = export_safe_shadow(&name) {
                d.set_style(layer, "box-shadow", shadow)?;
            }
        }

        let style = d.create_element("style");
        d.set_attr(style, FREEZE_STYLE_ATTR, "")?;
        let css = d.create_text(FREEZE_STYLE);
        d.append_child(style, css)?;
        d.append_child(clone, style)?;

        let body = d.body();
        d.append_child(body, clone)?;
        log::debug!(
            "[clone] built node {} from {} at {}x{}",
            clone.index(),
            target.index(),
            rect.width,
            rect.height
        );
        Ok(Self {
            doc: doc.clone(),
            node: clone,
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Inline every non-`data:` image source.
    ///
    /// Images load concurrently, each bounded by `timeout`. A failed or slow
    /// image is skipped with a warning and keeps its original source.
    pub async fn embed_images(&self, env: &dyn BrowserEnvironment, timeout: Duration) -> EmbedReport {
        let pending: Vec<(NodeId, String)> = {
            let d = self.doc.borrow();
            d.descendants(self.node)
                .into_iter()
                .filter(|id| d.tag(*id) == Some("img"))
                .filter_map(|id| d.attr(id, "src").map(|src| (id, src.to_string())))
                .filter(|(_, src)| !src.is_empty() && !src.starts_with("data:"))
                .collect()
        };
        if pending.is_empty() {
            return EmbedReport::default();
        }

        let loads = pending.iter().map(|(_, src)| async move {
            match tokio::time::timeout(timeout, env.load_image(src)).await {
                Ok(Ok(bytes)) => Ok(bytes),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(Error::Timeout(timeout.as_millis() as u64)),
            }
        });
        let results = join_all(loads).await;

        let mut report = EmbedReport::default();
        let mut d = self.doc.borrow_mut();
        for ((id, src), result) in pending.iter().zip(results) {
            let inlined = result.and_then(|bytes| {
                let format = image::guess_format(&bytes)?;
                Ok(encode_data_url(format.to_mime_type(), &bytes))
            });
            match inlined.and_then(|url| d.set_attr(*id, "src", &url)) {
                Ok(()) => {
                    d.remove_attr(*id, "srcset");
                    report.embedded += 1;
                }
                Err(e) => {
                    log::warn!("[clone] skipping image {}: {}", src, e);
                    report.skipped += 1;
                }
            }
        }
        report
    }
}

impl Drop for DetachedClone {
    fn drop(&mut self) {
        match self.doc.try_borrow_mut() {
            Ok(mut d) => {
                d.remove(self.node);
                log::debug!("[clone] detached node {}", self.node.index());
            }
            Err(_) => log::error!("[clone] document busy, clone {} left attached", self.node.index()),
        }
    }
}
