//! Export capability detection from the environment's user agent and share API

use serde::Serialize;

use crate::platform::{BrowserEnvironment, SharePayload};

/// What the current environment can do for delivery.
///
/// Computed fresh on every export call and never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub can_share: bool,
    pub can_share_files: bool,
    pub is_ios: bool,
    pub is_mobile: bool,
}

const MOBILE_MARKERS: &[&str] = &[
    "android",
    "webos",
    "iphone",
    "ipad",
    "ipod",
    "blackberry",
    "iemobile",
    "opera mini",
];

/// Probe the environment. Never fails: a throwing file-share probe reads as
/// "cannot share files".
pub fn detect_export_capabilities(env: &dyn BrowserEnvironment) -> Capabilities {
    let ua = env.user_agent().unwrap_or_default();
    let can_share = env.has_share();

    let can_share_files = env.has_can_share() && {
        let probe = SharePayload::single("probe.png", "image/png", vec![0u8]);
        match env.can_share_files(&probe) {
            Ok(yes) => yes,
            Err(e) => {
                log::debug!("[capabilities] file share probe failed: {}", e);
                false
            }
        }
    };

    Capabilities {
        can_share,
        can_share_files,
        is_ios: is_ios_user_agent(&ua, env.has_ms_stream()),
        is_mobile: is_mobile_user_agent(&ua),
    }
}

/// iPad, iPhone or iPod, unless the `MSStream` marker says it's old IE mobile
pub fn is_ios_user_agent(ua: &str, has_ms_stream: bool) -> bool {
    !has_ms_stream && ["iPad", "iPhone", "iPod"].iter().any(|m| ua.contains(m))
}

pub fn is_mobile_user_agent(ua: &str) -> bool {
    let ua = ua.to_ascii_lowercase();
    MOBILE_MARKERS.iter().any(|m| ua.contains(m))
}
