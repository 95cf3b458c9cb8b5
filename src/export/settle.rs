//! Bounded wait for transitions and animations on the export target

use std::time::Duration;

use crate::dom::{Document, NodeId};
use crate::platform::BrowserEnvironment;
use crate::rendering::style::{parse_time_list, parse_time_ms, split_top_level};
use crate::{Error, Result};

/// Longest `duration + delay` over every computed transition and animation
/// timeline on `node` and its descendants, clamped to `0..=ceiling`.
///
/// Comma-separated lists are parallel timelines; a shorter list repeats
/// cyclically against a longer one, as CSS does.
pub fn settle_delay(doc: &Document, node: NodeId, ceiling: Duration) -> Result<Duration> {
    if !doc.is_attached(node) || !doc.is_element(node) {
        return Err(Error::InvalidTarget(format!("node {} is not attached", node.index())));
    }
    let mut longest_ms = 0.0f64;
    for id in doc.descendants(node) {
        if !doc.is_element(id) {
            continue;
        }
        for prefix in ["transition", "animation"] {
            longest_ms = longest_ms.max(longest_timeline_ms(doc, id, prefix));
        }
    }
    let ceiling_ms = ceiling.as_millis() as f64;
    Ok(Duration::from_millis(longest_ms.clamp(0.0, ceiling_ms).round() as u64))
}

fn longest_timeline_ms(doc: &Document, id: NodeId, prefix: &str) -> f64 {
    let (mut durations, mut delays) = doc
        .computed_value(id, prefix)
        .map(|v| parse_shorthand_times(&v))
        .unwrap_or_default();
    if let Some(v) = doc.computed_value(id, &format!("{}-duration", prefix)) {
        durations = parse_time_list(&v);
    }
    if let Some(v) = doc.computed_value(id, &format!("{}-delay", prefix)) {
        delays = parse_time_list(&v);
    }
    if durations.is_empty() {
        return 0.0;
    }
    if delays.is_empty() {
        delays.push(0.0);
    }
    let n = durations.len().max(delays.len());
    (0..n)
        .map(|i| durations[i % durations.len()] + delays[i % delays.len()])
        .fold(0.0, f64::max)
}

/// Per comma-separated item, the first time token is the duration and the
/// second the delay
fn parse_shorthand_times(value: &str) -> (Vec<f64>, Vec<f64>) {
    let mut durations = Vec::new();
    let mut delays = Vec::new();
    for item in split_top_level(value, ',') {
        let mut times = split_top_level(&item, ' ').into_iter().filter_map(|t| parse_time_ms(&t));
        durations.push(times.next().unwrap_or(0.0));
        delays.push(times.next().unwrap_or(0.0));
    }
    (durations, delays)
}

async fn double_frame(env: &dyn BrowserEnvironment) {
    env.next_frame().await;
    env.next_frame().await;
}

/// Wait two frames, the settle delay, then two more frames.
///
/// Never fails: a node that cannot be scanned settles immediately.
pub async fn await_settle(env: &dyn BrowserEnvironment, node: NodeId, ceiling: Duration) {
    double_frame(env).await;
    let delay = {
        let doc = env.document();
        let doc = doc.borrow();
        settle_delay(&doc, node, ceiling)
    };
    let delay = delay.unwrap_or_else(|e| {
        log::debug!("[settle] scan failed, not waiting: {}", e);
        Duration::ZERO
    });
    if !delay.is_zero() {
        log::debug!("[settle] waiting {}ms", delay.as_millis());
        tokio::time::sleep(delay).await;
    }
    double_frame(env).await;
}
