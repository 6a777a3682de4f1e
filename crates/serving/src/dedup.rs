//! Sliding dedup window for delivery events.
//!
//! Keys are reserved before the debit and released if the debit is
//! rejected, so two concurrent submissions of the same event can never both
//! be charged. Expired keys are evicted by `sweep`, which runs from the
//! maintenance task rather than on the request path.

use adserve_core::config::DedupConfig;
use adserve_core::types::AdEvent;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupCheck {
    /// First sighting in the window; the key is now reserved.
    Fresh,
    Duplicate,
    /// The window is at capacity and cannot track a new key.
    Saturated,
}

/// Stable key for "the same event": kind, campaign, viewer (or anonymous
/// session token) and video.
pub fn dedup_key(event: &AdEvent) -> String {
    let viewer = event
        .viewer_id
        .as_deref()
        .or(event.anonymous_token.as_deref())
        .unwrap_or("anonymous");
    let video = event.video_id.as_deref().unwrap_or("-");

    let mut hasher = Sha256::new();
    hasher.update(event.kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(event.campaign_id.as_bytes());
    hasher.update(b"|");
    hasher.update(viewer.as_bytes());
    hasher.update(b"|");
    hasher.update(video.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct DedupWindow {
    window: Duration,
    max_entries: usize,
    seen: DashMap<String, DateTime<Utc>>,
}

impl DedupWindow {
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            window,
            max_entries,
            seen: DashMap::new(),
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(
            Duration::seconds(config.window_secs as i64),
            config.max_entries,
        )
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Reserve `key` at `at` unless it was seen less than one window earlier.
    pub fn try_reserve(&self, key: String, at: DateTime<Utc>) -> DedupCheck {
        let at_capacity = self.seen.len() >= self.max_entries;
        match self.seen.entry(key) {
            Entry::Occupied(mut seen) => {
                if (at - *seen.get()).abs() < self.window {
                    DedupCheck::Duplicate
                } else {
                    seen.insert(at);
                    DedupCheck::Fresh
                }
            }
            Entry::Vacant(_) if at_capacity => DedupCheck::Saturated,
            Entry::Vacant(slot) => {
                slot.insert(at);
                DedupCheck::Fresh
            }
        }
    }

    /// Undo a reservation whose event was not charged.
    pub fn release(&self, key: &str) {
        self.seen.remove(key);
    }

    /// Evict keys older than the window. Returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.seen.len();
        let cutoff = now - self.window;
        self.seen.retain(|_, seen| *seen > cutoff);
        let evicted = before.saturating_sub(self.seen.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.seen.len(), "Dedup window swept");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::from_config(&DedupConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_key_identity() {
        let cid = Uuid::new_v4();
        let now = Utc::now();
        let a = AdEvent::impression(cid, now).with_viewer("v1").with_video("vid");
        let b = AdEvent::impression(cid, now + Duration::seconds(5))
            .with_viewer("v1")
            .with_video("vid");
        assert_eq!(dedup_key(&a), dedup_key(&b));
        assert_eq!(dedup_key(&a).len(), 64);

        let click = AdEvent::click(cid, now).with_viewer("v1").with_video("vid");
        assert_ne!(dedup_key(&a), dedup_key(&click));
        let other_viewer = AdEvent::impression(cid, now).with_viewer("v2").with_video("vid");
        assert_ne!(dedup_key(&a), dedup_key(&other_viewer));
    }

    #[test]
    fn test_anonymous_token_stands_in_for_viewer() {
        let cid = Uuid::new_v4();
        let now = Utc::now();
        let mut a = AdEvent::impression(cid, now);
        a.anonymous_token = Some("sess-1".to_string());
        let mut b = AdEvent::impression(cid, now);
        b.anonymous_token = Some("sess-2".to_string());
        assert_ne!(dedup_key(&a), dedup_key(&b));
    }

    #[test]
    fn test_duplicate_within_window_only() {
        let window = DedupWindow::new(Duration::seconds(60), 100);
        let t0 = Utc::now();

        assert_eq!(window.try_reserve("k".into(), t0), DedupCheck::Fresh);
        assert_eq!(
            window.try_reserve("k".into(), t0 + Duration::seconds(59)),
            DedupCheck::Duplicate
        );
        assert_eq!(
            window.try_reserve("k".into(), t0 + Duration::seconds(61)),
            DedupCheck::Fresh
        );
    }

    #[test]
    fn test_release_allows_retry() {
        let window = DedupWindow::default();
        let now = Utc::now();
        assert_eq!(window.try_reserve("k".into(), now), DedupCheck::Fresh);
        window.release("k");
        assert_eq!(window.try_reserve("k".into(), now), DedupCheck::Fresh);
    }

    #[test]
    fn test_saturation_and_sweep() {
        let window = DedupWindow::new(Duration::seconds(60), 2);
        let t0 = Utc::now();
        window.try_reserve("a".into(), t0);
        window.try_reserve("b".into(), t0 + Duration::seconds(30));
        assert_eq!(window.try_reserve("c".into(), t0), DedupCheck::Saturated);

        assert_eq!(window.sweep(t0 + Duration::seconds(70)), 1);
        assert_eq!(window.len(), 1);
        assert_eq!(
            window.try_reserve("c".into(), t0 + Duration::seconds(70)),
            DedupCheck::Fresh
        );
    }
}
