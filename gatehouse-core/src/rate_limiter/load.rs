//! Per-tier load in the current window

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::domain::TierPolicy;
use crate::store::{window_millis, window_start};

#[derive(Debug, Clone, Copy, Default)]
struct WindowLoad {
    window_start_ms: u64,
    requests: u64,
    denied: u64,
}

/// Load of one tier in its current window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierLoad {
    pub tier: String,
    pub limit: Option<u32>,
    pub window_seconds: u64,
    /// Start of the current window (Unix milliseconds)
    pub window_start_ms: u64,
    pub requests: u64,
    pub denied: u64,
}

/// Process-local request and denial counts per tier
///
/// Observability only; quota decisions never read these counts. The slot map
/// is fixed at construction and each tier has its own lock, so requests of
/// different tiers never contend.
#[derive(Debug, Default)]
pub struct TierLoadTracker {
    slots: HashMap<String, Mutex<WindowLoad>>,
}

impl TierLoadTracker {
    pub fn new(tiers: &[TierPolicy]) -> Self {
        Self {
            slots: tiers
                .iter()
                .map(|tier| (tier.name.clone(), Mutex::default()))
                .collect(),
        }
    }

    /// Count one decision; tiers outside the table are ignored
    pub fn record(&self, tier: &TierPolicy, now_ms: u64, allowed: bool) {
        let Some(slot) = self.slots.get(&tier.name) else {
            return;
        };
        let current = window_start(now_ms, tier.window);
        let mut load = slot.lock().unwrap_or_else(PoisonError::into_inner);
        // Late records never move the window back
        if load.window_start_ms < current {
            *load = WindowLoad {
                window_start_ms: current,
                ..WindowLoad::default()
            };
        }
        load.requests += 1;
        if !allowed {
            load.denied += 1;
        }
    }

    /// Current-window load of every tier; tiers idle this window report zero
    pub fn snapshot(&self, tiers: &[TierPolicy], now_ms: u64) -> Vec<TierLoad> {
        tiers
            .iter()
            .map(|tier| {
                let current = window_start(now_ms, tier.window);
                let load = self
                    .slots
                    .get(&tier.name)
                    .map(|slot| *slot.lock().unwrap_or_else(PoisonError::into_inner))
                    .filter(|load| load.window_start_ms == current)
                    .unwrap_or_default();
                TierLoad {
                    tier: tier.name.clone(),
                    limit: tier.limit,
                    window_seconds: window_millis(tier.window) / 1000,
                    window_start_ms: current,
                    requests: load.requests,
                    denied: load.denied,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_load_resets_with_the_window() {
        let tier = TierPolicy::restricted("standard", 5, Duration::from_secs(60));
        let tracker = TierLoadTracker::new(std::slice::from_ref(&tier));

        tracker.record(&tier, 60_000, true);
        tracker.record(&tier, 61_000, false);

        let now = tracker.snapshot(std::slice::from_ref(&tier), 62_000);
        assert_eq!(now[0].requests, 2);
        assert_eq!(now[0].denied, 1);
        assert_eq!(now[0].window_seconds, 60);

        let later = tracker.snapshot(std::slice::from_ref(&tier), 120_000);
        assert_eq!(later[0].requests, 0);
        assert_eq!(later[0].window_start_ms, 120_000);

        tracker.record(&tier, 121_000, true);
        let rolled = tracker.snapshot(std::slice::from_ref(&tier), 121_500);
        assert_eq!(rolled[0].requests, 1);
        assert_eq!(rolled[0].denied, 0);
    }

    #[test]
    fn test_late_record_does_not_rewind_the_window() {
        let tier = TierPolicy::restricted("standard", 5, Duration::from_secs(60));
        let tracker = TierLoadTracker::new(std::slice::from_ref(&tier));

        tracker.record(&tier, 125_000, true);
        tracker.record(&tier, 59_000, true);

        let now = tracker.snapshot(std::slice::from_ref(&tier), 126_000);
        assert_eq!(now[0].window_start_ms, 120_000);
        assert_eq!(now[0].requests, 2);
    }

    #[test]
    fn test_unknown_tier_is_ignored() {
        let known = TierPolicy::restricted("standard", 5, Duration::from_secs(60));
        let other = TierPolicy::restricted("other", 5, Duration::from_secs(60));
        let tracker = TierLoadTracker::new(std::slice::from_ref(&known));

        tracker.record(&other, 60_000, false);

        let load = tracker.snapshot(&[known, other], 60_000);
        assert!(load.iter().all(|l| l.requests == 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records_across_tiers_are_all_counted() {
        let tiers = vec![
            TierPolicy::restricted("anonymous", 10, Duration::from_secs(60)),
            TierPolicy::restricted("standard", 100, Duration::from_secs(60)),
        ];
        let tracker = Arc::new(TierLoadTracker::new(&tiers));

        let mut handles = Vec::new();
        for worker in 0..8 {
            let tracker = tracker.clone();
            let tier = tiers[worker % 2].clone();
            handles.push(tokio::spawn(async move {
                for i in 0..250 {
                    tracker.record(&tier, 60_000 + i, i % 5 != 0);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let load = tracker.snapshot(&tiers, 60_500);
        for tier_load in load {
            assert_eq!(tier_load.requests, 1_000);
            assert_eq!(tier_load.denied, 200);
        }
    }
}
