//! Test fixtures for gatehouse-core

use std::sync::Arc;
use std::time::Duration;

use gatehouse_core::clock::ManualClock;
use gatehouse_core::domain::{TierPolicy, TierTable};
use gatehouse_core::fallback::{FallbackConfig, FallbackStore, RetryConfig};
use gatehouse_core::store::LocalStore;

use super::mocks::FlakyStore;

/// 2023-11-14T22:13:00Z, aligned to a minute boundary
pub const MINUTE_ALIGNED_MS: u64 = 1_699_999_980_000;

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(MINUTE_ALIGNED_MS))
}

pub fn local_store(clock: &Arc<ManualClock>) -> Arc<LocalStore> {
    Arc::new(LocalStore::with_clock(1_000, 8, clock.clone()))
}

/// Anonymous 2/min, standard 5/min, elevated 100/min, internal unrestricted
pub fn tier_table() -> TierTable {
    let minute = Duration::from_secs(60);
    TierTable::new(
        vec![
            (
                TierPolicy::restricted("anonymous", 2, minute),
                vec!["anonymous".to_string()],
            ),
            (
                TierPolicy::restricted("standard", 5, minute),
                vec!["user".to_string()],
            ),
            (
                TierPolicy::restricted("elevated", 100, minute),
                vec!["admin".to_string()],
            ),
            (
                TierPolicy::unrestricted("internal"),
                vec!["service".to_string()],
            ),
        ],
        "anonymous",
    )
    .expect("valid tier table")
}

pub fn fast_fallback_config(failure_threshold: u32) -> FallbackConfig {
    FallbackConfig {
        failure_threshold,
        health_check_interval: Duration::from_millis(20),
        operation_timeout: Duration::from_millis(50),
        invalidation_retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
        },
        max_pending_invalidations: 64,
    }
}

/// A flaky remote wrapped by a fallback coordinator, all on one manual clock
pub struct FallbackFixture {
    pub clock: Arc<ManualClock>,
    pub remote: Arc<FlakyStore>,
    pub store: Arc<FallbackStore>,
}

pub fn fallback_fixture(failure_threshold: u32) -> FallbackFixture {
    let clock = manual_clock();
    let remote = Arc::new(FlakyStore::new(LocalStore::with_clock(
        1_000,
        8,
        clock.clone(),
    )));
    let store = Arc::new(FallbackStore::new(
        remote.clone(),
        local_store(&clock),
        fast_fallback_config(failure_threshold),
    ));
    FallbackFixture {
        clock,
        remote,
        store,
    }
}
