//! Integration tests for the response cache
//!
//! Tests cover:
//! - Read-through caching and TTL expiry
//! - Invalidation after successful mutations
//! - Exactness of pattern invalidation
//! - Behaviour over a degraded backend

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use gatehouse_core::cache::{CachePolicy, CacheStatus, InvalidationRule, ResponseCache, RoutePolicy};
use gatehouse_core::domain::{RequestDescriptor, RoutePattern};
use gatehouse_core::store::Store;

fn items_policy() -> CachePolicy {
    CachePolicy::new("cache", Duration::from_secs(60))
        .with_route(RoutePolicy {
            pattern: RoutePattern::parse("/items/:id").unwrap(),
            ttl: Some(Duration::from_secs(30)),
            cacheable: true,
            vary_by_identity: false,
        })
        .with_rule(
            InvalidationRule::new("/items/:id", &["PUT", "PATCH", "DELETE"], &["/items/:id*"])
                .unwrap(),
        )
}

mod read_through_tests {
    use super::*;

    #[tokio::test]
    async fn test_get_is_cached_under_derived_key() {
        let clock = manual_clock();
        let store = local_store(&clock);
        let cache = ResponseCache::with_clock(store.clone(), items_policy(), clock.clone());
        let downstream = CountingDownstream::new(200);

        let request = RequestDescriptor::new("GET", "/items/42");
        let first = cache.handle(&request, downstream.as_ref()).await;
        let second = cache.handle(&request, downstream.as_ref()).await;

        assert_eq!(first.status, CacheStatus::Miss);
        assert_eq!(second.status, CacheStatus::Hit);
        assert_eq!(second.response.content_type.as_deref(), Some("text/plain"));
        assert_eq!(downstream.calls(), 1);
        assert!(store.get("cache:GET:/items/42").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_equivalent_requests_share_an_entry() {
        let clock = manual_clock();
        let cache = ResponseCache::with_clock(local_store(&clock), items_policy(), clock.clone());
        let downstream = CountingDownstream::new(200);

        let a = RequestDescriptor::new("GET", "/items/42/").with_raw_query("b=2&a=1");
        let b = RequestDescriptor::new("get", "//items/./42").with_raw_query("a=1&b=2");

        cache.handle(&a, downstream.as_ref()).await;
        let outcome = cache.handle(&b, downstream.as_ref()).await;

        assert_eq!(outcome.status, CacheStatus::Hit);
        assert_eq!(downstream.calls(), 1);
    }

    #[tokio::test]
    async fn test_route_ttl_bounds_freshness() {
        let clock = manual_clock();
        let cache = ResponseCache::with_clock(local_store(&clock), items_policy(), clock.clone());
        let downstream = CountingDownstream::new(200);
        let request = RequestDescriptor::new("GET", "/items/42");

        cache.handle(&request, downstream.as_ref()).await;

        clock.advance(Duration::from_millis(29_999));
        assert_eq!(
            cache.handle(&request, downstream.as_ref()).await.status,
            CacheStatus::Hit
        );

        clock.advance(Duration::from_millis(1));
        assert_eq!(
            cache.handle(&request, downstream.as_ref()).await.status,
            CacheStatus::Miss
        );
        assert_eq!(downstream.calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_envelope_is_not_served_even_if_store_keeps_it() {
        let clock = manual_clock();
        let store = local_store(&clock);
        let cache = ResponseCache::with_clock(store.clone(), items_policy(), clock.clone());
        let downstream = CountingDownstream::new(200);
        let request = RequestDescriptor::new("GET", "/items/42");

        cache.handle(&request, downstream.as_ref()).await;
        let payload = store.get("cache:GET:/items/42").await.unwrap().unwrap();
        // Re-store the same envelope with a much longer store TTL
        store
            .set("cache:GET:/items/42", payload, Duration::from_secs(3600))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(31));
        let outcome = cache.handle(&request, downstream.as_ref()).await;
        assert_eq!(outcome.status, CacheStatus::Miss);
    }
}

mod invalidation_tests {
    use super::*;

    #[tokio::test]
    async fn test_put_invalidates_following_get() {
        let clock = manual_clock();
        let cache = ResponseCache::with_clock(local_store(&clock), items_policy(), clock.clone());
        let downstream = CountingDownstream::new(200);
        let get = RequestDescriptor::new("GET", "/items/42");

        cache.handle(&get, downstream.as_ref()).await;
        assert_eq!(
            cache.handle(&get, downstream.as_ref()).await.status,
            CacheStatus::Hit
        );

        let put = RequestDescriptor::new("PUT", "/items/42");
        let mutation = cache.handle(&put, downstream.as_ref()).await;
        assert_eq!(mutation.status, CacheStatus::Invalidated);

        let after = cache.handle(&get, downstream.as_ref()).await;
        assert_eq!(after.status, CacheStatus::Miss);
        assert_eq!(downstream.calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_mutation_does_not_invalidate() {
        let clock = manual_clock();
        let store = local_store(&clock);
        let cache = ResponseCache::with_clock(store.clone(), items_policy(), clock.clone());
        let ok = CountingDownstream::new(200);
        let failing = CountingDownstream::new(409);
        let get = RequestDescriptor::new("GET", "/items/42");

        cache.handle(&get, ok.as_ref()).await;
        let put = RequestDescriptor::new("PUT", "/items/42");
        let outcome = cache.handle(&put, failing.as_ref()).await;

        assert_eq!(outcome.status, CacheStatus::Bypass);
        assert_eq!(outcome.response.status, 409);
        assert_eq!(
            cache.handle(&get, ok.as_ref()).await.status,
            CacheStatus::Hit
        );
    }

    #[tokio::test]
    async fn test_invalidation_removes_exactly_the_matching_entries() {
        let clock = manual_clock();
        let store = local_store(&clock);
        let cache = ResponseCache::with_clock(store.clone(), items_policy(), clock.clone());
        let downstream = CountingDownstream::new(200);

        let cached = [
            RequestDescriptor::new("GET", "/items/42"),
            RequestDescriptor::new("GET", "/items/42").with_raw_query("fields=name"),
            RequestDescriptor::new("HEAD", "/items/42"),
            RequestDescriptor::new("GET", "/items/420"),
            RequestDescriptor::new("GET", "/items/7"),
            RequestDescriptor::new("GET", "/users/42"),
        ];
        for request in &cached {
            cache.handle(request, downstream.as_ref()).await;
        }
        assert_eq!(store.len().await, 6);

        let removed = cache
            .invalidate(&RequestDescriptor::new("DELETE", "/items/42"))
            .await;

        // `/items/42*` also covers `/items/420`
        assert_eq!(removed, Some(4));
        assert!(store.get("cache:GET:/items/7").await.unwrap().is_some());
        assert!(store.get("cache:GET:/users/42").await.unwrap().is_some());
        assert_eq!(cache.stats().keys_invalidated, 4);
    }
}

mod degraded_tests {
    use super::*;
    use gatehouse_core::fallback::StoreMode;

    #[tokio::test]
    async fn test_cache_keeps_serving_through_a_backend_outage() {
        let fixture = fallback_fixture(1);
        let cache = ResponseCache::with_clock(
            fixture.store.clone(),
            items_policy(),
            fixture.clock.clone(),
        );
        let downstream = CountingDownstream::new(200);
        let request = RequestDescriptor::new("GET", "/items/42");

        cache.handle(&request, downstream.as_ref()).await;
        fixture.remote.fail();

        // The outage is a miss, never an error
        let during = cache.handle(&request, downstream.as_ref()).await;
        assert_eq!(during.status, CacheStatus::Miss);
        assert_eq!(during.response.status, 200);
        assert_eq!(fixture.store.mode(), StoreMode::Degraded);

        // The local store now serves hits
        let local_hit = cache.handle(&request, downstream.as_ref()).await;
        assert_eq!(local_hit.status, CacheStatus::Hit);
    }

    #[tokio::test]
    async fn test_hanging_backend_times_out_to_the_handler() {
        let clock = manual_clock();
        let store = Arc::new(gatehouse_core::FallbackStore::new(
            Arc::new(HangingStore),
            local_store(&clock),
            fast_fallback_config(10),
        ));
        let cache = ResponseCache::with_clock(store, items_policy(), clock);
        let downstream = CountingDownstream::new(200);

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            cache.handle(&RequestDescriptor::new("GET", "/items/1"), downstream.as_ref()),
        )
        .await
        .expect("cache must not block on a hanging backend");

        assert_eq!(outcome.response.status, 200);
        assert_eq!(downstream.calls(), 1);
    }
}
