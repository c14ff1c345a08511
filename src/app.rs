//! Application wiring shared by the binary and tests

use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use gatehouse_core::cache::CachePolicy;
use gatehouse_core::config::StoreBackend;
use gatehouse_core::{Config, DragonflyStore, FallbackStore, LocalStore, RateLimiter, ResponseCache, Store};

use crate::presentation::{GatehouseState, ProxyHandler, create_router};

/// Router plus the token that stops background tasks
pub struct AppHandle {
    pub router: Router,
    pub state: GatehouseState,
    pub shutdown_token: CancellationToken,
}

/// Build the shared store, start its background tasks and return the state
pub async fn create_state(
    config: Config,
    shutdown_token: &CancellationToken,
) -> Result<GatehouseState, Box<dyn std::error::Error + Send + Sync>> {
    let config = Arc::new(config);
    let fallback_settings = &config.fallback;

    let local = Arc::new(LocalStore::new(
        fallback_settings.local_max_entries,
        fallback_settings.local_shards,
    ));
    local
        .clone()
        .start_cleanup_task(fallback_settings.cleanup_interval(), shutdown_token.clone());

    let remote: Arc<dyn Store> = match config.store.backend {
        StoreBackend::Dragonfly => Arc::new(DragonflyStore::new(
            &config.store.dragonfly_url,
            config.store.connect_timeout(),
            config.store.operation_timeout(),
            config.store.scan_batch_size,
        )?),
        StoreBackend::Memory => {
            let memory = Arc::new(LocalStore::new(
                fallback_settings.local_max_entries,
                fallback_settings.local_shards,
            ));
            memory
                .clone()
                .start_cleanup_task(fallback_settings.cleanup_interval(), shutdown_token.clone());
            memory
        }
    };

    let store = Arc::new(FallbackStore::new(
        remote,
        local,
        fallback_settings.to_fallback_config(config.store.operation_timeout()),
    ));
    let mode = store.initialize().await;
    store.clone().start_health_probe(shutdown_token.clone());

    tracing::info!(
        backend = ?config.store.backend,
        mode = %mode,
        "Store initialized"
    );

    let limiter = Arc::new(RateLimiter::from_config(store.clone(), &config.rate_limit)?);
    let cache = Arc::new(ResponseCache::new(
        store.clone(),
        CachePolicy::from_config(&config.cache)?,
    ));

    tracing::info!(
        rate_limiting = limiter.is_enabled(),
        tiers = limiter.tiers().tiers().len(),
        caching = cache.policy().enabled,
        "Gatehouse services initialized"
    );

    Ok(GatehouseState {
        limiter,
        cache,
        store,
        config,
    })
}

/// Create the application router in front of the configured upstream
pub async fn create_app(
    config: Config,
) -> Result<AppHandle, Box<dyn std::error::Error + Send + Sync>> {
    let shutdown_token = CancellationToken::new();

    let proxy = Arc::new(ProxyHandler::new(
        &config.upstream,
        config.server.max_body_bytes,
    )?);
    tracing::info!(upstream = %config.upstream.base_url, "Proxy configured");

    let state = create_state(config, &shutdown_token).await?;
    let router = create_router(state.clone(), proxy.router());

    Ok(AppHandle {
        router,
        state,
        shutdown_token,
    })
}

/// Serve `handle` on `listener` until `signal` resolves
///
/// The listener stops accepting as soon as `signal` fires. In-flight requests
/// get up to `drain_timeout` to finish, and the background tasks are cancelled
/// only once the server has stopped.
pub async fn serve<F>(
    listener: TcpListener,
    handle: AppHandle,
    signal: F,
    drain_timeout: Duration,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let signalled = CancellationToken::new();
    let server = axum::serve(listener, handle.router)
        .with_graceful_shutdown({
            let signalled = signalled.clone();
            async move {
                signal.await;
                signalled.cancel();
            }
        })
        .into_future();

    let result = tokio::select! {
        result = server => result,
        _ = async {
            signalled.cancelled().await;
            tokio::time::sleep(drain_timeout).await;
        } => {
            tracing::warn!(
                timeout_secs = drain_timeout.as_secs(),
                "In-flight requests did not finish before the shutdown timeout"
            );
            Ok(())
        }
    };

    tracing::info!("Cancelling background tasks...");
    handle.shutdown_token.cancel();
    result
}
