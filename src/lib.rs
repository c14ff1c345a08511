//! Gatehouse - caching and rate limiting reverse proxy
//!
//! This is the HTTP crate that puts the `gatehouse-core` services in front of
//! an upstream API.

mod app;
pub mod presentation;

pub use app::{AppHandle, create_app, create_state, serve};
pub use gatehouse_core::{Config, init_tracing};
pub use presentation::{GatehouseState, create_router};

// Re-export for convenience
pub use gatehouse_core;
