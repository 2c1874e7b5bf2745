//! Crew Dispatch: request lifecycle and worker matching core.
//!
//! Matches customer labor requests with available skilled workers inside a
//! service radius, tracks per-skill confirmation quorums, and guarantees a
//! worker is never double-booked across active work periods. Persistence,
//! notification transport, and geocoding are injected collaborators.

pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod geocode;
pub mod matching;
pub mod model;
pub mod notify;
pub mod store;

pub use config::DispatchConfig;
pub use engine::DispatchEngine;
pub use error::{Error, Result};

/// Initialize tracing with an env-filter (`RUST_LOG`), defaulting to `info`.
///
/// Call once from the hosting binary or a test harness.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}
