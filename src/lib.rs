//! `llamapool` — a health-aware, round-robin load balancer and worker pool
//! fronting single-threaded GGUF inference processes behind an
//! OpenAI-compatible HTTP surface.
//!
//! The three binaries (`llamapool-worker`, `llamapool-balancer`,
//! `llamapool-supervisor`) share this crate's modules rather than
//! duplicating the component logic each depends on:
//!
//! - [`registry`] and [`engine`] are the worker's collaborators: listing
//!   model files on disk and adapting the inference library, respectively.
//! - [`grammar`] compiles structured-output schemas to GBNF.
//! - [`worker`] is the worker's axum router and request pipeline.
//! - [`backend`] is the balancer's per-worker health/latency state.
//! - [`balancer`] is the balancer's axum router and selection logic.
//! - [`supervisor`] spawns and life-cycles the worker fleet.

pub mod backend;
pub mod balancer;
pub mod config;
pub mod engine;
pub mod error;
pub mod grammar;
pub mod registry;
pub mod supervisor;
pub mod worker;

/// Initializes the `tracing` subscriber shared by all three binaries:
/// `RUST_LOG`-driven with an `info` default.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
