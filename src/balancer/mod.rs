//! Load balancer: round-robin selection over healthy backends,
//! periodic health probing, transparent forwarding with single-shot
//! failover, and a shared connection pool.

pub mod probe;
pub mod server;
pub mod state;

pub use state::BalancerState;
