//! The worker: request pipeline, HTTP router, and the small wire
//! helpers (prompt composition, id/token/fingerprint generation) behind it.

pub mod server;
pub mod state;
pub mod wire;

pub use server::router;
pub use state::WorkerState;
