//! Supervisor: spawns, monitors, and terminates a fleet of worker
//! processes on a contiguous port range.

pub mod process;

pub use process::Supervisor;
