//! CLI argument parsing and startup validation for the three binaries.
//!
//! Each binary gets its own `clap::Parser` struct plus a `validate()` step
//! that runs before any socket opens or directory is scanned, so a bad
//! argument always produces `ConfigError` → exit code 1 rather than a panic
//! partway through startup.

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::error::ConfigError;

/// Backend ports are restricted to this half-open range for the whole
/// fleet, matching the supervisor/balancer port-window contract.
pub const PORT_RANGE: std::ops::Range<u16> = 8070..8100;
pub const MAX_WORKERS: u32 = 30;
pub const DEFAULT_CTX_WINDOW: u32 = 4096;

fn require_models_dir(dir: &Path) -> Result<(), ConfigError> {
    if !dir.is_dir() {
        return Err(ConfigError::ModelsDirNotFound(dir.display().to_string()));
    }
    Ok(())
}

fn validate_fleet(base_port: u16, count: u32) -> Result<(), ConfigError> {
    if count > MAX_WORKERS {
        return Err(ConfigError::TooManyWorkers(count));
    }
    let end = base_port as u32 + count;
    if (base_port as u32) < PORT_RANGE.start as u32 || end > PORT_RANGE.end as u32 {
        return Err(ConfigError::PortRange {
            base_port,
            count,
            allowed: PORT_RANGE,
        });
    }
    Ok(())
}

/// `worker <models_dir> [host] [port] [threads]`
#[derive(Debug, Parser)]
#[command(name = "llamapool-worker", about = "OpenAI-compatible single-model inference worker")]
pub struct WorkerArgs {
    /// Directory scanned for `.gguf` model files.
    pub models_dir: PathBuf,

    /// Address to bind the HTTP server to.
    #[arg(default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the HTTP server to.
    #[arg(default_value_t = 8080)]
    pub port: u16,

    /// Threads handed to the inference engine on model load.
    #[arg(default_value_t = 1)]
    pub threads: u32,

    /// Context window used when loading a model.
    #[arg(long, default_value_t = DEFAULT_CTX_WINDOW, env = "LLAMAPOOL_CTX_WINDOW")]
    pub ctx_window: u32,
}

impl WorkerArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_models_dir(&self.models_dir)
    }
}

/// `supervisor <models_dir> [host] [base_port] [N]`
#[derive(Debug, Parser)]
#[command(name = "llamapool-supervisor", about = "Launches and life-cycles a fleet of workers")]
pub struct SupervisorArgs {
    pub models_dir: PathBuf,

    #[arg(default_value = "127.0.0.1")]
    pub host: String,

    #[arg(default_value_t = 8070)]
    pub base_port: u16,

    #[arg(default_value_t = 5)]
    pub num_workers: u32,

    #[arg(long, default_value_t = 1)]
    pub threads: u32,
}

impl SupervisorArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_models_dir(&self.models_dir)?;
        validate_fleet(self.base_port, self.num_workers)
    }
}

/// `balancer <backend_host> <base_port> <N> [lb_host] [lb_port]`
#[derive(Debug, Parser)]
#[command(name = "llamapool-balancer", about = "Round-robin, health-aware front end for a worker fleet")]
pub struct BalancerArgs {
    pub backend_host: String,
    pub base_port: u16,
    pub num_workers: u32,

    #[arg(default_value = "0.0.0.0")]
    pub lb_host: String,

    #[arg(default_value_t = 9000)]
    pub lb_port: u16,
}

impl BalancerArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_fleet(self.base_port, self.num_workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_more_than_thirty_workers() {
        let err = validate_fleet(8070, 31).unwrap_err();
        assert!(matches!(err, ConfigError::TooManyWorkers(31)));
    }

    #[test]
    fn accepts_exactly_thirty_workers_at_the_floor_of_the_range() {
        assert!(validate_fleet(8070, 30).is_ok());
    }

    #[test]
    fn rejects_a_base_port_below_the_allowed_range() {
        let err = validate_fleet(8069, 1).unwrap_err();
        assert!(matches!(err, ConfigError::PortRange { .. }));
    }

    #[test]
    fn rejects_a_window_that_straddles_the_end_of_the_allowed_range() {
        // [8095, 8100 + 10) = [8095, 8110) overruns the [8070, 8100) ceiling.
        let err = validate_fleet(8095, 15).unwrap_err();
        assert!(matches!(err, ConfigError::PortRange { .. }));
    }

    #[test]
    fn accepts_a_window_flush_against_the_ceiling() {
        assert!(validate_fleet(8090, 10).is_ok());
    }

    #[test]
    fn worker_args_rejects_a_missing_models_dir() {
        let args = WorkerArgs {
            models_dir: PathBuf::from("/does/not/exist/at/all"),
            host: "127.0.0.1".to_string(),
            port: 8080,
            threads: 1,
            ctx_window: DEFAULT_CTX_WINDOW,
        };
        assert!(matches!(
            args.validate(),
            Err(ConfigError::ModelsDirNotFound(_))
        ));
    }

    #[test]
    fn supervisor_args_validates_dir_before_port_range() {
        let args = SupervisorArgs {
            models_dir: PathBuf::from("/does/not/exist/at/all"),
            host: "127.0.0.1".to_string(),
            base_port: 8070,
            num_workers: 5,
            threads: 1,
        };
        assert!(matches!(
            args.validate(),
            Err(ConfigError::ModelsDirNotFound(_))
        ));
    }
}
