//! Worker process lifecycle: spawn, monitor, and terminate the fleet.
//!
//! Each worker runs as its own OS process in its own process group (via
//! `setsid` in a `pre_exec` hook) so a single `kill(-pid, SIGTERM)` reaches
//! the whole group rather than just the immediate child.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::sleep;

/// Cadence between spawning consecutive workers.
const SPAWN_INTERVAL: Duration = Duration::from_secs(2);
/// How long the stop path waits for a child to exit after SIGTERM before
/// force-killing it.
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(5);
/// Watcher loop polling cadence.
const WATCH_INTERVAL: Duration = Duration::from_secs(1);
/// Above this fleet size the supervisor logs a rough memory-footprint
/// estimate so an operator notices before the host starts swapping.
const MEMORY_ADVISORY_THRESHOLD: u32 = 10;
/// Rough resident-memory cost per loaded model, used only for the advisory
/// log line above; not a hard limit.
const ESTIMATED_GB_PER_WORKER: f64 = 4.0;

struct WorkerProcess {
    port: u16,
    child: Child,
}

/// Owns the fleet's child processes for the supervisor's lifetime.
pub struct Supervisor {
    workers: Vec<WorkerProcess>,
}

impl Supervisor {
    /// Spawns `count` workers on `[base_port, base_port + count)`, one
    /// every [`SPAWN_INTERVAL`], each in its own process group.
    ///
    /// `worker_binary` is the path to the `llamapool-worker` executable;
    /// the caller (the supervisor binary's `main`) resolves it relative to
    /// its own `current_exe()` so the fleet always runs the sibling binary
    /// from the same build.
    pub async fn spawn_fleet(
        worker_binary: &Path,
        models_dir: &Path,
        host: &str,
        base_port: u16,
        count: u32,
        threads: u32,
    ) -> std::io::Result<Self> {
        if count > MEMORY_ADVISORY_THRESHOLD {
            let estimated_gb = count as f64 * ESTIMATED_GB_PER_WORKER;
            tracing::info!(
                workers = count,
                estimated_gb,
                "fleet exceeds {MEMORY_ADVISORY_THRESHOLD} workers; ensure the host has roughly \
                 {estimated_gb:.0} GB of headroom for resident models"
            );
        }

        let mut workers = Vec::with_capacity(count as usize);
        for offset in 0..count {
            let port = base_port + offset as u16;
            let child = spawn_one(worker_binary, models_dir, host, port, threads)?;
            tracing::info!(port, "spawned worker");
            workers.push(WorkerProcess { port, child });

            if offset + 1 < count {
                sleep(SPAWN_INTERVAL).await;
            }
        }
        Ok(Self { workers })
    }

    /// Runs the watcher loop until either every child has exited on its
    /// own (logging an unexpected-death warning per straggler) or an
    /// interrupt (Ctrl-C / SIGINT) arrives, in which case it drives the
    /// graceful [`Self::shutdown`] path instead of just observing.
    pub async fn run(&mut self) {
        let (tx, mut rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(true);
            }
        });

        loop {
            if *rx.borrow() {
                tracing::info!("interrupt received, stopping fleet");
                self.shutdown().await;
                return;
            }

            let mut all_exited = true;
            for worker in &mut self.workers {
                match worker.child.try_wait() {
                    Ok(Some(status)) => {
                        tracing::warn!(port = worker.port, ?status, "worker exited unexpectedly");
                    }
                    Ok(None) => all_exited = false,
                    Err(e) => {
                        tracing::warn!(port = worker.port, error = %e, "failed to poll worker");
                        all_exited = false;
                    }
                }
            }
            if all_exited {
                return;
            }

            tokio::select! {
                _ = sleep(WATCH_INTERVAL) => {}
                _ = rx.changed() => {}
            }
        }
    }

    /// Graceful stop: SIGTERM each process group, wait up to
    /// [`GRACEFUL_STOP_TIMEOUT`] per child, then SIGKILL anything still
    /// alive.
    pub async fn shutdown(&mut self) {
        for worker in &self.workers {
            if let Some(pid) = worker.child.id() {
                signal_group(pid, libc::SIGTERM);
            }
        }
        for worker in &mut self.workers {
            let waited = tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, worker.child.wait()).await;
            if waited.is_err() {
                tracing::warn!(port = worker.port, "worker did not exit in time, force-killing");
                if let Some(pid) = worker.child.id() {
                    signal_group(pid, libc::SIGKILL);
                }
                let _ = worker.child.wait().await;
            }
        }
    }
}

fn spawn_one(
    worker_binary: &Path,
    models_dir: &Path,
    host: &str,
    port: u16,
    threads: u32,
) -> std::io::Result<Child> {
    let mut command = Command::new(worker_binary);
    command
        .arg(models_dir)
        .arg(host)
        .arg(port.to_string())
        .arg(threads.to_string())
        .kill_on_drop(true);

    // SAFETY: `setsid` is async-signal-safe and only affects the child
    // after `fork`, before `exec`; it never touches the parent's state.
    unsafe {
        command.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    command.spawn()
}

/// Sends `signal` to the process group led by `pid`. The group id equals
/// the leader's pid since `setsid` was called right after `fork` at spawn
/// time, so `-pid` addresses the whole group rather than just the leader.
fn signal_group(pid: u32, signal: i32) {
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_fleet_rejects_a_missing_worker_binary() {
        let dir = tempfile::tempdir().unwrap();
        let result = Supervisor::spawn_fleet(
            Path::new("/does/not/exist/llamapool-worker"),
            dir.path(),
            "127.0.0.1",
            8070,
            1,
            1,
        )
        .await;
        assert!(result.is_err());
    }
}
