//! Backend descriptor: per-worker health, latency, and error state.
//!
//! Each field is independently interior-mutable (`parking_lot::Mutex`
//! around the small bits of state that must move together) so the balancer
//! can mark one backend from a forward and probe another concurrently
//! without contending on a single lock across the whole fleet.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// `recent_latencies` never grows past this many entries (newest last).
pub const MAX_RECENT_LATENCIES: usize = 10;
/// Three consecutive errors take a backend out of rotation.
pub const ERROR_THRESHOLD: u32 = 3;
/// A backend is re-probed once this many seconds have passed since its last
/// check.
pub const HEALTH_CHECK_INTERVAL_S: f64 = 30.0;

#[derive(Debug)]
pub struct Backend {
    pub host: String,
    pub port: u16,
    healthy: AtomicBool,
    error_count: AtomicU32,
    last_check_epoch_s: Mutex<f64>,
    recent_latencies: Mutex<VecDeque<Duration>>,
}

impl Backend {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            healthy: AtomicBool::new(true),
            error_count: AtomicU32::new(0),
            last_check_epoch_s: Mutex::new(0.0),
            recent_latencies: Mutex::new(VecDeque::with_capacity(MAX_RECENT_LATENCIES)),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Acquire)
    }

    pub fn last_check_epoch_s(&self) -> f64 {
        *self.last_check_epoch_s.lock()
    }

    /// Whether this backend is due for a health probe, i.e. it has not been
    /// checked in the last [`HEALTH_CHECK_INTERVAL_S`] seconds.
    pub fn due_for_probe(&self, now_epoch_s: f64) -> bool {
        now_epoch_s - self.last_check_epoch_s() > HEALTH_CHECK_INTERVAL_S
    }

    /// Records that a probe/forward was just attempted, independent of its
    /// outcome. `last_check_epoch_s` is monotonically non-decreasing per
    /// backend: a stale clock read never rewinds it.
    pub fn touch_last_check(&self, now_epoch_s: f64) {
        let mut last = self.last_check_epoch_s.lock();
        if now_epoch_s > *last {
            *last = now_epoch_s;
        }
    }

    /// A consecutive failure. Flips `healthy` false the moment the streak
    /// reaches [`ERROR_THRESHOLD`].
    pub fn mark_error(&self) {
        let count = self.error_count.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= ERROR_THRESHOLD {
            self.healthy.store(false, Ordering::Release);
        }
    }

    /// Any success — a 200 forward or a successful probe — resets the error
    /// streak and immediately marks the backend healthy again.
    pub fn mark_success(&self) {
        self.error_count.store(0, Ordering::Release);
        self.healthy.store(true, Ordering::Release);
    }

    pub fn add_response_time(&self, duration: Duration) {
        let mut latencies = self.recent_latencies.lock();
        latencies.push_back(duration);
        while latencies.len() > MAX_RECENT_LATENCIES {
            latencies.pop_front();
        }
    }

    pub fn avg_response_time(&self) -> f64 {
        let latencies = self.recent_latencies.lock();
        if latencies.is_empty() {
            return 0.0;
        }
        let total: Duration = latencies.iter().sum();
        total.as_secs_f64() / latencies.len() as f64
    }

    pub fn recent_latency_count(&self) -> usize {
        self.recent_latencies.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_threshold_flips_unhealthy_and_success_recovers() {
        let backend = Backend::new("127.0.0.1", 8070);
        assert!(backend.is_healthy());

        backend.mark_error();
        backend.mark_error();
        assert!(backend.is_healthy(), "two errors must not demote a backend");

        backend.mark_error();
        assert!(!backend.is_healthy(), "three consecutive errors must demote it");
        assert_eq!(backend.error_count(), 3);

        backend.mark_success();
        assert!(backend.is_healthy());
        assert_eq!(backend.error_count(), 0);
    }

    #[test]
    fn recent_latencies_cap_at_ten_newest_last() {
        let backend = Backend::new("127.0.0.1", 8070);
        for i in 0..15u64 {
            backend.add_response_time(Duration::from_millis(i));
        }
        assert_eq!(backend.recent_latency_count(), MAX_RECENT_LATENCIES);
    }

    #[test]
    fn avg_response_time_is_zero_with_no_samples() {
        let backend = Backend::new("127.0.0.1", 8070);
        assert_eq!(backend.avg_response_time(), 0.0);
    }

    #[test]
    fn last_check_is_monotonic() {
        let backend = Backend::new("127.0.0.1", 8070);
        backend.touch_last_check(100.0);
        backend.touch_last_check(50.0);
        assert_eq!(backend.last_check_epoch_s(), 100.0);
        backend.touch_last_check(150.0);
        assert_eq!(backend.last_check_epoch_s(), 150.0);
    }
}
