//! Balancer state: the ordered backend list, selection cursor, and shared
//! connection pool.
//!
//! The ordered backend list is fixed at construction (registration order);
//! only the cursor and each backend's own interior-mutable counters change
//! at runtime. Selection and cursor advancement happen under one lock so a
//! concurrent burst of requests never sees two callers hand out the same
//! slot — per-backend marking still happens lock-free through `Backend`'s
//! own atomics so a forward and a probe can touch different backends
//! without contending on this lock at all.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::backend::Backend;

pub fn now_epoch_s() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub struct BalancerState {
    backends: Vec<Arc<Backend>>,
    cursor: Mutex<usize>,
    pub http_client: reqwest::Client,
    /// Caps total concurrent outbound connections across forwards and
    /// probes combined, on top of reqwest's own per-host pool limit.
    pub connection_permits: tokio::sync::Semaphore,
}

/// Total concurrent connection cap shared by forwards and probes.
pub const MAX_CONCURRENT_CONNECTIONS: usize = 100;
/// Per-host idle connection cap kept warm in the pool.
pub const MAX_CONNECTIONS_PER_HOST: usize = 20;
/// Per-request deadline; also the client-visible timeout ceiling.
pub const REQUEST_DEADLINE: std::time::Duration = std::time::Duration::from_secs(120);

impl BalancerState {
    pub fn new(backends: Vec<Arc<Backend>>) -> Self {
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(MAX_CONNECTIONS_PER_HOST)
            .timeout(REQUEST_DEADLINE)
            .build()
            .expect("reqwest client configuration is always valid");

        Self {
            backends,
            cursor: Mutex::new(0),
            http_client,
            connection_permits: tokio::sync::Semaphore::new(MAX_CONCURRENT_CONNECTIONS),
        }
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// Round-robin pick among the currently healthy backends. The cursor
    /// advances on every successful selection; it is left untouched, not
    /// reset or rewound, when the healthy subset shrinks or grows.
    pub fn select_next(&self) -> Option<Arc<Backend>> {
        self.select_next_excluding(None)
    }

    /// Same selection rule but skipping one specific backend — used for the
    /// single-shot failover retry so it never lands on the backend that
    /// just failed.
    pub fn select_next_excluding(&self, exclude: Option<&Arc<Backend>>) -> Option<Arc<Backend>> {
        let healthy: Vec<&Arc<Backend>> = self
            .backends
            .iter()
            .filter(|b| b.is_healthy())
            .filter(|b| match exclude {
                Some(excluded) => !Arc::ptr_eq(b, excluded),
                None => true,
            })
            .collect();
        if healthy.is_empty() {
            return None;
        }

        let mut cursor = self.cursor.lock();
        let picked = healthy[*cursor % healthy.len()].clone();
        *cursor = cursor.wrapping_add(1);
        Some(picked)
    }

    pub fn total_backends(&self) -> usize {
        self.backends.len()
    }

    pub fn healthy_backends(&self) -> usize {
        self.backends.iter().filter(|b| b.is_healthy()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet(n: u16) -> BalancerState {
        let backends = (0..n)
            .map(|i| Arc::new(Backend::new("127.0.0.1", 8070 + i)))
            .collect();
        BalancerState::new(backends)
    }

    #[test]
    fn round_robins_across_all_healthy_backends() {
        let state = fleet(3);
        let picks: Vec<u16> = (0..6)
            .map(|_| state.select_next().unwrap().port)
            .collect();
        assert_eq!(picks, vec![8070, 8071, 8072, 8070, 8071, 8072]);
    }

    #[test]
    fn cursor_is_not_reset_when_healthy_subset_shrinks() {
        let state = fleet(3);
        assert_eq!(state.select_next().unwrap().port, 8070);
        assert_eq!(state.select_next().unwrap().port, 8071);

        // Demote the middle backend; cursor keeps advancing, not rewinding.
        state.backends()[1].mark_error();
        state.backends()[1].mark_error();
        state.backends()[1].mark_error();
        assert!(!state.backends()[1].is_healthy());

        // cursor=2 over {8070, 8072} (2 healthy) -> index 0 -> 8070
        assert_eq!(state.select_next().unwrap().port, 8070);
    }

    #[test]
    fn no_healthy_backends_returns_none() {
        let state = fleet(2);
        for backend in state.backends() {
            backend.mark_error();
            backend.mark_error();
            backend.mark_error();
        }
        assert!(state.select_next().is_none());
    }

    #[test]
    fn fairness_holds_over_a_large_sample_with_all_backends_healthy() {
        let state = fleet(5);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..100 {
            let port = state.select_next().unwrap().port;
            *counts.entry(port).or_insert(0u32) += 1;
        }
        let min = *counts.values().min().unwrap();
        let max = *counts.values().max().unwrap();
        assert_eq!(counts.len(), 5, "every healthy backend must be selected at least once");
        assert!(
            max - min <= 1,
            "selection counts must differ by at most 1 across an even sample: {counts:?}"
        );
    }

    #[test]
    fn select_next_excluding_skips_the_named_backend() {
        let state = fleet(2);
        let first = state.select_next().unwrap();
        let second = state.select_next_excluding(Some(&first)).unwrap();
        assert_ne!(first.port, second.port);
    }
}
