//! Health probing.
//!
//! Triggered synchronously before handling `GET /`, `GET /status`, and
//! `GET /v1` — never on the forwarded endpoints themselves. Every backend
//! whose `last_check_epoch_s` is more than 30s old gets a concurrent
//! `GET backend.url/`; one probe's transport failure never aborts another's
//! (each future is joined independently via `futures::future::join_all`,
//! which never short-circuits on an `Err` the way `try_join_all` would).

use std::sync::Arc;
use std::time::Instant;

use crate::backend::Backend;

use super::state::{now_epoch_s, BalancerState};

/// Issues a probe against every backend due for one, marking success/error
/// and recording latency exactly as a forwarded request would.
pub async fn probe_stale_backends(state: &BalancerState) {
    let now = now_epoch_s();
    let due: Vec<Arc<Backend>> = state
        .backends()
        .iter()
        .filter(|b| b.due_for_probe(now))
        .cloned()
        .collect();

    if due.is_empty() {
        return;
    }

    let probes = due.into_iter().map(|backend| probe_one(state, backend));
    futures::future::join_all(probes).await;
}

async fn probe_one(state: &BalancerState, backend: Arc<Backend>) {
    let now = now_epoch_s();
    backend.touch_last_check(now);

    let Ok(_permit) = state.connection_permits.acquire().await else {
        return;
    };

    let url = format!("{}/", backend.url());
    let started = Instant::now();
    match state.http_client.get(&url).send().await {
        Ok(response) if response.status().is_success() => {
            backend.mark_success();
            backend.add_response_time(started.elapsed());
        }
        Ok(_) => backend.mark_error(),
        Err(_) => backend.mark_error(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_backends_not_yet_due() {
        let backend = Arc::new(Backend::new("127.0.0.1", 18070));
        backend.touch_last_check(now_epoch_s());
        let state = BalancerState::new(vec![backend.clone()]);

        // Freshly checked, so no probe is issued and no error is recorded
        // against an unreachable address.
        probe_stale_backends(&state).await;
        assert_eq!(backend.error_count(), 0);
    }

    #[tokio::test]
    async fn probes_an_unreachable_backend_and_marks_it_down() {
        let backend = Arc::new(Backend::new("127.0.0.1", 18071));
        let state = BalancerState::new(vec![backend.clone()]);

        probe_stale_backends(&state).await;
        assert_eq!(backend.error_count(), 1);
        assert!(backend.last_check_epoch_s() > 0.0);
    }
}
