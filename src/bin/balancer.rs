//! `llamapool-balancer` — round-robin, health-aware front end for a worker
//! fleet.
//!
//! `balancer <backend_host> <base_port> <N> [lb_host=0.0.0.0] [lb_port=9000]`

use std::sync::Arc;

use clap::Parser;
use llamapool::backend::Backend;
use llamapool::balancer::{server::router, BalancerState};
use llamapool::config::BalancerArgs;

#[tokio::main]
async fn main() {
    llamapool::init_tracing();

    let args = BalancerArgs::parse();
    if let Err(e) = args.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    let backends: Vec<Arc<Backend>> = (0..args.num_workers)
        .map(|offset| {
            let port = args.base_port + offset as u16;
            Arc::new(Backend::new(args.backend_host.clone(), port))
        })
        .collect();
    let state = Arc::new(BalancerState::new(backends));

    let addr = format!("{}:{}", args.lb_host, args.lb_port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, backends = args.num_workers, "balancer listening");
    if let Err(e) = axum::serve(listener, router(state)).await {
        tracing::error!(error = %e, "balancer server exited with an error");
        std::process::exit(1);
    }
}
