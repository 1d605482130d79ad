//! `llamapool-supervisor` — spawns and life-cycles a fleet of workers.
//!
//! `supervisor <models_dir> [host=127.0.0.1] [base_port=8070] [N=5]`

use clap::Parser;
use llamapool::config::SupervisorArgs;
use llamapool::supervisor::Supervisor;

#[tokio::main]
async fn main() {
    llamapool::init_tracing();

    let args = SupervisorArgs::parse();
    if let Err(e) = args.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    let worker_binary = match sibling_worker_binary() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("failed to locate the llamapool-worker binary: {e}");
            std::process::exit(1);
        }
    };

    let mut supervisor = match Supervisor::spawn_fleet(
        &worker_binary,
        &args.models_dir,
        &args.host,
        args.base_port,
        args.num_workers,
        args.threads,
    )
    .await
    {
        Ok(supervisor) => supervisor,
        Err(e) => {
            eprintln!("failed to spawn worker fleet: {e}");
            std::process::exit(1);
        }
    };

    supervisor.run().await;
}

/// The worker binary is expected to live alongside the supervisor binary in
/// the same build/install directory.
fn sibling_worker_binary() -> std::io::Result<std::path::PathBuf> {
    let exe = std::env::current_exe()?;
    let name = if cfg!(windows) {
        "llamapool-worker.exe"
    } else {
        "llamapool-worker"
    };
    Ok(exe.with_file_name(name))
}
