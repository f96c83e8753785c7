//! pipekvs server binary
//!
//! `pipekvs-server <jobs_dir> <max_backups> <max_threads> <fifo_name>`
//!
//! Setup order matters: jobs directory, then the server FIFO, then the
//! store. A failure anywhere in setup is fatal (nonzero exit); once the
//! dispatcher is listening, failures are logged and the process keeps
//! serving whatever still works.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{ensure, Context};
use clap::Parser;
use parking_lot::Mutex;
use pipekvs_core::MAX_SESSIONS;
use pipekvs_store::engine;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pipekvs_server::backup::BackupCoordinator;
use pipekvs_server::{dispatcher, jobs, session};
use pipekvs_server::queue::ConnectQueue;

#[derive(Parser, Debug)]
#[command(name = "pipekvs-server", about = "In-memory KV store serving job scripts and subscribing clients")]
struct Args {
    /// Directory containing .job files to execute
    jobs_dir: PathBuf,
    /// Maximum number of concurrent backup children (at least 1)
    max_backups: usize,
    /// Number of job worker threads (at least 1)
    max_threads: usize,
    /// Name of the server FIFO, created under /tmp
    fifo_name: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(1);
    });
    if let Err(e) = run(args) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    ensure!(args.max_backups >= 1, "max_backups must be at least 1");
    ensure!(args.max_threads >= 1, "max_threads must be at least 1");

    let entries = std::fs::read_dir(&args.jobs_dir)
        .with_context(|| format!("opening jobs directory {}", args.jobs_dir.display()))?;
    let (fifo_path, fifo) =
        dispatcher::create_server_fifo(&args.fifo_name).context("creating server pipe")?;
    let kvs = engine::init().context("initializing store")?;

    let backups = Arc::new(BackupCoordinator::new(args.max_backups));
    let job_handles = jobs::spawn_job_workers(
        Arc::clone(&kvs),
        Arc::new(Mutex::new(entries)),
        Arc::clone(&backups),
        args.max_threads,
    );

    let queue = Arc::new(ConnectQueue::new(MAX_SESSIONS));
    // session workers are not joined: any of them may be blocked inside a
    // live session, and the dispatcher only stops on a fatal pipe error
    let _session_handles = session::spawn_session_workers(Arc::clone(&kvs), Arc::clone(&queue));

    info!(pipe = %fifo_path.display(), jobs = %args.jobs_dir.display(), "server ready");
    dispatcher::run(&fifo, &queue);

    for handle in job_handles {
        let _ = handle.join();
    }
    queue.close();
    backups.reap_all();
    let _ = std::fs::remove_file(&fifo_path);
    engine::terminate().ok();
    info!("server stopped");
    Ok(())
}
