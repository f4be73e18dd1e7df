//! Worker pool and process-level run loop.
//!
//! All sessions and the accept loop are tasks on one multi-thread tokio
//! runtime sized by the configured worker count.

use crate::config::Config;
use crate::error::ServerError;
use crate::listener::Listener;
use crate::stats::ServerStats;
use std::io;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

/// Build the shared worker pool.
pub fn build_runtime(threads: usize) -> io::Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(threads.max(1))
        .thread_name("ws-echo-worker")
        .enable_all()
        .build()
}

/// Run the server until the process is terminated.
pub fn run(config: Config) -> Result<(), ServerError> {
    let runtime = build_runtime(config.threads).map_err(ServerError::Runtime)?;
    runtime.block_on(serve(config))
}

/// Bind the listener and drive its accept loop on its own task.
pub async fn serve(config: Config) -> Result<(), ServerError> {
    let stats = Arc::new(ServerStats::new());
    let listener = Listener::bind(
        config.listen,
        config.backlog,
        Arc::new(config.session),
        Arc::clone(&stats),
    )?;

    info!(
        address = %listener.local_addr().unwrap_or(config.listen),
        threads = config.threads,
        backlog = config.backlog,
        "Server listening"
    );

    tokio::spawn(listener.run()).await?;
    Ok(())
}
