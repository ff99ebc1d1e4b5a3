//! Shared runtime plumbing for the corruption test tools
//!
//! [`run`] is the single entry point used by the binaries: it installs the tracing subscriber,
//! builds a single-threaded tokio runtime, drives the tool's async main and reports the outcome.

use std::future::Future;

pub mod config;
pub mod retry;
pub mod version;

pub use config::OutputConfig;
pub use retry::{RetryError, RetryPolicy};

fn init_tracing(output: &OutputConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(output.log_directive()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install tracing subscriber: {error}");
    }
}

/// Run the tool's async main on a fresh runtime
///
/// Returns `None` when the tool failed; the error chain has already been logged as a fatal
/// message at that point and the caller is expected to exit with a non-zero status.
pub fn run<Fut, Summary>(output: OutputConfig, func: impl FnOnce() -> Fut) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Fut: Future<Output = anyhow::Result<Summary>>,
{
    init_tracing(&output);
    // every pipeline step is sequential, a single thread drives the whole run
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("Failed to build tokio runtime: {:#}", error);
            return None;
        }
    };
    match runtime.block_on(func()) {
        Ok(summary) => {
            if output.print_summary {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            tracing::error!("{:#}", error);
            None
        }
    }
}
