use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the logging system with console and JSON file output.
///
/// The returned guard flushes the file writer when dropped, so the caller
/// must hold it for the lifetime of the run.
pub fn init_logging(log_dir: &Path, console: bool) -> Option<WorkerGuard> {
    // Ensure logs directory exists; fall back to console-only logging if not
    let file_parts = match fs::create_dir_all(log_dir) {
        Ok(()) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, "pipeline.log");
            Some(tracing_appender::non_blocking(file_appender))
        }
        Err(e) => {
            eprintln!(
                "[logging] could not create log directory {}: {}",
                log_dir.display(),
                e
            );
            None
        }
    };

    let (file_layer, guard) = match file_parts {
        Some((writer, guard)) => (Some(fmt::layer().json().with_writer(writer)), Some(guard)),
        None => (None, None),
    };

    let console_layer = console.then(|| {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    // Respect RUST_LOG if set; otherwise info for our crate, warn elsewhere
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("uidai_pipeline=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    guard
}
