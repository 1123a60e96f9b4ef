//! Tracing setup: compact stdout output plus an optional daily-rotating
//! log file.
//!
//! Level filtering follows `RUST_LOG` with an `info` default, e.g.
//! `RUST_LOG=wayback_discover_diff=debug,reqwest=warn`.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the tracing subscriber. When `log_dir` is given, a daily
/// rotating `service.log` is written there through a non-blocking writer.
///
/// Returns an error when the log directory cannot be created; panics if a
/// subscriber is already installed (startup-only call).
pub fn init(log_dir: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let stdout_layer = fmt::layer()
        .with_target(true)
        .compact()
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(stdout_layer);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "service.log");
            let (writer, guard) = tracing_appender::non_blocking(file_appender);

            let file_filter =
                EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact()
                .with_filter(file_filter);

            registry.with(file_layer).init();

            // The guard must outlive the process for the background writer
            // to keep flushing.
            Box::leak(Box::new(guard));
        }
        None => registry.init(),
    }

    Ok(())
}
