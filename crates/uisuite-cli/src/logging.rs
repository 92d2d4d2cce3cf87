use anyhow::Context;
use clap::ValueEnum;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};
use uisuite_test::reporting::RunDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Basic,
    Debug,
}

impl LogLevel {
    pub fn directive(&self) -> &'static str {
        match self {
            LogLevel::Basic => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Keeps the file writers flushing. Drop it only when the run is over.
pub struct LogGuards {
    _basic: WorkerGuard,
    _debug: WorkerGuard,
}

/// Console output at `level` (or `RUST_LOG`), plus `basic.log` and
/// `debug.log` in the run directory.
pub fn init(level: LogLevel, run_dir: &RunDirectory) -> anyhow::Result<LogGuards> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.directive()));

    let (basic_writer, basic_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&run_dir.root, "basic.log"));
    let (debug_writer, debug_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&run_dir.root, "debug.log"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_filter(console_filter),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(basic_writer)
                .with_filter(LevelFilter::INFO),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(debug_writer)
                .with_filter(LevelFilter::DEBUG),
        )
        .try_init()
        .context("failed to initialise logging")?;

    Ok(LogGuards {
        _basic: basic_guard,
        _debug: debug_guard,
    })
}
