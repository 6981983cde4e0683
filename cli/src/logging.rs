use crate::utils::env_paths::EnvPaths;
use anyhow::Result;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::OffsetTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }))
}

fn timer() -> OffsetTime<time::format_description::well_known::Rfc3339> {
    // Local offset detection fails in some multi-threaded environments.
    OffsetTime::local_rfc_3339().unwrap_or_else(|_| {
        OffsetTime::new(
            time::UtcOffset::UTC,
            time::format_description::well_known::Rfc3339,
        )
    })
}

/// Console logging on stderr for one-shot commands. Stdout stays clean for
/// command output.
pub fn init_console(verbose: bool) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter(verbose))
        .with_target(false)
        .init();
}

/// Daily rolling log files under `<data>/logs` plus console output.
///
/// Keep the returned guard alive for as long as logs should be flushed.
pub fn init_server_logging(
    env_paths: &EnvPaths,
    verbose: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let logs_dir = env_paths.logs_path();
    std::fs::create_dir_all(&logs_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("keystone")
        .filename_suffix("log")
        .build(&logs_dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let timer = timer();
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_timer(timer.clone())
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_timer(timer)
                .with_target(false),
        )
        .with(filter(verbose))
        .init();

    tracing::info!("Log files are being written to: {:?}", logs_dir);
    Ok(guard)
}
