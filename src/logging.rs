use std::path::Path;

use rolling_file::{BasicRollingFileAppender, RollingConditionBasic};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::prelude::*;

use crate::errors::AppError;

const MAX_LOG_SIZE: u64 = 1024 * 1024 * 5;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Installs the global tracing subscriber, writing to a rolling log file
/// (and optionally stdout).
///
/// The returned guard flushes the file writer when dropped, so keep it around.
pub fn init_logging(
    log_path: &Path,
    level: LevelFilter,
    to_stdout: bool,
) -> Result<WorkerGuard, AppError> {
    let file_appender = BasicRollingFileAppender::new(
        log_path,
        RollingConditionBasic::new().max_size(MAX_LOG_SIZE),
        2,
    )?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_file(false)
        .with_ansi(false)
        .with_target(true)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_owned()))
        .with_line_number(true)
        .with_filter(level);

    let stdout_layer = to_stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_timer(ChronoLocal::new(TIME_FORMAT.to_owned()))
            .with_filter(level)
    });

    // Allow everything through but keep the Bluetooth backends to info, they're chatty
    let env_filter = EnvFilter::new("trace,btleplug=info,bluez_async=info");
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()?;

    Ok(guard)
}
