use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber: console always, plus a daily log file when
/// `log_dir` is set. Keep the returned guard alive until exit so buffered
/// file output is flushed.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("ticket_monitor")
                .filename_suffix("log")
                .build(dir)
                .with_context(|| format!("Failed to open log directory {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ticket_monitor=info,calendar_types=info".into()),
        )
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}
