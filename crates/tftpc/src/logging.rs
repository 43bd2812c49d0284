use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber.
///
/// Logs go to stderr, or to `logging.file` through a non-blocking writer.
/// The returned guard flushes that writer and must outlive the program's
/// last log line.
pub fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let (writer, guard) = match logging.file {
        Some(ref log_file) => {
            let dir = match log_file.parent() {
                Some(path) if !path.as_os_str().is_empty() => path,
                _ => Path::new("."),
            };
            let file_name = log_file
                .file_name()
                .map(|name| name.to_owned())
                .unwrap_or_else(|| "tftpc.log".into());

            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(logging.level.clone()))
        .with_writer(writer)
        .with_ansi(logging.file.is_none())
        .with_target(false);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }

    guard
}
