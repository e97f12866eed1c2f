use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use vidrelay_core::config::LoggingSection;

use crate::{AppError, Result};

/// Filter directive: `RUST_LOG` wins, then the configured level.
pub fn filter_directive(env: Option<String>, logging: &LoggingSection) -> String {
    match env {
        Some(value) if !value.trim().is_empty() => value,
        _ if logging.level.trim().is_empty() => "info".to_string(),
        _ => logging.level.clone(),
    }
}

/// Console plus daily-rotated file output. Keep the guard alive for the
/// lifetime of the process or buffered lines are lost.
pub fn init_logging(log_dir: &Path, logging: &LoggingSection) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, &logging.file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let directive = filter_directive(std::env::var("RUST_LOG").ok(), logging);
    let filter = EnvFilter::try_new(&directive)
        .map_err(|err| AppError::Logging(format!("invalid filter {directive}: {err}")))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()
        .map_err(|err| AppError::Logging(err.to_string()))?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_overrides_configured_level() {
        let logging = LoggingSection {
            level: "warn".into(),
            ..LoggingSection::default()
        };
        assert_eq!(
            filter_directive(Some("vidrelay_core=debug".into()), &logging),
            "vidrelay_core=debug"
        );
        assert_eq!(filter_directive(None, &logging), "warn");
        assert_eq!(filter_directive(Some("  ".into()), &logging), "warn");
        let blank = LoggingSection {
            level: String::new(),
            ..LoggingSection::default()
        };
        assert_eq!(filter_directive(None, &blank), "info");
    }
}
