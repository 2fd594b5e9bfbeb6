//! Tracing configuration and log routing.
//!
//! Logs go to stdout with a compact formatter and, unless `RAG_LOG_FILE=off`, to a file:
//! the path in `RAG_LOG_FILE` when set, otherwise `logs/rag-indexer.log`. The file layer uses
//! a non-blocking writer whose guard lives for the whole process.
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_VAR: &str = "RAG_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "rag-indexer.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where file logs should be written.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogTarget {
    Disabled,
    Default,
    File(String),
}

impl LogTarget {
    fn from_setting(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Default,
            Some(value) if value.eq_ignore_ascii_case("off") => Self::Disabled,
            Some(path) => Self::File(path.to_string()),
        }
    }
}

/// Configure tracing subscribers for stdout and optional file logging.
///
/// Respects `RUST_LOG` for filtering and defaults to `info`.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    let target = LogTarget::from_setting(std::env::var(LOG_FILE_VAR).ok().as_deref());
    if let Some(writer) = configure_file_writer(&target) {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();

        registry.with(file_layer).init();
    } else {
        registry.init();
    }
}

/// Returns `None` when file logging is disabled or the target cannot be opened.
fn configure_file_writer(target: &LogTarget) -> Option<NonBlocking> {
    match target {
        LogTarget::Disabled => None,
        LogTarget::File(path) => {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(err) = std::fs::create_dir_all(parent)
            {
                eprintln!("Failed to create log directory {}: {err}", parent.display());
                return None;
            }
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(file) => Some(install(tracing_appender::non_blocking(file))),
                Err(err) => {
                    eprintln!("Failed to open log file {path}: {err}");
                    None
                }
            }
        }
        LogTarget::Default => {
            if let Err(err) = std::fs::create_dir_all(DEFAULT_LOG_DIR) {
                eprintln!("Failed to create logs directory: {err}");
                return None;
            }
            let appender = tracing_appender::rolling::never(DEFAULT_LOG_DIR, DEFAULT_LOG_FILE);
            Some(install(tracing_appender::non_blocking(appender)))
        }
    }
}

fn install((writer, guard): (NonBlocking, WorkerGuard)) -> NonBlocking {
    let _ = LOG_GUARD.set(guard);
    writer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_target_follows_setting() {
        assert_eq!(LogTarget::from_setting(None), LogTarget::Default);
        assert_eq!(LogTarget::from_setting(Some(" ")), LogTarget::Default);
        assert_eq!(LogTarget::from_setting(Some("OFF")), LogTarget::Disabled);
        assert_eq!(
            LogTarget::from_setting(Some("/var/log/rag.log")),
            LogTarget::File("/var/log/rag.log".to_string())
        );
    }

    #[test]
    fn disabled_target_has_no_writer() {
        assert!(configure_file_writer(&LogTarget::Disabled).is_none());
    }
}
