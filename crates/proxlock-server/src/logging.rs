//! Logging initialization and configuration.
//!
//! This module provides environment-aware logging setup:
//! - **Production**: JSON logs to rolling files + compact logs to stdout
//! - **Development**: Pretty logs to stdout with span events
//!
//! The filter comes from `RUST_LOG`, then `PROXLOCK_LOG_LEVEL`, then `info`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing::warn;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Selects production logging when set to `production`.
pub const ENV_VAR: &str = "PROXLOCK_ENV";

/// Fallback filter directive when `RUST_LOG` is unset.
pub const LOG_LEVEL_VAR: &str = "PROXLOCK_LOG_LEVEL";

/// Static guards to keep non-blocking writers alive for the whole program.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Whether `PROXLOCK_ENV` asks for production logging.
#[must_use]
pub fn is_production() -> bool {
    std::env::var(ENV_VAR).is_ok_and(|value| value.eq_ignore_ascii_case("production"))
}

/// Initialize the logging system.
///
/// # Production Mode
///
/// - Rolling daily JSON files in [`log_directory`]
/// - Compact stdout without ANSI colors, for the systemd journal
///
/// # Development Mode
///
/// - Pretty stdout with span events
///
/// # Errors
///
/// Returns an error if the filter directive cannot be parsed.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let log_level = std::env::var(LOG_LEVEL_VAR).unwrap_or_else(|_| "info".to_string());

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    if is_production {
        init_production(env_filter);
    } else {
        init_development(env_filter);
    }

    Ok(())
}

fn init_production(env_filter: EnvFilter) {
    let log_dir = log_directory();
    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = STDOUT_GUARD.set(stdout_guard);

    // Generic over the subscriber so the same layer config fits both stacks.
    fn stdout_layer<S>(writer: NonBlocking) -> impl Layer<S>
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
    }

    let file_appender = match open_file_appender(&log_dir) {
        Ok(appender) => appender,
        Err(err) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer(non_blocking_stdout))
                .init();
            warn!(
                log_dir = %log_dir.display(),
                error = %err,
                "Cannot write log files; logging to stdout only"
            );
            return;
        }
    };
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let _ = FILE_GUARD.set(file_guard);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer(non_blocking_stdout))
        .init();
}

/// Daily rolling appender in `log_dir`, creating the directory if needed.
fn open_file_appender(log_dir: &Path) -> Result<RollingFileAppender, String> {
    std::fs::create_dir_all(log_dir).map_err(|err| err.to_string())?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("proxlockd")
        .build(log_dir)
        .map_err(|err| err.to_string())
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

/// Where production logs are written.
///
/// The per-user data directory, since the daemon runs inside the desktop
/// session it locks.
#[must_use]
pub fn log_directory() -> PathBuf {
    directories::ProjectDirs::from("", "", "proxlock")
        .map(|dirs| dirs.data_local_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("./logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_is_valid_path() {
        let dir = log_directory();
        assert!(dir.ends_with("logs"));
    }

    #[test]
    fn test_file_appender_creates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let log_dir = root.path().join("nested").join("logs");
        assert!(open_file_appender(&log_dir).is_ok());
        assert!(log_dir.is_dir());
    }

    #[test]
    fn test_file_appender_reports_unusable_directory() {
        // A regular file where the directory should be
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let err = open_file_appender(&blocker.path().join("logs")).unwrap_err();
        assert!(!err.is_empty());
    }
}
