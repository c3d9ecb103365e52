//! ---
//! gpims_section: "01-core-functionality"
//! gpims_subsection: "module"
//! gpims_type: "source"
//! gpims_scope: "code"
//! gpims_description: "Tracing subscriber setup for simulator binaries."
//! gpims_version: "v0.1.0"
//! gpims_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

pub const LOG_ENV: &str = "GPIMS_LOG";
const FALLBACK_ENV: &str = "RUST_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Writer guards; dropping them would lose buffered lines at exit.
struct LogGuards {
    _console: WorkerGuard,
    _file: WorkerGuard,
}

static GUARDS: OnceCell<LogGuards> = OnceCell::new();

/// Console rendering of log lines. The rolling file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber for `service_name`.
///
/// The filter comes from `GPIMS_LOG`, then `RUST_LOG`, then `info`. Lines go to
/// stdout in the configured [`LogFormat`] and to a daily rolling JSON file under
/// [`LoggingConfig::directory`]. A second call keeps the first subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("failed to create log directory {}", config.directory.display())
    })?;

    let file_name = log_file_name(service_name, config);
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(rolling::daily(&config.directory, &file_name));
    let (console_writer, console_guard) = tracing_appender::non_blocking(std::io::stdout());

    let console: BoxedLayer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .json()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(console_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(console_writer)
            .boxed(),
    };
    let file: BoxedLayer = fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(file_writer)
        .boxed();

    let directive = select_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var(FALLBACK_ENV).ok(),
    );
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("invalid log directive '{directive}' ({err}); using {DEFAULT_DIRECTIVE}");
        EnvFilter::new(DEFAULT_DIRECTIVE)
    });

    let installed = tracing_subscriber::registry()
        .with(vec![console, file])
        .with(filter)
        .try_init()
        .is_ok();
    if installed {
        let _ = GUARDS.set(LogGuards {
            _console: console_guard,
            _file: file_guard,
        });
        info!(
            service = %service_name,
            log_file = %config.directory.join(&file_name).display(),
            format = ?config.format,
            "tracing initialised"
        );
    }
    Ok(())
}

/// Base name of the rolling file; the appender adds a date suffix.
pub fn log_file_name(service_name: &str, config: &LoggingConfig) -> String {
    let prefix = config
        .file_prefix
        .as_deref()
        .map(str::trim)
        .filter(|prefix| !prefix.is_empty())
        .unwrap_or(service_name);
    format!("{prefix}.log")
}

/// Directory and base name of the rolling file.
pub fn log_file_path(service_name: &str, config: &LoggingConfig) -> PathBuf {
    config.directory.join(log_file_name(service_name, config))
}

fn select_directive(primary: Option<String>, fallback: Option<String>) -> String {
    [primary, fallback]
        .into_iter()
        .flatten()
        .map(|directive| directive.trim().to_owned())
        .find(|directive| !directive.is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_owned())
}
