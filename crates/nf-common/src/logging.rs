//! ---
//! nf_section: "01-core-functionality"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Tracing subscriber setup for the telemetry daemon."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Environment variable taking precedence over `RUST_LOG`.
pub const LOG_ENV: &str = "NF_TELEMETRY_LOG";

/// Writer guards must outlive the process or buffered lines are lost.
struct WriterGuards {
    _stdout: WorkerGuard,
    _file: WorkerGuard,
}

static GUARDS: OnceCell<WriterGuards> = OnceCell::new();

/// Output format for the stdout layer. The rolling file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
    Compact,
}

/// Pick the filter directive: `NF_TELEMETRY_LOG`, then `RUST_LOG`, then the
/// configured fallback. Blank values count as unset.
pub fn filter_directive(
    service_env: Option<String>,
    rust_log: Option<String>,
    fallback: &str,
) -> String {
    [service_env, rust_log]
        .into_iter()
        .flatten()
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| fallback.to_owned())
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    let directive = filter_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
        &config.filter,
    );
    EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("ignoring log filter {directive:?} ({err}); using {:?}", config.filter);
        EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

fn stdout_layer<S>(format: LogFormat, writer: NonBlocking) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span> + 'static,
{
    let base = fmt::layer().with_timer(fmt::time::UtcTime::rfc_3339());
    match format {
        LogFormat::StructuredJson => base.with_target(false).json().with_writer(writer).boxed(),
        LogFormat::Pretty => base.with_target(true).pretty().with_writer(writer).boxed(),
        LogFormat::Compact => base.with_target(false).compact().with_writer(writer).boxed(),
    }
}

fn file_writer(directory: &Path, prefix: &str) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(directory)
        .with_context(|| format!("failed to create log directory {}", directory.display()))?;
    let appender = rolling::daily(directory, format!("{prefix}.log"));
    Ok(tracing_appender::non_blocking(appender))
}

/// Install the global subscriber: stdout in the configured format plus a
/// daily rolling JSON file named after `file_prefix` (or the service).
///
/// Returns `false` when another subscriber was already installed; the log
/// directory is still created in that case.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<bool> {
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    let (file, file_guard) = file_writer(&config.directory, prefix)?;
    let (stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let installed = tracing_subscriber::registry()
        .with(build_filter(config))
        .with(stdout_layer(config.format, stdout))
        .with(
            fmt::layer()
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(file),
        )
        .try_init()
        .is_ok();

    if installed {
        let _ = GUARDS.set(WriterGuards {
            _stdout: stdout_guard,
            _file: file_guard,
        });
        info!(
            service = %service_name,
            log_dir = %config.directory.display(),
            format = ?config.format,
            "tracing initialised"
        );
    }
    Ok(installed)
}
