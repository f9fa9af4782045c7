//! Logging bootstrap shared by rowkit binaries.
//!
//! Installs one global `tracing` subscriber: an `EnvFilter` (directive from
//! the options, else `RUST_LOG`, else `info`) and a human or JSON formatter
//! writing to stderr.

use std::str::FromStr;
use std::sync::OnceLock;

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Default directive when neither options nor `RUST_LOG` provide one.
pub const C_FILTER_DEFAULT: &str = "info";

/// Logging bootstrap failures.
#[derive(Debug, Error)]
pub enum LogInitError {
    /// Filter directive could not be parsed.
    #[error("invalid log filter {directive:?}: {cause}")]
    InvalidFilter {
        /// Directive as given.
        directive: String,
        /// Parser message.
        cause: String,
    },
    /// Unknown formatter name.
    #[error("unknown log format {0:?} (expected pretty, compact or json)")]
    UnknownFormat(String),
    /// Another global subscriber is already installed.
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

/// Output formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumLogFormat {
    /// Multi-line human output.
    Pretty,
    /// Single-line human output.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

impl FromStr for EnumLogFormat {
    type Err = LogInitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(LogInitError::UnknownFormat(s.to_string())),
        }
    }
}

/// Logging options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecLogOptions {
    /// Formatter.
    pub format: EnumLogFormat,
    /// Filter directive overriding `RUST_LOG`.
    pub filter: Option<String>,
    /// Emit ANSI colors (human formatters only).
    pub with_ansi: bool,
}

/// Build the filter for `options`.
pub fn derive_env_filter(options: &SpecLogOptions) -> Result<EnvFilter, LogInitError> {
    match &options.filter {
        Some(c_directive) => {
            EnvFilter::try_new(c_directive).map_err(|err| LogInitError::InvalidFilter {
                directive: c_directive.clone(),
                cause: err.to_string(),
            })
        }
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(C_FILTER_DEFAULT))),
    }
}

/// Install the global subscriber.
///
/// Returns `Ok(true)` when installed, `Ok(false)` when logging was already
/// initialized by an earlier call.
pub fn init_logging(options: SpecLogOptions) -> Result<bool, LogInitError> {
    if LOGGING_INIT.get().is_some() {
        return Ok(false);
    }
    let filter = derive_env_filter(&options)?;
    let registry = tracing_subscriber::registry().with(filter);
    let result = match options.format {
        EnumLogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init(),
        EnumLogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_ansi(options.with_ansi),
            )
            .try_init(),
        EnumLogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_ansi(options.with_ansi)
                    .with_target(false),
            )
            .try_init(),
    };
    result.map_err(|err| LogInitError::Install(err.to_string()))?;
    let _ = LOGGING_INIT.set(());
    Ok(true)
}
