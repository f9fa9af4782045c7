//! Top-level error type shared by export and import pipelines.

use std::fmt::Write as _;
use std::path::PathBuf;

use thiserror::Error;

use crate::import::{SpecFailure, SpecRowError};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TableIoError>;

/// Fatal export/import errors.
///
/// Data-quality problems are collected per row and only surface here through
/// the two aggregate variants once a run has read every row.
#[derive(Debug, Error)]
pub enum TableIoError {
    /// Export declaration provides no data source.
    #[error("export declaration provides no data source (collection, query, array or generator)")]
    NoDataSourceCapability,

    /// Format support is compiled out.
    #[error("{codec} support is not available: enable the `{feature}` cargo feature of rowkit_io_table")]
    OptionalCodecMissing {
        /// Human name of the codec.
        codec: &'static str,
        /// Cargo feature that enables it.
        feature: &'static str,
    },

    /// Output path or stream cannot be opened or written.
    #[error("destination unavailable: {}: {message}", path.display())]
    DestinationUnavailable {
        /// Destination path.
        path: PathBuf,
        /// Underlying IO error text.
        message: String,
    },

    /// Chunked iteration cannot establish a usable ordering key.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Reader-side parse failure.
    #[error("malformed document {}: {message}", path.display())]
    MalformedDocument {
        /// Input path.
        path: PathBuf,
        /// Parser error text.
        message: String,
    },

    /// Validation failures collected during a run without skip-on-failure.
    #[error("{}", format_failures(failures))]
    ValidationAggregate {
        /// Every failure collected during the run, in row order.
        failures: Vec<SpecFailure>,
    },

    /// Row processing errors collected during a run without skip-on-error.
    #[error("{}", format_row_errors(errors))]
    RowProcessingAggregate {
        /// Every row error collected during the run, in row order.
        errors: Vec<SpecRowError>,
    },

    /// Invalid option value or combination.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// No reader/writer handles the requested format.
    #[error("unsupported format: {0:?}")]
    UnsupportedFormat(String),

    /// IO failure outside destination opening.
    #[error("operation '{operation}' failed: {cause}")]
    Io {
        /// Operation name.
        operation: &'static str,
        /// Underlying cause.
        cause: String,
    },

    /// Encoder/decoder failure inside an external codec.
    #[error("codec operation '{operation}' failed: {cause}")]
    Codec {
        /// Operation name.
        operation: &'static str,
        /// Underlying cause.
        cause: String,
    },
}

impl TableIoError {
    /// Build [`TableIoError::Io`] from any displayable cause.
    pub fn io(operation: &'static str, cause: impl std::fmt::Display) -> Self {
        Self::Io {
            operation,
            cause: cause.to_string(),
        }
    }

    /// Build [`TableIoError::Codec`] from any displayable cause.
    pub fn codec(operation: &'static str, cause: impl std::fmt::Display) -> Self {
        Self::Codec {
            operation,
            cause: cause.to_string(),
        }
    }

    /// Build [`TableIoError::DestinationUnavailable`].
    pub fn destination(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        Self::DestinationUnavailable {
            path: path.into(),
            message: cause.to_string(),
        }
    }

    /// Build [`TableIoError::MalformedDocument`].
    pub fn malformed(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        Self::MalformedDocument {
            path: path.into(),
            message: cause.to_string(),
        }
    }
}

fn format_failures(failures: &[SpecFailure]) -> String {
    let mut c_msg = format!("{} row failure(s) during import:", failures.len());
    for failure in failures {
        let _ = write!(
            c_msg,
            " [row {} `{}`: {}]",
            failure.row_number,
            failure.attribute,
            failure.errors.join("; ")
        );
    }
    c_msg
}

fn format_row_errors(errors: &[SpecRowError]) -> String {
    let mut c_msg = format!("{} row error(s) during import:", errors.len());
    for error in errors {
        let _ = write!(c_msg, " [row {}: {}]", error.row_number, error.cause);
    }
    c_msg
}
