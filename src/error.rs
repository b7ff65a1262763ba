use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the signal database and its persistence adapter.
///
/// All variants are raised where the problem is detected; nothing in this
/// crate retries or swallows them.
#[derive(Debug, Error)]
pub enum DbError {
    /// Required columns are missing from an input table.
    #[error(
        "db structure not given, missing columns {missing:?}; \
         make sure these columns exist: {required:?}; columns found: {found:?}"
    )]
    Schema {
        missing: Vec<String>,
        required: Vec<String>,
        found: Vec<String>,
    },

    /// Tensor or curve shapes are inconsistent.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// A value that cannot be represented in a record, e.g. a null cell
    /// or a negative echo position.
    #[error("invalid value: {0}")]
    Invalid(String),

    /// No database file exists at the resolved path.
    #[error("{} not a file", .path.display())]
    NotFound { path: PathBuf },

    /// A table file with an extension we cannot read.
    #[error("unsupported file extension: .{0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T, E = DbError> = std::result::Result<T, E>;

impl DbError {
    /// Build a [`DbError::Schema`] from the required and the found column names.
    pub fn schema<S: AsRef<str>>(required: &[&str], found: &[S]) -> Self {
        let found: Vec<String> = found.iter().map(|s| s.as_ref().to_string()).collect();
        let missing = required
            .iter()
            .filter(|r| !found.iter().any(|f| f == *r))
            .map(|r| r.to_string())
            .collect();
        DbError::Schema {
            missing,
            required: required.iter().map(|r| r.to_string()).collect(),
            found,
        }
    }
}
