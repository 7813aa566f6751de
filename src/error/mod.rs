//! Error handling for mockup generation.
//!
//! Only structural failures (missing configuration, unreadable required
//! inputs, writer failures) surface as errors. Irregular scenario content is
//! absorbed by the parsers and the engine with a logged fallback.

pub mod util;

use std::io;
use std::path::{Path, PathBuf};

use arrow::error::ArrowError;
use parquet::errors::ParquetError;

/// Specialized error type for mockup generation
#[derive(Debug, thiserror::Error)]
pub enum MockupError {
    /// Error opening or reading a file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A required input path is missing or unusable
    #[error("{message}: {}", .path.display())]
    InvalidPath {
        /// What went wrong
        message: String,
        /// The offending path
        path: PathBuf,
    },

    /// Missing or malformed measure/schema configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A spreadsheet could not be opened or read
    #[error("Workbook error: {0}")]
    Workbook(String),

    /// The code directory could not be located inside a workbook
    #[error("Code directory error: {0}")]
    CodeDirectory(String),

    /// A single scenario row could not be interpreted
    #[error("Row {row} in sheet '{sheet}': {message}")]
    RowParse {
        /// Sheet the row belongs to
        sheet: String,
        /// One-based row number within the sheet
        row: usize,
        /// Description of the problem
        message: String,
    },

    /// The external text extractor failed or is unavailable
    #[error("External extraction failed: {0}")]
    ExternalExtraction(String),

    /// A shared resource could not be locked
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Arrow error while assembling output batches
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    /// Parquet error while writing output files
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),
}

impl MockupError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a path error
    pub fn invalid_path(message: impl Into<String>, path: &Path) -> Self {
        Self::InvalidPath {
            message: message.into(),
            path: path.to_path_buf(),
        }
    }

    /// Create a row-level parse error
    pub fn row_parse(sheet: &str, row: usize, message: impl Into<String>) -> Self {
        Self::RowParse {
            sheet: sheet.to_string(),
            row,
            message: message.into(),
        }
    }

    /// Whether this error must abort a generation run
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::RowParse { .. } | Self::ExternalExtraction(_))
    }
}

impl From<calamine::Error> for MockupError {
    fn from(error: calamine::Error) -> Self {
        Self::Workbook(error.to_string())
    }
}

/// Result type for mockup operations
pub type Result<T> = std::result::Result<T, MockupError>;
