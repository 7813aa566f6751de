//! Utility functions for error handling
//!
//! Path checks that turn a missing or mistyped input into a descriptive
//! error before any parsing starts.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::{MockupError, Result};

/// Check that a required input file exists and is readable
///
/// # Arguments
/// * `path` - The path to the file
/// * `purpose` - Why the file is needed (for error context)
pub fn validate_input_file(path: &Path, purpose: &str) -> Result<()> {
    if !path.exists() {
        return Err(MockupError::invalid_path(
            format!("{purpose} not found"),
            path,
        ));
    }

    if !path.is_file() {
        return Err(MockupError::invalid_path(
            format!("{purpose} is not a file"),
            path,
        ));
    }

    match fs::File::open(path) {
        Ok(_) => Ok(()),
        Err(e) => {
            let message = match e.kind() {
                io::ErrorKind::PermissionDenied => {
                    format!("Permission denied reading {purpose}")
                }
                _ => format!("Failed to open {purpose}: {e}"),
            };
            Err(MockupError::invalid_path(message, path))
        }
    }
}

/// Check that an input path exists, accepting either a file or a directory
pub fn validate_input_path(path: &Path, purpose: &str) -> Result<()> {
    if path.is_dir() {
        return fs::read_dir(path)
            .map(|_| ())
            .map_err(|e| MockupError::invalid_path(format!("Cannot read {purpose}: {e}"), path));
    }
    validate_input_file(path, purpose)
}

/// Ensure an output directory exists, creating it when missing
pub fn ensure_output_directory(path: &Path) -> Result<()> {
    if path.exists() && !path.is_dir() {
        return Err(MockupError::invalid_path(
            "Output path exists and is not a directory",
            path,
        ));
    }
    fs::create_dir_all(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_reported_with_purpose() {
        let err = validate_input_file(Path::new("/definitely/not/here.xlsx"), "Code directory")
            .unwrap_err();
        assert!(err.to_string().contains("Code directory not found"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_input_file(dir.path(), "Scenario file").unwrap_err();
        assert!(err.to_string().contains("is not a file"));
        assert!(validate_input_path(dir.path(), "Scenario directory").is_ok());
    }

    #[test]
    fn test_output_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("out").join("tables");
        ensure_output_directory(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
