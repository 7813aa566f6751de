//! Logging utilities
//!
//! Standardized messages for the stages of a run.

use std::path::Path;
use std::time::Duration;

/// Log the start of a stage that reads or writes `path`
pub fn log_operation_start(operation: &str, path: &Path) {
    log::info!("{} {}", operation, path.display());
}

/// Log the completion of a stage
///
/// # Arguments
/// * `operation` - Past-tense verb (`parsed`, `wrote`)
/// * `path` - Path the stage worked on
/// * `items` - Number of items handled
/// * `elapsed` - Optional elapsed time
pub fn log_operation_complete(operation: &str, path: &Path, items: usize, elapsed: Option<Duration>) {
    if let Some(duration) = elapsed {
        log::info!(
            "Successfully {} {} item(s) for {} in {:?}",
            operation,
            items,
            path.display(),
            duration
        );
    } else {
        log::info!("Successfully {} {} item(s) for {}", operation, items, path.display());
    }
}

/// Log a warning, optionally tied to a path
pub fn log_warning(message: &str, path: Option<&Path>) {
    if let Some(path) = path {
        log::warn!("{}: {}", message, path.display());
    } else {
        log::warn!("{message}");
    }
}
