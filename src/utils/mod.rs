//! Utilities shared by the library and the command line tool

pub mod logging;

pub use logging::{ProgressObserver, create_main_progress_bar, create_spinner, log_operation_complete, log_operation_start};
