//! Synthesizes schema-conformant test data for healthcare quality measures
//! from tester-authored scenario spreadsheets.
//!
//! A run reads scenarios (free-text tester workbooks or the fixed-column
//! standard format), turns each into member, enrollment, visit, clinical
//! event, exclusion and monthly membership rows, and writes one Parquet or
//! CSV file per physical table.

pub mod codes;
pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod quality;
pub mod resources;
pub mod scenario;
pub mod schema;
pub mod utils;
pub mod workbook;

// Core types
pub use codes::{CodeEntry, CodeResolver};
pub use config::{Component, GenerationConfig, MeasureConfig, VisitDepth};
pub use error::{MockupError, Result};
pub use scenario::Scenario;
pub use schema::{SchemaConfig, SchemaMapper};

// Generation
pub use engine::{GenerationObserver, GenerationSummary, MockupEngine, NoopObserver};
pub use output::{CellValue, GeneratedRow, OutputFormat, OutputStore, OutputWriter};
pub use pipeline::{GenerationRun, RunPaths, RunReport};
pub use quality::{QualityReport, check_output};
pub use resources::ResourceManager;

// Parsing
pub use parser::{InputFormat, ParseContext, parse_scenarios};
pub use workbook::Workbook;
