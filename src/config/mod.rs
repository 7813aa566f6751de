//! Configuration for mockup generation.

pub mod measure;

use std::fmt;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{MockupError, Result};

pub use measure::{Component, MeasureConfig, SubEvent, infer_table};

/// Default measurement year
pub const DEFAULT_MEASUREMENT_YEAR: i32 = 2026;

/// How many visits the engine synthesizes for a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisitDepth {
    /// Add a default office visit when a scenario lists none
    #[default]
    Population,
    /// Only emit the visits a scenario names
    ScenarioOnly,
}

impl fmt::Display for VisitDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Population => f.write_str("population"),
            Self::ScenarioOnly => f.write_str("scenario-only"),
        }
    }
}

/// Configuration for a generation run
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Measurement year that `MY` tokens resolve against
    pub measurement_year: i32,
    /// Measure name substituted into physical table names
    pub measure_name: Option<String>,
    /// Visit synthesis depth
    pub visit_depth: VisitDepth,
    /// Only use codes whose validity window covers the measurement year
    pub validate_code_dates: bool,
    /// Only accept free-text scenarios mentioning this measure
    pub measure_filter: Option<String>,
    /// Rows scanned when looking for a header row
    pub header_scan_rows: usize,
    /// Longest identifier cell accepted as a scenario id
    pub max_id_length: usize,
    /// Synthesize a full-year span for standard-format rows without enrollments
    pub default_enrollment: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            measurement_year: DEFAULT_MEASUREMENT_YEAR,
            measure_name: None,
            visit_depth: VisitDepth::Population,
            validate_code_dates: true,
            measure_filter: None,
            header_scan_rows: 20,
            max_id_length: 60,
            default_enrollment: true,
        }
    }
}

impl GenerationConfig {
    /// Create a configuration with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the measurement year
    #[must_use]
    pub const fn with_measurement_year(mut self, year: i32) -> Self {
        self.measurement_year = year;
        self
    }

    /// Set the measure name used for table names
    #[must_use]
    pub fn with_measure_name(mut self, name: impl Into<String>) -> Self {
        self.measure_name = Some(name.into());
        self
    }

    /// Set the visit synthesis depth
    #[must_use]
    pub const fn with_visit_depth(mut self, depth: VisitDepth) -> Self {
        self.visit_depth = depth;
        self
    }

    /// Enable or disable validity-window filtering of codes
    #[must_use]
    pub const fn with_code_date_validation(mut self, validate: bool) -> Self {
        self.validate_code_dates = validate;
        self
    }

    /// Restrict free-text parsing to scenarios that mention a measure
    #[must_use]
    pub fn with_measure_filter(mut self, measure: impl Into<String>) -> Self {
        self.measure_filter = Some(measure.into());
        self
    }

    /// Set how many rows are scanned for a header
    #[must_use]
    pub const fn with_header_scan_rows(mut self, rows: usize) -> Self {
        self.header_scan_rows = rows;
        self
    }

    /// Enable or disable the default full-year enrollment span
    #[must_use]
    pub const fn with_default_enrollment(mut self, enabled: bool) -> Self {
        self.default_enrollment = enabled;
        self
    }

    /// Measure name to use for `{MEASURE}` placeholders, falling back to the
    /// measure configuration's own name
    #[must_use]
    pub fn effective_measure_name<'a>(&'a self, measure: &'a MeasureConfig) -> &'a str {
        self.measure_name
            .as_deref()
            .unwrap_or(measure.measure_name.as_str())
    }
}

impl fmt::Display for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Generation Configuration:")?;
        writeln!(f, "  Measurement year: {}", self.measurement_year)?;
        writeln!(
            f,
            "  Measure name: {}",
            self.measure_name.as_deref().unwrap_or("(from measure config)")
        )?;
        writeln!(f, "  Visit depth: {}", self.visit_depth)?;
        writeln!(f, "  Validate code dates: {}", self.validate_code_dates)?;
        writeln!(
            f,
            "  Measure filter: {}",
            self.measure_filter.as_deref().unwrap_or("none")
        )?;
        writeln!(f, "  Header scan rows: {}", self.header_scan_rows)?;
        write!(f, "  Default enrollment: {}", self.default_enrollment)
    }
}

/// Load a YAML or JSON document, chosen by file extension
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    crate::error::util::validate_input_file(path, "Configuration file")?;
    let text = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "json" => Ok(serde_json::from_str(&text)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(&text)?),
        other => Err(MockupError::config(format!(
            "Unsupported configuration format '{other}' for {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_display() {
        let config = GenerationConfig::new()
            .with_measurement_year(2025)
            .with_measure_name("PSA")
            .with_visit_depth(VisitDepth::ScenarioOnly);

        assert_eq!(config.measurement_year, 2025);
        let text = config.to_string();
        assert!(text.contains("Measurement year: 2025"));
        assert!(text.contains("Measure name: PSA"));
        assert!(text.contains("scenario-only"));
    }

    #[test]
    fn test_unknown_extension_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("measure.toml");
        std::fs::write(&path, "measure_name = 'X'").unwrap();
        let err = load_document::<MeasureConfig>(&path).unwrap_err();
        assert!(matches!(err, MockupError::Config(_)));
    }
}
