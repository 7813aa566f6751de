//! Scenario extraction
//!
//! Two strategies turn a workbook into [`Scenario`]s: the heuristic
//! free-text parser for tester spreadsheets and the deterministic parser
//! for the fixed-column standard format. [`parse_scenarios`] picks one by
//! file name or column signature.

pub mod ai;
pub mod freetext;
pub mod standard;
pub mod tags;

use std::collections::BTreeMap;
use std::fmt;

use crate::config::{GenerationConfig, MeasureConfig};
use crate::error::Result;
use crate::scenario::Scenario;
use crate::scenario::dates::DateResolver;
use crate::workbook::Workbook;

use self::ai::AiExtractor;

pub use freetext::FreeTextExtractor;
pub use standard::StandardExtractor;

/// Columns that identify a standard-format sheet
pub const STANDARD_SIGNATURE: [&str; 4] = ["MEMBER_ID", "AGE", "GENDER", "PRODUCT_LINE"];

/// File name marker for standard-format workbooks
pub const STANDARD_FILE_MARKER: &str = "_STANDARD";

/// Scenario input layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Multi-sheet tester spreadsheet with inline tags
    FreeText,
    /// Single sheet with fixed columns
    Standard,
}

impl InputFormat {
    /// Detect the layout from the file name or the first row of the first sheet
    #[must_use]
    pub fn detect(workbook: &Workbook) -> Self {
        let named_standard = workbook
            .file_name()
            .is_some_and(|name| name.to_ascii_uppercase().contains(STANDARD_FILE_MARKER));
        if named_standard {
            return Self::Standard;
        }

        let has_signature = workbook
            .first_sheet()
            .and_then(|sheet| sheet.rows.first())
            .is_some_and(|header| {
                STANDARD_SIGNATURE.iter().all(|required| {
                    header
                        .iter()
                        .any(|cell| cell.trim().eq_ignore_ascii_case(required))
                })
            });

        if has_signature { Self::Standard } else { Self::FreeText }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreeText => f.write_str("free-text"),
            Self::Standard => f.write_str("standard"),
        }
    }
}

/// Everything an extractor needs besides the workbook
#[derive(Clone, Copy)]
pub struct ParseContext<'a> {
    /// Measure definition for component matching
    pub measure: &'a MeasureConfig,
    /// Run configuration
    pub config: &'a GenerationConfig,
    /// Benefit profile name (upper-case) to columns
    pub benefit_profiles: &'a BTreeMap<String, Vec<String>>,
    /// Optional best-effort extractor for rows without enrollment data
    pub extractor: Option<&'a dyn AiExtractor>,
}

impl<'a> ParseContext<'a> {
    /// Create a context without an external extractor
    #[must_use]
    pub const fn new(
        measure: &'a MeasureConfig,
        config: &'a GenerationConfig,
        benefit_profiles: &'a BTreeMap<String, Vec<String>>,
    ) -> Self {
        Self {
            measure,
            config,
            benefit_profiles,
            extractor: None,
        }
    }

    /// Attach an external extractor
    #[must_use]
    pub const fn with_extractor(mut self, extractor: &'a dyn AiExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Date resolver for the run's measurement year
    #[must_use]
    pub const fn dates(&self) -> DateResolver {
        DateResolver::new(self.config.measurement_year)
    }
}

/// A strategy that turns a workbook into scenarios
pub trait ScenarioExtractor {
    /// Strategy name for logging
    fn name(&self) -> &'static str;

    /// Extract every scenario from a workbook
    fn extract(&self, workbook: &Workbook, ctx: &ParseContext<'_>) -> Result<Vec<Scenario>>;
}

/// The extractor for an input format
#[must_use]
pub fn extractor_for(format: InputFormat) -> Box<dyn ScenarioExtractor> {
    match format {
        InputFormat::FreeText => Box::new(FreeTextExtractor::new()),
        InputFormat::Standard => Box::new(StandardExtractor::new()),
    }
}

/// Detect the input format and extract scenarios
pub fn parse_scenarios(workbook: &Workbook, ctx: &ParseContext<'_>) -> Result<Vec<Scenario>> {
    let format = InputFormat::detect(workbook);
    let extractor = extractor_for(format);
    log::info!(
        "Parsing {} as {format} scenarios ({} sheet(s))",
        workbook.file_name().unwrap_or_else(|| "workbook".to_string()),
        workbook.sheets.len()
    );

    let scenarios = extractor.extract(workbook, ctx)?;
    log::info!("{} extracted {} scenario(s)", extractor.name(), scenarios.len());
    Ok(scenarios)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::Sheet;

    #[test]
    fn test_detect_by_signature() {
        let standard = Workbook::from_sheets(vec![Sheet::new(
            "Sheet1",
            vec![vec!["member_id", "AGE", "GENDER", "PRODUCT_LINE", "EVENT_1_NAME"]],
        )]);
        assert_eq!(InputFormat::detect(&standard), InputFormat::Standard);

        let free = Workbook::from_sheets(vec![Sheet::new(
            "PSA",
            vec![vec!["#TC", "Scenario", "Expected"]],
        )]);
        assert_eq!(InputFormat::detect(&free), InputFormat::FreeText);
    }

    #[test]
    fn test_detect_by_file_name() {
        let mut workbook = Workbook::from_sheets(vec![Sheet::new("Sheet1", vec![vec!["ID"]])]);
        workbook.path = Some("inputs/psa_standard.xlsx".into());
        assert_eq!(InputFormat::detect(&workbook), InputFormat::Standard);
    }
}
