//! Deterministic extraction from the fixed-column standard format
//!
//! One sheet, one header row, one scenario per row with a `MEMBER_ID`.
//! Numbered column groups (`ENROLLMENT_1_START`, `EVENT_2_NAME`, ...) carry
//! the repeating parts; any other column is passed through as an override.

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;
use rustc_hash::FxHashMap;

use super::ai::apply_fallback;
use super::{ParseContext, ScenarioExtractor};
use crate::error::{MockupError, Result};
use crate::scenario::{EnrollmentSpan, Gender, ProductLine, Scenario, Source, VisitSpan};
use crate::workbook::{Sheet, Workbook};

/// Enrollment groups scanned per row
pub const MAX_ENROLLMENTS: usize = 10;

/// Column prefixes and names that are never passed through as overrides
const RESERVED_COLUMNS: [&str; 10] = [
    "MEMBER_ID",
    "AGE",
    "GENDER",
    "PRODUCT_LINE",
    "ENROLLMENT_",
    "VISIT_",
    "EVENT_",
    "EXCLUSION_",
    "SCENARIO_DESCRIPTION",
    "EXPECTED_RESULT",
];

const TRUTHY: [&str; 7] = ["1", "Y", "YES", "TRUE", "COMPLIANT", "C", "EXCLUDED"];

lazy_static! {
    static ref NUMBERED_COLUMN: Regex = Regex::new(r"^(VISIT|EVENT|EXCLUSION)_(\d+)_[A-Z_]+$").unwrap();
}

/// Whether a compliance cell means "present"
///
/// Accepts the usual yes-words as well as any number greater than zero
/// (a BMI percentile, a lab value).
#[must_use]
pub fn is_truthy(value: &str) -> bool {
    let value = value.trim().to_ascii_uppercase();
    TRUTHY.contains(&value.as_str()) || value.parse::<f64>().is_ok_and(|n| n.is_finite() && n > 0.0)
}

/// Header lookup for a standard sheet
struct Columns {
    index: FxHashMap<String, usize>,
    headers: Vec<String>,
    visit_slots: BTreeSet<usize>,
    event_slots: BTreeSet<usize>,
    exclusion_slots: BTreeSet<usize>,
}

impl Columns {
    fn new(header: &[String]) -> Self {
        let headers: Vec<String> = header.iter().map(|h| h.trim().to_string()).collect();
        let mut index = FxHashMap::default();
        let mut visit_slots = BTreeSet::new();
        let mut event_slots = BTreeSet::new();
        let mut exclusion_slots = BTreeSet::new();

        for (i, name) in headers.iter().enumerate() {
            let upper = name.to_ascii_uppercase();
            if let Some(caps) = NUMBERED_COLUMN.captures(&upper) {
                if let Ok(slot) = caps[2].parse::<usize>() {
                    match &caps[1] {
                        "VISIT" => visit_slots.insert(slot),
                        "EVENT" => event_slots.insert(slot),
                        _ => exclusion_slots.insert(slot),
                    };
                }
            }
            index.entry(upper).or_insert(i);
        }

        Self {
            index,
            headers,
            visit_slots,
            event_slots,
            exclusion_slots,
        }
    }

    /// Trimmed cell value of a named column, `None` when absent or blank
    fn get<'r>(&self, row: &'r [String], name: &str) -> Option<&'r str> {
        let col = *self.index.get(name)?;
        row.get(col).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    fn is_reserved(name: &str) -> bool {
        let upper = name.to_ascii_uppercase();
        RESERVED_COLUMNS.iter().any(|reserved| {
            if reserved.ends_with('_') {
                upper.starts_with(reserved)
            } else {
                upper == *reserved
            }
        })
    }
}

/// Standard-format extraction strategy
#[derive(Debug, Default)]
pub struct StandardExtractor;

impl StandardExtractor {
    /// Create an extractor
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn parse_row(
        &self,
        sheet: &Sheet,
        row_number: usize,
        row: &[String],
        columns: &Columns,
        ctx: &ParseContext<'_>,
    ) -> Result<Option<Scenario>> {
        let Some(id) = columns.get(row, "MEMBER_ID") else {
            return Ok(None);
        };
        let malformed = |message: String| MockupError::row_parse(&sheet.name, row_number, message);

        let mut scenario = Scenario::new(id);
        scenario.sheet.clone_from(&sheet.name);

        if let Some(age) = columns.get(row, "AGE") {
            let parsed = age
                .parse::<u32>()
                .ok()
                .or_else(|| age.parse::<f64>().ok().filter(|a| *a >= 0.0).map(|a| a as u32))
                .filter(|a| *a <= 110)
                .ok_or_else(|| malformed(format!("invalid AGE '{age}'")))?;
            scenario.age.offer(parsed, Source::Explicit);
        }
        if let Some(gender) = columns.get(row, "GENDER") {
            let parsed = Gender::parse(gender).ok_or_else(|| malformed(format!("invalid GENDER '{gender}'")))?;
            scenario.gender.offer(parsed, Source::Explicit);
        }
        if let Some(line) = columns.get(row, "PRODUCT_LINE") {
            let parsed = ProductLine::from_alias(line)
                .ok_or_else(|| malformed(format!("unknown PRODUCT_LINE '{line}'")))?;
            scenario.product_line.offer(parsed, Source::Explicit);
        }

        scenario.scenario_text = columns.get(row, "SCENARIO_DESCRIPTION").unwrap_or_default().to_string();
        scenario.expected_text = columns.get(row, "EXPECTED_RESULT").unwrap_or_default().to_string();

        for i in 1..=MAX_ENROLLMENTS {
            let Some(start) = columns.get(row, &format!("ENROLLMENT_{i}_START")) else {
                break;
            };
            let end = columns.get(row, &format!("ENROLLMENT_{i}_END")).unwrap_or("12/31/MY");
            let mut span = EnrollmentSpan::new(start, end);
            span.product_id = columns
                .get(row, &format!("ENROLLMENT_{i}_PRODUCT_ID"))
                .map(ToString::to_string);
            scenario.enrollment_spans.push(span);
        }
        if scenario.enrollment_spans.is_empty() && ctx.config.default_enrollment {
            scenario.enrollment_spans.push(EnrollmentSpan::full_year());
        }

        for i in &columns.visit_slots {
            let Some(date) = columns.get(row, &format!("VISIT_{i}_DATE")) else {
                continue;
            };
            let mut visit = VisitSpan::new(date, columns.get(row, &format!("VISIT_{i}_TYPE")).unwrap_or("Outpatient"));
            visit.code = columns.get(row, &format!("VISIT_{i}_CPT")).map(ToString::to_string);
            visit.diagnosis = columns.get(row, &format!("VISIT_{i}_DIAG")).map(ToString::to_string);
            scenario.visit_spans.push(visit);
        }

        for i in &columns.event_slots {
            let Some(name) = columns.get(row, &format!("EVENT_{i}_NAME")) else {
                continue;
            };
            let value = columns.get(row, &format!("EVENT_{i}_VALUE")).unwrap_or_default();
            if !is_truthy(value) {
                continue;
            }
            let name = ctx.measure.canonical_component_name(name);
            scenario.add_compliant(&name);

            let meta = scenario.overrides.event_mut(&name);
            meta.date = columns.get(row, &format!("EVENT_{i}_DATE")).map(ToString::to_string);
            meta.code = columns.get(row, &format!("EVENT_{i}_CODE")).map(ToString::to_string);
            if value.parse::<f64>().is_ok_and(|n| n != 1.0) {
                meta.value = Some(value.to_string());
            }
        }

        for i in &columns.exclusion_slots {
            let Some(name) = columns.get(row, &format!("EXCLUSION_{i}_NAME")) else {
                continue;
            };
            let value = columns.get(row, &format!("EXCLUSION_{i}_VALUE")).unwrap_or_default();
            if !is_truthy(value) {
                continue;
            }
            let name = ctx.measure.canonical_exclusion_name(name);
            scenario.add_excluded(&name);
            if let Some(date) = columns.get(row, &format!("EXCLUSION_{i}_DATE")) {
                scenario.overrides.exclusion_mut(&name).date = Some(date.to_string());
            }
        }

        for (col, header) in columns.headers.iter().enumerate() {
            if header.is_empty() || Columns::is_reserved(header) {
                continue;
            }
            if let Some(value) = row.get(col).map(|v| v.trim()).filter(|v| !v.is_empty()) {
                scenario.overrides.set_field(header.as_str(), value);
            }
        }

        Ok(Some(scenario))
    }
}

impl ScenarioExtractor for StandardExtractor {
    fn name(&self) -> &'static str {
        "standard extractor"
    }

    fn extract(&self, workbook: &Workbook, ctx: &ParseContext<'_>) -> Result<Vec<Scenario>> {
        let Some(sheet) = workbook.first_sheet() else {
            log::warn!("Standard workbook has no sheets");
            return Ok(Vec::new());
        };
        let Some(header) = sheet.rows.first() else {
            return Ok(Vec::new());
        };
        let columns = Columns::new(header);

        let mut scenarios: Vec<Scenario> = Vec::new();
        for (row_idx, row) in sheet.rows.iter().enumerate().skip(1) {
            match self.parse_row(sheet, row_idx + 1, row, &columns, ctx) {
                Ok(Some(scenario)) => {
                    if scenarios.iter().any(|s| s.id == scenario.id) {
                        log::warn!("Duplicate MEMBER_ID {} in {}, keeping the first row", scenario.id, sheet.name);
                    } else {
                        scenarios.push(scenario);
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("Skipping malformed row: {e}"),
            }
        }

        if ctx.extractor.is_some() {
            for scenario in &mut scenarios {
                apply_fallback(scenario, ctx.extractor, ctx.measure);
            }
        }

        Ok(scenarios)
    }
}
