//! Enrollment rows
//!
//! One row per enrollment span, or a single full measurement-year row when
//! the scenario names none. Column values are layered: built-in defaults,
//! then the scenario's field overrides, then whatever the span itself
//! states. Each row also carries 24 monthly coverage slots `FLD00..FLD23`
//! covering January MY-1 through December MY.

use chrono::NaiveDate;

use super::{MockupEngine, ScenarioContext};
use crate::error::Result;
use crate::output::{CellValue, GeneratedRow};
use crate::scenario::dates::coverage_months;
use crate::scenario::{EnrollmentSpan, ProductLine};
use crate::schema::{TableSchema, tables};

/// Benefit flags every enrollment row starts with
pub const BASE_FLAGS: &[(&str, i64)] = &[
    ("BEN_MEDICAL", 1),
    ("BEN_DENT", 0),
    ("BEN_RX", 1),
    ("BEN_MH_INP", 1),
    ("BEN_MH_INT", 1),
    ("BEN_MH_AMB", 1),
    ("BEN_CD_INP", 1),
    ("BEN_CD_INT", 1),
    ("BEN_CD_AMB", 1),
    ("BEN_HOSPICE", 0),
    ("BEN_ESRD", 0),
    ("BEN_OS", 0),
    ("EMLS_ESCL_FL", 0),
];

/// Fixed plan identifiers every enrollment row starts with
pub const BASE_IDENTIFIERS: &[(&str, &str)] = &[
    ("SCH_ID", "K10"),
    ("GRP_ID", "1"),
    ("IP_EMPLOYER", "X"),
    ("EMP_ID", "K10"),
    ("MED_ORG_EXT_ID", "51"),
    ("COVERAGE_INDICATOR", "C"),
    ("PBP_NBR", "001"),
    ("SUB_TYPE", ""),
    ("ASO_IND", ""),
    ("CMS_NUMBER", "H0123"),
];

/// Name of the monthly coverage column for slot `index`
#[must_use]
pub fn coverage_column(index: usize) -> String {
    format!("FLD{index:02}")
}

/// Monthly coverage flags: slot `i` is 1 when the first day of month `i`
/// (January MY-1 = slot 0) lies within `[start, end]`
#[must_use]
pub fn coverage_flags(year: i32, start: NaiveDate, end: NaiveDate) -> [i64; 24] {
    coverage_months(year).map(|month| i64::from(start <= month && month <= end))
}

impl MockupEngine {
    /// Enrollment rows for a scenario
    pub fn generate_enrollments(&self, ctx: &mut ScenarioContext<'_>) -> Result<Vec<GeneratedRow>> {
        let table = self.schema().require(tables::ENROLLMENT)?;
        let scenario = ctx.scenario;

        let default_span = [EnrollmentSpan::full_year()];
        let spans: &[EnrollmentSpan] = if scenario.enrollment_spans.is_empty() {
            &default_span
        } else {
            &scenario.enrollment_spans
        };

        let mut rows = Vec::with_capacity(spans.len());
        for span in spans {
            rows.push(self.enrollment_row(ctx, table, span));
        }
        Ok(rows)
    }

    fn enrollment_row(
        &self,
        ctx: &mut ScenarioContext<'_>,
        table: &TableSchema,
        span: &EnrollmentSpan,
    ) -> GeneratedRow {
        let scenario = ctx.scenario;
        let start = self.dates().parse_date_str(&span.start);
        let end = self.dates().parse_date_str(&span.end);
        if start > end {
            ctx.warn(format!("Enrollment span starts after it ends ({} to {})", span.start, span.end));
        }

        let product_column = table.column("product_id").unwrap_or("PRODUCT_ID");
        let coverage_column_name = table.column("coverage_indicator").unwrap_or("COVERAGE_INDICATOR");
        let hospice_column = table.column("hospice").unwrap_or("BEN_HOSPICE");

        // Defaults
        let mut row = self.start_row(ctx, table);
        row.set(table.column("start_date").unwrap_or("ENR_START"), start);
        row.set(table.column("end_date").unwrap_or("ENR_END"), end);
        for (column, value) in BASE_FLAGS {
            row.set(column, *value);
        }
        for (column, value) in BASE_IDENTIFIERS {
            row.set(column, *value);
        }
        let product_id = scenario.product_line().product_id();
        row.set(product_column, product_id);
        row.set("PRODUCT_ID_2", product_id);

        // Global overrides
        self.apply_field_overrides(&mut row, table, &scenario.overrides.fields, true);
        for (key, value) in &scenario.overrides.fields {
            let key = key.to_ascii_uppercase();
            if key.starts_with("BEN_") && !row.contains(&key) {
                row.set(&key, self.convert_override(Some(&CellValue::Int(0)), value));
            }
        }

        // Span-level values
        if let Some(raw) = span.product_id.as_deref() {
            match span_product_id(raw) {
                Some(id) => {
                    row.set(product_column, id);
                    row.set("PRODUCT_ID_2", id);
                }
                None => ctx.warn(format!("Unrecognized product id '{raw}', keeping {product_id}")),
            }
        } else if let Some(CellValue::Int(id)) = row.get(product_column).cloned() {
            row.set("PRODUCT_ID_2", id);
        }
        if let Some(indicator) = span.coverage_indicator.as_deref() {
            row.set(coverage_column_name, indicator);
        }
        if let Some(hospice) = span.hospice {
            row.set(hospice_column, i64::from(hospice));
        }

        let flags = coverage_flags(self.dates().year(), start, end);
        for (index, flag) in flags.into_iter().enumerate() {
            row.set(&coverage_column(index), flag);
        }
        row
    }
}

/// A numeric product id, or the id of a product line alias
fn span_product_id(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|v| v.fract() == 0.0).map(|v| v as i64))
        .or_else(|| ProductLine::from_alias(raw).map(ProductLine::product_id))
}
