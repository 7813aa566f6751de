//! Clinical event rows
//!
//! Each compliant event becomes one row, or one row per occurrence for
//! composite components, in the table its component targets. Dates, codes
//! and result values are taken from the most specific source available:
//!
//! * date: per-event override, `ED<n>`, the global `ED:` list, then the
//!   anchor (June 1 MY by default) plus 30 days per event index
//! * code: per-event override, component default, the component's value
//!   sets, a value set named like the component, a built-in fallback, and
//!   finally `MANUAL`

use std::fmt;

use chrono::NaiveDate;

use super::visit::DEFAULT_POS;
use super::{MockupEngine, ScenarioContext};
use crate::config::{Component, infer_table};
use crate::error::Result;
use crate::output::GeneratedRow;
use crate::scenario::dates::shift_days;
use crate::scenario::{EventMeta, Scenario};
use crate::schema::{TableSchema, tables};

/// Code written when nothing better can be found
pub const MANUAL_CODE: &str = "MANUAL";

/// Days between the default dates of consecutive events
pub const EVENT_SPACING_DAYS: i64 = 30;

/// Days between occurrences of a composite component without a configured separation
pub const DEFAULT_SEPARATION_DAYS: i64 = 1;

/// Default pharmacy days supply and quantity
pub const DEFAULT_DAYS_SUPPLY: u32 = 30;

/// Built-in code for well-known events when no directory provides one
#[must_use]
pub fn fallback_code(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    if lower.contains("psa") {
        Some("84153")
    } else if lower.contains("counseling") && lower.contains("nutrition") {
        Some("Z71.3")
    } else if lower.contains("counseling") {
        Some("97802")
    } else if lower.contains("pregnan") {
        Some("O09.212")
    } else if lower.contains("prostate cancer") {
        Some("C61")
    } else {
        None
    }
}

/// Built-in result value for well-known events
#[must_use]
pub fn fallback_value(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    if lower.contains("psa") {
        Some("1.0")
    } else if lower.contains("bmi") {
        Some("85")
    } else {
        None
    }
}

/// Where a component's rows go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableTarget {
    /// Logical table resolved from the component's configured table
    Explicit(String),
    /// Logical table guessed from the component name
    Inferred(&'static str),
}

impl TableTarget {
    /// Logical table key
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Explicit(key) => key,
            Self::Inferred(key) => key,
        }
    }

    /// Whether the target came from configuration
    #[must_use]
    pub const fn is_explicit(&self) -> bool {
        matches!(self, Self::Explicit(_))
    }
}

impl fmt::Display for TableTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit(key) => write!(f, "{key} (configured)"),
            Self::Inferred(key) => write!(f, "{key} (inferred)"),
        }
    }
}

/// Rows produced for one compliant event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRows {
    /// A plain component
    Single(GeneratedRow),
    /// A composite component, one row per occurrence
    Multiple(Vec<GeneratedRow>),
}

impl EventRows {
    /// The rows, in occurrence order
    #[must_use]
    pub fn rows(&self) -> &[GeneratedRow] {
        match self {
            Self::Single(row) => std::slice::from_ref(row),
            Self::Multiple(rows) => rows,
        }
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows().len()
    }

    /// Whether there are no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    /// Take the rows
    #[must_use]
    pub fn into_rows(self) -> Vec<GeneratedRow> {
        match self {
            Self::Single(row) => vec![row],
            Self::Multiple(rows) => rows,
        }
    }
}

/// Day offsets of each occurrence of a component, relative to its base date
#[must_use]
pub fn occurrence_offsets(component: Option<&Component>) -> Vec<i64> {
    let Some(component) = component else {
        return vec![0];
    };

    if component.sub_events.is_empty() {
        let count = component.count.unwrap_or(1).max(1);
        let separation = component
            .min_separation_days
            .unwrap_or(DEFAULT_SEPARATION_DAYS);
        return (0..count).map(|i| i64::from(i) * separation).collect();
    }

    let mut offsets = Vec::new();
    let mut current = 0;
    for sub_event in &component.sub_events {
        let separation = sub_event
            .min_separation_days
            .or(component.min_separation_days)
            .unwrap_or(DEFAULT_SEPARATION_DAYS);
        for _ in 0..sub_event.count.max(1) {
            if !offsets.is_empty() {
                current += separation;
            }
            offsets.push(current);
        }
    }
    offsets
}

impl MockupEngine {
    /// Logical table a component's rows go to
    #[must_use]
    pub fn resolve_target(&self, component: Option<&Component>, name: &str) -> TableTarget {
        match component.and_then(|c| c.table.as_deref()) {
            Some(configured) => match self.schema().logical_key_for(configured) {
                Some(key) => TableTarget::Explicit(key.to_string()),
                None => {
                    log::debug!("Table '{configured}' of '{name}' is not in the schema, inferring");
                    TableTarget::Inferred(infer_table(name))
                }
            },
            None => TableTarget::Inferred(infer_table(name)),
        }
    }

    /// Base date of the event at `index` (0-based) in the compliant list
    #[must_use]
    pub fn event_date(&self, scenario: &Scenario, meta: &EventMeta, index: usize) -> NaiveDate {
        let dates = self.dates();
        if let Some(token) = meta.date.as_deref() {
            return dates.parse_date_str(token);
        }
        if let Some(token) = scenario.overrides.events_by_index.get(&(index + 1)) {
            return dates.parse_date_str(token);
        }
        if let Some(token) = scenario
            .event_dates
            .get(index)
            .or_else(|| scenario.event_dates.last())
        {
            return dates.parse_date_str(token);
        }

        let anchor = scenario
            .anchor_date
            .as_deref()
            .map_or_else(|| dates.date_in_year(0, 6, 1), |token| dates.parse_date_str(token));
        let index = i64::try_from(index).unwrap_or(0);
        shift_days(anchor, EVENT_SPACING_DAYS * index)
    }

    /// Rows for the compliant event `name` at position `index`
    pub fn generate_clinical_event(
        &self,
        ctx: &mut ScenarioContext<'_>,
        name: &str,
        index: usize,
    ) -> Result<EventRows> {
        let scenario = ctx.scenario;
        let component = self.measure().find_component(name);
        if component.is_none() {
            log::debug!("{}: '{name}' is not a configured component", ctx.id());
        }

        let target = self.resolve_target(component, name);
        let table = match self.schema().table(target.key()) {
            Some(table) => table,
            None => {
                ctx.warn(format!("No '{}' table for '{name}', writing a visit row", target.key()));
                self.schema().require(tables::VISIT)?
            }
        };
        log::debug!("{}: '{name}' -> {target}", ctx.id());

        let meta = scenario.overrides.event(name).cloned().unwrap_or_default();
        let base = self.event_date(scenario, &meta, index);

        let rows: Vec<GeneratedRow> = occurrence_offsets(component)
            .into_iter()
            .map(|offset| self.event_row(ctx, table, component, name, &meta, shift_days(base, offset)))
            .collect();

        Ok(match <[GeneratedRow; 1]>::try_from(rows) {
            Ok([row]) => EventRows::Single(row),
            Err(rows) => EventRows::Multiple(rows),
        })
    }

    fn event_row(
        &self,
        ctx: &mut ScenarioContext<'_>,
        table: &TableSchema,
        component: Option<&Component>,
        name: &str,
        meta: &EventMeta,
        date: NaiveDate,
    ) -> GeneratedRow {
        let code = self.event_code(ctx, component, name, meta);
        let is_visit_like = !table.columns("procedure_codes").is_empty()
            || !table.columns("diagnosis_codes").is_empty();

        let mut row = self.start_row(ctx, table);
        row.set(&date_column(table), date);

        if is_visit_like {
            if let Some(column) = table.column("pos") {
                row.set(column, DEFAULT_POS);
            }
            if code == MANUAL_CODE || !self.place_code(&mut row, table, &code) {
                let column = table
                    .first_column(&["procedure_codes", "diagnosis_codes"])
                    .unwrap_or("CPT_1");
                row.set(column, code);
            }
        } else {
            let column = table
                .first_column(&["cpt", "ndc", "code"])
                .unwrap_or("CODE");
            row.set(column, code);
        }

        if let Some(value) = event_value(component, name, meta) {
            let is_bmi = name.to_lowercase().contains("bmi");
            let column = if is_bmi {
                table.first_column(&["bmi_percentile", "value"])
            } else {
                table.column("value")
            };
            if let Some(column) = column {
                row.set(column, value);
            }
        }

        if let Some(column) = table.column("days_supply") {
            let days = meta
                .days_supply
                .or_else(|| component.and_then(|c| c.days_supply))
                .unwrap_or(DEFAULT_DAYS_SUPPLY);
            row.set(column, days);
        }
        if let Some(column) = table.column("quantity") {
            let quantity = meta
                .quantity
                .or_else(|| component.and_then(|c| c.quantity))
                .unwrap_or(DEFAULT_DAYS_SUPPLY);
            row.set(column, quantity);
        }

        self.apply_field_overrides(&mut row, table, &ctx.scenario.overrides.fields, false);
        row
    }

    fn event_code(
        &self,
        ctx: &mut ScenarioContext<'_>,
        component: Option<&Component>,
        name: &str,
        meta: &EventMeta,
    ) -> String {
        if let Some(code) = meta.code.as_deref().filter(|c| !c.trim().is_empty()) {
            return code.trim().to_string();
        }
        if let Some(code) = component.and_then(|c| c.code.as_deref()) {
            return code.to_string();
        }
        if let Some(code) = component.and_then(|c| self.code_from_value_sets(ctx, &c.value_set_names)) {
            return code;
        }
        if let Some(code) = self.code_from_name(ctx, name) {
            return code;
        }
        if let Some(code) = fallback_code(name) {
            log::debug!("{}: using built-in code {code} for '{name}'", ctx.id());
            return code.to_string();
        }
        ctx.warn(format!("No code found for '{name}', writing {MANUAL_CODE}"));
        MANUAL_CODE.to_string()
    }
}

/// Result value: override, configured value, middle of the configured
/// range, then the built-in value
fn event_value(component: Option<&Component>, name: &str, meta: &EventMeta) -> Option<String> {
    meta.value
        .clone()
        .or_else(|| component.and_then(|c| c.value.as_ref()).map(ToString::to_string))
        .or_else(|| {
            component
                .and_then(|c| c.value_range)
                .map(|[low, high]| format!("{}", (low + high) / 2.0))
        })
        .or_else(|| fallback_value(name).map(ToString::to_string))
}

/// Date column of a table, by the first mapped date-like field
pub(crate) fn date_column(table: &TableSchema) -> String {
    table
        .first_column(&["date", "run_date", "start_date"])
        .map_or_else(|| "EVENT_DT".to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::codes::{CodeEntry, CodeResolver};
    use crate::config::{GenerationConfig, MeasureConfig};
    use crate::engine::tests::engine;
    use crate::output::CellValue;
    use crate::schema::{SchemaConfig, SchemaMapper};

    fn measure() -> MeasureConfig {
        MeasureConfig::new("WCC")
            .with_numerator(Component::new("BMI Percentile").with_table("emr").with_code("3008F"))
            .with_numerator(Component::new("Counseling for Nutrition").with_table("visit"))
            .with_numerator(Component::new("Outpatient Visit").with_table("visit").with_count(2, 14))
            .with_numerator(
                Component::new("Statin Medication")
                    .with_table("TEMPLATE_RX_IN")
                    .with_value_set("Statin Medications"),
            )
    }

    fn wcc_engine() -> MockupEngine {
        let codes = CodeResolver::from_entries(
            vec![CodeEntry::new("Statin Medications", "00093-0926-01", "NDC")],
            2026,
        );
        MockupEngine::new(
            measure(),
            SchemaMapper::new(SchemaConfig::default_template(), "WCC"),
            GenerationConfig::default(),
        )
        .with_codes(Arc::new(codes))
    }

    #[test]
    fn test_table_targets() {
        let engine = wcc_engine();
        let measure = measure();
        assert_eq!(
            engine.resolve_target(measure.find_component("Statin Medication"), "Statin Medication"),
            TableTarget::Explicit("rx".to_string())
        );
        assert_eq!(
            engine.resolve_target(None, "HbA1c Lab"),
            TableTarget::Inferred("lab")
        );
        let unknown_table = Component::new("Weight Check").with_table("WCC_CLAIMS_IN");
        assert_eq!(
            engine.resolve_target(Some(&unknown_table), "Weight Check"),
            TableTarget::Inferred("emr")
        );
    }

    #[test]
    fn test_composite_occurrences() {
        let engine = wcc_engine();
        let scenario = Scenario::new("T1").with_compliant("Outpatient Visit");
        let mut ctx = ScenarioContext::new(&scenario);
        let rows = engine.generate_clinical_event(&mut ctx, "Outpatient Visit", 0).unwrap();

        let EventRows::Multiple(rows) = rows else {
            panic!("expected a composite");
        };
        assert_eq!(rows.len(), 2);
        let first = rows[0].get("SERV_DT").unwrap().as_date().unwrap();
        let second = rows[1].get("SERV_DT").unwrap().as_date().unwrap();
        assert_eq!((second - first).num_days(), 14);
        assert_ne!(rows[0].get("CLAIM_ID"), rows[1].get("CLAIM_ID"));
    }

    #[test]
    fn test_sub_event_offsets() {
        let component = Component::new("Vaccine")
            .with_sub_event(2, 28)
            .with_sub_event(1, 60);
        assert_eq!(occurrence_offsets(Some(&component)), vec![0, 28, 88]);
        assert_eq!(occurrence_offsets(None), vec![0]);
    }

    #[test]
    fn test_date_precedence() {
        let engine = wcc_engine();
        let mut scenario = Scenario::new("T1");
        let meta = EventMeta::default();

        assert_eq!(engine.event_date(&scenario, &meta, 0).to_string(), "2026-06-01");
        assert_eq!(engine.event_date(&scenario, &meta, 2).to_string(), "2026-07-31");

        scenario.anchor_date = Some("3/1/MY".to_string());
        assert_eq!(engine.event_date(&scenario, &meta, 1).to_string(), "2026-03-31");

        scenario.event_dates = vec!["4/1/MY".to_string(), "4/15/MY".to_string()];
        assert_eq!(engine.event_date(&scenario, &meta, 1).to_string(), "2026-04-15");
        assert_eq!(engine.event_date(&scenario, &meta, 5).to_string(), "2026-04-15");

        scenario.overrides.events_by_index.insert(2, "5/1/MY".to_string());
        assert_eq!(engine.event_date(&scenario, &meta, 1).to_string(), "2026-05-01");

        let pinned = EventMeta {
            date: Some("9/9/MY".to_string()),
            ..EventMeta::default()
        };
        assert_eq!(engine.event_date(&scenario, &pinned, 1).to_string(), "2026-09-09");
    }

    #[test]
    fn test_code_and_value_sources() {
        let engine = wcc_engine();
        let mut scenario = Scenario::new("T1")
            .with_compliant("BMI Percentile")
            .with_compliant("Counseling for Nutrition")
            .with_compliant("Statin Medication")
            .with_compliant("Something Else");
        scenario.overrides.event_mut("Statin Medication").days_supply = Some(90);

        let mut ctx = ScenarioContext::new(&scenario);
        let bmi = engine.generate_clinical_event(&mut ctx, "BMI Percentile", 0).unwrap().into_rows();
        assert_eq!(bmi[0].table, "WCC_EMR_IN");
        assert_eq!(bmi[0].get("EMR_CODE"), Some(&CellValue::from("3008F")));
        assert_eq!(bmi[0].get("BMI_PERCENTILE"), Some(&CellValue::from("85")));

        let counseling = engine
            .generate_clinical_event(&mut ctx, "Counseling for Nutrition", 1)
            .unwrap()
            .into_rows();
        assert_eq!(counseling[0].get("DIAG_I_1"), Some(&CellValue::from("Z71.3")));

        let statin = engine
            .generate_clinical_event(&mut ctx, "Statin Medication", 2)
            .unwrap()
            .into_rows();
        assert_eq!(statin[0].table, "WCC_RX_IN");
        assert_eq!(statin[0].get("NDC"), Some(&CellValue::from("00093-0926-01")));
        assert_eq!(statin[0].get("DAYS_SUPPLY"), Some(&CellValue::Int(90)));
        assert_eq!(statin[0].get("QTY"), Some(&CellValue::Int(30)));

        let unknown = engine.generate_clinical_event(&mut ctx, "Something Else", 3).unwrap();
        assert_eq!(unknown.rows()[0].get("CPT_1"), Some(&CellValue::from(MANUAL_CODE)));
        assert_eq!(ctx.warnings().len(), 1);
    }

    #[test]
    fn test_psa_fallbacks() {
        let engine = engine();
        let scenario = Scenario::new("T1").with_compliant("PSA Test");
        let mut ctx = ScenarioContext::new(&scenario);
        let rows = engine.generate_clinical_event(&mut ctx, "PSA Test", 0).unwrap();

        let EventRows::Single(row) = rows else {
            panic!("expected a single row");
        };
        assert_eq!(row.table, "PSA_LAB_IN");
        assert_eq!(row.get("LAB_ID"), Some(&CellValue::from("L_T1_01")));
        assert_eq!(row.get("LAB_CPT"), Some(&CellValue::from("84153")));
        assert_eq!(row.get("LAB_VALUE"), Some(&CellValue::from("1.0")));
        assert_eq!(row.get("LAB_SCR_DT").unwrap().to_string(), "2026-06-01");
    }
}
