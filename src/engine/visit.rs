//! Visit rows
//!
//! A visit's free-text type decides its place of service. When the type is
//! itself a code it is used directly; otherwise a value set named like the
//! type is searched. Codes land in the diagnosis, procedure or revenue
//! columns according to their code system.

use chrono::NaiveDate;

use super::{MockupEngine, ScenarioContext};
use crate::codes::looks_like_code;
use crate::config::VisitDepth;
use crate::error::Result;
use crate::output::GeneratedRow;
use crate::scenario::VisitSpan;
use crate::schema::{TableSchema, tables};

/// Place of service when the visit type names no known setting
pub const DEFAULT_POS: &str = "11";

/// Procedure code for visits without a resolvable code
pub const DEFAULT_VISIT_CPT: &str = "99213";

/// Diagnosis code added when a visit has none
pub const GENERIC_DIAGNOSIS: &str = "Z00.00";

/// Visit category keywords to place-of-service codes, in match order
const PLACE_OF_SERVICE: &[(&str, &str)] = &[
    ("telehealth", "02"),
    ("telephone", "02"),
    ("virtual", "02"),
    ("video", "02"),
    ("emergency", "23"),
    ("inpatient", "21"),
    ("outpatient", "22"),
    ("urgent", "20"),
    ("nursing", "32"),
    ("home", "12"),
    ("office", "11"),
];

/// Place of service for a known visit category
#[must_use]
pub fn category_pos(visit_type: &str) -> Option<&'static str> {
    let lower = visit_type.to_lowercase();
    if lower.split(|c: char| !c.is_ascii_alphanumeric()).any(|w| w == "ed" || w == "er") {
        return Some("23");
    }
    PLACE_OF_SERVICE
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, pos)| *pos)
}

/// Whether a visit type token is an explicit code rather than a category
#[must_use]
pub fn is_explicit_code(visit_type: &str) -> bool {
    looks_like_code(visit_type) && category_pos(visit_type).is_none()
}

impl MockupEngine {
    /// Visit rows for a scenario
    pub fn generate_visits(&self, ctx: &mut ScenarioContext<'_>) -> Result<Vec<GeneratedRow>> {
        let table = self.schema().require(tables::VISIT)?;
        let scenario = ctx.scenario;

        if scenario.visit_spans.is_empty() {
            if self.config().visit_depth == VisitDepth::ScenarioOnly {
                return Ok(Vec::new());
            }
            let mut row = self.visit_row(ctx, table, self.dates().date_in_year(0, 2, 1), DEFAULT_POS);
            self.set_procedure(&mut row, table, DEFAULT_VISIT_CPT);
            self.finish_visit(ctx, table, &mut row, 1);
            return Ok(vec![row]);
        }

        let mut rows = Vec::with_capacity(scenario.visit_spans.len());
        for (index, span) in scenario.visit_spans.iter().enumerate() {
            rows.push(self.span_visit(ctx, table, span, index + 1));
        }
        Ok(rows)
    }

    /// A bare visit row with date and place of service
    pub(crate) fn visit_row(
        &self,
        ctx: &mut ScenarioContext<'_>,
        table: &TableSchema,
        date: NaiveDate,
        pos: &str,
    ) -> GeneratedRow {
        let mut row = self.start_row(ctx, table);
        row.set(table.column("date").unwrap_or("SERV_DT"), date);
        if let Some(column) = table.column("pos") {
            row.set(column, pos);
        }
        row
    }

    fn span_visit(
        &self,
        ctx: &mut ScenarioContext<'_>,
        table: &TableSchema,
        span: &VisitSpan,
        visit_index: usize,
    ) -> GeneratedRow {
        let date = self.dates().parse_date_str(&span.date);
        let visit_type = span.visit_type.trim();
        let pos = category_pos(visit_type).unwrap_or(DEFAULT_POS);
        let mut row = self.visit_row(ctx, table, date, pos);

        let type_code = if is_explicit_code(visit_type) {
            Some(visit_type.to_uppercase())
        } else if visit_type.is_empty() {
            None
        } else {
            self.code_from_name(ctx, visit_type)
        };

        let mut has_code = false;
        if let Some(code) = type_code {
            has_code = self.place_code(&mut row, table, &code);
        }
        if let Some(code) = span.code.as_deref().filter(|c| !c.trim().is_empty()) {
            self.set_procedure(&mut row, table, code.trim());
            has_code = true;
        }
        if let Some(diagnosis) = span.diagnosis.as_deref().filter(|d| !d.trim().is_empty()) {
            if let Some(column) = table.columns("diagnosis_codes").first() {
                row.set(column, diagnosis.trim());
            }
        }
        if !has_code {
            log::debug!("{}: no code for visit type '{visit_type}', using {DEFAULT_VISIT_CPT}", ctx.id());
            self.set_procedure(&mut row, table, DEFAULT_VISIT_CPT);
        }

        self.finish_visit(ctx, table, &mut row, visit_index);
        row
    }

    fn set_procedure(&self, row: &mut GeneratedRow, table: &TableSchema, code: &str) {
        if let Some(column) = table.columns("procedure_codes").first() {
            row.set(column, code);
        }
    }

    /// Generic diagnosis, global overrides, then pinned per-visit overrides
    fn finish_visit(
        &self,
        ctx: &mut ScenarioContext<'_>,
        table: &TableSchema,
        row: &mut GeneratedRow,
        visit_index: usize,
    ) {
        let scenario = ctx.scenario;
        if let Some(column) = table.columns("diagnosis_codes").first() {
            let missing = row.get(column).is_none_or(crate::output::CellValue::is_blank);
            if missing {
                let diagnosis = self
                    .code_from_name(ctx, "General Medical Exam")
                    .unwrap_or_else(|| GENERIC_DIAGNOSIS.to_string());
                row.set(column, diagnosis);
            }
        }

        self.apply_field_overrides(row, table, &scenario.overrides.fields, true);

        if let Some(pinned) = scenario.overrides.pinned_visits.get(&visit_index) {
            for (key, value) in pinned {
                let column = table
                    .physical_column(key)
                    .map_or_else(|| key.to_ascii_uppercase(), ToString::to_string);
                let converted = self.convert_override(row.get(&column), value);
                row.set(&column, converted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::codes::{CodeEntry, CodeResolver};
    use crate::config::GenerationConfig;
    use crate::engine::tests::engine;
    use crate::output::CellValue;
    use crate::scenario::Scenario;

    #[test]
    fn test_place_of_service() {
        assert_eq!(category_pos("Telehealth visit"), Some("02"));
        assert_eq!(category_pos("ED visit"), Some("23"));
        assert_eq!(category_pos("Inpatient stay"), Some("21"));
        assert_eq!(category_pos("Outpatient"), Some("22"));
        assert_eq!(category_pos("99213"), None);
        assert!(is_explicit_code("99213"));
        assert!(is_explicit_code("0450"));
        assert!(!is_explicit_code("Outpatient"));
    }

    #[test]
    fn test_default_visit() {
        let engine = engine();
        let scenario = Scenario::new("T1");
        let rows = engine.generate_visits(&mut ScenarioContext::new(&scenario)).unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get("CLAIM_ID"), Some(&CellValue::from("C_T1_01")));
        assert_eq!(row.get("MEM_NBR"), Some(&CellValue::from("T1")));
        assert_eq!(row.get("SERV_DT").unwrap().to_string(), "2026-02-01");
        assert_eq!(row.get("POS"), Some(&CellValue::from("11")));
        assert_eq!(row.get("CPT_1"), Some(&CellValue::from("99213")));
        assert_eq!(row.get("DIAG_I_1"), Some(&CellValue::from(GENERIC_DIAGNOSIS)));
    }

    #[test]
    fn test_scenario_only_depth_skips_default() {
        let engine = MockupEngine::new(
            engine().measure().clone(),
            engine().schema().clone(),
            GenerationConfig::default().with_visit_depth(VisitDepth::ScenarioOnly),
        );
        let scenario = Scenario::new("T1");
        assert!(engine.generate_visits(&mut ScenarioContext::new(&scenario)).unwrap().is_empty());
    }

    #[test]
    fn test_explicit_codes_are_routed_by_system() {
        let engine = engine();
        let scenario = Scenario::new("T1")
            .with_visit(VisitSpan::new("3/1/MY", "0450"))
            .with_visit(VisitSpan::new("4/1/MY", "Z71.3"))
            .with_visit(VisitSpan::new("5/1/MY", "Telehealth"));
        let rows = engine.generate_visits(&mut ScenarioContext::new(&scenario)).unwrap();

        assert_eq!(rows[0].get("UB_REV"), Some(&CellValue::from("0450")));
        assert!(rows[0].get("CPT_1").is_none());
        assert_eq!(rows[1].get("DIAG_I_1"), Some(&CellValue::from("Z71.3")));
        assert_eq!(rows[2].get("POS"), Some(&CellValue::from("02")));
        assert_eq!(rows[2].get("CLAIM_ID"), Some(&CellValue::from("C_T1_03")));
    }

    #[test]
    fn test_type_resolved_through_value_sets() {
        let codes = CodeResolver::from_entries(
            vec![CodeEntry::new("Telehealth Visit", "98966", "CPT")],
            2026,
        );
        let engine = engine().with_codes(Arc::new(codes));
        let scenario = Scenario::new("T1").with_visit(VisitSpan::new("5/1/MY", "Telehealth"));
        let rows = engine.generate_visits(&mut ScenarioContext::new(&scenario)).unwrap();
        assert_eq!(rows[0].get("CPT_1"), Some(&CellValue::from("98966")));
    }

    #[test]
    fn test_standard_codes_and_pinned_overrides() {
        let engine = engine();
        let mut span = VisitSpan::new("6/1/MY", "Outpatient");
        span.code = Some("99214".to_string());
        span.diagnosis = Some("E11.9".to_string());
        let mut scenario = Scenario::new("T1").with_visit(span);
        scenario.overrides.set_field("DIAG_I_2", "I10");
        scenario
            .overrides
            .pinned_visits
            .entry(1)
            .or_default()
            .insert("pos".to_string(), "21".to_string());

        let rows = engine.generate_visits(&mut ScenarioContext::new(&scenario)).unwrap();
        let row = &rows[0];
        assert_eq!(row.get("CPT_1"), Some(&CellValue::from("99214")));
        assert_eq!(row.get("DIAG_I_1"), Some(&CellValue::from("E11.9")));
        assert_eq!(row.get("DIAG_I_2"), Some(&CellValue::from("I10")));
        assert_eq!(row.get("POS"), Some(&CellValue::from("21")));
    }
}
