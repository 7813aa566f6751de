//! Exclusion rows
//!
//! Hospice exclusions are recorded as a monthly membership flag; every
//! other exclusion becomes a visit carrying the exclusion's code.

use super::clinical::MANUAL_CODE;
use super::visit::DEFAULT_POS;
use super::{MockupEngine, ScenarioContext};
use crate::error::Result;
use crate::output::GeneratedRow;
use crate::scenario::EventMeta;
use crate::schema::tables;

/// Whether an exclusion is recorded through monthly membership
#[must_use]
pub fn is_hospice(name: &str) -> bool {
    name.to_lowercase().contains("hospice")
}

impl MockupEngine {
    /// The row recording exclusion `name`, if it can be written
    pub fn generate_exclusion(
        &self,
        ctx: &mut ScenarioContext<'_>,
        name: &str,
    ) -> Result<Option<GeneratedRow>> {
        let scenario = ctx.scenario;
        let meta = scenario.overrides.exclusion(name).cloned().unwrap_or_default();
        let date = meta
            .date
            .as_deref()
            .map_or_else(|| self.dates().date_in_year(0, 3, 15), |token| self.dates().parse_date_str(token));

        if is_hospice(name) {
            let Some(table) = self.schema().table(tables::MONTHLY_MEMBERSHIP) else {
                ctx.warn(format!("No monthly membership table, '{name}' not written"));
                return Ok(None);
            };
            let flag = meta
                .value
                .as_deref()
                .or_else(|| scenario.overrides.field("HOSPICE"))
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(1);

            let mut row = self.start_row(ctx, table);
            row.set(table.column("run_date").unwrap_or("RUN_DATE"), date);
            row.set(table.column("hospice_flag").unwrap_or("HOSPICE"), flag);
            return Ok(Some(row));
        }

        let table = self.schema().require(tables::VISIT)?;
        let code = self.exclusion_code(ctx, name, &meta);
        let mut row = self.visit_row(ctx, table, date, DEFAULT_POS);
        if code == MANUAL_CODE || !self.place_code(&mut row, table, &code) {
            let column = table
                .first_column(&["diagnosis_codes", "procedure_codes"])
                .unwrap_or("DIAG_I_1");
            row.set(column, code);
        }
        Ok(Some(row))
    }

    fn exclusion_code(&self, ctx: &mut ScenarioContext<'_>, name: &str, meta: &EventMeta) -> String {
        if let Some(code) = meta.code.as_deref().filter(|c| !c.trim().is_empty()) {
            return code.trim().to_string();
        }
        let component = self.measure().find_exclusion(name);
        if let Some(code) = component.and_then(|c| c.code.as_deref()) {
            return code.to_string();
        }
        if let Some(code) = component.and_then(|c| self.code_from_value_sets(ctx, &c.value_set_names)) {
            return code;
        }
        if let Some(code) = self.code_from_name(ctx, name) {
            return code;
        }
        if let Some(code) = super::clinical::fallback_code(name) {
            return code.to_string();
        }
        ctx.warn(format!("No code found for exclusion '{name}', writing {MANUAL_CODE}"));
        MANUAL_CODE.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::engine;
    use crate::output::CellValue;
    use crate::scenario::Scenario;

    #[test]
    fn test_hospice_goes_to_monthly_membership() {
        let engine = engine();
        let scenario = Scenario::new("T1").with_exclusion("Hospice");
        let mut ctx = ScenarioContext::new(&scenario);
        let row = engine.generate_exclusion(&mut ctx, "Hospice").unwrap().unwrap();

        assert_eq!(row.table, "PSA_MONTHLY_MEMBERSHIP_IN");
        assert_eq!(row.get("MMS_ID"), Some(&CellValue::from("MM_T1_01")));
        assert_eq!(row.get("RUN_DATE").unwrap().to_string(), "2026-03-15");
        assert_eq!(row.get("HOSPICE"), Some(&CellValue::Int(1)));
    }

    #[test]
    fn test_other_exclusions_become_visits() {
        let engine = engine();
        let mut scenario = Scenario::new("T1").with_exclusion("Prostate Cancer");
        scenario.overrides.exclusion_mut("Prostate Cancer").date = Some("8/1/MY".to_string());
        let mut ctx = ScenarioContext::new(&scenario);
        let row = engine.generate_exclusion(&mut ctx, "Prostate Cancer").unwrap().unwrap();

        assert_eq!(row.table, "PSA_VISIT_IN");
        assert_eq!(row.get("SERV_DT").unwrap().to_string(), "2026-08-01");
        assert_eq!(row.get("DIAG_I_1"), Some(&CellValue::from("C61")));
        assert!(ctx.warnings().is_empty());
    }

    #[test]
    fn test_unknown_exclusion_is_manual() {
        let engine = engine();
        let scenario = Scenario::new("T1").with_exclusion("Frailty");
        let mut ctx = ScenarioContext::new(&scenario);
        let row = engine.generate_exclusion(&mut ctx, "Frailty").unwrap().unwrap();

        assert_eq!(row.get("DIAG_I_1"), Some(&CellValue::from(MANUAL_CODE)));
        assert_eq!(ctx.warnings().len(), 1);
    }
}
