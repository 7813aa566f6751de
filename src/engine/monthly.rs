//! Monthly membership overrides
//!
//! `MMO:` flags sharing a run date are written to the same row.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::{MockupEngine, ScenarioContext};
use crate::output::GeneratedRow;
use crate::scenario::MonthlyOverride;
use crate::schema::tables;

impl MockupEngine {
    /// One monthly membership row per distinct run date
    pub fn generate_monthly_overrides(&self, ctx: &mut ScenarioContext<'_>) -> Vec<GeneratedRow> {
        let scenario = ctx.scenario;
        if scenario.monthly_overrides.is_empty() {
            return Vec::new();
        }
        let Some(table) = self.schema().table(tables::MONTHLY_MEMBERSHIP) else {
            ctx.warn("No monthly membership table, monthly overrides not written");
            return Vec::new();
        };

        let mut by_run_date: BTreeMap<NaiveDate, Vec<&MonthlyOverride>> = BTreeMap::new();
        for flag in &scenario.monthly_overrides {
            let run_date = self.dates().parse_date_str(&flag.run_date);
            by_run_date.entry(run_date).or_default().push(flag);
        }

        let run_date_column = table.column("run_date").unwrap_or("RUN_DATE");
        by_run_date
            .into_iter()
            .map(|(run_date, flags)| {
                let mut row = self.start_row(ctx, table);
                row.set(run_date_column, run_date);
                for flag in flags {
                    let column = table
                        .physical_column(&flag.field)
                        .map_or_else(|| flag.field.to_ascii_uppercase(), ToString::to_string);
                    row.set(&column, flag.value);
                }
                row
            })
            .collect()
    }
}
