//! Member rows

use chrono::NaiveDate;

use super::demographics::Demographics;
use super::{MockupEngine, ScenarioContext, scenario_seed};
use crate::error::Result;
use crate::output::{CellValue, GeneratedRow};
use crate::schema::tables;

impl MockupEngine {
    /// Birth date for an age as of the end of the measurement year
    ///
    /// Members are born mid-year so the age holds for the whole year.
    #[must_use]
    pub fn birth_date(&self, age: u32) -> NaiveDate {
        let age = i32::try_from(age).unwrap_or(0);
        self.dates().date_in_year(-age, 6, 15)
    }

    /// The member row for a scenario
    pub fn generate_member(&self, ctx: &mut ScenarioContext<'_>) -> Result<GeneratedRow> {
        let table = self.schema().require(tables::MEMBER)?;
        let scenario = ctx.scenario;
        let demo = Demographics::generate(scenario_seed(&scenario.id), scenario.gender());

        let mut row = self.start_row(ctx, table);
        let generated: [(&str, CellValue); 12] = [
            ("dob", self.birth_date(scenario.age()).into()),
            ("gender", scenario.gender().code().into()),
            ("first_name", demo.first_name.into()),
            ("middle_name", demo.middle_name.into()),
            ("last_name", demo.last_name.into()),
            ("addr1", demo.addr1.into()),
            ("city", demo.city.into()),
            ("state", demo.state.into()),
            ("zip", demo.zip.into()),
            ("ssn", demo.ssn.into()),
            ("hic", demo.hic.into()),
            ("mbi", demo.mbi.into()),
        ];
        for (field, value) in generated {
            if let Some(column) = table.column(field) {
                row.set(column, value);
            }
        }

        self.apply_field_overrides(&mut row, table, &scenario.overrides.fields, true);
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::tests::engine;
    use crate::engine::ScenarioContext;
    use crate::output::CellValue;
    use crate::scenario::{Gender, Scenario};

    #[test]
    fn test_member_rows_are_reproducible() {
        let engine = engine();
        let scenario = Scenario::new("T1").with_age(66).with_gender(Gender::Female);

        let first = engine.generate_member(&mut ScenarioContext::new(&scenario)).unwrap();
        let second = engine.generate_member(&mut ScenarioContext::new(&scenario)).unwrap();
        assert_eq!(first, second);

        assert_eq!(first.table, "PSA_MEMBER_IN");
        assert_eq!(first.get("MEM_NBR"), Some(&CellValue::from("T1")));
        assert_eq!(first.get("MEM_DOB").unwrap().to_string(), "1960-06-15");
        assert_eq!(first.get("MEM_GENDER"), Some(&CellValue::from("F")));
    }

    #[test]
    fn test_overrides_replace_generated_values() {
        let engine = engine();
        let mut scenario = Scenario::new("T2");
        scenario.overrides.set_field("MEM_LNAME", "Doe");
        scenario.overrides.set_field("city", "Boston");
        scenario.overrides.set_field("MEM_NBR", "ignored");
        scenario.overrides.set_field("CE", "1");

        let row = engine.generate_member(&mut ScenarioContext::new(&scenario)).unwrap();
        assert_eq!(row.get("MEM_LNAME"), Some(&CellValue::from("Doe")));
        assert_eq!(row.get("MEM_CITY"), Some(&CellValue::from("Boston")));
        assert_eq!(row.get("MEM_NBR"), Some(&CellValue::from("T2")));
        assert!(!row.contains("CE"));
    }
}
