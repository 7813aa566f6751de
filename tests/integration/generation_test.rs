use std::collections::BTreeMap;

use measure_mockup::config::{Component, GenerationConfig, MeasureConfig};
use measure_mockup::engine::{MockupEngine, NoopObserver};
use measure_mockup::output::{CellValue, OutputStore};
use measure_mockup::parser::{ParseContext, parse_scenarios};
use measure_mockup::scenario::Scenario;
use measure_mockup::schema::{SchemaConfig, SchemaMapper};
use measure_mockup::workbook::{Sheet, Workbook};

fn wcc_measure() -> MeasureConfig {
    MeasureConfig::new("WCC")
        .with_numerator(Component::new("Outpatient Visit").with_table("visit").with_count(2, 14))
        .with_numerator(Component::new("BMI Percentile").with_table("emr").with_code("3008F"))
        .with_exclusion(Component::new("Hospice"))
        .with_exclusion(Component::new("Pregnancy"))
}

fn engine(measure: MeasureConfig) -> MockupEngine {
    let schema = SchemaMapper::new(SchemaConfig::default_template(), &measure.measure_name);
    MockupEngine::new(measure, schema, GenerationConfig::default())
}

fn standard_workbook() -> Workbook {
    Workbook::from_sheets(vec![Sheet::new(
        "WCC_STANDARD",
        vec![
            vec![
                "MEMBER_ID",
                "AGE",
                "GENDER",
                "PRODUCT_LINE",
                "ENROLLMENT_1_START",
                "ENROLLMENT_1_END",
                "EVENT_1_NAME",
                "EVENT_1_VALUE",
                "EVENT_1_DATE",
                "EVENT_2_NAME",
                "EVENT_2_VALUE",
                "EXCLUSION_1_NAME",
                "EXCLUSION_1_VALUE",
            ],
            vec![
                "W1", "10", "F", "Medicaid", "1/1/MY", "12/31/MY", "Outpatient Visit", "Y", "3/1/MY",
                "BMI Percentile", "1", "", "",
            ],
            vec![
                "W2", "12", "M", "Commercial", "1/1/MY", "", "", "", "", "", "", "Pregnancy", "excluded",
            ],
        ],
    )])
}

#[test]
fn test_composite_event_rows_are_separated() {
    let measure = wcc_measure();
    let config = GenerationConfig::default();
    let profiles = BTreeMap::new();
    let scenarios = parse_scenarios(
        &standard_workbook(),
        &ParseContext::new(&measure, &config, &profiles),
    )
    .unwrap();
    assert_eq!(scenarios.len(), 2);

    let engine = engine(measure.clone());
    let mut store = OutputStore::new();
    engine.generate_all(&scenarios, &mut store, &mut NoopObserver).unwrap();

    // One default visit plus two occurrences of the composite
    let visits: Vec<_> = store
        .rows("WCC_VISIT_IN")
        .iter()
        .filter(|row| row.get("MEM_NBR") == Some(&CellValue::from("W1")))
        .collect();
    assert_eq!(visits.len(), 3);

    let composite_dates: Vec<String> = visits[1..]
        .iter()
        .map(|row| row.get("SERV_DT").unwrap().to_string())
        .collect();
    assert_eq!(composite_dates, vec!["2026-03-01", "2026-03-15"]);

    let emr = store.rows("WCC_EMR_IN");
    assert_eq!(emr.len(), 1);
    assert_eq!(emr[0].get("EMR_CODE"), Some(&CellValue::from("3008F")));
    assert_eq!(emr[0].get("BMI_PERCENTILE"), Some(&CellValue::from("85")));
}

#[test]
fn test_exclusion_and_enrollment_from_standard_rows() {
    let measure = wcc_measure();
    let config = GenerationConfig::default();
    let profiles = BTreeMap::new();
    let scenarios = parse_scenarios(
        &standard_workbook(),
        &ParseContext::new(&measure, &config, &profiles),
    )
    .unwrap();

    let engine = engine(measure.clone());
    let mut store = OutputStore::new();
    engine.generate_all(&scenarios, &mut store, &mut NoopObserver).unwrap();

    let w2_enrollment = store
        .rows("WCC_ENROLLMENT_IN")
        .iter()
        .find(|row| row.get("MEM_NBR") == Some(&CellValue::from("W2")))
        .unwrap();
    assert_eq!(w2_enrollment.get("ENR_END").unwrap().to_string(), "2026-12-31");
    assert_eq!(w2_enrollment.get("PRODUCT_ID"), Some(&CellValue::Int(2)));

    let pregnancy = store
        .rows("WCC_VISIT_IN")
        .iter()
        .find(|row| {
            row.get("MEM_NBR") == Some(&CellValue::from("W2"))
                && row.get("DIAG_I_1") == Some(&CellValue::from("O09.212"))
        });
    assert!(pregnancy.is_some());
    assert!(store.rows("WCC_MONTHLY_MEMBERSHIP_IN").is_empty());
}

#[test]
fn test_member_rows_do_not_depend_on_other_scenarios() {
    let measure = wcc_measure();
    let engine = engine(measure);
    let t1 = Scenario::new("T1").with_age(45);

    let mut alone = OutputStore::new();
    engine
        .generate_all(std::slice::from_ref(&t1), &mut alone, &mut NoopObserver)
        .unwrap();

    let mut crowded = OutputStore::new();
    let others = vec![Scenario::new("T0"), t1.clone(), Scenario::new("T2")];
    engine.generate_all(&others, &mut crowded, &mut NoopObserver).unwrap();

    let member = |store: &OutputStore| {
        store
            .rows("WCC_MEMBER_IN")
            .iter()
            .find(|row| row.get("MEM_NBR") == Some(&CellValue::from("T1")))
            .cloned()
            .unwrap()
    };
    assert_eq!(member(&alone), member(&crowded));
}

#[test]
fn test_generation_reports_warnings_to_observer() {
    struct Collect(Vec<String>);

    impl measure_mockup::engine::GenerationObserver for Collect {
        fn on_warning(&mut self, scenario_id: &str, message: &str) {
            self.0.push(format!("{scenario_id}: {message}"));
        }
    }

    let engine = engine(wcc_measure());
    let scenario = Scenario::new("T1").with_compliant("Mystery Event");
    let mut observer = Collect(Vec::new());
    let summary = engine
        .generate_all(&[scenario], &mut OutputStore::new(), &mut observer)
        .unwrap();

    assert_eq!(summary.warnings, 1);
    assert!(observer.0[0].starts_with("T1: No code found for 'Mystery Event'"));
}
