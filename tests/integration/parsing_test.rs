use std::collections::BTreeMap;
use std::fs;

use chrono::NaiveDate;
use measure_mockup::config::{Component, GenerationConfig, MeasureConfig};
use measure_mockup::parser::{InputFormat, ParseContext, parse_scenarios};
use measure_mockup::scenario::dates::DateResolver;
use measure_mockup::scenario::{Gender, ProductLine};
use measure_mockup::workbook::Workbook;

use crate::utils::write_file;

fn measure() -> MeasureConfig {
    MeasureConfig::new("PSA")
        .with_numerator(Component::new("PSA Test").with_table("lab"))
        .with_exclusion(Component::new("Hospice"))
}

#[test]
fn test_free_text_directory_merges_continuation_rows() {
    let dir = tempfile::tempdir().unwrap();
    let sheets = dir.path().join("sheets");
    fs::create_dir(&sheets).unwrap();
    write_file(
        &sheets,
        "a_psa.csv",
        "#TC,Scenario,Expected Result\nT1,Member with PSA Test,Compliant\n,PL: Medicaid,\n,AG: 40,\n",
    );
    write_file(
        &sheets,
        "b_exclusions.csv",
        "#TC,Scenario\nT2,Female member NE: Hospice\n",
    );

    let workbook = Workbook::open(&sheets).unwrap();
    assert_eq!(InputFormat::detect(&workbook), InputFormat::FreeText);

    let measure = measure();
    let config = GenerationConfig::default();
    let profiles = BTreeMap::new();
    let scenarios = parse_scenarios(&workbook, &ParseContext::new(&measure, &config, &profiles)).unwrap();

    assert_eq!(scenarios.len(), 2);
    let t1 = &scenarios[0];
    assert_eq!(t1.id, "T1");
    assert_eq!(t1.sheet, "a_psa");
    assert_eq!(t1.product_line(), ProductLine::Medicaid);
    assert_eq!(t1.age(), 40);
    assert_eq!(t1.compliant, vec!["PSA Test".to_string()]);

    let t2 = &scenarios[1];
    assert_eq!(t2.sheet, "b_exclusions");
    assert_eq!(t2.gender(), Gender::Female);
    assert_eq!(t2.excluded, vec!["Hospice".to_string()]);
}

#[test]
fn test_standard_csv_is_detected_by_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        dir.path(),
        "scenarios.csv",
        "MEMBER_ID,AGE,GENDER,PRODUCT_LINE,EVENT_1_NAME,EVENT_1_VALUE,EXCLUSION_1_NAME,EXCLUSION_1_VALUE,MEM_LNAME\n\
         S1,55,F,Exchange,psa test,Y,hospice,N,Doe\n\
         S2,61,M,Medicare,,,hospice,1,\n",
    );

    let workbook = Workbook::open(&path).unwrap();
    assert_eq!(InputFormat::detect(&workbook), InputFormat::Standard);

    let measure = measure();
    let config = GenerationConfig::default();
    let profiles = BTreeMap::new();
    let scenarios = parse_scenarios(&workbook, &ParseContext::new(&measure, &config, &profiles)).unwrap();

    assert_eq!(scenarios.len(), 2);
    let s1 = &scenarios[0];
    assert_eq!(s1.age(), 55);
    assert_eq!(s1.product_line(), ProductLine::Exchange);
    assert_eq!(s1.compliant, vec!["PSA Test".to_string()]);
    assert!(s1.excluded.is_empty());
    assert_eq!(s1.overrides.field("MEM_LNAME"), Some("Doe"));

    let s2 = &scenarios[1];
    assert!(s2.compliant.is_empty());
    assert_eq!(s2.excluded, vec!["Hospice".to_string()]);
}

#[test]
fn test_standard_file_name_marker() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "psa_STANDARD.csv", "MEMBER_ID,AGE\nS1,50\n");

    let workbook = Workbook::open(&path).unwrap();
    assert_eq!(InputFormat::detect(&workbook), InputFormat::Standard);
}

#[test]
fn test_measurement_year_tokens() {
    let dates = DateResolver::new(2026);
    let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();

    assert_eq!(dates.parse_date_str("6/15/MY"), date(2026, 6, 15));
    assert_eq!(dates.parse_date_str("12/31/MY-1"), date(2025, 12, 31));
    assert_eq!(dates.parse_date_str("1/1/MY+1"), date(2027, 1, 1));
    assert_eq!(dates.parse_date_str("2026-03-04"), date(2026, 3, 4));
    assert_eq!(dates.parse_date_str("whenever"), date(2026, 1, 1));
    assert_eq!(dates.try_parse("whenever"), None);
    assert_eq!(dates.substitute("MY-2 to MY"), "2024 to 2026");
}

#[test]
fn test_scenarios_serialize_to_json() {
    let workbook = Workbook::from_sheets(vec![measure_mockup::workbook::Sheet::new(
        "PSA",
        vec![vec!["#TC", "Scenario"], vec!["T1", "Male member age 66 with PSA Test"]],
    )]);
    let measure = measure();
    let config = GenerationConfig::default();
    let profiles = BTreeMap::new();
    let scenarios = parse_scenarios(&workbook, &ParseContext::new(&measure, &config, &profiles)).unwrap();

    let json: serde_json::Value = serde_json::to_value(&scenarios).unwrap();
    assert_eq!(json[0]["id"], "T1");
    assert_eq!(json[0]["compliant"][0], "PSA Test");
}
