use measure_mockup::engine::NoopObserver;
use measure_mockup::output::OutputFormat;
use measure_mockup::pipeline::GenerationRun;
use measure_mockup::quality::Severity;
use measure_mockup::resources::ResourceManager;
use measure_mockup::GenerationConfig;

use crate::utils::{psa_fixture, read_csv_table};

#[test]
fn test_psa_run_writes_one_lab_row_per_compliant_member() {
    let dir = tempfile::tempdir().unwrap();
    let paths = psa_fixture(dir.path());
    let output = paths.output_dir.clone();

    let run = GenerationRun::new(paths, GenerationConfig::default()).with_format(OutputFormat::Both);
    let report = run.run(&ResourceManager::new(), &mut NoopObserver).unwrap();

    assert_eq!(report.summary.scenarios, 2);
    assert_eq!(report.summary.rows_per_table["PSA_MEMBER_IN"], 2);
    assert_eq!(report.summary.rows_per_table["PSA_LAB_IN"], 1);
    assert_eq!(report.summary.rows_per_table["PSA_MONTHLY_MEMBERSHIP_IN"], 1);
    assert_eq!(report.quality.count(Severity::Error), 0);

    let lab_rows = read_csv_table(&output.join("PSA_LAB_IN.csv"));
    assert_eq!(lab_rows.len(), 1);
    let lab = &lab_rows[0];
    assert_eq!(lab["MEM_NBR"], "T1");
    assert!(lab["LAB_SCR_DT"].starts_with("2026-"));
    // The expired code is never picked
    assert_eq!(lab["LAB_CPT"], "84153");

    assert!(output.join("PSA_LAB_IN.parquet").exists());
    assert!(output.join("PSA_MEMBER_IN.parquet").exists());
    assert!(!output.join("PSA_RX_IN.csv").exists());
}

#[test]
fn test_hospice_member_and_demographics() {
    let dir = tempfile::tempdir().unwrap();
    let paths = psa_fixture(dir.path());
    let output = paths.output_dir.clone();

    GenerationRun::new(paths, GenerationConfig::default())
        .with_format(OutputFormat::Csv)
        .run(&ResourceManager::new(), &mut NoopObserver)
        .unwrap();

    let monthly = read_csv_table(&output.join("PSA_MONTHLY_MEMBERSHIP_IN.csv"));
    assert_eq!(monthly.len(), 1);
    assert_eq!(monthly[0]["MEM_NBR"], "T2");
    assert_eq!(monthly[0]["HOSPICE"], "1");

    let members = read_csv_table(&output.join("PSA_MEMBER_IN.csv"));
    let t1 = members.iter().find(|m| m["MEM_NBR"] == "T1").unwrap();
    assert_eq!(t1["MEM_GENDER"], "M");
    assert_eq!(t1["MEM_DOB"], "1960-06-15");
    assert!(!t1["MEM_LNAME"].is_empty());
}

#[test]
fn test_runs_are_reproducible() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();

    for dir in [&first, &second] {
        let paths = psa_fixture(dir.path());
        GenerationRun::new(paths, GenerationConfig::default())
            .with_format(OutputFormat::Csv)
            .run(&ResourceManager::new(), &mut NoopObserver)
            .unwrap();
    }

    for table in ["PSA_MEMBER_IN.csv", "PSA_VISIT_IN.csv", "PSA_LAB_IN.csv"] {
        let a = std::fs::read_to_string(first.path().join("output").join(table)).unwrap();
        let b = std::fs::read_to_string(second.path().join("output").join(table)).unwrap();
        assert_eq!(a, b, "{table}");
    }
}

#[test]
fn test_missing_measure_config_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let mut paths = psa_fixture(dir.path());
    paths.measure = dir.path().join("missing.yaml");

    let result = GenerationRun::new(paths, GenerationConfig::default())
        .run(&ResourceManager::new(), &mut NoopObserver);
    assert!(result.is_err());
}
