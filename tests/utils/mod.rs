use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use measure_mockup::pipeline::RunPaths;

/// PSA measure with a lab numerator and two exclusions
pub const PSA_MEASURE: &str = "\
measure_name: PSA
age_range: [50, 70]
rules:
  clinical_events:
    numerator_components:
      - name: PSA Test
        table: PSA_LAB_IN
        value_set_names: [PSA Lab Test]
  exclusions:
    - name: Hospice
    - name: Prostate Cancer
      value_set_names: [Prostate Cancer]
";

/// Free-text tester sheet: one compliant member, one in hospice
pub const PSA_SCENARIOS: &str = "\
#TC,Scenario,Expected Result
T1,Male member age 66 with PSA Test,Compliant
T2,Member age 68 NE: Hospice,Excluded
";

/// Code directory with one expired code
pub const PSA_CODES: &str = "\
Value Set Name,Code,Code System,Effective Date,Expiration Date
PSA Lab Test,84153,CPT,,
PSA Lab Test,84154,CPT,,12/31/2020
Prostate Cancer,C61,ICD10CM,,
General Medical Exam,Z00.00,ICD10CM,,
";

/// Write a fixture file and return its path
pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

/// Write the PSA fixtures into `dir` and return the run paths
#[must_use]
pub fn psa_fixture(dir: &Path) -> RunPaths {
    let measure = write_file(dir, "PSA.yaml", PSA_MEASURE);
    let scenarios = write_file(dir, "PSA_TestCase.csv", PSA_SCENARIOS);
    let codes = write_file(dir, "codes.csv", PSA_CODES);
    RunPaths::new(scenarios, measure, dir.join("output")).with_codes(codes)
}

/// Read a written CSV table into column maps
#[must_use]
pub fn read_csv_table(path: &Path) -> Vec<BTreeMap<String, String>> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers = reader.headers().unwrap().clone();
    reader
        .records()
        .map(|record| {
            let record = record.unwrap();
            headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect()
        })
        .collect()
}
