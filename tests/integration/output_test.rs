use std::fs::File;

use measure_mockup::config::{Component, GenerationConfig, MeasureConfig};
use measure_mockup::engine::{MockupEngine, NoopObserver};
use measure_mockup::output::{GeneratedRow, OutputFormat, OutputStore, OutputWriter};
use measure_mockup::pipeline::write_output;
use measure_mockup::scenario::Scenario;
use measure_mockup::schema::{SchemaConfig, SchemaMapper};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::utils::{read_csv_table, write_file};

fn csv_header(path: &std::path::Path) -> Vec<String> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.headers().unwrap().iter().map(ToString::to_string).collect()
}

#[test]
fn test_master_column_order_from_schema_file() {
    let dir = tempfile::tempdir().unwrap();

    let mut config = SchemaConfig::default_template();
    config.columns.insert(
        "TEMPLATE_LAB_IN".to_string(),
        vec![
            "LAB_ID".to_string(),
            "MEM_NBR".to_string(),
            "LAB_VALUE".to_string(),
            "LAB_CPT".to_string(),
            "LAB_SCR_DT".to_string(),
            "LAB_LOINC".to_string(),
        ],
    );
    let yaml = serde_yaml::to_string(&config).unwrap();
    let schema_path = write_file(dir.path(), "schema.yaml", &yaml);

    let measure = MeasureConfig::new("PSA").with_numerator(Component::new("PSA Test").with_table("lab"));
    let schema = SchemaMapper::new(SchemaConfig::load(&schema_path).unwrap(), "PSA");
    let engine = MockupEngine::new(measure, schema.clone(), GenerationConfig::default());

    let mut store = OutputStore::new();
    engine
        .generate_all(&[Scenario::new("T1").with_compliant("PSA Test")], &mut store, &mut NoopObserver)
        .unwrap();

    let output = dir.path().join("out");
    let files = write_output(&store, &schema, &output, OutputFormat::Csv).unwrap();
    assert!(files.iter().all(|f| f.extension().is_some_and(|e| e == "csv")));

    let lab = output.join("PSA_LAB_IN.csv");
    assert_eq!(
        csv_header(&lab),
        vec!["LAB_ID", "MEM_NBR", "LAB_VALUE", "LAB_CPT", "LAB_SCR_DT", "LAB_LOINC"]
    );

    // Master columns with no value are written empty
    let rows = read_csv_table(&lab);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["LAB_LOINC"], "");
    assert_eq!(rows[0]["LAB_VALUE"], "1.0");
}

#[test]
fn test_extra_columns_follow_master_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = OutputStore::new();
    store.append(
        GeneratedRow::new("X_IN")
            .with("EXTRA", "e")
            .with("B", "b")
            .with("A", 1_i64),
    );
    store.append(GeneratedRow::new("X_IN").with("A", 2_i64).with("LATE", "l"));

    let mut orders = std::collections::BTreeMap::new();
    orders.insert("X_IN".to_string(), vec!["A".to_string(), "B".to_string()]);
    OutputWriter::new(dir.path())
        .with_format(OutputFormat::Csv)
        .with_column_orders(orders)
        .write(&store)
        .unwrap();

    let path = dir.path().join("X_IN.csv");
    assert_eq!(csv_header(&path), vec!["A", "B", "EXTRA", "LATE"]);

    let rows = read_csv_table(&path);
    assert_eq!(rows[1]["A"], "2");
    assert_eq!(rows[1]["B"], "");
    assert_eq!(rows[0]["LATE"], "");
}

#[test]
fn test_parquet_columns_are_nullable_text() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = OutputStore::new();
    store.append(GeneratedRow::new("T_IN").with("ID", "a").with("N", 3_i64));
    store.append(GeneratedRow::new("T_IN").with("ID", "b"));

    let files = OutputWriter::new(dir.path()).write(&store).unwrap();
    assert_eq!(files, vec![dir.path().join("T_IN.parquet")]);

    let file = File::open(&files[0]).unwrap();
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
    let schema = builder.schema().clone();
    assert_eq!(schema.fields().len(), 2);
    for field in schema.fields() {
        assert_eq!(field.data_type(), &arrow::datatypes::DataType::Utf8);
        assert!(field.is_nullable());
    }

    let batches: Vec<_> = builder.build().unwrap().map(Result::unwrap).collect();
    let rows: usize = batches.iter().map(arrow::record_batch::RecordBatch::num_rows).sum();
    assert_eq!(rows, 2);
    assert_eq!(batches[0].column(1).null_count(), 1);
}

#[test]
fn test_output_format_parsing() {
    assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
    assert_eq!(" both ".parse::<OutputFormat>().unwrap(), OutputFormat::Both);
    assert!("xlsx".parse::<OutputFormat>().is_err());
}
