//! Writing the output store to Parquet and CSV files
//!
//! Every table becomes one file per format. All columns are written as
//! nullable Utf8; the column order follows the master schema when one is
//! known for the table, followed by any other columns in first-seen order.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rayon::prelude::*;

use super::{GeneratedRow, OutputStore};
use crate::error::util::ensure_output_directory;
use crate::error::{MockupError, Result};

/// Output file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Parquet only
    #[default]
    Parquet,
    /// CSV only
    Csv,
    /// Parquet and CSV
    Both,
}

impl OutputFormat {
    const fn parquet(self) -> bool {
        matches!(self, Self::Parquet | Self::Both)
    }

    const fn csv(self) -> bool {
        matches!(self, Self::Csv | Self::Both)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parquet => f.write_str("parquet"),
            Self::Csv => f.write_str("csv"),
            Self::Both => f.write_str("both"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = MockupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parquet" => Ok(Self::Parquet),
            "csv" => Ok(Self::Csv),
            "both" => Ok(Self::Both),
            other => Err(MockupError::config(format!("unknown output format '{other}'"))),
        }
    }
}

/// Writes an [`OutputStore`] to a directory
#[derive(Debug, Clone)]
pub struct OutputWriter {
    directory: PathBuf,
    format: OutputFormat,
    column_orders: BTreeMap<String, Vec<String>>,
}

impl OutputWriter {
    /// Create a writer for a directory
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            format: OutputFormat::default(),
            column_orders: BTreeMap::new(),
        }
    }

    /// Set the output format
    #[must_use]
    pub const fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Set master column orders (physical table name to columns)
    #[must_use]
    pub fn with_column_orders(mut self, orders: BTreeMap<String, Vec<String>>) -> Self {
        self.column_orders = orders;
        self
    }

    /// Output directory
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Final column order for a table
    #[must_use]
    pub fn column_order(&self, table: &str, rows: &[GeneratedRow]) -> Vec<String> {
        let mut order: Vec<String> = self.column_orders.get(table).cloned().unwrap_or_default();
        for row in rows {
            for name in row.column_names() {
                if !order.iter().any(|existing| existing == name) {
                    order.push(name.to_string());
                }
            }
        }
        order
    }

    /// Build a Utf8 record batch for a table
    pub fn to_record_batch(&self, table: &str, rows: &[GeneratedRow]) -> Result<RecordBatch> {
        let columns = self.column_order(table, rows);
        let fields: Vec<Field> = columns
            .iter()
            .map(|name| Field::new(name, DataType::Utf8, true))
            .collect();

        let arrays: Vec<ArrayRef> = columns
            .iter()
            .map(|name| {
                let values: Vec<Option<String>> = rows
                    .iter()
                    .map(|row| row.get(name).and_then(super::CellValue::to_text))
                    .collect();
                Arc::new(StringArray::from(values)) as ArrayRef
            })
            .collect();

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }

    /// Write every table in the store; returns the files written
    pub fn write(&self, store: &OutputStore) -> Result<Vec<PathBuf>> {
        ensure_output_directory(&self.directory)?;

        let tables: Vec<(&str, &[GeneratedRow])> = store.tables().collect();
        let results: Vec<Result<Vec<PathBuf>>> = tables
            .par_iter()
            .map(|(table, rows)| self.write_table(table, rows))
            .collect();

        let mut written = Vec::new();
        for result in results {
            written.extend(result?);
        }
        log::info!(
            "Wrote {} file(s) for {} table(s) to {}",
            written.len(),
            tables.len(),
            self.directory.display()
        );
        Ok(written)
    }

    fn write_table(&self, table: &str, rows: &[GeneratedRow]) -> Result<Vec<PathBuf>> {
        let batch = self.to_record_batch(table, rows)?;
        let mut written = Vec::new();

        if self.format.parquet() {
            let path = self.directory.join(format!("{table}.parquet"));
            write_parquet(&path, &batch)?;
            written.push(path);
        }
        if self.format.csv() {
            let path = self.directory.join(format!("{table}.csv"));
            write_csv(&path, &batch)?;
            written.push(path);
        }

        log::debug!("{table}: {} row(s), {} column(s)", batch.num_rows(), batch.num_columns());
        Ok(written)
    }
}

fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = File::create(path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

fn write_csv(path: &Path, batch: &RecordBatch) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let schema = batch.schema();
    writer.write_record(schema.fields().iter().map(|f| f.name().as_str()))?;

    let columns: Vec<&StringArray> = batch
        .columns()
        .iter()
        .map(|array| {
            array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| MockupError::InvalidOperation("Expected a Utf8 output column".to_string()))
        })
        .collect::<Result<_>>()?;

    for row in 0..batch.num_rows() {
        writer.write_record(columns.iter().map(|column| {
            if column.is_null(row) { "" } else { column.value(row) }
        }))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use arrow::array::Array;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    use super::*;

    fn store() -> OutputStore {
        let mut store = OutputStore::new();
        store.append(GeneratedRow::new("PSA_LAB_IN").with("LAB_CPT", "84153").with("MEM_NBR", "T1"));
        store.append(GeneratedRow::new("PSA_LAB_IN").with("MEM_NBR", "T2").with("EXTRA", 1));
        store
    }

    #[test]
    fn test_master_order_then_first_seen() {
        let mut orders = BTreeMap::new();
        orders.insert(
            "PSA_LAB_IN".to_string(),
            vec!["MEM_NBR".to_string(), "LAB_ID".to_string(), "LAB_CPT".to_string()],
        );
        let writer = OutputWriter::new("unused").with_column_orders(orders);
        let store = store();

        let order = writer.column_order("PSA_LAB_IN", store.rows("PSA_LAB_IN"));
        assert_eq!(order, vec!["MEM_NBR", "LAB_ID", "LAB_CPT", "EXTRA"]);

        let batch = writer.to_record_batch("PSA_LAB_IN", store.rows("PSA_LAB_IN")).unwrap();
        assert_eq!(batch.num_rows(), 2);
        let lab_id = batch.column(1);
        assert_eq!(lab_id.null_count(), 2);
    }

    #[test]
    fn test_writes_parquet_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path().join("out")).with_format(OutputFormat::Both);
        let files = writer.write(&store()).unwrap();
        assert_eq!(files.len(), 2);

        let csv_text = std::fs::read_to_string(dir.path().join("out/PSA_LAB_IN.csv")).unwrap();
        let mut lines = csv_text.lines();
        assert_eq!(lines.next(), Some("LAB_CPT,MEM_NBR,EXTRA"));
        assert_eq!(lines.next(), Some("84153,T1,"));
        assert_eq!(lines.next(), Some(",T2,1"));

        let file = File::open(dir.path().join("out/PSA_LAB_IN.parquet")).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file).unwrap().build().unwrap();
        let rows: usize = reader.map(|batch| batch.unwrap().num_rows()).sum();
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert!("xlsx".parse::<OutputFormat>().is_err());
    }
}
