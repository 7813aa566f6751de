//! Generated rows and the store that collects them
//!
//! The engine appends rows; nothing here merges, deduplicates or reorders
//! them. Column order inside a row is the order columns were first set.

pub mod writer;

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

pub use writer::{OutputFormat, OutputWriter};

/// Format used when a date is rendered as text
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A single output value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    /// Missing value
    Null,
    /// Text
    Text(String),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Calendar date
    Date(NaiveDate),
}

impl CellValue {
    /// Whether the value is null or blank text
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    /// The value as a date, if it is one
    #[must_use]
    pub const fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(date) => Some(*date),
            _ => None,
        }
    }

    /// Text rendering; `None` for null
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Text(text) => f.write_str(text),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Date(date) => write!(f, "{}", date.format(DATE_FORMAT)),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for CellValue {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for CellValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for CellValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

/// One row bound for a physical table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedRow {
    /// Physical table name
    pub table: String,
    columns: Vec<(String, CellValue)>,
}

impl GeneratedRow {
    /// Create an empty row for a table
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
        }
    }

    /// Set a column, keeping its original position when it already exists
    pub fn set(&mut self, column: &str, value: impl Into<CellValue>) {
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| name == column) {
            Some((_, existing)) => *existing = value,
            None => self.columns.push((column.to_string(), value)),
        }
    }

    /// Builder-style [`set`](Self::set)
    #[must_use]
    pub fn with(mut self, column: &str, value: impl Into<CellValue>) -> Self {
        self.set(column, value);
        self
    }

    /// Value of a column
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Whether the row has a column
    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|(name, _)| name == column)
    }

    /// Column names in insertion order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Columns and values in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of columns
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Append-only collection of generated rows, grouped by physical table
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputStore {
    tables: BTreeMap<String, Vec<GeneratedRow>>,
}

impl OutputStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one row
    pub fn append(&mut self, row: GeneratedRow) {
        self.tables.entry(row.table.clone()).or_default().push(row);
    }

    /// Append several rows
    pub fn extend(&mut self, rows: impl IntoIterator<Item = GeneratedRow>) {
        for row in rows {
            self.append(row);
        }
    }

    /// Rows of a table, empty when the table received none
    #[must_use]
    pub fn rows(&self, table: &str) -> &[GeneratedRow] {
        self.tables.get(table).map_or(&[], Vec::as_slice)
    }

    /// Names of tables that received rows
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Tables with their rows
    pub fn tables(&self) -> impl Iterator<Item = (&str, &[GeneratedRow])> {
        self.tables.iter().map(|(name, rows)| (name.as_str(), rows.as_slice()))
    }

    /// Total number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    /// Whether no rows were appended
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
