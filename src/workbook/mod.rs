//! In-memory grid view of a spreadsheet
//!
//! Every input (scenario workbooks, code directories) is read into a
//! [`Workbook`]: an ordered list of sheets, each a list of rows of trimmed
//! text cells. Excel-family files are read with calamine; a single CSV file
//! becomes one sheet named after its stem, and a directory of CSV files
//! becomes one sheet per file.

use std::fs;
use std::path::{Path, PathBuf};

use calamine::{Data, Reader, open_workbook_auto};

use crate::error::{MockupError, Result};
use crate::scenario::dates::from_serial;

/// A single sheet of text cells
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sheet {
    /// Sheet name
    pub name: String,
    /// Rows of trimmed cell text
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    /// Create a sheet from rows of string-like values
    pub fn new<S: AsRef<str>>(name: impl Into<String>, rows: Vec<Vec<S>>) -> Self {
        Self {
            name: name.into(),
            rows: rows
                .into_iter()
                .map(|row| {
                    row.iter()
                        .map(|c| {
                            let text: &str = c.as_ref();
                            text.trim().to_string()
                        })
                        .collect()
                })
                .collect(),
        }
    }

    /// Cell text, empty when out of range
    #[must_use]
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map_or("", String::as_str)
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the sheet has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// An ordered collection of sheets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workbook {
    /// Where the workbook was read from
    pub path: Option<PathBuf>,
    /// Sheets in file order
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    /// Build a workbook from in-memory sheets
    #[must_use]
    pub fn from_sheets(sheets: Vec<Sheet>) -> Self {
        Self { path: None, sheets }
    }

    /// Open a workbook from a spreadsheet file, a CSV file, or a directory of CSV files
    pub fn open(path: &Path) -> Result<Self> {
        let sheets = if path.is_dir() {
            read_csv_directory(path)?
        } else if has_extension(path, "csv") {
            vec![read_csv_sheet(path)?]
        } else {
            read_spreadsheet(path)?
        };

        log::debug!("Opened {} with {} sheet(s)", path.display(), sheets.len());

        Ok(Self {
            path: Some(path.to_path_buf()),
            sheets,
        })
    }

    /// Sheet names in order
    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.iter().map(|s| s.name.as_str())
    }

    /// Sheet by exact name
    #[must_use]
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    /// The first sheet, if any
    #[must_use]
    pub fn first_sheet(&self) -> Option<&Sheet> {
        self.sheets.first()
    }

    /// File name of the source, if the workbook was read from disk
    #[must_use]
    pub fn file_name(&self) -> Option<String> {
        self.path
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
}

fn read_spreadsheet(path: &Path) -> Result<Vec<Sheet>> {
    let mut workbook = open_workbook_auto(path)?;
    let mut sheets = Vec::new();

    for name in workbook.sheet_names() {
        let range = match workbook.worksheet_range(&name) {
            Ok(range) => range,
            Err(e) => {
                log::warn!("Skipping unreadable sheet '{name}' in {}: {e}", path.display());
                continue;
            }
        };

        let rows = range
            .rows()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();
        sheets.push(Sheet { name, rows });
    }

    Ok(sheets)
}

/// Render a spreadsheet cell as the text a tester would see
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => String::from(if *b { "TRUE" } else { "FALSE" }),
        Data::DateTime(dt) => from_serial(dt.as_f64())
            .map_or_else(|| dt.as_f64().to_string(), |d| d.format("%m/%d/%Y").to_string()),
    }
}

fn read_csv_sheet(path: &Path) -> Result<Sheet> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|c| c.trim().to_string()).collect());
    }

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(Sheet { name, rows })
}

fn read_csv_directory(dir: &Path) -> Result<Vec<Sheet>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && has_extension(p, "csv"))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(MockupError::invalid_path("No CSV files in directory", dir));
    }

    files.iter().map(|p| read_csv_sheet(p)).collect()
}
