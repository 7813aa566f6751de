//! Locating and reading the code directory inside a workbook
//!
//! Code directories arrive in many layouts: the directory sheet may sit
//! anywhere in the workbook and its header row may be preceded by title
//! rows. Sheets whose names suggest a directory are tried first, then every
//! other sheet; within a sheet the first rows are scanned for a header with
//! both a value-set-name column and a code column.

use chrono::NaiveDate;
use itertools::Itertools;

use super::CodeEntry;
use crate::error::{MockupError, Result};
use crate::scenario::dates::parse_calendar_date;
use crate::workbook::{Sheet, Workbook};

/// Canonical value set name column
pub const VALUE_SET_NAME: &str = "Value Set Name";
/// Canonical code column
pub const CODE: &str = "Code";
/// Canonical code system column
pub const CODE_SYSTEM: &str = "Code System";
/// Canonical effective date column
pub const EFFECTIVE_DATE: &str = "Effective Date";
/// Canonical expiration date column
pub const EXPIRATION_DATE: &str = "Expiration Date";

/// Sheet names that usually hold the directory
const PREFERRED_SHEETS: &[&str] = &["value set directory", "value sets", "codes", "measures"];

/// Column positions of the canonical columns in a directory sheet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderLayout {
    /// Row index of the header
    pub header_row: usize,
    /// Value set name column
    pub name: usize,
    /// Code column
    pub code: usize,
    /// Code system column
    pub system: Option<usize>,
    /// Effective date column
    pub effective: Option<usize>,
    /// Expiration date column
    pub expiration: Option<usize>,
}

/// Map a raw header to its canonical column name
#[must_use]
pub fn normalize_header(raw: &str) -> Option<&'static str> {
    let h = raw.trim().to_lowercase();
    if h.contains("value set name") || h.contains("valueset name") {
        Some(VALUE_SET_NAME)
    } else if (h.contains("value set") || h.contains("valueset"))
        && !h.contains("oid")
        && !h.contains("version")
    {
        Some(VALUE_SET_NAME)
    } else if h.contains("code system") || h.contains("codesystem") {
        if h.contains("version") || h.contains("oid") {
            None
        } else {
            Some(CODE_SYSTEM)
        }
    } else if h == "code" || h == "codes" || h == "code value" {
        Some(CODE)
    } else if h.contains("effective") {
        Some(EFFECTIVE_DATE)
    } else if h.contains("expiration") || h.contains("expiry") {
        Some(EXPIRATION_DATE)
    } else {
        None
    }
}

fn header_layout(row: &[String], header_row: usize) -> Option<HeaderLayout> {
    let mut name = None;
    let mut code = None;
    let mut system = None;
    let mut effective = None;
    let mut expiration = None;

    // First occurrence of each canonical column wins
    for (idx, cell) in row.iter().enumerate() {
        let slot = match normalize_header(cell) {
            Some(VALUE_SET_NAME) => &mut name,
            Some(CODE) => &mut code,
            Some(CODE_SYSTEM) => &mut system,
            Some(EFFECTIVE_DATE) => &mut effective,
            Some(EXPIRATION_DATE) => &mut expiration,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(idx);
        }
    }

    Some(HeaderLayout {
        header_row,
        name: name?,
        code: code?,
        system,
        effective,
        expiration,
    })
}

/// Find the header row of a directory sheet within the first `scan_rows` rows
#[must_use]
pub fn find_header(sheet: &Sheet, scan_rows: usize) -> Option<HeaderLayout> {
    sheet
        .rows
        .iter()
        .take(scan_rows)
        .enumerate()
        .find_map(|(idx, row)| header_layout(row, idx))
}

/// Read every code entry from the first sheet that looks like a directory
pub fn read_entries(workbook: &Workbook, scan_rows: usize) -> Result<Vec<CodeEntry>> {
    let ordered = workbook
        .sheets
        .iter()
        .sorted_by_key(|sheet| {
            let lower = sheet.name.to_lowercase();
            !PREFERRED_SHEETS.iter().any(|p| lower.contains(p))
        });

    for sheet in ordered {
        if let Some(layout) = find_header(sheet, scan_rows) {
            log::info!(
                "Discovered code directory in sheet '{}' (header row {})",
                sheet.name,
                layout.header_row + 1
            );
            return Ok(entries_from_sheet(sheet, &layout));
        }
    }

    Err(MockupError::CodeDirectory(format!(
        "No sheet with value set and code columns in {}",
        workbook.file_name().unwrap_or_else(|| "workbook".to_string())
    )))
}

fn entries_from_sheet(sheet: &Sheet, layout: &HeaderLayout) -> Vec<CodeEntry> {
    let optional = |row: usize, col: Option<usize>| -> Option<String> {
        col.map(|c| sheet.cell(row, c).to_string())
            .filter(|s| !s.is_empty())
    };
    let date = |row: usize, col: Option<usize>| -> Option<NaiveDate> {
        optional(row, col).and_then(|s| parse_calendar_date(&s))
    };

    (layout.header_row + 1..sheet.len())
        .filter_map(|row| {
            let value_set = sheet.cell(row, layout.name);
            let code = sheet.cell(row, layout.code);
            if value_set.is_empty() || code.is_empty() {
                return None;
            }
            Some(CodeEntry {
                value_set: value_set.to_string(),
                code: code.to_string(),
                system: optional(row, layout.system),
                effective: date(row, layout.effective),
                expiration: date(row, layout.expiration),
            })
        })
        .collect()
}
