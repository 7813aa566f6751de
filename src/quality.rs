//! Data quality checks over generated output
//!
//! The checks look for problems a consumer of the mockup would trip over:
//! duplicate member ids, enrollment spans that end before they start, rows
//! missing their key or date, and rows pointing at a member that was never
//! generated. Issues are reported and logged, never fixed; output is written
//! regardless.

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::output::{CellValue, OutputStore};
use crate::schema::{SchemaMapper, TableSchema, tables};

/// How serious a quality issue is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Worth knowing about
    Info,
    /// Likely to confuse a consumer
    Warning,
    /// Output breaks a structural rule
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => f.write_str("info"),
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Kind of quality issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    /// A member id appears in more than one member row
    DuplicateMemberId,
    /// An enrollment row starts after it ends
    EnrollmentDateOrder,
    /// A key or date column is missing or blank
    MissingField,
    /// A row references a member with no member row
    OrphanRow,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateMemberId => f.write_str("duplicate member id"),
            Self::EnrollmentDateOrder => f.write_str("enrollment date order"),
            Self::MissingField => f.write_str("missing field"),
            Self::OrphanRow => f.write_str("orphan row"),
        }
    }
}

/// One quality finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityIssue {
    /// Severity
    pub severity: Severity,
    /// Kind
    pub kind: IssueKind,
    /// Physical table
    pub table: String,
    /// Row position within the table
    pub row: usize,
    /// Description
    pub message: String,
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} row {}: {} ({})",
            self.severity, self.table, self.row, self.message, self.kind
        )
    }
}

/// Result of checking an output store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityReport {
    /// Rows examined
    pub rows_checked: usize,
    /// Findings in check order
    pub issues: Vec<QualityIssue>,
}

impl QualityReport {
    /// Whether nothing was found
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Number of findings of a severity
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    /// Findings of one kind
    pub fn of_kind(&self, kind: IssueKind) -> impl Iterator<Item = &QualityIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }

    /// Log every finding at a level matching its severity
    pub fn log(&self) {
        for issue in &self.issues {
            match issue.severity {
                Severity::Error | Severity::Warning => log::warn!("{issue}"),
                Severity::Info => log::info!("{issue}"),
            }
        }
        log::info!(
            "Quality check of {} row(s): {} error(s), {} warning(s)",
            self.rows_checked,
            self.count(Severity::Error),
            self.count(Severity::Warning)
        );
    }

    fn push(
        &mut self,
        severity: Severity,
        kind: IssueKind,
        table: &str,
        row: usize,
        message: impl Into<String>,
    ) {
        self.issues.push(QualityIssue {
            severity,
            kind,
            table: table.to_string(),
            row,
            message: message.into(),
        });
    }
}

/// Run every check against the store
#[must_use]
pub fn check_output(store: &OutputStore, schema: &SchemaMapper) -> QualityReport {
    let mut report = QualityReport {
        rows_checked: store.len(),
        ..QualityReport::default()
    };

    let member_ids = schema
        .table(tables::MEMBER)
        .map(|member| check_member_ids(store, member, &mut report));

    for table in schema.tables() {
        check_required_fields(store, table, &mut report);
    }

    if let Some(table) = schema.table(tables::ENROLLMENT) {
        check_enrollment_order(store, table, &mut report);
    }

    // Orphans only make sense when member rows were generated at all
    if let Some(member_ids) = member_ids.filter(|ids| !ids.is_empty()) {
        for table in schema.tables().filter(|t| t.key != tables::MEMBER) {
            check_orphans(store, table, &member_ids, &mut report);
        }
    }

    report
}

fn text(value: Option<&CellValue>) -> Option<String> {
    value.filter(|v| !v.is_blank()).and_then(CellValue::to_text)
}

fn check_member_ids(
    store: &OutputStore,
    member: &TableSchema,
    report: &mut QualityReport,
) -> FxHashSet<String> {
    let mut first_seen: FxHashMap<String, usize> = FxHashMap::default();
    for (index, row) in store.rows(&member.name).iter().enumerate() {
        let Some(id) = text(row.get(&member.pk)) else {
            continue;
        };
        if let Some(first) = first_seen.get(&id) {
            report.push(
                Severity::Error,
                IssueKind::DuplicateMemberId,
                &member.name,
                index,
                format!("member id '{id}' already used by row {first}"),
            );
        } else {
            first_seen.insert(id, index);
        }
    }
    first_seen.into_keys().collect()
}

fn check_required_fields(store: &OutputStore, table: &TableSchema, report: &mut QualityReport) {
    let date_column = table.first_column(&["date", "run_date", "start_date"]);
    for (index, row) in store.rows(&table.name).iter().enumerate() {
        if text(row.get(&table.pk)).is_none() {
            report.push(
                Severity::Error,
                IssueKind::MissingField,
                &table.name,
                index,
                format!("primary key {} is empty", table.pk),
            );
        }
        if let Some(column) = date_column {
            if row.get(column).is_none_or(CellValue::is_blank) {
                report.push(
                    Severity::Warning,
                    IssueKind::MissingField,
                    &table.name,
                    index,
                    format!("date column {column} is empty"),
                );
            }
        }
    }
}

fn check_enrollment_order(store: &OutputStore, table: &TableSchema, report: &mut QualityReport) {
    let (Some(start), Some(end)) = (table.column("start_date"), table.column("end_date")) else {
        return;
    };
    for (index, row) in store.rows(&table.name).iter().enumerate() {
        let start_date = row.get(start).and_then(CellValue::as_date);
        let end_date = row.get(end).and_then(CellValue::as_date);
        if let (Some(s), Some(e)) = (start_date, end_date) {
            if s > e {
                report.push(
                    Severity::Warning,
                    IssueKind::EnrollmentDateOrder,
                    &table.name,
                    index,
                    format!("{start} {s} is after {end} {e}"),
                );
            }
        }
    }
}

fn check_orphans(
    store: &OutputStore,
    table: &TableSchema,
    member_ids: &FxHashSet<String>,
    report: &mut QualityReport,
) {
    let column = table.member_column();
    for (index, row) in store.rows(&table.name).iter().enumerate() {
        if let Some(id) = text(row.get(column)) {
            if !member_ids.contains(&id) {
                report.push(
                    Severity::Warning,
                    IssueKind::OrphanRow,
                    &table.name,
                    index,
                    format!("{column} '{id}' has no member row"),
                );
            }
        }
    }
}
