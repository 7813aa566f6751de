//! Console output utilities
//!
//! Summaries printed by the command line tool after each subcommand.

use std::path::PathBuf;

use crate::codes::CodeResolver;
use crate::engine::GenerationSummary;
use crate::quality::{QualityReport, Severity};

/// Print row counts per table and the files written
pub fn print_generation_summary(summary: &GenerationSummary, files: &[PathBuf]) {
    println!(
        "Generated {} row(s) for {} scenario(s) ({} warning(s))",
        summary.rows, summary.scenarios, summary.warnings
    );
    for (table, rows) in &summary.rows_per_table {
        println!("  - {table}: {rows}");
    }
    if !files.is_empty() {
        println!("Files:");
        for file in files {
            println!("  - {}", file.display());
        }
    }
}

/// Print quality findings, up to `limit` of them
pub fn print_quality_report(report: &QualityReport, limit: usize) {
    if report.is_clean() {
        println!("Quality check passed ({} row(s))", report.rows_checked);
        return;
    }
    println!(
        "Quality check: {} error(s), {} warning(s), {} info",
        report.count(Severity::Error),
        report.count(Severity::Warning),
        report.count(Severity::Info)
    );
    for issue in report.issues.iter().take(limit) {
        println!("  {issue}");
    }
    if report.issues.len() > limit {
        println!("  ... {} more", report.issues.len() - limit);
    }
}

/// Print an overview of a code directory
pub fn print_code_directory(codes: &CodeResolver, sample: usize) {
    println!(
        "{} code(s), {} valid for MY {}, in {} value set(s)",
        codes.len(),
        codes.valid_code_count(),
        codes.year(),
        codes.value_set_names().len()
    );
    for name in codes.value_set_names().iter().take(sample) {
        println!("  - {name} ({} valid)", codes.get_codes(name, true).len());
    }
}
