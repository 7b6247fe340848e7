//! Plain-text rendering of validation results.

use std::borrow::Cow;
use std::fmt::Write as _;

use itertools::Itertools;

use crate::{
    reconcile::{ReconcileReport, RecordOutcome},
    validate::{Assertion, ValidationReport},
};

const ASSERTION_HEADERS: [&str; 5] = ["path", "target", "result", "expected", "actual"];
/// Cells are cut to this many characters so one large container does not
/// push every other column off screen.
const MAX_CELL_WIDTH: usize = 48;

/// Renders one row per assertion, in validation order.
pub fn render_validation(report: &ValidationReport, failures_only: bool) -> String {
    let rows = report
        .assertions()
        .iter()
        .filter(|assertion| !failures_only || !assertion.passed())
        .map(assertion_row)
        .collect::<Vec<_>>();
    let mut output = render_table(&ASSERTION_HEADERS, &rows);
    let _ = writeln!(
        output,
        "{} assertion(s), {} failed",
        report.len(),
        report.failure_count()
    );
    output
}

pub fn render_reconcile(report: &ReconcileReport, failures_only: bool) -> String {
    let mut output = String::new();
    for outcome in &report.records {
        if failures_only && outcome.passed() {
            continue;
        }
        let _ = writeln!(output, "== {} ==", outcome.label());
        match &outcome.report {
            Some(validation) => output.push_str(&render_validation(validation, failures_only)),
            None => output.push_str("not retrieved from the store\n"),
        }
    }
    let _ = writeln!(output, "{}", summary_line(report));
    output
}

pub fn summary_line(report: &ReconcileReport) -> String {
    let failed = report
        .records
        .iter()
        .filter(|outcome| !outcome.passed())
        .map(RecordOutcome::label)
        .collect::<Vec<_>>();
    if failed.is_empty() {
        format!(
            "PASS: {} record(s) verified",
            report.records.len()
        )
    } else {
        format!(
            "FAIL: {} of {} record(s) failed ({} assertion failure(s)): {}",
            failed.len(),
            report.records.len(),
            report.failure_count(),
            failed.iter().join(", ")
        )
    }
}

fn assertion_row(assertion: &Assertion) -> Vec<String> {
    let result = match assertion.reason() {
        None => "PASS".to_string(),
        Some(reason) => format!("FAIL ({reason})"),
    };
    vec![
        assertion.path.clone(),
        assertion.target_key.clone(),
        result,
        assertion.expected.to_string(),
        assertion.actual.to_string(),
    ]
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let cells = rows
        .iter()
        .map(|row| row.iter().map(|cell| clip_cell(cell)).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    let mut widths = headers
        .iter()
        .map(|h| h.chars().count().max(3))
        .collect::<Vec<_>>();
    for row in &cells {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(cell.chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers.iter().copied(), &widths));
    let separator = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(
        output,
        "{}",
        format_row(separator.iter().map(String::as_str), &widths)
    );
    for row in &cells {
        let _ = writeln!(
            output,
            "{}",
            format_row(row.iter().map(|cell| &**cell), &widths)
        );
    }
    output
}

fn format_row<'a>(values: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let line = values
        .zip(widths)
        .map(|(value, &width)| format!("{value:<width$}"))
        .join("  ");
    line.trim_end().to_string()
}

fn clip_cell(value: &str) -> Cow<'_, str> {
    let flat: Cow<'_, str> = if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    };
    if flat.chars().count() <= MAX_CELL_WIDTH {
        return flat;
    }
    let mut clipped = flat.chars().take(MAX_CELL_WIDTH - 3).collect::<String>();
    clipped.push_str("...");
    Cow::Owned(clipped)
}
