use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::paths::BankPaths;
use crate::py::PyHost;
use crate::table::{self, CellDiff, Table};

/// Outcome of grading one Candidate Artifact against the reference.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Pass,
    Fail(Vec<CellDiff>),
    Error(String),
}

/// Execute the candidate parser on disk against the sample PDF and grade
/// its output against the reference dataset. Candidate faults (load
/// failure, runtime raise, non-DataFrame return) become
/// `ValidationResult::Error`; only plumbing failures on our side (missing
/// parser file, unwritable output CSV) surface as `Err`.
pub async fn validate(
    host: &PyHost,
    paths: &BankPaths,
    reference: &Table,
) -> Result<ValidationResult> {
    let source = std::fs::read_to_string(&paths.parser_file)
        .with_context(|| format!("failed to read {}", paths.parser_file.display()))?;

    let parsed = match host.run_parser(&source, &paths.pdf_file).await {
        Ok(table) => table,
        Err(e) => {
            warn!(error = %e, "Candidate execution failed");
            return Ok(ValidationResult::Error(format!("{e:#}")));
        }
    };

    // The raw output is persisted before normalization so a failed run can
    // be inspected exactly as the candidate produced it.
    parsed
        .write_csv(&paths.output_csv)
        .with_context(|| format!("failed to write {}", paths.output_csv.display()))?;

    debug!(
        rows = parsed.rows.len(),
        cols = parsed.columns.len(),
        "─── Parsed Table Preview ───"
    );
    for row in parsed.rows.iter().take(5) {
        debug!("  │ {}", table::render_row(row));
    }

    let expected = table::normalize(reference);
    let actual = table::normalize(&parsed);
    let diffs = table::diff(&expected, &actual);

    if diffs.is_empty() {
        Ok(ValidationResult::Pass)
    } else {
        debug!(count = diffs.len(), "Validation differences");
        Ok(ValidationResult::Fail(diffs))
    }
}

/// One-line summary for attempt records and final reporting.
pub fn summarize(result: &ValidationResult) -> String {
    match result {
        ValidationResult::Pass => "pass".to_string(),
        ValidationResult::Fail(diffs) => format!("fail: {} differing cells", diffs.len()),
        ValidationResult::Error(e) => {
            let line = e.lines().next().unwrap_or("");
            format!("error: {line}")
        }
    }
}
