use crate::table::CellDiff;
use crate::validate::ValidationResult;

/// Mismatches listed in full before the diff is cut off.
const MAX_DIFF_ENTRIES: usize = 25;

/// Render the last validation outcome as prompt feedback for the next
/// synthesis attempt. Exception text is passed through verbatim; diffs are
/// rendered and truncated rather than dropped, so a huge mismatch still
/// leaves signal for the model. `Pass` never reaches this function — the
/// loop has already terminated.
pub fn to_feedback(result: &ValidationResult) -> String {
    match result {
        ValidationResult::Pass => String::new(),
        ValidationResult::Error(e) => e.clone(),
        ValidationResult::Fail(diffs) => render_diff(diffs),
    }
}

fn render_diff(diffs: &[CellDiff]) -> String {
    let mut out = format!(
        "Output did not match the reference CSV ({} differing cells):\n",
        diffs.len()
    );
    for d in diffs.iter().take(MAX_DIFF_ENTRIES) {
        out.push_str(&format!(
            "- row {}, column {:?}: expected {}, got {}\n",
            d.row, d.column, d.expected, d.actual
        ));
    }
    if diffs.len() > MAX_DIFF_ENTRIES {
        out.push_str(&format!(
            "… and {} more differing cells\n",
            diffs.len() - MAX_DIFF_ENTRIES
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff_at(row: usize) -> CellDiff {
        CellDiff {
            row,
            column: "Balance".to_string(),
            expected: "950".to_string(),
            actual: "<NA>".to_string(),
        }
    }

    #[test]
    fn test_error_text_passed_verbatim() {
        let result = ValidationResult::Error("NameError: name 'pd' is not defined".to_string());
        assert_eq!(to_feedback(&result), "NameError: name 'pd' is not defined");
    }

    #[test]
    fn test_fail_renders_each_diff() {
        let result = ValidationResult::Fail(vec![diff_at(0), diff_at(3)]);
        let feedback = to_feedback(&result);
        assert!(feedback.contains("2 differing cells"));
        assert!(feedback.contains("row 0, column \"Balance\": expected 950, got <NA>"));
        assert!(feedback.contains("row 3"));
    }

    #[test]
    fn test_long_diff_is_truncated_not_omitted() {
        let diffs: Vec<CellDiff> = (0..100).map(diff_at).collect();
        let feedback = to_feedback(&ValidationResult::Fail(diffs));
        assert!(feedback.contains("100 differing cells"));
        assert!(feedback.contains("row 0"));
        assert!(feedback.contains("… and 75 more differing cells"));
        assert!(!feedback.contains("row 99,"));
    }
}
