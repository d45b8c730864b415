use std::path::Path;

use anyhow::{Context, Result};

use crate::table::SCHEMA;

pub const SYSTEM_PROMPT: &str = "You are an expert Python developer.";

/// Upper bound on the PDF text excerpt embedded in a prompt.
const MAX_PDF_EXCERPT_CHARS: usize = 4000;

/// Raw reference rows shown to the model.
const MAX_CSV_SAMPLE_LINES: usize = 10;

/// Assemble one synthesis request. Pure function of its inputs: the same
/// excerpt, sample and feedback always produce the same prompt. Feedback
/// is empty on the first attempt.
pub fn build_prompt(pdf_excerpt: &str, csv_sample: &str, feedback: &str) -> String {
    let columns = SCHEMA.join(", ");
    let pdf_excerpt = bound_excerpt(pdf_excerpt, MAX_PDF_EXCERPT_CHARS);

    format!(
        "Given a bank statement PDF sample:\n\
        {pdf_excerpt}\n\
        \n\
        Expected CSV schema and sample rows:\n\
        {csv_sample}\n\
        \n\
        Write a Python function\n\
        \n\
        \u{20}   parse(pdf_path: str) -> pandas.DataFrame\n\
        \n\
        returning exactly these columns, in this order:\n\
        [{columns}]\n\
        \n\
        Use pdfplumber to read the PDF. Strip currency symbols and thousands\n\
        separators from numeric fields and convert them to float. Skip fully\n\
        empty rows and repeated header rows.\n\
        \n\
        Previous feedback/errors:\n\
        {feedback}\n\
        \n\
        Return valid Python code only.\n"
    )
}

/// First lines of the reference CSV, raw, bounded.
pub fn csv_sample(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .take(MAX_CSV_SAMPLE_LINES)
        .collect::<Vec<_>>()
        .join("\n"))
}

fn bound_excerpt(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}\n[truncated, {total} chars total]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_enumerates_schema_in_order() {
        let p = build_prompt("pdf text", "Date,Description", "");
        assert!(p.contains("[Date, Description, Debit Amt, Credit Amt, Balance]"));
    }

    #[test]
    fn test_prompt_includes_feedback_and_inputs() {
        let p = build_prompt("STATEMENT TEXT", "Date,Balance\n01/01/24,950.0", "row 0 differs");
        assert!(p.contains("STATEMENT TEXT"));
        assert!(p.contains("01/01/24,950.0"));
        assert!(p.contains("row 0 differs"));
        assert!(p.contains("Return valid Python code only."));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let a = build_prompt("x", "y", "z");
        let b = build_prompt("x", "y", "z");
        assert_eq!(a, b);
    }

    #[test]
    fn test_long_pdf_excerpt_is_truncated() {
        let long = "a".repeat(10_000);
        let p = build_prompt(&long, "", "");
        assert!(p.contains("[truncated, 10000 chars total]"));
        assert!(p.len() < long.len());
    }

    #[test]
    fn test_csv_sample_is_line_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.csv");
        let mut body = String::from("Date,Balance\n");
        for i in 0..50 {
            body.push_str(&format!("01/0{}/24,{}\n", i % 9 + 1, i));
        }
        std::fs::write(&path, body).unwrap();

        let sample = csv_sample(&path).unwrap();
        assert_eq!(sample.lines().count(), 10);
        assert!(sample.starts_with("Date,Balance"));
    }
}
