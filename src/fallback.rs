use anyhow::{Context, Result};
use tracing::info;

use crate::paths::BankPaths;

/// Deterministic, hand-authored parser used when synthesis never
/// converges. It loads and runs on any readable PDF; it is not guaranteed
/// to match the reference.
pub const FALLBACK_SOURCE: &str = r#"import pdfplumber
import pandas as pd


def parse(pdf_path: str) -> pd.DataFrame:
    rows = []
    with pdfplumber.open(pdf_path) as pdf:
        for page in pdf.pages:
            for table in page.extract_tables():
                if not table:
                    continue
                header, *body = table
                for row in body:
                    if not any(cell and cell.strip() for cell in row):
                        continue
                    row = list(row)
                    while len(row) < 5:
                        row.append(None)
                    date, desc, debit, credit, balance = row[:5]

                    def clean(val):
                        if val is None:
                            return None
                        try:
                            return float(str(val).replace(",", "").replace("₹", ""))
                        except ValueError:
                            return None

                    rows.append([date, desc, clean(debit), clean(credit), clean(balance)])
    return pd.DataFrame(
        rows, columns=["Date", "Description", "Debit Amt", "Credit Amt", "Balance"]
    )
"#;

/// Overwrite the Candidate Artifact with the fallback routine.
pub fn write_fallback(paths: &BankPaths) -> Result<()> {
    paths.ensure_parser_dir()?;
    std::fs::write(&paths.parser_file, FALLBACK_SOURCE)
        .with_context(|| format!("failed to write {}", paths.parser_file.display()))?;
    info!(parser = %paths.parser_file.display(), "Fallback parser written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::SCHEMA;

    #[test]
    fn test_fallback_defines_parse_over_schema() {
        assert!(FALLBACK_SOURCE.contains("def parse(pdf_path: str) -> pd.DataFrame:"));
        for column in SCHEMA {
            assert!(FALLBACK_SOURCE.contains(&format!("\"{column}\"")));
        }
    }
}
