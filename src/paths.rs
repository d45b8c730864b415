use std::path::PathBuf;

use anyhow::{bail, Context, Result};

/// All on-disk locations for one target bank.
///
/// The candidate parser file is the hand-off point between the generation
/// side (LLM / fallback) and the validation side; it is overwritten on
/// every attempt.
#[derive(Debug, Clone)]
pub struct BankPaths {
    pub data_dir: PathBuf,
    pub pdf_file: PathBuf,
    pub reference_csv: PathBuf,
    pub output_csv: PathBuf,
    pub parser_file: PathBuf,
}

impl BankPaths {
    pub fn for_target(bank: &str) -> Self {
        let bank = bank.to_lowercase();
        let data_dir = PathBuf::from("data").join(&bank);
        Self {
            pdf_file: data_dir.join(format!("{bank}_sample.pdf")),
            reference_csv: data_dir.join("result.csv"),
            output_csv: data_dir.join("parsed_output.csv"),
            parser_file: PathBuf::from("custom_parsers").join(format!("{bank}_parser.py")),
            data_dir,
        }
    }

    /// Both inputs must exist before any attempt starts.
    pub fn check_inputs(&self) -> Result<()> {
        if !self.data_dir.is_dir() {
            bail!("no data directory at {}", self.data_dir.display());
        }
        if !self.pdf_file.is_file() {
            bail!("sample PDF not found at {}", self.pdf_file.display());
        }
        if !self.reference_csv.is_file() {
            bail!(
                "reference CSV not found at {}",
                self.reference_csv.display()
            );
        }
        Ok(())
    }

    pub fn ensure_parser_dir(&self) -> Result<()> {
        if let Some(dir) = self.parser_file.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
