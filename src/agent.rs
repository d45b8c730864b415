use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::fallback;
use crate::feedback;
use crate::llm::{self, LlmClient};
use crate::paths::BankPaths;
use crate::prompt;
use crate::py::PyHost;
use crate::table::Table;
use crate::validate::{self, summarize, ValidationResult};

/// Pages of PDF text shown to the model.
const EXCERPT_PAGES: usize = 2;

pub struct AgentConfig {
    pub max_attempts: u32,
    pub attempt_pause: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_pause: Duration::from_secs(1),
        }
    }
}

/// Audit trail of one attempt: which artifact ran, how it fared.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub index: u32,
    pub artifact_hash: String,
    pub outcome: String,
}

/// Terminal state of one run.
#[derive(Debug)]
pub struct RunReport {
    pub passed: bool,
    pub via_fallback: bool,
    pub passed_attempt: Option<u32>,
    pub attempts: Vec<AttemptRecord>,
    pub last_result: Option<ValidationResult>,
}

/// What the repair loop drives: one synthesis attempt (prompt → generate →
/// persist → validate) and the one-shot fallback. The live implementation
/// talks to the LLM and the Python host; tests script the outcomes.
trait AttemptRunner {
    async fn synthesis(
        &mut self,
        attempt: u32,
        feedback: &str,
    ) -> Result<(AttemptRecord, ValidationResult)>;

    async fn fallback(&mut self) -> Result<(AttemptRecord, ValidationResult)>;
}

/// The repair loop itself. Owns the attempt counter and the feedback
/// string: at most `max_attempts` synthesis attempts, then exactly one
/// fallback validation, terminal either way. An `Err` from a synthesis
/// attempt (transport failure, unwritable artifact) consumes the attempt
/// and its text becomes the next prompt's feedback.
async fn drive<R: AttemptRunner>(runner: &mut R, config: &AgentConfig) -> Result<RunReport> {
    // Only the most recent outcome is carried, not the whole history.
    let mut feedback = String::new();
    let mut attempts = Vec::new();
    let mut last_result = None;

    for attempt in 1..=config.max_attempts {
        info!(attempt, "Starting synthesis attempt");

        match runner.synthesis(attempt, &feedback).await {
            Ok((record, result)) => {
                let passed = matches!(result, ValidationResult::Pass);
                attempts.push(record);
                if passed {
                    info!(attempt, "Candidate parser matched the reference dataset");
                    return Ok(RunReport {
                        passed: true,
                        via_fallback: false,
                        passed_attempt: Some(attempt),
                        attempts,
                        last_result: Some(result),
                    });
                }
                feedback = feedback::to_feedback(&result);
                warn!(attempt, "Candidate rejected; feedback carried forward");
                for line in feedback.lines().take(10) {
                    debug!("  │ {line}");
                }
                last_result = Some(result);
            }
            Err(e) => {
                warn!(attempt, error = %format!("{e:#}"), "Attempt failed before validation");
                feedback = format!("{e:#}");
                attempts.push(AttemptRecord {
                    index: attempt,
                    artifact_hash: String::new(),
                    outcome: format!("error: {e:#}"),
                });
            }
        }

        // No pause after the final attempt; the fallback needs no spacing.
        if attempt < config.max_attempts {
            tokio::time::sleep(config.attempt_pause).await;
        }
    }

    warn!("Synthesis attempts exhausted; writing the fallback parser");
    let (record, result) = runner.fallback().await?;
    let passed = matches!(result, ValidationResult::Pass);
    attempts.push(record);
    last_result = Some(result);

    Ok(RunReport {
        passed,
        via_fallback: true,
        passed_attempt: None,
        attempts,
        last_result,
    })
}

/// The repair loop controller wired to the real collaborators.
pub struct Agent {
    llm: LlmClient,
    host: PyHost,
    paths: BankPaths,
    config: AgentConfig,
}

impl Agent {
    pub fn new(llm: LlmClient, host: PyHost, paths: BankPaths) -> Self {
        Self {
            llm,
            host,
            paths,
            config: AgentConfig::default(),
        }
    }

    pub async fn run(&self, model: &str) -> Result<RunReport> {
        let reference = Table::from_csv(&self.paths.reference_csv)
            .context("failed to load the reference dataset")?;
        let pdf_excerpt = self
            .host
            .extract_text(&self.paths.pdf_file, EXCERPT_PAGES)
            .await
            .context("failed to extract text from the sample PDF")?;
        let csv_sample = prompt::csv_sample(&self.paths.reference_csv)?;

        if let Ok(preview) = self
            .host
            .table_preview(&self.paths.pdf_file, EXCERPT_PAGES, 5)
            .await
        {
            debug!("─── PDF Table Preview ───");
            for line in preview.lines() {
                debug!("  │ {line}");
            }
        }

        let mut runner = LiveRunner {
            agent: self,
            model,
            pdf_excerpt,
            csv_sample,
            reference,
        };
        drive(&mut runner, &self.config).await
    }

    async fn run_attempt(
        &self,
        attempt: u32,
        model: &str,
        pdf_excerpt: &str,
        csv_sample: &str,
        feedback: &str,
        reference: &Table,
    ) -> Result<(AttemptRecord, ValidationResult)> {
        let user_prompt = prompt::build_prompt(pdf_excerpt, csv_sample, feedback);
        debug!(attempt, prompt_len = user_prompt.len(), "─── Prompt ───");
        for line in user_prompt.lines().take(40) {
            debug!("  │ {line}");
        }

        let raw = self.llm.generate(&user_prompt, model).await?;
        debug!(attempt, response_len = raw.len(), "─── LLM Response ───");
        for line in raw.lines().take(50) {
            debug!("  │ {line}");
        }

        let code = llm::extract_code(&raw);
        if code.is_empty() {
            bail!("generation service returned no code");
        }

        self.paths.ensure_parser_dir()?;
        std::fs::write(&self.paths.parser_file, &code)
            .with_context(|| format!("failed to write {}", self.paths.parser_file.display()))?;
        let hash = short_hash(&code);
        debug!(attempt, hash = %hash, bytes = code.len(), "Candidate artifact persisted");

        let result = validate::validate(&self.host, &self.paths, reference).await?;
        let record = AttemptRecord {
            index: attempt,
            artifact_hash: hash,
            outcome: summarize(&result),
        };
        Ok((record, result))
    }
}

struct LiveRunner<'a> {
    agent: &'a Agent,
    model: &'a str,
    pdf_excerpt: String,
    csv_sample: String,
    reference: Table,
}

impl AttemptRunner for LiveRunner<'_> {
    async fn synthesis(
        &mut self,
        attempt: u32,
        feedback: &str,
    ) -> Result<(AttemptRecord, ValidationResult)> {
        self.agent
            .run_attempt(
                attempt,
                self.model,
                &self.pdf_excerpt,
                &self.csv_sample,
                feedback,
                &self.reference,
            )
            .await
    }

    async fn fallback(&mut self) -> Result<(AttemptRecord, ValidationResult)> {
        fallback::write_fallback(&self.agent.paths)?;
        let result = validate::validate(&self.agent.host, &self.agent.paths, &self.reference).await?;
        let record = AttemptRecord {
            index: self.agent.config.max_attempts + 1,
            artifact_hash: short_hash(fallback::FALLBACK_SOURCE),
            outcome: summarize(&result),
        };
        Ok((record, result))
    }
}

fn short_hash(source: &str) -> String {
    blake3::hash(source.as_bytes()).to_hex()[..12].to_string()
}
