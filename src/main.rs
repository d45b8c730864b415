mod agent;
mod fallback;
mod feedback;
mod llm;
mod paths;
mod prompt;
mod py;
mod table;
mod validate;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use agent::Agent;
use llm::LlmClient;
use paths::BankPaths;
use py::PyHost;

const PREFERRED_MODELS: &[&str] = &["llama-3.1-8b-instant", "llama-3.3-70b-versatile"];

/// The run did not end with a passing parser: every synthesis attempt
/// and the fallback failed validation, or the run broke down mid-flight.
const EXIT_FAILED: i32 = 1;
/// Startup failure: missing credential, no model, missing input files.
const EXIT_CONFIG: i32 = 2;

#[derive(Parser)]
#[command(
    name = "parseforge",
    about = "Generates, validates and repairs a bank-statement PDF parser"
)]
struct Cli {
    /// Target bank, e.g. icici
    #[arg(long)]
    target: String,

    /// Preferred model id, tried before the built-in preference list
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            EXIT_CONFIG
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let paths = BankPaths::for_target(&cli.target);
    paths.check_inputs()?;

    let client = LlmClient::from_env()?;
    let models = client.list_models().await?;
    info!(count = models.len(), "Available generation models");

    let mut preferred: Vec<String> = Vec::new();
    if let Some(model) = &cli.model {
        preferred.push(model.clone());
    }
    if let Ok(model) = dotenv::var("PARSEFORGE_MODEL") {
        preferred.push(model);
    }
    preferred.extend(PREFERRED_MODELS.iter().map(|m| m.to_string()));

    let Some(model) = llm::select_model(&models, &preferred) else {
        error!("No generation model available");
        return Ok(EXIT_CONFIG);
    };
    info!(model = %model, "Selected generation model");

    let host = PyHost::spawn();
    let agent = Agent::new(client, host, paths);

    // Startup checks are behind us. From here on any error is a run
    // failure, never a config one.
    let outcome = agent.run(&model).await;
    match &outcome {
        Ok(report) => {
            for record in &report.attempts {
                info!(
                    attempt = record.index,
                    hash = %record.artifact_hash,
                    outcome = %record.outcome,
                    "Attempt record"
                );
            }
            if report.passed {
                if report.via_fallback {
                    info!("Fallback parser passed the test");
                } else {
                    info!(
                        attempt = report.passed_attempt.unwrap_or_default(),
                        "Parser passed the test"
                    );
                }
            } else {
                error!("All synthesis attempts and the fallback failed validation");
                if let Some(result) = &report.last_result {
                    error!(outcome = %validate::summarize(result), "Last validation result");
                }
            }
        }
        Err(e) => error!("{e:#}"),
    }
    Ok(exit_code(&outcome))
}

fn exit_code(outcome: &Result<agent::RunReport>) -> i32 {
    match outcome {
        Ok(report) if report.passed => 0,
        _ => EXIT_FAILED,
    }
}
