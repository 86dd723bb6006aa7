use anyhow::{Context, Result};
use baseline_rs::logging::init_logging;
use baseline_rs::{
    AnomalyService, BaselineConfig, DataPoint, DeleteRequest, TrainingDataRequest, UserToken,
};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::PathBuf;
use tracing::error;

/// Fit statistical baselines and score points against them
#[derive(Debug, Parser)]
#[command(name = "baseline-rs", version, about)]
struct Cli {
    /// Configuration file (defaults to baseline.toml / config/baseline.toml)
    #[arg(short, long, global = true, env = "BASELINE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fit a baseline from a training matrix
    Fit {
        #[arg(long, allow_negative_numbers = true)]
        token: UserToken,
        /// Generated when omitted
        #[arg(long)]
        run_id: Option<String>,
        /// JSON matrix, or @file containing one
        #[arg(long)]
        data: String,
    },
    /// Merge more rows into an existing baseline
    Update {
        #[arg(long, allow_negative_numbers = true)]
        token: UserToken,
        #[arg(long)]
        run_id: String,
        /// JSON matrix, or @file containing one
        #[arg(long)]
        data: String,
    },
    /// Score a point against a baseline
    Detect {
        #[arg(long, allow_negative_numbers = true)]
        token: UserToken,
        #[arg(long)]
        run_id: String,
        /// JSON vector, or @file containing one
        #[arg(long)]
        values: String,
    },
    /// Delete a baseline
    Delete {
        #[arg(long, allow_negative_numbers = true)]
        token: UserToken,
        #[arg(long)]
        run_id: String,
    },
    /// Print a sample configuration file
    SampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::SampleConfig = cli.command {
        println!("{}", BaselineConfig::sample_toml()?);
        return Ok(());
    }

    let config = BaselineConfig::load(cli.config.as_deref())?;
    let _log_guard = init_logging(&config.logging)?;

    let service = AnomalyService::from_config(&config).await?;
    let outcome = run(&service, cli.command).await;
    if let Err(e) = service.close().await {
        error!("Failed to close model store: {}", e);
    }

    println!("{}", serde_json::to_string_pretty(&outcome?)?);
    Ok(())
}

async fn run(service: &AnomalyService, command: Command) -> Result<serde_json::Value> {
    let output = match command {
        Command::Fit {
            token,
            run_id,
            data,
        } => {
            let request = TrainingDataRequest {
                user_token: token,
                run_id,
                training_data: parse_json(&data)?,
            };
            let run_id = service.fit(&request).await?;
            json!({ "message": "Model fitted and saved.", "run_id": run_id })
        }
        Command::Update {
            token,
            run_id,
            data,
        } => {
            let request = TrainingDataRequest {
                user_token: token,
                run_id: Some(run_id),
                training_data: parse_json(&data)?,
            };
            let summary = service.update(&request).await?;
            json!({ "message": "Model updated successfully.", "model": summary })
        }
        Command::Detect {
            token,
            run_id,
            values,
        } => {
            let point = DataPoint {
                user_token: token,
                run_id,
                values: parse_json(&values)?,
            };
            json!({ "result": service.detect(&point).await? })
        }
        Command::Delete { token, run_id } => {
            let request = DeleteRequest {
                user_token: token,
                run_id,
            };
            let deleted = service
                .delete(request.user_token, &request.run_id)
                .await?;
            json!({ "deleted": deleted, "run_id": request.run_id })
        }
        Command::SampleConfig => json!(BaselineConfig::sample_toml()?),
    };
    Ok(output)
}

/// Inline JSON, or `@path` to read it from a file
fn parse_json<T: DeserializeOwned>(arg: &str) -> Result<T> {
    match arg.strip_prefix('@') {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path))?;
            serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path))
        }
        None => serde_json::from_str(arg).context("Invalid JSON argument"),
    }
}
