//! Ferry CLI - drive the bounded scheduler from the command line

mod logging;
mod render;
mod settings;
mod simulate;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ferry_core::application::{FailurePolicy, RetryScope};
use logging::{init_logging, LogFormat};
use settings::Settings;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Bounded concurrent request scheduler", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML)
    #[arg(long, global = true, env = "FERRY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulated multipart upload through one batch
    Simulate {
        /// Number of parts in the initial batch
        #[arg(short, long)]
        units: Option<usize>,

        /// Maximum in-flight requests
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Probability that a single attempt fails (0.0 - 1.0)
        #[arg(short, long)]
        failure_rate: Option<f64>,

        /// Upper bound of the random request latency
        #[arg(long)]
        max_latency_ms: Option<u64>,

        /// Retry budget
        #[arg(short, long)]
        retries: Option<u32>,

        /// Share one retry budget across the whole batch
        #[arg(long)]
        shared_retries: bool,

        /// Keep running queued parts after the first terminal failure
        #[arg(long)]
        drain_all: bool,

        /// Parts to insert while the batch is running
        #[arg(long)]
        insert: Option<usize>,

        /// Show one row per part
        #[arg(long)]
        parts: bool,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective settings as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LogFormat::from_env())?;

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Simulate {
            units,
            concurrency,
            failure_rate,
            max_latency_ms,
            retries,
            shared_retries,
            drain_all,
            insert,
            parts,
            json,
        } => {
            if let Some(units) = units {
                settings.simulation.units = units;
            }
            if let Some(concurrency) = concurrency {
                settings.runner.max_concurrency = concurrency;
            }
            if let Some(rate) = failure_rate {
                settings.simulation.failure_rate = rate;
            }
            if let Some(ms) = max_latency_ms {
                settings.simulation.max_latency_ms = ms;
            }
            if let Some(retries) = retries {
                settings.batch.retries = retries;
            }
            if shared_retries {
                settings.batch.retry_scope = RetryScope::Shared;
            }
            if drain_all {
                settings.batch.on_failure = FailurePolicy::DrainAll;
            }
            if let Some(insert) = insert {
                settings.simulation.insert = insert;
            }
            settings.validate()?;

            info!("Ferry v{} simulating upload", ferry_core::VERSION);
            let summary = simulate::run_simulation(&settings).await?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&summary).context("Failed to encode summary")?
                );
            } else {
                println!("{}", render::render_summary(&summary, parts));
            }

            if !summary.fulfilled {
                bail!("batch {} rejected", summary.batch_id);
            }
        }
        Commands::Config => {
            println!(
                "{}",
                serde_json::to_string_pretty(&settings).context("Failed to encode settings")?
            );
        }
    }

    Ok(())
}
