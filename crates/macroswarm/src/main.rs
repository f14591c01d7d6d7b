use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use macroswarm::agents::RunOutcome;
use macroswarm::daemon::{self, Daemon};
use macroswarm::models::MacroConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "macroswarm", about = "US equity macro regime signal from an agent swarm")]
struct Cli {
    /// Path to configuration file. Built-in defaults are used when it does not exist.
    #[arg(short, long, default_value = "config/macroswarm.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the swarm once and print the report JSON
    Run {
        /// Pretty-print the output JSON
        #[arg(long)]
        pretty: bool,

        /// Also write report.json and a dated archive copy into this directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run now, then daily at the configured UTC time, until Ctrl-C
    Daemon {
        /// Directory for report.json and the dated archive
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print per-method source health from the durable store
    Health {
        /// Trailing window in hours
        #[arg(long, default_value_t = 24)]
        hours: u64,
    },
}

fn init_tracing(json: bool) {
    // Respects RUST_LOG
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = if std::path::Path::new(&cli.config).exists() {
        macroswarm::load_config(&cli.config)?
    } else {
        tracing::info!(path = %cli.config, "Config file not found, using defaults");
        MacroConfig::default()
    };

    let swarm = Arc::new(
        macroswarm::build_swarm(config)
            .await
            .context("Failed to build swarm")?,
    );

    match cli.command {
        Command::Run { pretty, output } => {
            let outcome = daemon::run_and_write(&swarm, output.as_deref()).await;
            swarm.shutdown().await;

            let RunOutcome::Completed(report) = outcome else {
                anyhow::bail!("A run is already in progress");
            };
            let json = if pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            println!("{json}");
        }
        Command::Daemon { output } => {
            let daemon = Daemon::new(swarm, output);
            let cancel = daemon.cancel_token();

            // Handle shutdown signals
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Received shutdown signal");
                cancel.cancel();
            });

            daemon.run().await;
        }
        Command::Health { hours } => {
            let summary = swarm
                .health_summary(Duration::from_secs(hours.saturating_mul(3600)))
                .context("Failed to query health")?;
            swarm.shutdown().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
