use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sensorbase::api::AppState;
use sensorbase::config::AppConfig;
use sensorbase::detect::DetectionMode;
use sensorbase::pipeline::ScoringOrder;
use sensorbase::query::DEFAULT_RECENT_LIMIT;

#[derive(Parser)]
#[command(
    name = "sensorbase",
    about = "Streaming sensor baselines and batch anomaly scoring",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $SENSORBASE_CONFIG, then ./sensorbase.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Bind address (overrides [server].bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Score one raw batch and write its outputs
    Process {
        /// Object key of the raw CSV, e.g. raw/2024-05-01.csv
        key: String,

        /// Which flaggers to run
        #[arg(long, value_enum)]
        mode: Option<DetectionMode>,

        /// Score before or after folding the batch into the baseline
        #[arg(long, value_enum)]
        order: Option<ScoringOrder>,
    },

    /// Show the current per-channel baseline
    Baseline {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Aggregate anomaly rates across processed batches
    Summary,

    /// List flagged rows from the most recent processed batches
    Recent {
        /// Maximum rows to return
        #[arg(long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,
    },

    /// Validate the configuration and print the effective values
    CheckConfig,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
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
    init_tracing(cli.log_json);

    let mut config = AppConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting sensorbase");
            sensorbase::serve(&config).await?;
        }
        Commands::Process { key, mode, order } => {
            if let Some(mode) = mode {
                config.engine.mode = mode;
            }
            if let Some(order) = order {
                config.engine.scoring_order = order;
            }
            let state = AppState::open(&config)?;
            let summary = tokio::task::spawn_blocking(move || state.processor.process(&key))
                .await?
                .context("batch processing failed")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Baseline { json } => {
            let state = AppState::open(&config)?;
            let report = state.queries.baseline_report()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.channels.is_empty() {
                println!("No baseline recorded yet.");
            } else {
                println!(
                    "{:<16} | {:>12} | {:>12} | {:>12} | Mature",
                    "Channel", "Observations", "Mean", "Std"
                );
                println!("{:-<16}-|-{:->12}-|-{:->12}-|-{:->12}-|-{:-<6}", "", "", "", "", "");
                for (channel, c) in &report.channels {
                    println!(
                        "{:<16} | {:>12} | {:>12.4} | {:>12.4} | {}",
                        channel,
                        c.observations,
                        c.mean,
                        c.std,
                        if c.baseline_mature { "yes" } else { "no" }
                    );
                }
                if let Some(ts) = report.last_updated {
                    println!("\nLast updated: {}", ts.to_rfc3339());
                }
            }
        }
        Commands::Summary => {
            let state = AppState::open(&config)?;
            match state.queries.summary_report()? {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => println!("No processed files yet."),
            }
        }
        Commands::Recent { limit } => {
            let state = AppState::open(&config)?;
            let recent = state.queries.recent_anomalies(limit)?;
            println!("{}", serde_json::to_string_pretty(&recent)?);
        }
        Commands::CheckConfig => {
            let engine = config.engine_config().context("invalid [engine] configuration")?;
            tracing::info!(channels = ?engine.channels(), mode = %engine.mode(), "Configuration valid");
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
