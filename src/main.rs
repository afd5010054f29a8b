use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use healops::config::HealopsConfig;
use healops::event::{Event, EventType};
use serde_json::{Map, Value};

#[derive(Parser)]
#[command(
    name = "healops",
    about = "Self-healing incident orchestration for infrastructure events",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file (overrides HEALOPS_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + orchestrator + monitor)
    Serve {
        /// Bind address (overrides api.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Process one event end to end and print the settled incident as JSON
    Run {
        /// Event type, e.g. service.down
        #[arg(long = "type")]
        event_type: String,

        /// JSON object payload
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Event source label
        #[arg(long, default_value = "cli")]
        source: String,
    },

    /// Print the last audit log records as JSON lines
    TailLog {
        /// Number of records
        #[arg(short, long, default_value = "50")]
        n: usize,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = HealopsConfig::resolve(cli.config.as_deref())?;
    healops::init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.api.bind = bind;
            }
            tracing::info!(bind = %config.api.bind, "starting healops daemon");
            healops::serve(config).await?;
        }
        Commands::Run {
            event_type,
            payload,
            source,
        } => {
            let event_type: EventType = event_type.parse()?;
            let payload: Map<String, Value> =
                serde_json::from_str(&payload).context("--payload must be a JSON object")?;
            let incident = healops::run_once(&config, Event::new(event_type, source, payload)).await?;
            println!("{}", serde_json::to_string_pretty(&incident)?);
        }
        Commands::TailLog { n } => {
            let entries = healops::audit::tail_file(&config.logging.audit_log_path, n).await?;
            for entry in entries {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
