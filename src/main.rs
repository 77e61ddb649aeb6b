use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "argus",
    about = "API performance sentinel: regression detection and automated root-cause investigation",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (ingestion API + detector + investigation workers)
    Serve {
        /// Bind address override
        #[arg(long)]
        bind: Option<String>,

        /// Database path override
        #[arg(long)]
        db: Option<String>,
    },

    /// Baseline table operations
    Baseline {
        #[command(subcommand)]
        action: BaselineAction,
    },

    /// List recent incidents
    Incidents {
        /// Maximum number to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum BaselineAction {
    /// Recompute the baseline table from the archive right now
    Recompute,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = argus::config::Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind, db } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(db) = db {
                config.server.db_path = db;
            }
            tracing::info!(bind = %config.server.bind, "Starting argus daemon");
            argus::serve(config).await?;
        }
        Commands::Baseline { action } => match action {
            BaselineAction::Recompute => {
                let pool = argus::storage::open_pool(&config.server.db_path)?;
                let archive = argus::storage::archive::ArchiveStore::new(pool);
                let engine = argus::baseline::BaselineEngine::new(
                    archive,
                    config.detection.baseline_days,
                    config.detection.min_slot_samples,
                );
                let slots = engine.recompute(chrono::Utc::now())?;
                println!("Baseline recomputed: {slots} slots");
            }
        },
        Commands::Incidents { limit } => {
            let pool = argus::storage::open_pool(&config.server.db_path)?;
            let manager = argus::detect::incident::IncidentManager::new(pool);
            let incidents = manager.list_recent(limit)?;

            if incidents.is_empty() {
                println!("No incidents recorded.");
            } else {
                println!(
                    "{:<38} | {:<20} | {:<13} | {:<11} | Score",
                    "ID", "Endpoint", "Status", "Trigger"
                );
                println!("{:-<38}-|-{:-<20}-|-{:-<13}-|-{:-<11}-|-{:-<6}", "", "", "", "", "");
                for inc in incidents {
                    println!(
                        "{:<38} | {:<20} | {:<13} | {:<11} | {:.1}",
                        inc.id,
                        inc.endpoint,
                        inc.status.as_str(),
                        inc.trigger_metric.as_str(),
                        inc.anomaly_score
                    );
                }
            }
        }
    }

    Ok(())
}
