//! mnemo - conversational memory with retry, integrity checks and fallback.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use mnemo_core::models::{Conversation, DeleteOptions, DeleteScope, SearchQuery};
use mnemo_engine::AppContext;
use mnemo_settings::{load_settings, load_settings_from_path, validate, MnemoSettings};
use mnemo_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "mnemo")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to ~/.mnemo/settings.json)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// SQLite database path, overriding settings
    #[arg(long)]
    db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Health of the primary path, breakers and fallback cache
    Health,

    /// Store a conversation read from a JSON file
    Store {
        #[arg(long)]
        user: String,
        #[arg(long)]
        file: PathBuf,
    },

    /// Build the conversation context for a user
    Context {
        #[arg(long)]
        user: String,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Keyword search over a user's history
    Search {
        #[arg(long)]
        user: String,
        /// Comma-separated keywords
        #[arg(long, value_delimiter = ',')]
        keywords: Vec<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Export everything held about a user
    Export {
        #[arg(long)]
        user: String,
    },

    /// Delete a user's data
    Delete {
        #[arg(long)]
        user: String,
        /// Only conversations and summaries
        #[arg(long)]
        conversations_only: bool,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Reset a breaker or re-initialize the primary path
    Recover { service: String },

    /// Age out backups, quarantine entries and idle cache users
    Maintenance,

    /// Retry, breaker and fallback counters
    Metrics,
}

fn load(cli: &Cli) -> Result<MnemoSettings> {
    let mut settings = match &cli.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => load_settings().context("failed to load settings")?,
    };
    if let Some(db) = &cli.db {
        settings.storage.db_path = db.to_string_lossy().into_owned();
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level = level.clone();
    }
    validate(&settings).context("invalid settings")?;
    Ok(settings)
}

fn print(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    let _telemetry = init_telemetry(TelemetryConfig::from_level_str(
        &settings.logging.level,
        settings.logging.json,
    ));

    let app = AppContext::from_settings(settings).context("failed to build application context")?;
    if !app.start().await {
        tracing::warn!("starting in degraded mode");
    }
    let memory = app.orchestrator();

    match cli.command {
        Commands::Health => {
            let report = memory.health_check().await;
            let integrity = app.storage().detailed_health().await;
            print(&json!({ "service": report, "integrity": integrity }))?;
        }
        Commands::Store { user, file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let conversation: Conversation =
                serde_json::from_str(&raw).with_context(|| format!("{} is not a conversation", file.display()))?;
            let id = conversation.id.to_string();
            let outcome = memory.store_conversation(&user, conversation).await?;
            print(&json!({ "conversation_id": id, "outcome": outcome }))?;
        }
        Commands::Context { user, limit } => {
            print(&memory.retrieve_context(&user, limit).await)?;
        }
        Commands::Search { user, keywords, limit } => {
            let query = SearchQuery {
                limit,
                ..SearchQuery::keywords(keywords)
            };
            print(&memory.search_history(&user, &query).await)?;
        }
        Commands::Export { user } => {
            print(&memory.export_user_data(&user).await?)?;
        }
        Commands::Delete {
            user,
            conversations_only,
            reason,
        } => {
            let options = DeleteOptions {
                scope: if conversations_only {
                    DeleteScope::Conversations
                } else {
                    DeleteScope::AllData
                },
                reason,
                ..DeleteOptions::default()
            };
            let removed = memory.delete_user_data(&user, &options).await?;
            print(&json!({ "user_id": user, "removed": removed }))?;
        }
        Commands::Recover { service } => {
            memory.recover_service(&service).await?;
            print(&json!({ "recovered": service }))?;
        }
        Commands::Maintenance => {
            print(&app.run_maintenance())?;
        }
        Commands::Metrics => {
            print(&memory.service_metrics())?;
        }
    }

    app.shutdown().await?;
    Ok(())
}
