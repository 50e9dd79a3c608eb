//! quorum-pub - Annotation publication service
//!
//! `serve` exposes the HTTP API; `publish` runs one publication in the
//! foreground and prints its outcome.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use quorum_common::events::EventBus;
use quorum_pub::config::{
    resolve_corpus_api_token, resolve_corpus_api_url, PublicationConfig,
    DEFAULT_REQUESTS_PER_SECOND,
};
use quorum_pub::models::AssignmentState;
use quorum_pub::publish::PublicationCoordinator;
use quorum_pub::services::{ArkindexClient, CorpusApi};
use quorum_pub::AppState;

#[derive(Debug, Parser)]
#[command(name = "quorum-pub", version, about = "Publish consolidated annotations to a corpus")]
struct Cli {
    /// Folder holding the database (overrides QUORUM_ROOT_FOLDER and config.toml)
    #[arg(long, global = true)]
    root_folder: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "127.0.0.1:5740")]
        bind: String,
    },
    /// Publish one campaign and wait for the end of the run
    Publish {
        #[arg(long)]
        campaign: Uuid,
        #[arg(long)]
        corpus: String,
        #[arg(long)]
        worker_run: String,
        #[arg(long)]
        provider: String,
        /// Exported assignment state (repeatable)
        #[arg(long = "state", default_values_t = vec!["annotated".to_string(), "validated".to_string()])]
        states: Vec<String>,
        /// Publish tasks again even when already published
        #[arg(long)]
        force: bool,
        /// One record per annotation instead of one per distinct value
        #[arg(long)]
        raw: bool,
        /// Entity form field order, as a JSON list of [entity_type, instruction]
        #[arg(long)]
        entities_order: Option<String>,
        #[arg(long)]
        concatenation_parent_type: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let toml_config = quorum_common::config::load_default_toml_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&toml_config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting quorum-pub");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let root_folder =
        quorum_common::config::resolve_root_folder(cli.root_folder.as_deref(), &toml_config);
    let db_path = quorum_common::config::database_path(&root_folder);
    info!("Database: {}", db_path.display());

    let db_pool = quorum_pub::db::init_database(&db_path).await?;
    info!("Database connection established");

    let api_url = resolve_corpus_api_url(&toml_config)?;
    let token = resolve_corpus_api_token(&db_pool, &toml_config).await?;
    let client: Arc<dyn CorpusApi> = Arc::new(ArkindexClient::new(
        &api_url,
        Some(token),
        toml_config
            .requests_per_second
            .unwrap_or(DEFAULT_REQUESTS_PER_SECOND),
    )?);
    info!("Corpus API: {}", api_url);

    let event_bus = EventBus::new(100);

    match cli.command {
        Command::Serve { bind } => {
            let state = AppState::new(db_pool, event_bus, client);
            let app = quorum_pub::build_router(state);

            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!("Listening on http://{}", bind);
            info!("Health check: http://{}/health", bind);

            axum::serve(listener, app).await?;
        }
        Command::Publish {
            campaign,
            corpus,
            worker_run,
            provider,
            states,
            force,
            raw,
            entities_order,
            concatenation_parent_type,
        } => {
            let exported_states = states
                .iter()
                .map(|s| s.parse::<AssignmentState>().map_err(anyhow::Error::msg))
                .collect::<Result<Vec<_>>>()?;
            let entities_order = match entities_order {
                Some(json) => serde_json::from_str(&json)
                    .context("--entities-order must be a JSON list of [entity_type, instruction]")?,
                None => Vec::new(),
            };

            let config = PublicationConfig {
                corpus,
                worker_run,
                provider,
                exported_states,
                force_republication: force,
                use_raw_publication: raw,
                entities_order,
                concatenation_parent_type,
            };

            let coordinator = PublicationCoordinator::new(db_pool, client, event_bus);
            let report = coordinator.publish(campaign, config).await?;

            println!(
                "Process {}: {} published, {} skipped, {} failed",
                report.process_id, report.published, report.skipped, report.failed
            );
            if let Some(error) = report.error {
                anyhow::bail!("Publication aborted: {}", error);
            }
        }
    }

    Ok(())
}
