//! Configuration for quorum-pub
//!
//! Two concerns live here:
//! - resolving the corpus API connection (Database → ENV → TOML priority)
//! - the per-run publication configuration and its fatal checks

use quorum_common::config::TomlConfig;
use quorum_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PublishError, PublishResult};
use crate::models::{AssignmentState, CampaignMode};
use crate::publish::confidence::PublicationPolicy;

/// Environment variable holding the corpus API token
pub const CORPUS_API_TOKEN_ENV: &str = "QUORUM_CORPUS_API_TOKEN";

/// Environment variable holding the corpus API base URL
pub const CORPUS_API_URL_ENV: &str = "QUORUM_CORPUS_API_URL";

/// Outgoing request budget when none is configured
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 10;

/// Resolve the corpus API token from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML
pub async fn resolve_corpus_api_token(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<String> {
    let mut sources = Vec::new();

    // Tier 1: Database (authoritative)
    let db_token = crate::db::settings::get_corpus_api_token(db).await?;
    if let Some(token) = &db_token {
        if is_valid_token(token) {
            sources.push("database");
        }
    }

    // Tier 2: Environment variable
    let env_token = std::env::var(CORPUS_API_TOKEN_ENV).ok();
    if let Some(token) = &env_token {
        if is_valid_token(token) {
            sources.push("environment");
        }
    }

    // Tier 3: TOML config
    let toml_token = toml_config.corpus_api_token.as_ref();
    if let Some(token) = toml_token {
        if is_valid_token(token) {
            sources.push("TOML");
        }
    }

    if sources.len() > 1 {
        warn!(
            "Corpus API token found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(token) = db_token.filter(|t| is_valid_token(t)) {
        info!("Corpus API token loaded from database");
        return Ok(token);
    }

    if let Some(token) = env_token.filter(|t| is_valid_token(t)) {
        info!("Corpus API token loaded from environment variable");
        return Ok(token);
    }

    if let Some(token) = toml_token.filter(|t| is_valid_token(t)) {
        info!("Corpus API token loaded from TOML config");
        return Ok(token.clone());
    }

    Err(Error::Config(format!(
        "Corpus API token not configured. Please configure using one of:\n\
         1. Database: settings key \"{}\"\n\
         2. Environment: {}=your-token\n\
         3. TOML config: ~/.config/quorum/config.toml (corpus_api_token = \"your-token\")",
        crate::db::settings::CORPUS_API_TOKEN_KEY,
        CORPUS_API_TOKEN_ENV
    )))
}

/// Resolve the corpus API base URL
///
/// **Priority:** ENV → TOML
pub fn resolve_corpus_api_url(toml_config: &TomlConfig) -> Result<String> {
    if let Ok(url) = std::env::var(CORPUS_API_URL_ENV) {
        if !url.trim().is_empty() {
            return Ok(url);
        }
    }

    toml_config
        .corpus_api_url
        .clone()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| {
            Error::Config(format!(
                "Corpus API URL not configured: set {} or corpus_api_url in config.toml",
                CORPUS_API_URL_ENV
            ))
        })
}

/// Validate a token (non-empty, non-whitespace)
pub fn is_valid_token(token: &str) -> bool {
    !token.trim().is_empty()
}

/// Settings of one publication run
///
/// The campaign mode is not part of it: it always comes from the campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationConfig {
    /// Target corpus identifier
    pub corpus: String,
    /// Provenance attached to every record created by the run
    pub worker_run: String,
    /// Only elements imported from this provider are published
    pub provider: String,
    /// Assignment states whose annotations are published
    pub exported_states: Vec<AssignmentState>,
    #[serde(default)]
    pub force_republication: bool,
    #[serde(default)]
    pub use_raw_publication: bool,
    /// Preferred `(entity_type, instruction)` order for entity forms
    #[serde(default)]
    pub entities_order: Vec<(String, String)>,
    /// Element type receiving concatenated entity form transcriptions
    #[serde(default)]
    pub concatenation_parent_type: Option<Uuid>,
}

impl PublicationConfig {
    /// Fatal checks done before any task is processed
    pub fn validate(&self, mode: CampaignMode) -> PublishResult<()> {
        for (field, value) in [
            ("corpus", &self.corpus),
            ("worker_run", &self.worker_run),
            ("provider", &self.provider),
        ] {
            if value.trim().is_empty() {
                return Err(PublishError::Configuration(format!(
                    "The {} field is required",
                    field
                )));
            }
        }

        if self.exported_states.is_empty() {
            return Err(PublishError::Configuration(
                "At least one assignment state must be exported".to_string(),
            ));
        }

        if self.exported_states.contains(&AssignmentState::Draft) {
            return Err(PublishError::Configuration(
                "Draft assignments can never be published".to_string(),
            ));
        }

        if self.use_raw_publication && !mode.allows_duplicate_records() {
            return Err(PublishError::Configuration(
                "Duplicated ML classes are not allowed from the same worker run on the corpus. \
                 Annotations must always be grouped before export."
                    .to_string(),
            ));
        }

        Ok(())
    }

    pub fn policy(&self) -> PublicationPolicy {
        if self.use_raw_publication {
            PublicationPolicy::Raw
        } else {
            PublicationPolicy::Grouped
        }
    }
}
