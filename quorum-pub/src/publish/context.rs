//! State shared by every task of a run

use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::confidence::PublicationPolicy;
use super::diagnostics::RunLog;
use super::entity_order::EntityOrder;
use super::type_resolver::ExternalTypeResolver;
use crate::config::PublicationConfig;
use crate::models::{AssignmentState, Campaign};
use crate::services::CorpusApi;

/// Run context
///
/// Owned by one run and dropped with it: nothing here outlives the run,
/// including the entity type cache.
pub struct RunContext {
    pub db: SqlitePool,
    pub client: Arc<dyn CorpusApi>,
    pub campaign: Campaign,
    pub process_id: Uuid,
    pub corpus_id: String,
    pub worker_run_id: String,
    pub provider: String,
    pub policy: PublicationPolicy,
    pub exported_states: Vec<AssignmentState>,
    pub force_republication: bool,
    pub entity_order: EntityOrder,
    pub entity_types: ExternalTypeResolver,
    /// Internal class id → corpus ML class id
    pub allowed_classes: HashMap<String, String>,
    /// Internal element type id → corpus type slug
    pub allowed_element_types: HashMap<String, String>,
    /// Corpus type slug of element groups
    pub group_type: Option<String>,
    pub log: RunLog,
}

impl RunContext {
    /// Context with empty corpus references; the coordinator loads them
    pub fn new(
        db: SqlitePool,
        client: Arc<dyn CorpusApi>,
        campaign: Campaign,
        process_id: Uuid,
        config: &PublicationConfig,
    ) -> Self {
        Self {
            db,
            client,
            campaign,
            process_id,
            corpus_id: config.corpus.clone(),
            worker_run_id: config.worker_run.clone(),
            provider: config.provider.clone(),
            policy: config.policy(),
            exported_states: config.exported_states.clone(),
            force_republication: config.force_republication,
            entity_order: EntityOrder::new(config.entities_order.clone()),
            entity_types: ExternalTypeResolver::new(config.corpus.clone(), Vec::new()),
            allowed_classes: HashMap::new(),
            allowed_element_types: HashMap::new(),
            group_type: None,
            log: RunLog::new(),
        }
    }
}
