//! Entity type resolution
//!
//! Entity types only exist on the corpus. The resolver starts from the
//! types the corpus already declares and creates missing ones on demand.
//! A type whose creation failed is not requested again during the run.

use rand::Rng;
use std::collections::{HashMap, HashSet};

use super::diagnostics::RunLog;
use crate::services::{CorpusApi, EntityType, NewEntityType};

/// What an annotation says about the entity type it needs
#[derive(Debug, Clone, Copy)]
pub struct EntityTypeDescriptor<'a> {
    pub name: &'a str,
    /// Preferred colour, with or without a leading '#'
    pub color: Option<&'a str>,
    /// Annotated value, only used in diagnostics
    pub value: Option<&'a str>,
}

/// Run-scoped cache of entity type name → corpus id
#[derive(Debug)]
pub struct ExternalTypeResolver {
    corpus_id: String,
    resolved: HashMap<String, String>,
    failed: HashSet<String>,
}

impl ExternalTypeResolver {
    /// Seed the cache with the types declared on the corpus
    pub fn new(corpus_id: impl Into<String>, existing: impl IntoIterator<Item = EntityType>) -> Self {
        Self {
            corpus_id: corpus_id.into(),
            resolved: existing.into_iter().map(|t| (t.name, t.id)).collect(),
            failed: HashSet::new(),
        }
    }

    /// Cached corpus id of a type name
    pub fn cached(&self, name: &str) -> Option<&str> {
        self.resolved.get(name).map(String::as_str)
    }

    /// Corpus id of the descriptor's type, creating the type when missing
    ///
    /// Returns None when the type is unavailable; the failure is logged
    /// against `log_hint` (e.g. "from the annotations on the task <id>").
    pub async fn resolve_or_create(
        &mut self,
        client: &dyn CorpusApi,
        descriptor: EntityTypeDescriptor<'_>,
        log_hint: &str,
        log: &mut RunLog,
    ) -> Option<String> {
        if let Some(id) = self.resolved.get(descriptor.name) {
            return Some(id.clone());
        }

        let entity_value = match descriptor.value.filter(|v| !v.is_empty()) {
            Some(value) => format!("entity {}", value),
            None => "entity".to_string(),
        };

        if self.failed.contains(descriptor.name) {
            log.error(format!(
                "Failed to publish {} of type {} {}; the entity type {} could not be created earlier in this run",
                entity_value, descriptor.name, log_hint, descriptor.name
            ));
            return None;
        }

        let request = NewEntityType {
            name: descriptor.name.to_string(),
            color: descriptor
                .color
                .map(|c| c.trim_start_matches('#').to_string())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(random_color),
            corpus: self.corpus_id.clone(),
        };

        match client.create_entity_type(&request).await {
            Ok(created) => {
                log.debug(format!(
                    "Created the entity type {} in the corpus {}",
                    descriptor.name, self.corpus_id
                ));
                self.resolved
                    .insert(descriptor.name.to_string(), created.id.clone());
                Some(created.id)
            }
            Err(e) => {
                log.error(format!(
                    "Failed to publish {} of type {} {}; an error occurred while creating the entity type {} in the corpus {}: {}",
                    entity_value, descriptor.name, log_hint, descriptor.name, self.corpus_id, e
                ));
                self.failed.insert(descriptor.name.to_string());
                None
            }
        }
    }
}

/// Random colour as six lowercase hex digits
pub fn random_color() -> String {
    let value: u32 = rand::thread_rng().gen_range(0..=0xFF_FFFF);
    format!("{:06x}", value)
}
