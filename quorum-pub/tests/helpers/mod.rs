//! Shared fixtures for integration tests
//!
//! `FakeCorpus` records every call the engine makes and fails the
//! operations it is told to. The seeding helpers write through the crate's
//! own persistence functions, with strictly increasing creation dates so
//! that seeding order is creation order.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use quorum_pub::config::PublicationConfig;
use quorum_pub::db;
use quorum_pub::models::{
    Annotation, AssignmentState, Campaign, CampaignMode, Element, ExternalTypeMapping,
    TextOrientation, Task, UserTask,
};
use quorum_pub::services::{
    CorpusApi, CorpusElementType, CorpusError, CorpusInfo, CreatedObject, EntityType, MlClass,
    NewChildElement, NewClassification, NewElement, NewEntityType, NewTranscription,
    NewTranscriptionEntity,
};

pub const PROVIDER: &str = "arkindex";
pub const CORPUS: &str = "corpus-1";
pub const WORKER_RUN: &str = "worker-run-1";

/// One recorded corpus call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateTranscriptions(Vec<NewTranscription>),
    CreateTranscription {
        element_id: String,
        text: String,
        confidence: f64,
        id: String,
    },
    CreateEntityType(NewEntityType),
    CreateTranscriptionEntities {
        transcription_id: String,
        entities: Vec<NewTranscriptionEntity>,
    },
    CreateElements {
        parent_id: String,
        elements: Vec<NewChildElement>,
    },
    CreateElement(NewElement),
    CreateElementParent {
        parent_id: String,
        child_id: String,
    },
    CreateClassifications {
        parent_id: String,
        classifications: Vec<NewClassification>,
    },
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::CreateTranscriptions(_) => "create_transcriptions",
            Call::CreateTranscription { .. } => "create_transcription",
            Call::CreateEntityType(_) => "create_entity_type",
            Call::CreateTranscriptionEntities { .. } => "create_transcription_entities",
            Call::CreateElements { .. } => "create_elements",
            Call::CreateElement(_) => "create_element",
            Call::CreateElementParent { .. } => "create_element_parent",
            Call::CreateClassifications { .. } => "create_classifications",
        }
    }
}

/// Recording in-memory corpus
#[derive(Default)]
pub struct FakeCorpus {
    element_types: Vec<String>,
    ml_classes: Vec<String>,
    entity_types: Vec<EntityType>,
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<&'static str>>,
    failing_entity_types: Mutex<HashSet<String>>,
    failing_links: Mutex<HashSet<String>>,
    next_id: AtomicUsize,
}

impl FakeCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Element type slugs declared on the corpus
    pub fn with_element_types(mut self, slugs: &[&str]) -> Self {
        self.element_types = slugs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_ml_classes(mut self, ids: &[&str]) -> Self {
        self.ml_classes = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_entity_types(mut self, types: &[(&str, &str)]) -> Self {
        self.entity_types = types
            .iter()
            .map(|(name, id)| EntityType {
                id: id.to_string(),
                name: name.to_string(),
                color: None,
            })
            .collect();
        self
    }

    /// Make every call of `operation` fail with a 400
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn fail_entity_type(&self, name: &str) {
        self.failing_entity_types
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    /// Make linking this corpus element under a group fail
    pub fn fail_link(&self, child_id: &str) {
        self.failing_links.lock().unwrap().insert(child_id.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_named(&self, name: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.name() == name).collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, operation: &'static str) -> Result<(), CorpusError> {
        if self.failing.lock().unwrap().contains(operation) {
            return Err(CorpusError::Api {
                status: 400,
                content: format!("{} refused", operation),
            });
        }
        Ok(())
    }

    fn new_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl CorpusApi for FakeCorpus {
    async fn retrieve_corpus(&self, corpus_id: &str) -> Result<CorpusInfo, CorpusError> {
        self.check("retrieve_corpus")?;
        Ok(CorpusInfo {
            id: corpus_id.to_string(),
            name: "Test corpus".to_string(),
            types: self
                .element_types
                .iter()
                .map(|slug| CorpusElementType {
                    slug: slug.clone(),
                    display_name: slug.clone(),
                    folder: false,
                })
                .collect(),
        })
    }

    async fn list_ml_classes(&self, _corpus_id: &str) -> Result<Vec<MlClass>, CorpusError> {
        self.check("list_ml_classes")?;
        Ok(self
            .ml_classes
            .iter()
            .map(|id| MlClass {
                id: id.clone(),
                name: id.clone(),
            })
            .collect())
    }

    async fn list_entity_types(&self, _corpus_id: &str) -> Result<Vec<EntityType>, CorpusError> {
        self.check("list_entity_types")?;
        Ok(self.entity_types.clone())
    }

    async fn create_transcriptions(
        &self,
        transcriptions: &[NewTranscription],
        _worker_run_id: &str,
    ) -> Result<(), CorpusError> {
        self.check("create_transcriptions")?;
        self.record(Call::CreateTranscriptions(transcriptions.to_vec()));
        Ok(())
    }

    async fn create_transcription(
        &self,
        element_id: &str,
        text: &str,
        confidence: f64,
        _worker_run_id: &str,
    ) -> Result<CreatedObject, CorpusError> {
        self.check("create_transcription")?;
        let id = self.new_id("transcription");
        self.record(Call::CreateTranscription {
            element_id: element_id.to_string(),
            text: text.to_string(),
            confidence,
            id: id.clone(),
        });
        Ok(CreatedObject { id })
    }

    async fn create_entity_type(
        &self,
        entity_type: &NewEntityType,
    ) -> Result<EntityType, CorpusError> {
        self.check("create_entity_type")?;
        self.record(Call::CreateEntityType(entity_type.clone()));
        if self
            .failing_entity_types
            .lock()
            .unwrap()
            .contains(&entity_type.name)
        {
            return Err(CorpusError::Api {
                status: 400,
                content: "entity type refused".to_string(),
            });
        }
        Ok(EntityType {
            id: self.new_id("entity-type"),
            name: entity_type.name.clone(),
            color: Some(entity_type.color.clone()),
        })
    }

    async fn create_transcription_entities(
        &self,
        transcription_id: &str,
        entities: &[NewTranscriptionEntity],
        _worker_run_id: &str,
    ) -> Result<(), CorpusError> {
        self.check("create_transcription_entities")?;
        self.record(Call::CreateTranscriptionEntities {
            transcription_id: transcription_id.to_string(),
            entities: entities.to_vec(),
        });
        Ok(())
    }

    async fn create_elements(
        &self,
        parent_id: &str,
        elements: &[NewChildElement],
        _worker_run_id: &str,
    ) -> Result<(), CorpusError> {
        self.check("create_elements")?;
        self.record(Call::CreateElements {
            parent_id: parent_id.to_string(),
            elements: elements.to_vec(),
        });
        Ok(())
    }

    async fn create_element(&self, element: &NewElement) -> Result<CreatedObject, CorpusError> {
        self.check("create_element")?;
        self.record(Call::CreateElement(element.clone()));
        Ok(CreatedObject {
            id: self.new_id("element"),
        })
    }

    async fn create_element_parent(
        &self,
        parent_id: &str,
        child_id: &str,
    ) -> Result<(), CorpusError> {
        self.check("create_element_parent")?;
        if self.failing_links.lock().unwrap().contains(child_id) {
            return Err(CorpusError::Api {
                status: 400,
                content: "link refused".to_string(),
            });
        }
        self.record(Call::CreateElementParent {
            parent_id: parent_id.to_string(),
            child_id: child_id.to_string(),
        });
        Ok(())
    }

    async fn create_classifications(
        &self,
        parent_id: &str,
        classifications: &[NewClassification],
        _worker_run_id: &str,
    ) -> Result<(), CorpusError> {
        self.check("create_classifications")?;
        self.record(Call::CreateClassifications {
            parent_id: parent_id.to_string(),
            classifications: classifications.to_vec(),
        });
        Ok(())
    }
}

/// Creation date strictly after every previous one
pub fn next_timestamp() -> DateTime<Utc> {
    static CLOCK: AtomicI64 = AtomicI64::new(0);
    let tick = CLOCK.fetch_add(1, Ordering::SeqCst);
    Utc::now() - Duration::days(1) + Duration::seconds(tick)
}

/// In-memory database with the full schema
pub async fn test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::create_schema(&pool).await.unwrap();
    pool
}

/// Project with one campaign
pub struct Fixture {
    pub db: SqlitePool,
    pub project_id: Uuid,
    pub campaign: Campaign,
}

impl Fixture {
    pub async fn new(mode: CampaignMode) -> Self {
        Self::with_configuration(mode, serde_json::json!({})).await
    }

    pub async fn with_configuration(mode: CampaignMode, configuration: Value) -> Self {
        let db = test_db().await;
        let project_id = Uuid::new_v4();
        db::campaigns::save_project(&db, project_id, "Letters", Some(PROVIDER), Some("corpus-1"))
            .await
            .unwrap();

        let campaign = Campaign {
            id: Uuid::new_v4(),
            project_id,
            name: format!("{} campaign", mode),
            mode,
            configuration,
        };
        db::campaigns::save_campaign(&db, &campaign).await.unwrap();

        Self {
            db,
            project_id,
            campaign,
        }
    }

    /// Replace the campaign configuration
    pub async fn configure(&mut self, configuration: Value) {
        self.campaign.configuration = configuration;
        db::campaigns::save_campaign(&self.db, &self.campaign)
            .await
            .unwrap();
    }

    pub async fn element_type(&self, name: &str, slug: &str) -> ExternalTypeMapping {
        let mapping = ExternalTypeMapping {
            id: Uuid::new_v4(),
            name: name.to_string(),
            provider_object_id: slug.to_string(),
        };
        db::external_types::save_type(&self.db, self.project_id, &mapping, PROVIDER)
            .await
            .unwrap();
        mapping
    }

    pub async fn class(&self, name: &str, ml_class: &str) -> ExternalTypeMapping {
        let mapping = ExternalTypeMapping {
            id: Uuid::new_v4(),
            name: name.to_string(),
            provider_object_id: ml_class.to_string(),
        };
        db::external_types::save_class(&self.db, self.project_id, &mapping, PROVIDER)
            .await
            .unwrap();
        mapping
    }

    pub async fn element(
        &self,
        element_type: &ExternalTypeMapping,
        parent: Option<&Element>,
        external_id: &str,
    ) -> Element {
        let transcription = Value::Object(Default::default());
        self.element_from(element_type, parent, external_id, PROVIDER, transcription)
            .await
    }

    pub async fn element_from(
        &self,
        element_type: &ExternalTypeMapping,
        parent: Option<&Element>,
        external_id: &str,
        provider: &str,
        transcription: Value,
    ) -> Element {
        let element = Element {
            id: Uuid::new_v4(),
            project_id: self.project_id,
            parent_id: parent.map(|p| p.id),
            type_id: element_type.id,
            name: external_id.to_string(),
            order: 0,
            text_orientation: TextOrientation::LeftToRight,
            provider_id: provider.to_string(),
            provider_object_id: external_id.to_string(),
            transcription,
            created: next_timestamp(),
        };
        db::elements::save_element(&self.db, &element).await.unwrap();
        element
    }

    pub async fn task(&self, element: &Element) -> Task {
        let task = Task {
            id: Uuid::new_v4(),
            campaign_id: self.campaign.id,
            element_id: element.id,
            created: next_timestamp(),
        };
        db::tasks::save_task(&self.db, &task).await.unwrap();
        task
    }

    /// New assignment of `task` holding one annotation
    pub async fn annotate(&self, task: &Task, state: AssignmentState, value: Value) -> Annotation {
        let user_task = UserTask {
            id: Uuid::new_v4(),
            task_id: task.id,
            user_id: Uuid::new_v4().to_string(),
            state,
            is_preview: false,
            created: next_timestamp(),
        };
        db::tasks::save_user_task(&self.db, &user_task).await.unwrap();
        self.add_version(user_task.id, 1, value).await
    }

    /// Another version of an existing assignment
    pub async fn add_version(&self, user_task_id: Uuid, version: i64, value: Value) -> Annotation {
        let annotation = Annotation {
            id: Uuid::new_v4(),
            user_task_id,
            parent_id: None,
            value,
            version,
            published: false,
            state: None,
            moderator_id: None,
            created: next_timestamp(),
        };
        db::tasks::save_annotation(&self.db, &annotation).await.unwrap();
        annotation
    }

    pub async fn is_published(&self, annotation: &Annotation) -> bool {
        db::tasks::load_annotation(&self.db, annotation.id)
            .await
            .unwrap()
            .unwrap()
            .published
    }
}

pub fn config() -> PublicationConfig {
    PublicationConfig {
        corpus: CORPUS.to_string(),
        worker_run: WORKER_RUN.to_string(),
        provider: PROVIDER.to_string(),
        exported_states: vec![AssignmentState::Annotated, AssignmentState::Validated],
        force_republication: false,
        use_raw_publication: false,
        entities_order: Vec::new(),
        concatenation_parent_type: None,
    }
}

pub fn shared(corpus: FakeCorpus) -> Arc<FakeCorpus> {
    Arc::new(corpus)
}
