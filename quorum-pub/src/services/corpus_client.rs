//! Corpus API client
//!
//! The publication engine only talks to the external corpus through the
//! [`CorpusApi`] trait. [`ArkindexClient`] implements it over HTTP; tests
//! substitute a recording fake.
//!
//! Calls are never retried here: a failed call surfaces as a [`CorpusError`]
//! carrying the HTTP status and body, and the caller decides what it means
//! for the task being published.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("quorum-pub/", env!("CARGO_PKG_VERSION"));

/// Corpus client errors
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success response, formatted as "<status> - <content>"
    #[error("{status} - {content}")]
    Api { status: u16, content: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Element type declared on a corpus
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CorpusElementType {
    pub slug: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub folder: bool,
}

/// Corpus details
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorpusInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub types: Vec<CorpusElementType>,
}

/// ML class declared on a corpus
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MlClass {
    pub id: String,
    pub name: String,
}

/// Entity type declared on a corpus
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EntityType {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

/// Transcription for the bulk endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTranscription {
    pub element_id: String,
    pub text: String,
    pub orientation: String,
    pub confidence: f64,
}

/// Entity span on an existing transcription
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTranscriptionEntity {
    pub offset: usize,
    pub length: usize,
    pub type_id: String,
    pub confidence: f64,
}

/// Child element for the bulk endpoint (region detection)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewChildElement {
    #[serde(rename = "type")]
    pub element_type: String,
    pub polygon: serde_json::Value,
    pub name: String,
    pub confidence: f64,
}

/// Standalone element (element groups)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewElement {
    pub name: String,
    pub confidence: f64,
    #[serde(rename = "type")]
    pub element_type: String,
    pub corpus: String,
    pub parent: String,
    pub worker_run_id: String,
}

/// Classification for the bulk endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewClassification {
    pub ml_class: String,
    pub confidence: f64,
}

/// Entity type creation request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEntityType {
    pub name: String,
    /// Six hex digits, without '#'
    pub color: String,
    pub corpus: String,
}

/// Identifier returned by creation endpoints
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CreatedObject {
    pub id: String,
}

/// Page of a paginated listing
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default)]
    next: Option<String>,
    results: Vec<T>,
}

/// Operations the publication engine performs on the corpus
#[async_trait]
pub trait CorpusApi: Send + Sync {
    /// RetrieveCorpus: corpus details including its element types
    async fn retrieve_corpus(&self, corpus_id: &str) -> Result<CorpusInfo, CorpusError>;

    /// ListCorpusMLClasses (all pages)
    async fn list_ml_classes(&self, corpus_id: &str) -> Result<Vec<MlClass>, CorpusError>;

    /// ListCorpusEntityTypes (all pages)
    async fn list_entity_types(&self, corpus_id: &str) -> Result<Vec<EntityType>, CorpusError>;

    /// CreateTranscriptions (bulk, any number of elements)
    async fn create_transcriptions(
        &self,
        transcriptions: &[NewTranscription],
        worker_run_id: &str,
    ) -> Result<(), CorpusError>;

    /// CreateTranscription on one element
    async fn create_transcription(
        &self,
        element_id: &str,
        text: &str,
        confidence: f64,
        worker_run_id: &str,
    ) -> Result<CreatedObject, CorpusError>;

    /// CreateEntityType
    async fn create_entity_type(&self, entity_type: &NewEntityType)
        -> Result<EntityType, CorpusError>;

    /// CreateTranscriptionEntities (bulk)
    async fn create_transcription_entities(
        &self,
        transcription_id: &str,
        entities: &[NewTranscriptionEntity],
        worker_run_id: &str,
    ) -> Result<(), CorpusError>;

    /// CreateElements (bulk children of one parent)
    async fn create_elements(
        &self,
        parent_id: &str,
        elements: &[NewChildElement],
        worker_run_id: &str,
    ) -> Result<(), CorpusError>;

    /// CreateElement
    async fn create_element(&self, element: &NewElement) -> Result<CreatedObject, CorpusError>;

    /// CreateElementParent: link an existing element under another one
    async fn create_element_parent(&self, parent_id: &str, child_id: &str)
        -> Result<(), CorpusError>;

    /// CreateClassifications (bulk, on one element)
    async fn create_classifications(
        &self,
        parent_id: &str,
        classifications: &[NewClassification],
        worker_run_id: &str,
    ) -> Result<(), CorpusError>;
}

/// HTTP implementation of [`CorpusApi`] for Arkindex-compatible servers
pub struct ArkindexClient {
    http_client: Client,
    /// Always ends with '/'
    base_url: String,
    token: Option<String>,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl ArkindexClient {
    /// Create a client
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. "https://corpus.example.org/api/v1/"
    /// * `token` - API token sent as `Authorization: Token <token>`
    /// * `requests_per_second` - Outgoing request budget (minimum 1)
    pub fn new(
        base_url: &str,
        token: Option<String>,
        requests_per_second: u32,
    ) -> Result<Self, CorpusError> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CorpusError::Network(e.to_string()))?;

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rate);

        Ok(Self {
            http_client,
            base_url: normalize_base_url(base_url),
            token,
            rate_limiter: RateLimiter::direct(quota),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Token {}", token)),
            None => request,
        }
    }

    /// Send a request, turning non-success statuses into `CorpusError::Api`
    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, CorpusError> {
        self.rate_limiter.until_ready().await;

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| CorpusError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let content = response.text().await.unwrap_or_default();
            return Err(CorpusError::Api {
                status: status.as_u16(),
                content,
            });
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CorpusError> {
        tracing::debug!(url = %url, "GET corpus API");
        let response = self.send(self.http_client.get(url)).await?;
        response
            .json()
            .await
            .map_err(|e| CorpusError::Parse(e.to_string()))
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, CorpusError> {
        let url = self.url(path);
        tracing::debug!(url = %url, "POST corpus API");
        self.send(self.http_client.post(&url).json(body)).await
    }

    async fn post_for_object<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<CreatedObject, CorpusError> {
        self.post_json(path, body)
            .await?
            .json()
            .await
            .map_err(|e| CorpusError::Parse(e.to_string()))
    }

    /// Follow `next` links until the listing is exhausted
    async fn paginate<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, CorpusError> {
        let mut results = Vec::new();
        let mut next = Some(self.url(path));

        while let Some(url) = next {
            let page: Page<T> = self.get_json(&url).await?;
            results.extend(page.results);
            next = page.next;
        }

        Ok(results)
    }
}

#[async_trait]
impl CorpusApi for ArkindexClient {
    async fn retrieve_corpus(&self, corpus_id: &str) -> Result<CorpusInfo, CorpusError> {
        self.get_json(&self.url(&format!("corpus/{}/", corpus_id))).await
    }

    async fn list_ml_classes(&self, corpus_id: &str) -> Result<Vec<MlClass>, CorpusError> {
        self.paginate(&format!("corpus/{}/classes/", corpus_id)).await
    }

    async fn list_entity_types(&self, corpus_id: &str) -> Result<Vec<EntityType>, CorpusError> {
        self.paginate(&format!("corpus/{}/entity-types/", corpus_id)).await
    }

    async fn create_transcriptions(
        &self,
        transcriptions: &[NewTranscription],
        worker_run_id: &str,
    ) -> Result<(), CorpusError> {
        let body = serde_json::json!({
            "transcriptions": transcriptions,
            "worker_run_id": worker_run_id,
        });
        self.post_json("transcription/bulk/", &body).await?;
        Ok(())
    }

    async fn create_transcription(
        &self,
        element_id: &str,
        text: &str,
        confidence: f64,
        worker_run_id: &str,
    ) -> Result<CreatedObject, CorpusError> {
        let body = serde_json::json!({
            "text": text,
            "confidence": confidence,
            "worker_run_id": worker_run_id,
        });
        self.post_for_object(&format!("element/{}/transcription/", element_id), &body)
            .await
    }

    async fn create_entity_type(
        &self,
        entity_type: &NewEntityType,
    ) -> Result<EntityType, CorpusError> {
        self.post_json("entity/types/", entity_type)
            .await?
            .json()
            .await
            .map_err(|e| CorpusError::Parse(e.to_string()))
    }

    async fn create_transcription_entities(
        &self,
        transcription_id: &str,
        entities: &[NewTranscriptionEntity],
        worker_run_id: &str,
    ) -> Result<(), CorpusError> {
        let body = serde_json::json!({
            "transcription_entities": entities,
            "worker_run_id": worker_run_id,
        });
        self.post_json(
            &format!("transcription/{}/entities/bulk/", transcription_id),
            &body,
        )
        .await?;
        Ok(())
    }

    async fn create_elements(
        &self,
        parent_id: &str,
        elements: &[NewChildElement],
        worker_run_id: &str,
    ) -> Result<(), CorpusError> {
        let body = serde_json::json!({
            "elements": elements,
            "worker_run_id": worker_run_id,
        });
        self.post_json(&format!("element/{}/children/bulk/", parent_id), &body)
            .await?;
        Ok(())
    }

    async fn create_element(&self, element: &NewElement) -> Result<CreatedObject, CorpusError> {
        self.post_for_object("elements/create/", element).await
    }

    async fn create_element_parent(
        &self,
        parent_id: &str,
        child_id: &str,
    ) -> Result<(), CorpusError> {
        self.post_json(
            &format!("element/{}/parent/{}/", child_id, parent_id),
            &serde_json::json!({}),
        )
        .await?;
        Ok(())
    }

    async fn create_classifications(
        &self,
        parent_id: &str,
        classifications: &[NewClassification],
        worker_run_id: &str,
    ) -> Result<(), CorpusError> {
        let body = serde_json::json!({
            "parent": parent_id,
            "classifications": classifications,
            "worker_run_id": worker_run_id,
        });
        self.post_json("classification/bulk/", &body).await?;
        Ok(())
    }
}

fn normalize_base_url(base_url: &str) -> String {
    format!("{}/", base_url.trim_end_matches('/'))
}
