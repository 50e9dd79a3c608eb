//! Document elements and external type mappings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reading direction of an element's text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextOrientation {
    #[default]
    LeftToRight,
    RightToLeft,
}

impl TextOrientation {
    pub fn parse(s: &str) -> Self {
        match s {
            "right_to_left" => TextOrientation::RightToLeft,
            _ => TextOrientation::LeftToRight,
        }
    }

    /// Orientation value understood by the corpus API
    pub fn corpus_value(&self) -> &'static str {
        match self {
            TextOrientation::LeftToRight => "horizontal-lr",
            TextOrientation::RightToLeft => "horizontal-rl",
        }
    }
}

/// Document element imported from the corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub id: Uuid,
    pub project_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub type_id: Uuid,
    pub name: String,
    pub order: i64,
    pub text_orientation: TextOrientation,
    pub provider_id: String,
    /// Identifier of the element on the corpus
    pub provider_object_id: String,
    /// Transcription held on the corpus (`{"id": ..., "text": ...}`)
    pub transcription: serde_json::Value,
    pub created: DateTime<Utc>,
}

impl Element {
    /// Corpus identifier of the transcription entities are anchored on
    pub fn transcription_id(&self) -> Option<&str> {
        self.transcription
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// Internal type or class paired with its corpus identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalTypeMapping {
    pub id: Uuid,
    pub name: String,
    /// Element type slug or ML class id on the corpus
    pub provider_object_id: String,
}
