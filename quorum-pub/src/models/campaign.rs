//! Campaigns and their annotation modes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Annotation mode of a campaign; selects the aggregator used at publication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignMode {
    Transcription,
    Classification,
    Entity,
    EntityForm,
    ElementGroup,
    Elements,
}

impl CampaignMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignMode::Transcription => "transcription",
            CampaignMode::Classification => "classification",
            CampaignMode::Entity => "entity",
            CampaignMode::EntityForm => "entity_form",
            CampaignMode::ElementGroup => "element_group",
            CampaignMode::Elements => "elements",
        }
    }

    /// Whether the corpus accepts several records of this kind from the same
    /// run on the same parent
    pub fn allows_duplicate_records(&self) -> bool {
        !matches!(self, CampaignMode::Classification)
    }
}

impl fmt::Display for CampaignMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcription" => Ok(CampaignMode::Transcription),
            "classification" => Ok(CampaignMode::Classification),
            "entity" => Ok(CampaignMode::Entity),
            "entity_form" => Ok(CampaignMode::EntityForm),
            "element_group" => Ok(CampaignMode::ElementGroup),
            "elements" => Ok(CampaignMode::Elements),
            other => Err(format!("Unknown campaign mode: {}", other)),
        }
    }
}

/// Annotation campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub mode: CampaignMode,
    /// Mode-specific settings (e.g. `group_type` for element groups)
    pub configuration: serde_json::Value,
}

impl Campaign {
    /// Internal element type configured for ElementGroup campaigns
    pub fn group_type(&self) -> Option<&str> {
        self.configuration.get("group_type").and_then(|v| v.as_str())
    }
}

impl fmt::Display for Campaign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
