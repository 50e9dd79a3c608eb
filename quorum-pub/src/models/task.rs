//! Tasks, user assignments and annotations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Unit of work bound to one element
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub element_id: Uuid,
    pub created: DateTime<Utc>,
}

/// Lifecycle state of a user assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentState {
    Draft,
    Pending,
    Annotated,
    Validated,
    Rejected,
    Skipped,
}

impl AssignmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentState::Draft => "draft",
            AssignmentState::Pending => "pending",
            AssignmentState::Annotated => "annotated",
            AssignmentState::Validated => "validated",
            AssignmentState::Rejected => "rejected",
            AssignmentState::Skipped => "skipped",
        }
    }

    /// Preference when picking one annotation among several (lower first)
    pub fn preference(&self) -> u8 {
        match self {
            AssignmentState::Validated => 0,
            AssignmentState::Annotated => 1,
            _ => 2,
        }
    }
}

impl FromStr for AssignmentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(AssignmentState::Draft),
            "pending" => Ok(AssignmentState::Pending),
            "annotated" => Ok(AssignmentState::Annotated),
            "validated" => Ok(AssignmentState::Validated),
            "rejected" => Ok(AssignmentState::Rejected),
            "skipped" => Ok(AssignmentState::Skipped),
            other => Err(format!("Unknown assignment state: {}", other)),
        }
    }
}

/// Assignment of a task to one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTask {
    pub id: Uuid,
    pub task_id: Uuid,
    pub user_id: String,
    pub state: AssignmentState,
    /// Preview assignments are never published
    pub is_preview: bool,
    pub created: DateTime<Utc>,
}

/// Moderation outcome recorded on an annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationState {
    Validated,
    Rejected,
}

impl AnnotationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationState::Validated => "validated",
            AnnotationState::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "validated" => Some(AnnotationState::Validated),
            "rejected" => Some(AnnotationState::Rejected),
            _ => None,
        }
    }
}

/// One submitted version of a user assignment
///
/// Annotations are never modified by the engine except for `published`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: Uuid,
    pub user_task_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub value: serde_json::Value,
    pub version: i64,
    pub published: bool,
    pub state: Option<AnnotationState>,
    pub moderator_id: Option<String>,
    pub created: DateTime<Utc>,
}
