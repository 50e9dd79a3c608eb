//! Mode aggregators
//!
//! One aggregator per campaign mode. Each one validates the structure of
//! the latest annotations of a task, reduces them to confidence-scored
//! records and sends those to the corpus. The task is only reported as
//! published when every record was accepted.

pub mod classification;
pub mod element_group;
pub mod elements;
pub mod entity;
pub mod entity_form;
pub mod transcription;

use serde_json::Value;

use super::context::RunContext;
use crate::error::{PublishError, PublishResult};
use crate::models::{Annotation, CampaignMode, Element, Task};

/// Everything an aggregator needs to know about one task
#[derive(Debug, Clone)]
pub struct TaskInput {
    pub task: Task,
    pub element: Element,
    /// Latest annotation of every eligible assignment
    pub annotations: Vec<Annotation>,
}

/// Result of aggregating and publishing one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOutcome {
    /// Every record was accepted; the annotations may be flagged
    Published { records: usize },
    /// Invalid payload or at least one rejected call
    Failed,
    /// Nothing could be attempted (e.g. missing transcription on the element)
    Skipped,
}

/// Aggregation strategy, one per campaign mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregator {
    Transcription,
    Classification,
    Entity,
    EntityForm,
    ElementGroup,
    Elements,
}

impl Aggregator {
    pub fn for_mode(mode: CampaignMode) -> Self {
        match mode {
            CampaignMode::Transcription => Aggregator::Transcription,
            CampaignMode::Classification => Aggregator::Classification,
            CampaignMode::Entity => Aggregator::Entity,
            CampaignMode::EntityForm => Aggregator::EntityForm,
            CampaignMode::ElementGroup => Aggregator::ElementGroup,
            CampaignMode::Elements => Aggregator::Elements,
        }
    }

    /// Kind of annotation handled, as written in diagnostics
    pub fn label(&self) -> &'static str {
        match self {
            Aggregator::Transcription => "transcription",
            Aggregator::Classification => "classification",
            Aggregator::Entity => "entity",
            Aggregator::EntityForm => "entity form",
            Aggregator::ElementGroup => "element group",
            Aggregator::Elements => "element",
        }
    }

    /// Aggregate and publish one task
    ///
    /// Invalid payloads fail the task without any call. Only infrastructure
    /// errors (database) are returned as `Err`.
    pub async fn publish(
        &self,
        ctx: &mut RunContext,
        input: &TaskInput,
    ) -> PublishResult<AggregateOutcome> {
        let result = match self {
            Aggregator::Transcription => transcription::publish(ctx, input).await,
            Aggregator::Classification => classification::publish(ctx, input).await,
            Aggregator::Entity => entity::publish(ctx, input).await,
            Aggregator::EntityForm => entity_form::publish(ctx, input).await,
            Aggregator::ElementGroup => element_group::publish(ctx, input).await,
            Aggregator::Elements => elements::publish(ctx, input).await,
        };

        match result {
            Err(PublishError::InvalidPayload(reason)) => {
                ctx.log.error(format!(
                    "Skipping the task {} as at least one of its last {} annotations holds an invalid value: {}",
                    input.task.id,
                    self.label(),
                    reason
                ));
                Ok(AggregateOutcome::Failed)
            }
            other => other,
        }
    }
}

/// Top-level field of an annotation value
pub(crate) fn payload_field<'a>(annotation: &'a Annotation, field: &str) -> Option<&'a Value> {
    annotation.value.get(field)
}

pub(crate) fn invalid(annotation: &Annotation, reason: impl AsRef<str>) -> PublishError {
    PublishError::InvalidPayload(format!("annotation {}: {}", annotation.id, reason.as_ref()))
}

/// Required string field of a JSON mapping
pub(crate) fn str_field<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}
