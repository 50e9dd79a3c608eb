//! Named-entity campaigns
//!
//! Payload: `{"entities": [{"entity_type": "<name>", "offset": 0, "length": 5}]}`.
//! Spans are anchored on the transcription already held by the task element
//! on the corpus; tasks whose element has none are skipped.

use serde_json::Value;

use super::{invalid, payload_field, str_field, AggregateOutcome, TaskInput};
use crate::error::PublishResult;
use crate::models::Annotation;
use crate::publish::confidence::{confidences, PublicationPolicy};
use crate::publish::grouping::CanonicalGrouper;
use crate::publish::type_resolver::EntityTypeDescriptor;
use crate::publish::RunContext;
use crate::services::NewTranscriptionEntity;

/// One distinct span and the records it produces
#[derive(Debug, Clone, PartialEq)]
pub struct SpanGroup {
    pub entity_type: String,
    pub color: Option<String>,
    pub value: Option<String>,
    pub offset: usize,
    pub length: usize,
    /// Confidence of every record to send for this span
    pub confidences: Vec<f64>,
}

/// Spans of every annotation, flattened
pub fn parse(annotations: &[Annotation]) -> PublishResult<Vec<Value>> {
    let mut spans = Vec::new();

    for annotation in annotations {
        let list = payload_field(annotation, "entities")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid(annotation, "\"entities\" must be a list"))?;

        for span in list {
            let valid = str_field(span, "entity_type").is_some()
                && span.get("offset").and_then(Value::as_u64).is_some()
                && span.get("length").and_then(Value::as_u64).is_some();
            if !valid {
                return Err(invalid(
                    annotation,
                    "every entity needs an \"entity_type\", an \"offset\" and a \"length\"",
                ));
            }
            spans.push(span.clone());
        }
    }

    Ok(spans)
}

/// Group spans and drop the empty ones
///
/// Returns the groups to publish and the number of dropped records.
pub fn group_spans(
    spans: Vec<Value>,
    annotation_count: usize,
    policy: PublicationPolicy,
) -> (Vec<SpanGroup>, usize) {
    let mut grouper = CanonicalGrouper::new();
    for span in spans {
        grouper.push_marked(span);
    }

    let mut groups = Vec::new();
    let mut skipped = 0;

    for group in grouper.groups() {
        let span = &group.value;
        let confidences = confidences(policy, group.count, group.uncertain, annotation_count);
        let length = span.get("length").and_then(Value::as_u64).unwrap_or(0) as usize;

        if length == 0 {
            skipped += confidences.len();
            continue;
        }

        groups.push(SpanGroup {
            entity_type: str_field(span, "entity_type").unwrap_or_default().to_string(),
            color: str_field(span, "entity_color").map(str::to_string),
            value: str_field(span, "value").map(str::to_string),
            offset: span.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize,
            length,
            confidences,
        });
    }

    (groups, skipped)
}

pub async fn publish(ctx: &mut RunContext, input: &TaskInput) -> PublishResult<AggregateOutcome> {
    let task_id = input.task.id;
    let Some(transcription_id) = input.element.transcription_id().map(str::to_string) else {
        ctx.log.warning(format!(
            "Skipping the task {} as there is no transcription ID",
            task_id
        ));
        return Ok(AggregateOutcome::Skipped);
    };

    let spans = parse(&input.annotations)?;
    let (groups, skipped) = group_spans(spans, input.annotations.len(), ctx.policy);

    let log_hint = format!("from the annotations on the task {}", task_id);
    let mut failed = 0;
    let mut requests = Vec::new();

    for group in &groups {
        let descriptor = EntityTypeDescriptor {
            name: &group.entity_type,
            color: group.color.as_deref(),
            value: group.value.as_deref(),
        };
        let resolved = ctx
            .entity_types
            .resolve_or_create(ctx.client.as_ref(), descriptor, &log_hint, &mut ctx.log)
            .await;

        let Some(type_id) = resolved else {
            failed += group.confidences.len();
            continue;
        };

        requests.extend(group.confidences.iter().map(|&confidence| NewTranscriptionEntity {
            offset: group.offset,
            length: group.length,
            type_id: type_id.clone(),
            confidence,
        }));
    }

    if !requests.is_empty() {
        match ctx
            .client
            .create_transcription_entities(&transcription_id, &requests, &ctx.worker_run_id)
            .await
        {
            Ok(()) => ctx.log.info(format!(
                "Successfully published and linked {} entities with the transcription {}",
                requests.len(),
                log_hint
            )),
            Err(e) => {
                ctx.log.error(format!(
                    "Failed to publish and link {} entities with the transcription {}: {}",
                    requests.len(),
                    log_hint,
                    e
                ));
                failed += requests.len();
            }
        }
    }

    if failed > 0 {
        return Ok(AggregateOutcome::Failed);
    }

    if skipped > 0 {
        ctx.log.info(format!(
            "Skipped {} empty entities from the annotations on the task {}",
            skipped, task_id
        ));
    }

    Ok(AggregateOutcome::Published {
        records: requests.len(),
    })
}
