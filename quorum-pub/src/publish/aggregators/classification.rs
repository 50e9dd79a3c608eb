//! Classification campaigns
//!
//! Payload: `{"classification": "<internal class id>"}`. The corpus refuses
//! the same class twice on an element from one run, so classes are always
//! grouped whatever the publication policy.

use serde_json::Value;
use std::collections::HashMap;

use super::{invalid, payload_field, AggregateOutcome, TaskInput};
use crate::error::PublishResult;
use crate::models::Annotation;
use crate::publish::confidence::grouped_confidence;
use crate::publish::grouping::CanonicalGrouper;
use crate::publish::{PublishRecord, RunContext};
use crate::services::NewClassification;

pub fn parse(annotations: &[Annotation]) -> PublishResult<Vec<String>> {
    annotations
        .iter()
        .map(|annotation| {
            payload_field(annotation, "classification")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| invalid(annotation, "\"classification\" must be a class identifier"))
        })
        .collect()
}

/// Group the allowed classes; the payload is the corpus ML class id
///
/// Confidences are computed over the allowed classes only. Returns the
/// records and the number of classes dropped.
pub fn build_records(
    classes: &[String],
    allowed_classes: &HashMap<String, String>,
) -> (Vec<PublishRecord<String>>, usize) {
    let mut grouper = CanonicalGrouper::new();
    for class in classes.iter().filter(|c| allowed_classes.contains_key(*c)) {
        grouper.push(Value::String(class.clone()));
    }

    let total = grouper.total();
    let records = grouper
        .groups()
        .iter()
        .filter_map(|group| {
            let ml_class = group.value.as_str().and_then(|c| allowed_classes.get(c))?;
            Some(PublishRecord {
                payload: ml_class.clone(),
                confidence: grouped_confidence(group.count, 0, total),
            })
        })
        .collect();

    (records, classes.len() - total)
}

pub async fn publish(ctx: &mut RunContext, input: &TaskInput) -> PublishResult<AggregateOutcome> {
    let task_id = input.task.id;
    let classes = parse(&input.annotations)?;
    let (records, skipped) = build_records(&classes, &ctx.allowed_classes);

    if !records.is_empty() {
        let requests: Vec<NewClassification> = records
            .iter()
            .map(|record| NewClassification {
                ml_class: record.payload.clone(),
                confidence: record.confidence,
            })
            .collect();

        if let Err(e) = ctx
            .client
            .create_classifications(
                &input.element.provider_object_id,
                &requests,
                &ctx.worker_run_id,
            )
            .await
        {
            ctx.log.error(format!(
                "Failed to publish classifications retrieved from the annotations on the task {}: {}",
                task_id, e
            ));
            return Ok(AggregateOutcome::Failed);
        }

        ctx.log.info(format!(
            "Successfully published {} classifications with their confidence for task {}",
            requests.len(),
            task_id
        ));
    }

    if skipped > 0 {
        ctx.log.info(format!(
            "Skipped {} classification annotations for task {} because no class matches them in the corpus",
            skipped, task_id
        ));
    }

    Ok(AggregateOutcome::Published {
        records: records.len(),
    })
}
