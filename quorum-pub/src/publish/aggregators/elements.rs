//! Element (region) detection campaigns
//!
//! Payload: `{"elements": [{"element_type": "<internal type id>", "polygon": [[x, y], ...]}]}`.
//! Identical regions are grouped; every record becomes a child of the task
//! element, created in one bulk call. Names are sequential per corpus type.

use serde_json::Value;
use std::collections::HashMap;

use super::{invalid, payload_field, str_field, AggregateOutcome, TaskInput};
use crate::error::PublishResult;
use crate::models::Annotation;
use crate::publish::confidence::{confidences, PublicationPolicy};
use crate::publish::grouping::CanonicalGrouper;
use crate::publish::{PublishRecord, RunContext};
use crate::services::NewChildElement;

/// Region ready to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct RegionPayload {
    /// Corpus type slug
    pub element_type: String,
    pub polygon: Value,
    pub name: String,
}

/// Regions of every annotation, flattened
pub fn parse(annotations: &[Annotation]) -> PublishResult<Vec<Value>> {
    let mut regions = Vec::new();

    for annotation in annotations {
        let list = payload_field(annotation, "elements")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid(annotation, "\"elements\" must be a list"))?;

        for region in list {
            if str_field(region, "element_type").is_none() || region.get("polygon").is_none() {
                return Err(invalid(
                    annotation,
                    "every element needs an \"element_type\" and a \"polygon\"",
                ));
            }
            regions.push(region.clone());
        }
    }

    Ok(regions)
}

/// Group regions of allowed types and name them
///
/// Returns the records and the number of regions dropped because their
/// type is not available on the corpus.
pub fn build_records(
    regions: Vec<Value>,
    annotation_count: usize,
    allowed_types: &HashMap<String, String>,
    policy: PublicationPolicy,
) -> (Vec<PublishRecord<RegionPayload>>, usize) {
    let mut grouper = CanonicalGrouper::new();
    let mut dropped = 0;

    for region in regions {
        match str_field(&region, "element_type") {
            Some(t) if allowed_types.contains_key(t) => grouper.push(region),
            _ => dropped += 1,
        }
    }

    let mut names: HashMap<String, usize> = HashMap::new();
    let mut records = Vec::new();

    for group in grouper.groups() {
        let Some(slug) = str_field(&group.value, "element_type").and_then(|t| allowed_types.get(t))
        else {
            continue;
        };
        let polygon = group.value.get("polygon").cloned().unwrap_or(Value::Null);

        for confidence in confidences(policy, group.count, 0, annotation_count) {
            let index = names.entry(slug.clone()).or_insert(0);
            *index += 1;
            records.push(PublishRecord {
                payload: RegionPayload {
                    element_type: slug.clone(),
                    polygon: polygon.clone(),
                    name: index.to_string(),
                },
                confidence,
            });
        }
    }

    (records, dropped)
}

pub async fn publish(ctx: &mut RunContext, input: &TaskInput) -> PublishResult<AggregateOutcome> {
    let task_id = input.task.id;
    let regions = parse(&input.annotations)?;
    let (records, dropped) = build_records(
        regions,
        input.annotations.len(),
        &ctx.allowed_element_types,
        ctx.policy,
    );

    if !records.is_empty() {
        let requests: Vec<NewChildElement> = records
            .iter()
            .map(|record| NewChildElement {
                element_type: record.payload.element_type.clone(),
                polygon: record.payload.polygon.clone(),
                name: record.payload.name.clone(),
                confidence: record.confidence,
            })
            .collect();

        if let Err(e) = ctx
            .client
            .create_elements(
                &input.element.provider_object_id,
                &requests,
                &ctx.worker_run_id,
            )
            .await
        {
            ctx.log.error(format!(
                "Failed to publish elements retrieved from the annotations on the task {}: {}",
                task_id, e
            ));
            return Ok(AggregateOutcome::Failed);
        }

        ctx.log.info(format!(
            "Successfully published {} elements with their confidence for task {}",
            requests.len(),
            task_id
        ));
    }

    if dropped > 0 {
        ctx.log.info(format!(
            "Skipped {} element annotations for task {} because no type matches them in the corpus",
            dropped, task_id
        ));
    }

    Ok(AggregateOutcome::Published {
        records: records.len(),
    })
}
