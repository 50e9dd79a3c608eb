//! Element group campaigns
//!
//! Payload: `{"groups": [{"elements": ["<element id>", ...]}, ...]}`.
//! A group is published as a new element of the configured group type under
//! the task element, then every member is linked under it. Member order is
//! significant when comparing groups.

use serde_json::Value;
use std::collections::HashMap;

use super::{invalid, payload_field, AggregateOutcome, TaskInput};
use crate::db;
use crate::error::PublishResult;
use crate::models::Annotation;
use crate::publish::confidence::{confidences, PublicationPolicy};
use crate::publish::grouping::CanonicalGrouper;
use crate::publish::{PublishRecord, RunContext};
use crate::services::NewElement;

/// Member ids of every group of every annotation
pub fn parse(annotations: &[Annotation]) -> PublishResult<Vec<Vec<Vec<String>>>> {
    annotations
        .iter()
        .map(|annotation| {
            let groups = payload_field(annotation, "groups")
                .and_then(Value::as_array)
                .ok_or_else(|| invalid(annotation, "\"groups\" must be a list"))?;

            groups
                .iter()
                .map(|group| {
                    let members = match group.get("elements") {
                        None | Some(Value::Null) => return Ok(Vec::new()),
                        Some(Value::Array(members)) => members,
                        Some(_) => return Err(invalid(annotation, "group elements must be a list")),
                    };
                    members
                        .iter()
                        .map(|id| {
                            id.as_str().map(str::to_string).ok_or_else(|| {
                                invalid(annotation, "group elements must be identifiers")
                            })
                        })
                        .collect()
                })
                .collect()
        })
        .collect()
}

/// Map members to corpus ids and group identical member lists
///
/// `external_ids` maps internal ids of provider elements to corpus ids.
/// Returns the records (payload: corpus ids of the members) and the number
/// of groups dropped because none of their members could be mapped.
pub fn build_records(
    parsed: &[Vec<Vec<String>>],
    external_ids: &HashMap<String, String>,
    policy: PublicationPolicy,
) -> (Vec<PublishRecord<Vec<String>>>, usize) {
    let mut grouper = CanonicalGrouper::new();
    let mut dropped = 0;

    for groups in parsed {
        for members in groups {
            let mapped: Vec<Value> = members
                .iter()
                .filter_map(|id| external_ids.get(id))
                .map(|id| Value::String(id.clone()))
                .collect();

            if mapped.is_empty() {
                dropped += 1;
                continue;
            }
            grouper.push(Value::Array(mapped));
        }
    }

    let mut records = Vec::new();
    for group in grouper.groups() {
        let members: Vec<String> = group
            .value
            .as_array()
            .map(|ids| ids.iter().filter_map(|id| id.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        for confidence in confidences(policy, group.count, 0, parsed.len()) {
            records.push(PublishRecord {
                payload: members.clone(),
                confidence,
            });
        }
    }

    (records, dropped)
}

/// Create one group element and link its members
///
/// Any failure fails the group. When the group element was created but a
/// member could not be linked, the group element stays on the corpus.
async fn publish_group(
    ctx: &mut RunContext,
    input: &TaskInput,
    index: usize,
    record: &PublishRecord<Vec<String>>,
) -> bool {
    let task_id = input.task.id;
    let Some(group_type) = ctx.group_type.clone() else {
        ctx.log.error(format!(
            "No group type available to publish the group {} from the annotations on the task {}",
            index, task_id
        ));
        return false;
    };

    let request = NewElement {
        name: index.to_string(),
        confidence: record.confidence,
        element_type: group_type,
        corpus: ctx.corpus_id.clone(),
        parent: input.element.provider_object_id.clone(),
        worker_run_id: ctx.worker_run_id.clone(),
    };

    let created = match ctx.client.create_element(&request).await {
        Ok(created) => created,
        Err(e) => {
            ctx.log.error(format!(
                "Failed to publish a group of elements from the annotations on the task {}: {}",
                task_id, e
            ));
            return false;
        }
    };

    let mut unlinked = 0;
    for member in &record.payload {
        if let Err(e) = ctx.client.create_element_parent(&created.id, member).await {
            ctx.log.error(format!(
                "Failed to link an element to the group {} from the annotations on the task {}: {}",
                index, task_id, e
            ));
            unlinked += 1;
        }
    }

    if unlinked > 0 {
        ctx.log.warning(format!(
            "The group {} ({}) was created on the corpus for the task {} but {} of its {} elements are not linked to it",
            index,
            created.id,
            task_id,
            unlinked,
            record.payload.len()
        ));
        return false;
    }

    ctx.log.info(format!(
        "Successfully published the group {} and linked {} elements to it from the annotations on the task {}",
        index,
        record.payload.len(),
        task_id
    ));
    true
}

pub async fn publish(ctx: &mut RunContext, input: &TaskInput) -> PublishResult<AggregateOutcome> {
    let task_id = input.task.id;
    let parsed = parse(&input.annotations)?;

    let mut member_ids: Vec<String> = parsed.iter().flatten().flatten().cloned().collect();
    member_ids.sort();
    member_ids.dedup();
    let external_ids: HashMap<String, String> =
        db::elements::load_provider_elements(&ctx.db, &member_ids, &ctx.provider)
            .await?
            .into_iter()
            .map(|e| (e.id.to_string(), e.provider_object_id))
            .collect();

    let (records, dropped) = build_records(&parsed, &external_ids, ctx.policy);

    let mut failed = 0;
    for (i, record) in records.iter().enumerate() {
        if !publish_group(ctx, input, i + 1, record).await {
            failed += 1;
        }
    }

    if failed > 0 {
        return Ok(AggregateOutcome::Failed);
    }

    if dropped > 0 {
        ctx.log.info(format!(
            "Skipped {} groups of elements from the annotations on the task {} that were either empty or only containing elements from another provider",
            dropped, task_id
        ));
    }

    Ok(AggregateOutcome::Published {
        records: records.len(),
    })
}
