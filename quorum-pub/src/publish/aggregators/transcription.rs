//! Transcription campaigns
//!
//! Payload: `{"transcription": {"<element id>": {"text": "...", "uncertain": bool}}}`.
//! Texts are grouped per element; every element from the run's provider
//! gets one record per distinct text (or per occurrence under the raw
//! policy), all sent in one bulk call.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::{invalid, payload_field, AggregateOutcome, TaskInput};
use crate::db;
use crate::error::PublishResult;
use crate::models::{Annotation, Element};
use crate::publish::confidence::{confidences, PublicationPolicy};
use crate::publish::diagnostics::RunLog;
use crate::publish::grouping::{is_truthy, CanonicalGrouper, UNCERTAIN_MARKER};
use crate::publish::{PublishRecord, RunContext, EMPTY_SET_CHARACTER};
use crate::services::NewTranscription;

/// One element transcription read from an annotation
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionEntry {
    pub annotation_id: Uuid,
    /// Internal element id, as written in the payload
    pub element_id: String,
    pub text: String,
    pub uncertain: bool,
}

/// Transcription ready to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionPayload {
    /// Corpus id of the element
    pub element_id: String,
    pub text: String,
    pub orientation: &'static str,
}

/// Entries set aside while building records
#[derive(Debug, Default, PartialEq)]
pub struct TranscriptionStats {
    /// Empty texts replaced by the placeholder
    pub replaced: usize,
    /// Entries on elements outside the run's provider
    pub skipped: usize,
}

pub fn parse(annotations: &[Annotation]) -> PublishResult<Vec<TranscriptionEntry>> {
    let mut entries = Vec::new();

    for annotation in annotations {
        let transcriptions = payload_field(annotation, "transcription")
            .and_then(Value::as_object)
            .filter(|map| !map.is_empty())
            .ok_or_else(|| invalid(annotation, "\"transcription\" must be a non-empty mapping"))?;

        for (element_id, entry) in transcriptions {
            let entry = entry.as_object().ok_or_else(|| {
                invalid(
                    annotation,
                    format!("the transcription of element {} is not a mapping", element_id),
                )
            })?;

            let text = match entry.get("text") {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(text)) => text.clone(),
                Some(_) => {
                    return Err(invalid(
                        annotation,
                        format!("the text of element {} is not a string", element_id),
                    ))
                }
            };

            entries.push(TranscriptionEntry {
                annotation_id: annotation.id,
                element_id: element_id.clone(),
                text,
                uncertain: entry.get(UNCERTAIN_MARKER).is_some_and(is_truthy),
            });
        }
    }

    Ok(entries)
}

/// Group texts per element and compute the records to send
///
/// `elements` are the provider elements referenced by the entries, in
/// creation order; records follow that order.
pub fn build_records(
    task_id: Uuid,
    entries: Vec<TranscriptionEntry>,
    elements: &[Element],
    policy: PublicationPolicy,
    log: &mut RunLog,
) -> (Vec<PublishRecord<TranscriptionPayload>>, TranscriptionStats) {
    let known: HashSet<String> = elements.iter().map(|e| e.id.to_string()).collect();
    let mut stats = TranscriptionStats::default();
    let mut per_element: HashMap<String, CanonicalGrouper> = HashMap::new();

    for mut entry in entries {
        if !known.contains(&entry.element_id) {
            stats.skipped += 1;
            log.warning(format!(
                "Skipping the transcription for the element {} on annotation {} as it is not an element from the provider",
                entry.element_id, entry.annotation_id
            ));
            continue;
        }

        if entry.text.is_empty() {
            stats.replaced += 1;
            log.warning(format!(
                "The transcription for the element {} on annotation {} is empty, publishing {} instead",
                entry.element_id, entry.annotation_id, EMPTY_SET_CHARACTER
            ));
            entry.text = EMPTY_SET_CHARACTER.to_string();
        }

        per_element
            .entry(entry.element_id)
            .or_default()
            .push_uncertain(Value::String(entry.text), entry.uncertain);
    }

    let mut records = Vec::new();
    for element in elements {
        let Some(grouper) = per_element.get(&element.id.to_string()) else {
            continue;
        };

        if grouper.len() > 1 {
            log.warning(format!(
                "Differing transcriptions for the element {} were found on the task {}",
                element.id, task_id
            ));
        }

        let total = grouper.total();
        for group in grouper.groups() {
            let text = group.value.as_str().unwrap_or(EMPTY_SET_CHARACTER).to_string();
            for confidence in confidences(policy, group.count, group.uncertain, total) {
                records.push(PublishRecord {
                    payload: TranscriptionPayload {
                        element_id: element.provider_object_id.clone(),
                        text: text.clone(),
                        orientation: element.text_orientation.corpus_value(),
                    },
                    confidence,
                });
            }
        }
    }

    (records, stats)
}

pub async fn publish(ctx: &mut RunContext, input: &TaskInput) -> PublishResult<AggregateOutcome> {
    let task_id = input.task.id;
    let entries = parse(&input.annotations)?;

    let mut element_ids: Vec<String> = entries.iter().map(|e| e.element_id.clone()).collect();
    element_ids.sort();
    element_ids.dedup();
    let elements = db::elements::load_provider_elements(&ctx.db, &element_ids, &ctx.provider).await?;

    let (records, stats) = build_records(task_id, entries, &elements, ctx.policy, &mut ctx.log);

    if !records.is_empty() {
        let requests: Vec<NewTranscription> = records
            .iter()
            .map(|record| NewTranscription {
                element_id: record.payload.element_id.clone(),
                text: record.payload.text.clone(),
                orientation: record.payload.orientation.to_string(),
                confidence: record.confidence,
            })
            .collect();

        if let Err(e) = ctx
            .client
            .create_transcriptions(&requests, &ctx.worker_run_id)
            .await
        {
            ctx.log.error(format!(
                "Failed to publish {} transcriptions retrieved from the annotations on the task {}: {}",
                requests.len(),
                task_id,
                e
            ));
            return Ok(AggregateOutcome::Failed);
        }

        ctx.log.info(format!(
            "Successfully published {} transcriptions with their confidence for task {}",
            requests.len(),
            task_id
        ));
    }

    if stats.replaced > 0 {
        ctx.log.info(format!(
            "Replaced {} empty transcriptions on the task {} by {}",
            stats.replaced, task_id, EMPTY_SET_CHARACTER
        ));
    }
    if stats.skipped > 0 {
        ctx.log.info(format!(
            "Skipped {} transcriptions on the task {} that were on elements from another provider",
            stats.skipped, task_id
        ));
    }

    Ok(AggregateOutcome::Published {
        records: records.len(),
    })
}
