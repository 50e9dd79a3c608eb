//! Entity form campaigns
//!
//! Payload: `{"values": [{"entity_type": "...", "instruction": "...", "value": "...", "uncertain": bool}]}`.
//! There is no transcription to anchor entities on: one is forged from the
//! field values, created on the task element, and every non-empty field
//! becomes an entity of that transcription.

use serde_json::Value;

use super::{invalid, str_field, AggregateOutcome, TaskInput};
use crate::error::PublishResult;
use crate::publish::confidence::{confidences, PublicationPolicy};
use crate::publish::entity_order::EntityOrder;
use crate::publish::grouping::{
    canonical_key, is_truthy, strip_uncertain, CanonicalGrouper, UNCERTAIN_MARKER,
};
use crate::publish::type_resolver::EntityTypeDescriptor;
use crate::publish::{RunContext, EMPTY_SET_CHARACTER};
use crate::services::NewTranscriptionEntity;

/// Entity span within a forged text
#[derive(Debug, Clone, PartialEq)]
pub struct ForgedSpan {
    pub entity_type: String,
    pub color: Option<String>,
    pub value: String,
    /// Offset in characters
    pub offset: usize,
    /// Length in characters
    pub length: usize,
    pub uncertain: bool,
}

/// Transcription text forged from form fields
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Forged {
    pub text: String,
    pub spans: Vec<ForgedSpan>,
    /// Fields without a value
    pub empty_fields: usize,
    /// Number of fields the text was forged from
    pub field_count: usize,
}

impl Forged {
    /// Whether every field was empty (the text is then a single placeholder)
    pub fn all_empty(&self) -> bool {
        self.empty_fields == self.field_count
    }
}

/// Fields of a form value, when structurally valid
///
/// A valid value is a non-empty list of mappings, each with a string
/// `entity_type` and a string (or missing) `value`.
pub fn parse_fields(value: &Value) -> Option<Vec<Value>> {
    let fields = value.get("values")?.as_array()?;
    if fields.is_empty() {
        return None;
    }

    let valid = fields.iter().all(|field| {
        field.is_object()
            && str_field(field, "entity_type").is_some()
            && matches!(field.get("value"), None | Some(Value::Null) | Some(Value::String(_)))
    });

    valid.then(|| fields.clone())
}

fn field_value(field: &Value) -> &str {
    str_field(field, "value").unwrap_or_default()
}

/// Forge the text of one field set, in the given order
///
/// Every field contributes its value, or the placeholder when empty; parts
/// are joined by one space. When every field is empty the text is a single
/// placeholder and no span is produced.
pub fn forge(fields: &[Value]) -> Forged {
    let empty_fields = fields.iter().filter(|f| field_value(f).is_empty()).count();
    let mut forged = Forged {
        text: String::new(),
        spans: Vec::new(),
        empty_fields,
        field_count: fields.len(),
    };

    if forged.all_empty() {
        forged.text = EMPTY_SET_CHARACTER.to_string();
        return forged;
    }

    let mut parts = Vec::with_capacity(fields.len());
    let mut offset = 0;

    for field in fields {
        let value = field_value(field);
        let part = if value.is_empty() {
            EMPTY_SET_CHARACTER
        } else {
            value
        };
        let length = part.chars().count();

        if !value.is_empty() {
            forged.spans.push(ForgedSpan {
                entity_type: str_field(field, "entity_type").unwrap_or_default().to_string(),
                color: str_field(field, "entity_color").map(str::to_string),
                value: value.to_string(),
                offset,
                length,
                uncertain: field.get(UNCERTAIN_MARKER).is_some_and(is_truthy),
            });
        }

        parts.push(part);
        offset += length + 1;
    }

    forged.text = parts.join(" ");
    forged
}

/// Join forged texts line by line, shifting the spans accordingly
pub fn forge_many(items: &[Forged]) -> Forged {
    let mut joined = Forged::default();
    let mut offset = 0;

    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            joined.text.push('\n');
        }
        joined.text.push_str(&item.text);
        joined.spans.extend(item.spans.iter().map(|span| ForgedSpan {
            offset: span.offset + offset,
            ..span.clone()
        }));
        joined.empty_fields += item.empty_fields;
        joined.field_count += item.field_count;

        offset += item.text.chars().count() + 1;
    }

    joined
}

/// Create the forged transcription on `element_id` and link its entities
///
/// Returns false when the transcription, an entity type or the entities
/// could not be created. `log_hint` completes messages, e.g.
/// "from the annotations on the task <id>".
pub(crate) async fn publish_forged(
    ctx: &mut RunContext,
    element_id: &str,
    forged: &Forged,
    confidence: f64,
    log_hint: &str,
) -> bool {
    let description = if forged.all_empty() {
        format!(
            "the empty transcription using the {} character",
            EMPTY_SET_CHARACTER
        )
    } else {
        format!(
            "the transcription forged with {} valid entities",
            forged.spans.len()
        )
    };

    let transcription = match ctx
        .client
        .create_transcription(element_id, &forged.text, confidence, &ctx.worker_run_id)
        .await
    {
        Ok(created) => created,
        Err(e) => {
            ctx.log.error(format!(
                "Failed to publish {} {}: {}",
                description, log_hint, e
            ));
            return false;
        }
    };
    ctx.log.info(format!(
        "Successfully published {} {}",
        description, log_hint
    ));

    let mut failed = 0;
    let mut requests = Vec::new();

    for span in &forged.spans {
        let descriptor = EntityTypeDescriptor {
            name: &span.entity_type,
            color: span.color.as_deref(),
            value: Some(&span.value),
        };
        let resolved = ctx
            .entity_types
            .resolve_or_create(ctx.client.as_ref(), descriptor, log_hint, &mut ctx.log)
            .await;

        match resolved {
            Some(type_id) => requests.push(NewTranscriptionEntity {
                offset: span.offset,
                length: span.length,
                type_id,
                confidence: if span.uncertain { 0.5 } else { 1.0 },
            }),
            None => failed += 1,
        }
    }

    if !requests.is_empty() {
        match ctx
            .client
            .create_transcription_entities(&transcription.id, &requests, &ctx.worker_run_id)
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

    failed == 0
}

/// One distinct field set and the records it produces
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSetGroup {
    /// Fields in resolved order, uncertainty taken from the last annotation
    pub fields: Vec<Value>,
    pub confidences: Vec<f64>,
}

/// Group field sets equal up to order, ignoring uncertainty
pub fn group_field_sets(
    field_sets: Vec<Vec<Value>>,
    order: &EntityOrder,
    policy: PublicationPolicy,
) -> Vec<FieldSetGroup> {
    let total = field_sets.len();
    let mut grouper = CanonicalGrouper::new();

    for fields in field_sets {
        let stripped: Vec<Value> = fields.iter().map(|f| strip_uncertain(f).0).collect();
        let sorted = Value::Array(order.sort_fields(&stripped));
        grouper.push_keyed(canonical_key(&sorted), sorted, Value::Array(fields), false);
    }

    grouper
        .into_groups()
        .into_iter()
        .map(|group| {
            let latest = group.latest.as_array().cloned().unwrap_or_default();
            FieldSetGroup {
                fields: order.sort_fields(&latest),
                confidences: confidences(policy, group.count, 0, total),
            }
        })
        .collect()
}

pub async fn publish(ctx: &mut RunContext, input: &TaskInput) -> PublishResult<AggregateOutcome> {
    let task_id = input.task.id;

    let field_sets = input
        .annotations
        .iter()
        .map(|annotation| {
            parse_fields(&annotation.value)
                .ok_or_else(|| invalid(annotation, "\"values\" must be a non-empty list of fields"))
        })
        .collect::<PublishResult<Vec<_>>>()?;

    let groups = group_field_sets(field_sets, &ctx.entity_order, ctx.policy);
    if groups.len() > 1 {
        ctx.log.warning(format!(
            "Differing sets of entities were found on annotations from task {}",
            task_id
        ));
    }

    let log_hint = format!("from the annotations on the task {}", task_id);
    let mut failed = 0;
    let mut skipped = 0;
    let mut published = 0;

    for group in &groups {
        let forged = forge(&group.fields);

        if forged.all_empty() {
            ctx.log.warning(format!(
                "All {} entities from the annotations on the task {} are empty, publishing a {} transcription in replacement",
                forged.field_count, task_id, EMPTY_SET_CHARACTER
            ));
        } else {
            for field in group.fields.iter().filter(|f| field_value(f).is_empty()) {
                ctx.log.warning(format!(
                    "Skipping the entity of type {} from the annotations on the task {} as it is empty",
                    str_field(field, "entity_type").unwrap_or_default(),
                    task_id
                ));
            }
            skipped += forged.empty_fields * group.confidences.len();
        }

        for &confidence in &group.confidences {
            let element_id = &input.element.provider_object_id;
            if publish_forged(ctx, element_id, &forged, confidence, &log_hint).await {
                published += 1;
            } else {
                failed += 1;
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

    Ok(AggregateOutcome::Published { records: published })
}
