//! Concatenation of entity form results onto parent elements
//!
//! Runs after the task loop of EntityForm campaigns configured with a
//! parent type. For every element of that type, the good annotation of each
//! annotated descendant is forged into text; the texts are joined line by
//! line and published as one transcription of the parent, entities included.
//!
//! Nothing here flags annotations: failures are logged and the run goes on.

use serde_json::Value;
use std::collections::HashSet;

use super::aggregators::entity_form::{forge, forge_many, parse_fields, publish_forged};
use super::entity_order::EntityOrder;
use super::{RunContext, CHUNK_SIZE};
use crate::db;
use crate::db::elements::ParentCursor;
use crate::db::tasks::LatestAnnotation;
use crate::error::PublishResult;
use crate::models::{Element, ExternalTypeMapping};

/// What happened to one parent element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentOutcome {
    Published,
    /// Not attempted: no annotated child, mixed child types or a child
    /// without a good annotation
    Skipped,
    /// Attempted; at least one call was rejected
    Failed,
}

/// Outcome counts of a concatenation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConcatenationReport {
    pub published: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Choose the annotation of a child to concatenate
///
/// Candidates are latest annotations, most recent assignment first.
/// Validated assignments are preferred over annotated ones, then any other;
/// the first structurally valid value wins. Returns its fields sorted and
/// the number of valid candidates.
pub fn select_good_annotation(
    candidates: &[LatestAnnotation],
    order: &EntityOrder,
) -> (Option<Vec<Value>>, usize) {
    let mut ranked: Vec<&LatestAnnotation> = candidates.iter().collect();
    ranked.sort_by_key(|c| c.assignment_state.preference());

    let mut valid = ranked
        .into_iter()
        .filter_map(|c| parse_fields(&c.annotation.value));

    let good = valid.next().map(|fields| order.sort_fields(&fields));
    let count = good.as_ref().map(|_| 1 + valid.count()).unwrap_or(0);
    (good, count)
}

/// Second publication pass of EntityForm campaigns
pub struct ParentConcatenator {
    parent_type: ExternalTypeMapping,
}

impl ParentConcatenator {
    pub fn new(parent_type: ExternalTypeMapping) -> Self {
        Self { parent_type }
    }

    /// Publish concatenated results on every parent of the configured type
    pub async fn publish_on_parents(
        &self,
        ctx: &mut RunContext,
    ) -> PublishResult<ConcatenationReport> {
        ctx.log.info(format!(
            "Starting to export entities in concatenated transcriptions on the chosen parent type {}",
            self.parent_type.name
        ));

        let mut cursor =
            ParentCursor::new(ctx.campaign.project_id, self.parent_type.id, CHUNK_SIZE);
        let mut report = ConcatenationReport::default();

        loop {
            let parents = cursor.next_chunk(&ctx.db).await?;
            if parents.is_empty() {
                break;
            }

            for parent in &parents {
                match self.publish_parent(ctx, parent).await? {
                    ParentOutcome::Published => report.published += 1,
                    ParentOutcome::Skipped => report.skipped += 1,
                    ParentOutcome::Failed => report.failed += 1,
                }
            }
        }

        tracing::info!(
            parent_type = %self.parent_type.name,
            published = report.published,
            skipped = report.skipped,
            failed = report.failed,
            "Concatenation pass finished"
        );

        Ok(report)
    }

    async fn publish_parent(
        &self,
        ctx: &mut RunContext,
        parent: &Element,
    ) -> PublishResult<ParentOutcome> {
        let type_name = &self.parent_type.name;
        let children =
            db::elements::load_campaign_descendants(&ctx.db, parent.id, ctx.campaign.id).await?;

        if children.is_empty() {
            ctx.log.warning(format!(
                "Skipping the {} parent {} as no annotated child elements were found on it",
                type_name, parent.id
            ));
            return Ok(ParentOutcome::Skipped);
        }

        let child_types: HashSet<_> = children.iter().map(|c| c.element.type_id).collect();
        if child_types.len() > 1 {
            ctx.log.error(format!(
                "Skipping the {} parent {} as multiple children types to concatenate were found",
                type_name, parent.id
            ));
            return Ok(ParentOutcome::Skipped);
        }

        let mut forged = Vec::with_capacity(children.len());
        for child in &children {
            let candidates =
                db::tasks::load_latest_annotations(&ctx.db, child.task_id, &ctx.exported_states)
                    .await?;

            for candidate in &candidates {
                if parse_fields(&candidate.annotation.value).is_none() {
                    ctx.log.debug(format!(
                        "Skipping annotation {} on child {} as it holds an invalid value",
                        candidate.annotation.id, child.element.id
                    ));
                }
            }

            let (good, valid) = select_good_annotation(&candidates, &ctx.entity_order);
            let Some(fields) = good else {
                ctx.log.warning(format!(
                    "Couldn't find a good annotation on the child {} to concatenate and publish on its {} parent {}",
                    child.element.id, type_name, parent.id
                ));
                ctx.log.error(format!(
                    "Skipping the {} parent {} as at least one child was missing an annotation to concatenate",
                    type_name, parent.id
                ));
                return Ok(ParentOutcome::Skipped);
            };

            if valid > 1 {
                ctx.log.warning(format!(
                    "Found multiple good annotations on the child {} to concatenate and publish on its {} parent {}",
                    child.element.id, type_name, parent.id
                ));
            }

            forged.push(forge(&fields));
        }

        let joined = forge_many(&forged);
        let log_hint = format!(
            "forged from {} concatenated annotations to publish on the {} parent {}",
            forged.len(),
            type_name,
            parent.id
        );

        let published =
            publish_forged(ctx, &parent.provider_object_id, &joined, 1.0, &log_hint).await;

        if joined.empty_fields > 0 {
            ctx.log.info(format!(
                "Skipped {} empty entities from the concatenated annotations to publish on the {} parent {}",
                joined.empty_fields, type_name, parent.id
            ));
        }

        Ok(if published {
            ParentOutcome::Published
        } else {
            ParentOutcome::Failed
        })
    }
}
