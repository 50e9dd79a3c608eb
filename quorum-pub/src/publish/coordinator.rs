//! Publication run coordinator
//!
//! A run goes through three stages:
//! 1. `start`: configuration checks, process record, campaign lock
//! 2. corpus references: classes, element types or entity types, depending
//!    on the mode (fatal when nothing matches)
//! 3. the task loop, then the concatenation pass of EntityForm campaigns
//!
//! The lock is always released and the process always ends in a final state,
//! whatever happened after `start`.

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use quorum_common::events::{EventBus, QuorumEvent};

use super::aggregators::{AggregateOutcome, Aggregator, TaskInput};
use super::concatenation::{ConcatenationReport, ParentConcatenator};
use super::type_resolver::ExternalTypeResolver;
use super::{RunContext, CHUNK_SIZE};
use crate::config::PublicationConfig;
use crate::db;
use crate::db::tasks::TaskCursor;
use crate::error::{PublishError, PublishResult};
use crate::models::{CampaignMode, ProcessState, Task, PROCESS_MODE_CORPUS_EXPORT};
use crate::services::CorpusApi;

/// What happened to one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Every record was accepted and the latest annotations are flagged
    Published,
    /// Not attempted (already published, or nothing to anchor on)
    Skipped,
    /// Attempted and not flagged; a later run will retry it
    Failed,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Published => "published",
            TaskOutcome::Skipped => "skipped",
            TaskOutcome::Failed => "failed",
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub process_id: Uuid,
    pub published: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Per-task outcomes, in processing order
    pub outcomes: Vec<(Uuid, TaskOutcome)>,
    pub concatenation: Option<ConcatenationReport>,
    /// Fatal error that aborted the run
    pub error: Option<String>,
}

impl RunReport {
    fn new(process_id: Uuid) -> Self {
        Self {
            process_id,
            published: 0,
            skipped: 0,
            failed: 0,
            outcomes: Vec::new(),
            concatenation: None,
            error: None,
        }
    }

    fn record(&mut self, task_id: Uuid, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Published => self.published += 1,
            TaskOutcome::Skipped => self.skipped += 1,
            TaskOutcome::Failed => self.failed += 1,
        }
        self.outcomes.push((task_id, outcome));
    }

    pub fn outcome(&self, task_id: Uuid) -> Option<TaskOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == task_id)
            .map(|(_, outcome)| *outcome)
    }
}

/// Run that passed `start`: its process exists and it holds the campaign lock
pub struct PreparedRun {
    pub process_id: Uuid,
    pub campaign_id: Uuid,
    ctx: RunContext,
    concatenation_parent_type: Option<Uuid>,
}

/// Publication entry point
#[derive(Clone)]
pub struct PublicationCoordinator {
    db: SqlitePool,
    client: Arc<dyn CorpusApi>,
    event_bus: EventBus,
}

impl PublicationCoordinator {
    pub fn new(db: SqlitePool, client: Arc<dyn CorpusApi>, event_bus: EventBus) -> Self {
        Self {
            db,
            client,
            event_bus,
        }
    }

    /// Start and execute a run in one go
    pub async fn publish(
        &self,
        campaign_id: Uuid,
        config: PublicationConfig,
    ) -> PublishResult<RunReport> {
        let run = self.start(campaign_id, config).await?;
        self.execute(run).await
    }

    /// Check the configuration, create the process and take the campaign lock
    ///
    /// Fails with `NotFound`, `Configuration` or `RunInProgress`. A process
    /// refused because of the lock is still recorded, in the error state.
    pub async fn start(
        &self,
        campaign_id: Uuid,
        config: PublicationConfig,
    ) -> PublishResult<PreparedRun> {
        let campaign = db::campaigns::load_campaign(&self.db, campaign_id)
            .await?
            .ok_or_else(|| PublishError::NotFound(format!("Campaign not found: {}", campaign_id)))?;

        config.validate(campaign.mode)?;

        let process = db::processes::create_process(
            &self.db,
            &format!("Export of campaign {}", campaign.name),
            PROCESS_MODE_CORPUS_EXPORT,
            campaign.project_id,
            &serde_json::to_value(&config)?,
        )
        .await?;

        let mut ctx = RunContext::new(
            self.db.clone(),
            self.client.clone(),
            campaign,
            process.id,
            &config,
        );

        if let Err(e) =
            db::locks::acquire_publication_lock(&self.db, campaign_id, process.id).await
        {
            ctx.log.error(e.to_string());
            db::processes::append_logs(&self.db, process.id, &ctx.log.take_unflushed()).await?;
            db::processes::mark_finished(&self.db, process.id, ProcessState::Error).await?;
            return Err(e);
        }

        tracing::info!(
            process_id = %process.id,
            campaign_id = %campaign_id,
            mode = %ctx.campaign.mode,
            "Publication run prepared"
        );

        Ok(PreparedRun {
            process_id: process.id,
            campaign_id,
            ctx,
            concatenation_parent_type: config.concatenation_parent_type,
        })
    }

    /// Run a prepared publication to its end
    ///
    /// Fatal errors end the process in the error state and are reported in
    /// `RunReport::error`; only failures to record the outcome are returned
    /// as `Err`.
    pub async fn execute(&self, run: PreparedRun) -> PublishResult<RunReport> {
        let PreparedRun {
            process_id,
            campaign_id,
            mut ctx,
            concatenation_parent_type,
        } = run;

        let mut report = RunReport::new(process_id);

        // Everything between here and the outcome bookkeeping must feed `result`,
        // otherwise the campaign lock outlives the run
        let result = match db::processes::mark_running(&self.db, process_id).await {
            Ok(()) => {
                ctx.log.info(format!(
                    "Publishing the {} annotations of campaign \"{}\" on the corpus {}",
                    ctx.campaign.mode, ctx.campaign.name, ctx.corpus_id
                ));
                self.event_bus.emit_lossy(QuorumEvent::PublicationStarted {
                    process_id,
                    campaign_id,
                    mode: ctx.campaign.mode.to_string(),
                    timestamp: Utc::now(),
                });
                self.run(&mut ctx, concatenation_parent_type, &mut report)
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            ctx.log.error(e.to_string());
            report.error = Some(e.to_string());
        } else {
            ctx.log.info(format!(
                "Publication finished: {} tasks published, {} skipped, {} failed",
                report.published, report.skipped, report.failed
            ));
        }

        // Record the outcome even when the run itself broke
        let flushed =
            db::processes::append_logs(&self.db, process_id, &ctx.log.take_unflushed()).await;
        let released =
            db::locks::release_publication_lock(&self.db, campaign_id, process_id).await;
        let state = if result.is_ok() {
            ProcessState::Completed
        } else {
            ProcessState::Error
        };
        let finished = db::processes::mark_finished(&self.db, process_id, state).await;

        match &report.error {
            Some(error) => self.event_bus.emit_lossy(QuorumEvent::PublicationFailed {
                process_id,
                error: error.clone(),
                timestamp: Utc::now(),
            }),
            None => self.event_bus.emit_lossy(QuorumEvent::PublicationCompleted {
                process_id,
                published: report.published,
                skipped: report.skipped,
                failed: report.failed,
                timestamp: Utc::now(),
            }),
        }

        tracing::info!(
            process_id = %process_id,
            published = report.published,
            skipped = report.skipped,
            failed = report.failed,
            state = state.as_str(),
            "Publication run ended"
        );

        flushed?;
        if !released? {
            tracing::warn!(
                process_id = %process_id,
                campaign_id = %campaign_id,
                "Publication lock was not held at the end of the run"
            );
        }
        finished?;

        Ok(report)
    }

    async fn run(
        &self,
        ctx: &mut RunContext,
        concatenation_parent_type: Option<Uuid>,
        report: &mut RunReport,
    ) -> PublishResult<()> {
        let concatenator = self
            .load_references(ctx, concatenation_parent_type)
            .await?;

        let aggregator = Aggregator::for_mode(ctx.campaign.mode);
        let mut cursor = TaskCursor::new(ctx.campaign.id, CHUNK_SIZE);

        loop {
            let chunk = cursor.next_chunk(&self.db).await?;
            if chunk.is_empty() {
                break;
            }

            for task in chunk {
                let task_id = task.id;
                let Some(outcome) = self.process_task(ctx, aggregator, task).await? else {
                    continue;
                };

                report.record(task_id, outcome);
                self.event_bus.emit_lossy(QuorumEvent::TaskProcessed {
                    process_id: ctx.process_id,
                    task_id,
                    outcome: outcome.as_str().to_string(),
                    timestamp: Utc::now(),
                });
            }

            db::processes::append_logs(&self.db, ctx.process_id, &ctx.log.take_unflushed())
                .await?;
        }

        if let Some(concatenator) = concatenator {
            report.concatenation = Some(concatenator.publish_on_parents(ctx).await?);
        }

        Ok(())
    }

    /// Publish one task; None when it has no eligible annotation
    async fn process_task(
        &self,
        ctx: &mut RunContext,
        aggregator: Aggregator,
        task: Task,
    ) -> PublishResult<Option<TaskOutcome>> {
        let latest =
            db::tasks::load_latest_annotations(&self.db, task.id, &ctx.exported_states).await?;
        if latest.is_empty() {
            return Ok(None);
        }

        if !ctx.force_republication && latest.iter().any(|l| l.annotation.published) {
            ctx.log.info(format!(
                "Skipping the task {} as at least one of its latest version annotations has already been published",
                task.id
            ));
            return Ok(Some(TaskOutcome::Skipped));
        }

        let Some(element) = db::elements::load_element(&self.db, task.element_id).await? else {
            ctx.log.error(format!(
                "Skipping the task {} as its element {} does not exist",
                task.id, task.element_id
            ));
            return Ok(Some(TaskOutcome::Failed));
        };

        let input = TaskInput {
            task,
            element,
            annotations: latest.into_iter().map(|l| l.annotation).collect(),
        };

        let outcome = match aggregator.publish(ctx, &input).await? {
            AggregateOutcome::Published { records } => {
                let ids: Vec<Uuid> = input.annotations.iter().map(|a| a.id).collect();
                db::tasks::mark_published(&self.db, &ids).await?;
                tracing::debug!(
                    task_id = %input.task.id,
                    records,
                    annotations = ids.len(),
                    "Task published"
                );
                TaskOutcome::Published
            }
            AggregateOutcome::Skipped => TaskOutcome::Skipped,
            AggregateOutcome::Failed => TaskOutcome::Failed,
        };

        Ok(Some(outcome))
    }

    /// Load what the mode needs from the corpus; fatal when nothing usable
    async fn load_references(
        &self,
        ctx: &mut RunContext,
        concatenation_parent_type: Option<Uuid>,
    ) -> PublishResult<Option<ParentConcatenator>> {
        let mode = ctx.campaign.mode;
        let project_id = ctx.campaign.project_id;

        match mode {
            CampaignMode::Classification => {
                let ml_classes = match self.client.list_ml_classes(&ctx.corpus_id).await {
                    Ok(classes) => classes,
                    Err(e) => {
                        ctx.log.error(format!(
                            "Failed to retrieve available classes on the corpus {}: {}",
                            ctx.corpus_id, e
                        ));
                        Vec::new()
                    }
                };
                let external: HashSet<String> = ml_classes.into_iter().map(|c| c.id).collect();

                ctx.allowed_classes =
                    db::external_types::load_provider_classes(&self.db, project_id, &ctx.provider)
                        .await?
                        .into_iter()
                        .filter(|c| external.contains(&c.provider_object_id))
                        .map(|c| (c.id.to_string(), c.provider_object_id))
                        .collect();

                if ctx.allowed_classes.is_empty() {
                    return Err(PublishError::Configuration(format!(
                        "No available matching class on the corpus {}, publication aborted",
                        ctx.corpus_id
                    )));
                }
            }
            CampaignMode::Entity | CampaignMode::EntityForm => {
                let entity_types = match self.client.list_entity_types(&ctx.corpus_id).await {
                    Ok(types) => types,
                    Err(e) => {
                        ctx.log.error(format!(
                            "Failed to retrieve existing entity types on the corpus {}: {}",
                            ctx.corpus_id, e
                        ));
                        Vec::new()
                    }
                };
                ctx.entity_types = ExternalTypeResolver::new(ctx.corpus_id.clone(), entity_types);
            }
            CampaignMode::Elements | CampaignMode::ElementGroup => {
                let slugs: HashSet<String> = match self.client.retrieve_corpus(&ctx.corpus_id).await
                {
                    Ok(corpus) => corpus.types.into_iter().map(|t| t.slug).collect(),
                    Err(e) => {
                        ctx.log.error(format!(
                            "Failed to retrieve available types on the corpus {}: {}",
                            ctx.corpus_id, e
                        ));
                        HashSet::new()
                    }
                };

                ctx.allowed_element_types =
                    db::external_types::load_provider_types(&self.db, project_id, &ctx.provider)
                        .await?
                        .into_iter()
                        .filter(|t| slugs.contains(&t.provider_object_id))
                        .map(|t| (t.id.to_string(), t.provider_object_id))
                        .collect();

                if ctx.allowed_element_types.is_empty() {
                    return Err(PublishError::Configuration(format!(
                        "No available matching type on the corpus {}, publication aborted",
                        ctx.corpus_id
                    )));
                }

                if mode == CampaignMode::ElementGroup {
                    let group_type = ctx
                        .campaign
                        .group_type()
                        .and_then(|t| ctx.allowed_element_types.get(t))
                        .cloned();
                    if group_type.is_none() {
                        return Err(PublishError::Configuration(format!(
                            "The group type defined in the campaign configuration doesn't exist on the corpus {}, publication aborted",
                            ctx.corpus_id
                        )));
                    }
                    ctx.group_type = group_type;
                }
            }
            CampaignMode::Transcription => {}
        }

        let Some(parent_type_id) = concatenation_parent_type else {
            return Ok(None);
        };

        if mode != CampaignMode::EntityForm {
            ctx.log.warning(format!(
                "Ignoring the concatenation parent type {} as the campaign mode is {}",
                parent_type_id, mode
            ));
            return Ok(None);
        }

        let parent_type = db::external_types::load_type(&self.db, parent_type_id)
            .await?
            .ok_or_else(|| {
                PublishError::Configuration(format!(
                    "The concatenation parent type {} doesn't exist in the project, publication aborted",
                    parent_type_id
                ))
            })?;

        Ok(Some(ParentConcatenator::new(parent_type)))
    }
}
