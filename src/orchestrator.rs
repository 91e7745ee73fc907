use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ExportConfig;
use crate::error::{ExportError, FailureKind};
use crate::export::ExportOps;
use crate::source_ids;
use crate::state_machine::{
    Change, FollowUp, JobPatch, JobRecord, Route, Stage, StageEvent, StageMachine, Worker,
};
use crate::store::JobStore;
use crate::workorder::{ExportMapper, ExportPayload, WorkOrderId, WorkOrderSource};

/// Everything one notification caused.
#[derive(Debug)]
pub struct StepReport {
    pub route: Route,
    /// Committed writes, in order. Each is a notification for the trigger.
    pub changes: Vec<Change>,
    pub follow_up: FollowUp,
}

/// Writes and follow-up of a step, before the route is attached.
struct Step {
    changes: Vec<Change>,
    follow_up: FollowUp,
}

impl StepReport {
    /// The stage the record was left in, if anything was written.
    pub fn final_stage(&self) -> Option<Stage> {
        self.changes.last().map(|c| c.after.stage)
    }
}

/// Performs at most one unit of stage work per notification and commits
/// its result as a single write.
pub struct JobOrchestrator<S, R, E> {
    store: Arc<S>,
    source: R,
    export: E,
    config: ExportConfig,
}

impl<S, R, E> JobOrchestrator<S, R, E>
where
    S: JobStore,
    R: WorkOrderSource,
    E: ExportOps,
{
    pub fn new(store: Arc<S>, source: R, export: E, config: ExportConfig) -> Self {
        Self {
            store,
            source,
            export,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    #[cfg(test)]
    pub(crate) fn source(&self) -> &R {
        &self.source
    }

    #[cfg(test)]
    pub(crate) fn export(&self) -> &E {
        &self.export
    }

    /// React to one update notification.
    pub async fn handle(&self, event: &StageEvent) -> Result<StepReport, ExportError> {
        let route = StageMachine::route(event);
        let step = match route {
            Route::Ignore(reason) => {
                debug!(job_id = %event.job_id, ?reason, stage = %event.new_stage(), "notification ignored");
                Step {
                    changes: Vec::new(),
                    follow_up: FollowUp::Done,
                }
            }
            Route::BuildPayload => self.build_payload(event.job_id).await?,
            Route::Work(worker) => self.run_worker(event.job_id, worker).await?,
        };
        Ok(StepReport {
            route,
            changes: step.changes,
            follow_up: step.follow_up,
        })
    }

    async fn build_payload(&self, job_id: Uuid) -> Result<Step, ExportError> {
        let record = self.store.get(job_id).await?;
        let parsed = match source_ids::parse_batch(&record.source_ids, self.config.max_source_ids) {
            Ok(parsed) => parsed,
            Err(e) => return self.fail(job_id, FailureKind::Validation, e.into()).await,
        };
        if parsed.skipped > 0 {
            warn!(%job_id, skipped = parsed.skipped, "unreadable sourceIds entries skipped");
        }

        match self.collect_payload(job_id, &parsed.ids).await {
            Ok(payload) => {
                let patch = StageMachine::payload_built(payload, parsed.len(), Utc::now());
                self.commit(job_id, Vec::new(), patch, FollowUp::Done).await
            }
            Err(e) => self.fail(job_id, FailureKind::Retrieval, e).await,
        }
    }

    /// Retrieve and map every work order; any failure abandons the batch.
    async fn collect_payload(&self, job_id: Uuid, ids: &[WorkOrderId]) -> anyhow::Result<String> {
        let mut work_orders = Vec::with_capacity(ids.len());
        for &id in ids {
            let data = self
                .source
                .fetch(id)
                .await
                .with_context(|| format!("retrieving work order {id}"))?;
            let model =
                ExportMapper::map(id, data).with_context(|| format!("mapping work order {id}"))?;
            work_orders.push(model);
        }
        let payload = ExportPayload {
            job_id,
            generated_at: Utc::now(),
            work_orders,
        };
        Ok(serde_json::to_string(&payload)?)
    }

    async fn run_worker(&self, job_id: Uuid, worker: Worker) -> Result<Step, ExportError> {
        let mut changes = Vec::new();
        let result = match worker {
            Worker::Merge => self.merge_step(job_id).await,
            Worker::Zip => self.zip_step(job_id, &mut changes).await,
            Worker::Cleanup => self.cleanup_step(job_id, &mut changes).await,
        };
        match result {
            Ok((patch, follow_up)) => self.commit(job_id, changes, patch, follow_up).await,
            Err(e) => {
                let mut step = self.fail(job_id, FailureKind::Worker, e).await?;
                changes.append(&mut step.changes);
                step.changes = changes;
                Ok(step)
            }
        }
    }

    async fn merge_step(&self, job_id: Uuid) -> anyhow::Result<(JobPatch, FollowUp)> {
        let record = self.store.get(job_id).await?;
        let ids = self.batch_ids(&record)?;
        let start = record.next_merge_index.min(ids.len());
        let batch = self.config.merge_batch_size;

        self.export
            .update_heartbeat(job_id, &format!("Merging work orders from {start} of {}", ids.len()))
            .await?;
        let reported = self
            .export
            .merge_batch(job_id, &ids, start, batch)
            .await
            .with_context(|| format!("merging work orders {start}..{}", start + batch))?;

        Ok(StageMachine::merge_progress(&record, ids.len(), reported, Utc::now()))
    }

    async fn zip_step(
        &self,
        job_id: Uuid,
        changes: &mut Vec<Change>,
    ) -> anyhow::Result<(JobPatch, FollowUp)> {
        let mode = self.config.storage_mode;
        changes.push(self.mark(job_id, Stage::ZipInProgress, "Building final archive").await?);
        let record = self.store.get(job_id).await?;
        let ids = self.batch_ids(&record)?;

        self.export
            .create_and_persist_final_archive(job_id, &ids, mode)
            .await
            .context("creating final archive")?;
        let present = self
            .export
            .is_final_archive_present(job_id, mode)
            .await
            .context("checking final archive")?;
        if !present {
            warn!(%job_id, ?mode, "final archive not confirmed after creation, holding stage");
        }
        Ok(StageMachine::zip_outcome(&record, present, Utc::now()))
    }

    async fn cleanup_step(
        &self,
        job_id: Uuid,
        changes: &mut Vec<Change>,
    ) -> anyhow::Result<(JobPatch, FollowUp)> {
        let mode = self.config.storage_mode;
        changes.push(
            self.mark(job_id, Stage::CleanupInProgress, "Removing intermediate artifacts")
                .await?,
        );

        self.export
            .cleanup_intermediate_artifacts(job_id, mode)
            .await
            .context("removing intermediate artifacts")?;
        let present = self
            .export
            .is_final_archive_present(job_id, mode)
            .await
            .context("checking final archive")?;
        if !present {
            warn!(%job_id, ?mode, "final archive missing after cleanup, rolling back to zip");
        }
        Ok(StageMachine::cleanup_outcome(present, Utc::now()))
    }

    /// Move into a worker's in-progress stage before doing its work.
    async fn mark(&self, job_id: Uuid, stage: Stage, message: &str) -> Result<Change, ExportError> {
        let patch = JobPatch::heartbeat(Utc::now(), message).with_stage(stage);
        self.store.update(job_id, &patch).await
    }

    fn batch_ids(&self, record: &JobRecord) -> Result<Vec<WorkOrderId>, ExportError> {
        Ok(source_ids::parse_batch(&record.source_ids, self.config.max_source_ids)?.ids)
    }

    async fn commit(
        &self,
        job_id: Uuid,
        mut changes: Vec<Change>,
        patch: JobPatch,
        follow_up: FollowUp,
    ) -> Result<Step, ExportError> {
        let change = self.store.update(job_id, &patch).await?;
        info!(
            %job_id,
            from = %change.before.stage,
            to = %change.after.stage,
            done = change.after.done_units,
            total = change.after.total_units,
            ?follow_up,
            "{}",
            change.after.progress_message
        );
        changes.push(change);
        Ok(Step { changes, follow_up })
    }

    /// Record a failure on the job: stage `Error` plus the truncated cause chain.
    async fn fail(
        &self,
        job_id: Uuid,
        kind: FailureKind,
        err: anyhow::Error,
    ) -> Result<Step, ExportError> {
        error!(%job_id, %kind, error = %format!("{err:#}"), "export step failed");
        let detail = format!("{err:?}");
        let patch = StageMachine::failed(kind, &detail, self.config.error_message_limit, Utc::now());
        self.commit(job_id, Vec::new(), patch, FollowUp::Done).await
    }
}
