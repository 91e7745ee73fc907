//! Delivery of update notifications to the orchestrator.
//!
//! Every committed write that changes a job's stage becomes a [`StageEvent`].
//! Writes made by an outside actor (the CLI, the client, the document flow,
//! the nudger) start a chain at depth 1; writes made while handling an event
//! are delivered at the next depth. Events are handled one at a time, each
//! under the job's lease.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ExportConfig;
use crate::error::ExportError;
use crate::export::ExportOps;
use crate::orchestrator::JobOrchestrator;
use crate::source_ids;
use crate::state_machine::{Change, FollowUp, JobPatch, JobRecord, Route, Stage, StageEvent, StageMachine};
use crate::store::JobStore;
use crate::workorder::WorkOrderSource;

/// What happened while draining one notification chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainSummary {
    /// Events that ran a step.
    pub steps: usize,
    pub ignored: usize,
    /// Events whose stage no longer matched the stored record.
    pub stale: usize,
    /// Events skipped because another process held the lease.
    pub contended: usize,
    /// Ready-stage writes made to continue a bounded step.
    pub rearmed: usize,
    /// Events dropped past the maximum chain depth.
    pub cut_off: usize,
    /// A consistency gate held the stage; the nudger picks it up later.
    pub retry_later: bool,
}

impl ChainSummary {
    fn absorb(&mut self, other: ChainSummary) {
        self.steps += other.steps;
        self.ignored += other.ignored;
        self.stale += other.stale;
        self.contended += other.contended;
        self.rearmed += other.rearmed;
        self.cut_off += other.cut_off;
        self.retry_later |= other.retry_later;
    }
}

pub struct Dispatcher<S, R, E> {
    store: Arc<S>,
    orchestrator: JobOrchestrator<S, R, E>,
    holder: String,
    lease_ttl: Duration,
    stall_after: chrono::Duration,
    max_chain_depth: u32,
}

impl<S, R, E> Dispatcher<S, R, E>
where
    S: JobStore,
    R: WorkOrderSource,
    E: ExportOps,
{
    pub fn new(orchestrator: JobOrchestrator<S, R, E>, config: &ExportConfig) -> Self {
        Self {
            store: orchestrator.store().clone(),
            orchestrator,
            holder: format!("woexport-{}-{}", std::process::id(), Uuid::new_v4().simple()),
            lease_ttl: config.lease_ttl(),
            stall_after: chrono::Duration::from_std(config.stall_after())
                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
            max_chain_depth: config.max_chain_depth,
        }
    }

    pub fn orchestrator(&self) -> &JobOrchestrator<S, R, E> {
        &self.orchestrator
    }

    /// Create a job for `source_ids` and play the client's part: claim it and
    /// hand it to the server.
    pub async fn submit(&self, source_ids: String) -> Result<(Uuid, ChainSummary), ExportError> {
        let count = source_ids::parse(&source_ids).map(|p| p.len()).unwrap_or(0);
        let record = JobRecord::new(source_ids, count);
        let job_id = record.id;
        self.store.insert(record).await?;
        info!(%job_id, work_orders = count, "job created");

        let mut summary = self.write_stage(job_id, Stage::ClientProcessing).await?;
        summary.absorb(self.write_stage(job_id, Stage::ReadyForServer).await?);
        Ok((job_id, summary))
    }

    /// An outside write of `stage`, delivered as a depth-1 notification.
    pub async fn write_stage(&self, job_id: Uuid, stage: Stage) -> Result<ChainSummary, ExportError> {
        let change = self.store.update(job_id, &JobPatch::stage(stage)).await?;
        self.deliver(StageEvent::from_change(change, 1)).await
    }

    /// Handle `event` and everything it causes.
    pub async fn deliver(&self, event: StageEvent) -> Result<ChainSummary, ExportError> {
        let mut summary = ChainSummary::default();
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let job_id = event.job_id;
            let depth = event.recursion_depth;
            if depth > self.max_chain_depth {
                warn!(%job_id, depth, stage = %event.new_stage(), "notification chain too deep, dropping event");
                summary.cut_off += 1;
                continue;
            }
            if let Route::Ignore(reason) = StageMachine::route(&event) {
                debug!(%job_id, depth, ?reason, "notification ignored");
                summary.ignored += 1;
                continue;
            }

            if !self.store.try_acquire_lease(job_id, &self.holder, self.lease_ttl).await? {
                warn!(%job_id, stage = %event.new_stage(), "job leased by another process, skipping");
                summary.contended += 1;
                continue;
            }

            let result = self.run_leased(&event).await;
            let released = self.store.release_lease(job_id, &self.holder).await;
            let outcome = result?;
            released?;

            let Some((events, follow_up, rearmed)) = outcome else {
                summary.stale += 1;
                continue;
            };

            summary.steps += 1;
            if rearmed {
                summary.rearmed += 1;
            }
            if follow_up == FollowUp::RetryLater {
                info!(%job_id, "consistency gate held, waiting for the nudger");
                summary.retry_later = true;
            }
            queue.extend(events);
        }
        Ok(summary)
    }

    /// Re-read the record under the lease and run the step if `event` still
    /// describes its stage. `None` means the event was stale.
    async fn run_leased(
        &self,
        event: &StageEvent,
    ) -> Result<Option<(Vec<StageEvent>, FollowUp, bool)>, ExportError> {
        let current = self.store.get(event.job_id).await?;
        if current.stage != event.new_stage() {
            debug!(
                job_id = %event.job_id,
                depth = event.recursion_depth,
                event_stage = %event.new_stage(),
                stored = %current.stage,
                "stale notification dropped"
            );
            return Ok(None);
        }
        self.run_step(event).await.map(Some)
    }

    /// One orchestrator step, plus the ready-stage write that keeps a bounded
    /// step going when it wrote no stage edge of its own.
    async fn run_step(&self, event: &StageEvent) -> Result<(Vec<StageEvent>, FollowUp, bool), ExportError> {
        let report = self.orchestrator.handle(event).await?;
        debug!(job_id = %event.job_id, route = ?report.route, follow_up = ?report.follow_up, "step finished");
        let depth = event.recursion_depth + 1;
        let needs_rearm = report.follow_up == FollowUp::Continue
            && report.changes.last().is_some_and(|c| !c.stage_changed());
        let final_stage = report.final_stage();

        let mut events: Vec<StageEvent> = report
            .changes
            .into_iter()
            .filter(Change::stage_changed)
            .map(|c| StageEvent::from_change(c, depth))
            .collect();

        let rearm_stage = final_stage.and_then(Stage::worker).map(|w| w.ready_stage());
        let mut rearmed = false;
        if let (true, Some(ready)) = (needs_rearm, rearm_stage) {
            debug!(job_id = %event.job_id, %ready, "re-arming bounded step");
            let change = self.store.update(event.job_id, &JobPatch::stage(ready)).await?;
            events.push(StageEvent::from_change(change, depth));
            rearmed = true;
        }
        Ok((events, report.follow_up, rearmed))
    }

    /// Re-arm worker stages whose heartbeat is older than `stall_after` and
    /// whose lease is free. An in-progress stage goes back to its ready
    /// stage; a ready stage nobody picked up moves to its in-progress stage.
    /// Both writes are edges that route to the worker.
    pub async fn nudge_stalled(&self, now: DateTime<Utc>) -> Result<Vec<(Uuid, ChainSummary)>, ExportError> {
        let mut nudged = Vec::new();
        for record in self.store.list().await? {
            if record.stage.worker().is_none() || !self.is_stalled(&record, now) {
                continue;
            }
            if !self.store.try_acquire_lease(record.id, &self.holder, self.lease_ttl).await? {
                debug!(job_id = %record.id, "stalled job still leased, leaving it");
                continue;
            }
            let result = self.rearm_stalled(record.id, now).await;
            let released = self.store.release_lease(record.id, &self.holder).await;
            let change = result?;
            released?;

            let Some(change) = change else {
                continue;
            };
            info!(
                job_id = %record.id,
                from = %change.before.stage,
                to = %change.after.stage,
                idle_secs = now.signed_duration_since(change.before.last_heartbeat).num_seconds(),
                "re-arming stalled job"
            );
            let summary = self.deliver(StageEvent::from_change(change, 1)).await?;
            nudged.push((record.id, summary));
        }
        Ok(nudged)
    }

    fn is_stalled(&self, record: &JobRecord, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(record.last_heartbeat) >= self.stall_after
    }

    /// The re-arm write, made under the job's lease against a fresh read.
    async fn rearm_stalled(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<Option<Change>, ExportError> {
        let current = self.store.get(job_id).await?;
        let Some(worker) = current.stage.worker() else {
            return Ok(None);
        };
        if !self.is_stalled(&current, now) {
            return Ok(None);
        }
        let target = if current.stage.is_in_progress() {
            worker.ready_stage()
        } else {
            worker.in_progress_stage()
        };
        self.store.update(job_id, &JobPatch::stage(target)).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{ExportService, archive, pdf};
    use crate::store::{Lease, MemoryJobStore};
    use crate::testing::{FakeExport, FakeSource, work_order_ids};
    use crate::workorder::WorkOrderId;
    use tempfile::TempDir;

    type TestDispatcher = Dispatcher<MemoryJobStore, FakeSource, FakeExport>;

    fn dispatcher_with(ids: &[WorkOrderId], config: ExportConfig) -> TestDispatcher {
        let store = Arc::new(MemoryJobStore::new());
        let orchestrator = JobOrchestrator::new(
            store.clone(),
            FakeSource::with(ids),
            FakeExport::new(store),
            config.clone(),
        );
        Dispatcher::new(orchestrator, &config)
    }

    fn export(d: &TestDispatcher) -> &FakeExport {
        d.orchestrator().export()
    }

    /// Submit a job and play the document flow up to `ReadyForMerge`.
    async fn submit_through_flow(d: &TestDispatcher, ids: &[WorkOrderId]) -> (Uuid, ChainSummary) {
        let (job_id, _) = d.submit(source_ids::to_json(ids)).await.unwrap();
        assert_eq!(d.store.get(job_id).await.unwrap().stage, Stage::ReadyForFlow);
        d.write_stage(job_id, Stage::FlowRunning).await.unwrap();
        let summary = d.write_stage(job_id, Stage::ReadyForMerge).await.unwrap();
        (job_id, summary)
    }

    #[tokio::test]
    async fn three_work_orders_run_to_completion() {
        let ids = work_order_ids(3);
        let d = dispatcher_with(&ids, ExportConfig::default());
        let (job_id, summary) = submit_through_flow(&d, &ids).await;

        let job = d.store.get(job_id).await.unwrap();
        assert_eq!(job.stage, Stage::Completed);
        assert_eq!(job.total_units, 4);
        assert_eq!(job.done_units, 4);
        assert_eq!(job.next_merge_index, 3);
        assert!(job.error_message.is_empty());
        assert_eq!(export(&d).merge_starts(), [0]);
        assert_eq!(export(&d).archives_created(), 1);
        assert_eq!(export(&d).cleanups(), 1);
        assert_eq!(summary.steps, 3);
        assert_eq!(summary.rearmed, 0);
        assert!(d.store.current_lease(job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bounded_merge_is_rearmed_until_done() {
        let ids = work_order_ids(12);
        let d = dispatcher_with(&ids, ExportConfig::default());
        let (job_id, summary) = submit_through_flow(&d, &ids).await;

        assert_eq!(export(&d).merge_starts(), [0, 5, 10]);
        assert_eq!(summary.rearmed, 1);
        let job = d.store.get(job_id).await.unwrap();
        assert_eq!(job.stage, Stage::Completed);
        assert_eq!(job.done_units, 13);
    }

    #[tokio::test]
    async fn build_payload_runs_once_per_edge() {
        let ids = work_order_ids(2);
        let d = dispatcher_with(&ids, ExportConfig::default());
        let (job_id, summary) = d.submit(source_ids::to_json(&ids)).await.unwrap();

        assert_eq!(d.orchestrator().source().fetches(), 2);
        assert_eq!(summary.steps, 1);
        assert!(summary.ignored >= 1);

        let again = d.write_stage(job_id, Stage::ReadyForFlow).await.unwrap();
        assert_eq!(again.steps, 0);
        assert_eq!(d.orchestrator().source().fetches(), 2);
    }

    #[tokio::test]
    async fn zip_gate_waits_for_the_nudger() {
        let ids = work_order_ids(2);
        let d = dispatcher_with(&ids, ExportConfig::default());
        export(&d).script_presence(&[false, false]);
        let (job_id, summary) = submit_through_flow(&d, &ids).await;

        assert!(summary.retry_later);
        let held = d.store.get(job_id).await.unwrap();
        assert_eq!(held.stage, Stage::ZipInProgress);
        assert_eq!(held.done_units, 2);
        assert_eq!(export(&d).archives_created(), 2);

        assert!(d.nudge_stalled(Utc::now()).await.unwrap().is_empty());

        let later = Utc::now() + chrono::Duration::minutes(10);
        let nudged = d.nudge_stalled(later).await.unwrap();
        assert_eq!(nudged.len(), 1);
        assert_eq!(nudged[0].0, job_id);
        let job = d.store.get(job_id).await.unwrap();
        assert_eq!(job.stage, Stage::Completed);
        assert_eq!(job.done_units, 3);
    }

    #[tokio::test]
    async fn nudger_leaves_leased_jobs_alone() {
        let ids = work_order_ids(1);
        let d = dispatcher_with(&ids, ExportConfig::default());
        export(&d).script_presence(&[false, false]);
        let (job_id, _) = submit_through_flow(&d, &ids).await;

        d.store
            .try_acquire_lease(job_id, "other", Duration::from_secs(3600))
            .await
            .unwrap();
        let later = Utc::now() + chrono::Duration::minutes(10);
        assert!(d.nudge_stalled(later).await.unwrap().is_empty());
        assert_eq!(d.store.get(job_id).await.unwrap().stage, Stage::ZipInProgress);
    }

    #[tokio::test]
    async fn cleanup_rollback_rebuilds_archive() {
        let ids = work_order_ids(3);
        let d = dispatcher_with(&ids, ExportConfig::default());
        export(&d).script_presence(&[true, false]);
        let (job_id, _) = submit_through_flow(&d, &ids).await;

        assert_eq!(export(&d).archives_created(), 2);
        assert_eq!(export(&d).cleanups(), 2);
        let job = d.store.get(job_id).await.unwrap();
        assert_eq!(job.stage, Stage::Completed);
        assert_eq!(job.done_units, 4);
    }

    #[tokio::test]
    async fn stale_notification_is_dropped() {
        let ids = work_order_ids(1);
        let d = dispatcher_with(&ids, ExportConfig::default());
        let (job_id, _) = d.submit(source_ids::to_json(&ids)).await.unwrap();
        d.write_stage(job_id, Stage::FlowRunning).await.unwrap();

        let before = d.store.get(job_id).await.unwrap();
        let mut after = before.clone();
        after.stage = Stage::ReadyForMerge;
        let summary = d
            .deliver(StageEvent::from_change(Change { before, after }, 1))
            .await
            .unwrap();
        assert_eq!(summary.stale, 1);
        assert_eq!(export(&d).calls(), 0);
    }

    #[tokio::test]
    async fn contended_lease_skips_the_step() {
        let ids = work_order_ids(1);
        let d = dispatcher_with(&ids, ExportConfig::default());
        let (job_id, _) = d.submit(source_ids::to_json(&ids)).await.unwrap();
        d.write_stage(job_id, Stage::FlowRunning).await.unwrap();
        d.store
            .try_acquire_lease(job_id, "other", Duration::from_secs(60))
            .await
            .unwrap();

        let summary = d.write_stage(job_id, Stage::ReadyForMerge).await.unwrap();
        assert_eq!(summary.contended, 1);
        assert_eq!(export(&d).calls(), 0);
        assert_eq!(d.store.get(job_id).await.unwrap().stage, Stage::ReadyForMerge);
    }

    #[tokio::test]
    async fn nudger_picks_up_a_ready_stage_dropped_on_contention() {
        let ids = work_order_ids(2);
        let d = dispatcher_with(&ids, ExportConfig::default());
        let (job_id, _) = d.submit(source_ids::to_json(&ids)).await.unwrap();
        d.write_stage(job_id, Stage::FlowRunning).await.unwrap();
        d.store
            .try_acquire_lease(job_id, "other", Duration::from_secs(60))
            .await
            .unwrap();
        let summary = d.write_stage(job_id, Stage::ReadyForMerge).await.unwrap();
        assert_eq!(summary.contended, 1);
        d.store.release_lease(job_id, "other").await.unwrap();

        assert!(d.nudge_stalled(Utc::now()).await.unwrap().is_empty());
        assert_eq!(d.store.get(job_id).await.unwrap().stage, Stage::ReadyForMerge);

        let later = Utc::now() + chrono::Duration::hours(2);
        let nudged = d.nudge_stalled(later).await.unwrap();
        assert_eq!(nudged.len(), 1);
        assert_eq!(nudged[0].0, job_id);
        let job = d.store.get(job_id).await.unwrap();
        assert_eq!(job.stage, Stage::Completed);
        assert_eq!(export(&d).merge_starts(), [0]);
        assert!(d.store.current_lease(job_id).await.unwrap().is_none());
    }

    /// Store that lets another writer move the job to `advance_to` at the
    /// moment the lease is requested.
    struct RacingStore {
        inner: Arc<MemoryJobStore>,
        advance_to: std::sync::Mutex<Option<Stage>>,
    }

    impl JobStore for RacingStore {
        async fn insert(&self, record: JobRecord) -> Result<(), ExportError> {
            self.inner.insert(record).await
        }

        async fn get(&self, id: Uuid) -> Result<JobRecord, ExportError> {
            self.inner.get(id).await
        }

        async fn update(&self, id: Uuid, patch: &JobPatch) -> Result<Change, ExportError> {
            self.inner.update(id, patch).await
        }

        async fn list(&self) -> Result<Vec<JobRecord>, ExportError> {
            self.inner.list().await
        }

        async fn put_archive(&self, id: Uuid, bytes: Vec<u8>) -> Result<(), ExportError> {
            self.inner.put_archive(id, bytes).await
        }

        async fn read_archive(&self, id: Uuid) -> Result<Option<Vec<u8>>, ExportError> {
            self.inner.read_archive(id).await
        }

        async fn try_acquire_lease(&self, id: Uuid, holder: &str, ttl: Duration) -> Result<bool, ExportError> {
            let advance = self.advance_to.lock().unwrap().take();
            if let Some(stage) = advance {
                self.inner.update(id, &JobPatch::stage(stage)).await?;
            }
            self.inner.try_acquire_lease(id, holder, ttl).await
        }

        async fn release_lease(&self, id: Uuid, holder: &str) -> Result<(), ExportError> {
            self.inner.release_lease(id, holder).await
        }

        async fn current_lease(&self, id: Uuid) -> Result<Option<Lease>, ExportError> {
            self.inner.current_lease(id).await
        }
    }

    #[tokio::test]
    async fn stage_is_compared_after_the_lease_is_taken() {
        let ids = work_order_ids(1);
        let inner = Arc::new(MemoryJobStore::new());
        let store = Arc::new(RacingStore {
            inner: inner.clone(),
            advance_to: std::sync::Mutex::new(None),
        });
        let config = ExportConfig::default();
        let orchestrator = JobOrchestrator::new(
            store.clone(),
            FakeSource::with(&ids),
            FakeExport::new(inner.clone()),
            config.clone(),
        );
        let d = Dispatcher::new(orchestrator, &config);
        let (job_id, _) = d.submit(source_ids::to_json(&ids)).await.unwrap();
        d.write_stage(job_id, Stage::FlowRunning).await.unwrap();

        *store.advance_to.lock().unwrap() = Some(Stage::Error);
        let summary = d.write_stage(job_id, Stage::ReadyForMerge).await.unwrap();

        assert_eq!(summary.stale, 1);
        assert_eq!(summary.steps, 0);
        assert_eq!(d.orchestrator().export().calls(), 0);
        assert_eq!(inner.get(job_id).await.unwrap().stage, Stage::Error);
        assert!(inner.current_lease(job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chain_depth_is_bounded() {
        let ids = work_order_ids(20);
        let config = ExportConfig {
            max_chain_depth: 2,
            ..ExportConfig::default()
        };
        let d = dispatcher_with(&ids, config);
        let (job_id, summary) = submit_through_flow(&d, &ids).await;

        assert!(summary.cut_off >= 1);
        assert_eq!(export(&d).merge_starts(), [0, 5]);
        assert_ne!(d.store.get(job_id).await.unwrap().stage, Stage::Completed);
    }

    #[tokio::test]
    async fn failed_job_can_be_redriven() {
        let ids = work_order_ids(2);
        let d = dispatcher_with(&ids, ExportConfig::default());
        export(&d).fail_merges(true);
        let (job_id, _) = submit_through_flow(&d, &ids).await;
        let failed = d.store.get(job_id).await.unwrap();
        assert_eq!(failed.stage, Stage::Error);
        assert!(!failed.error_message.is_empty());

        export(&d).fail_merges(false);
        d.write_stage(job_id, Stage::ReadyForMerge).await.unwrap();
        let job = d.store.get(job_id).await.unwrap();
        assert_eq!(job.stage, Stage::Completed);
        assert!(job.error_message.is_empty());
    }

    #[tokio::test]
    async fn real_artifacts_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let ids = work_order_ids(3);
        let store = Arc::new(MemoryJobStore::new());
        let service = ExportService::new(store.clone(), tmp.path().join("artifacts"), tmp.path().join("attachments"));
        let config = ExportConfig::default();
        let orchestrator = JobOrchestrator::new(store.clone(), FakeSource::with(&ids), service, config.clone());
        let d = Dispatcher::new(orchestrator, &config);

        let (job_id, _) = d.submit(source_ids::to_json(&ids)).await.unwrap();
        d.write_stage(job_id, Stage::FlowRunning).await.unwrap();
        for &id in &ids {
            let dir = d.orchestrator().export().survey_dir(job_id, id);
            tokio::fs::create_dir_all(&dir).await.unwrap();
            tokio::fs::write(dir.join("summary.pdf"), pdf::blank_pdf(1)).await.unwrap();
            tokio::fs::write(dir.join("site-survey.pdf"), pdf::blank_pdf(2)).await.unwrap();
        }
        d.write_stage(job_id, Stage::ReadyForMerge).await.unwrap();

        let job = store.get(job_id).await.unwrap();
        assert_eq!(job.stage, Stage::Completed, "{}", job.error_message);
        assert_eq!(job.done_units, 4);

        let service = d.orchestrator().export();
        let bytes = service
            .read_final_archive(job_id, config.storage_mode)
            .await
            .unwrap()
            .unwrap();
        let manifest = archive::read_manifest(&bytes).unwrap();
        assert_eq!(manifest.job_id, job_id);
        assert_eq!(manifest.entries.len(), 3);
        assert!(!service.job_dir(job_id).exists());
    }

    /// Event for the edge `before -> after.stage`, as an outside writer makes it.
    fn edge(before: Stage, after: JobRecord) -> StageEvent {
        let mut previous = after.clone();
        previous.stage = before;
        StageEvent::from_change(Change { before: previous, after }, 1)
    }

    #[tokio::test]
    async fn cleanup_rollback_rebuilds_a_lost_archive() {
        let tmp = TempDir::new().unwrap();
        let ids = work_order_ids(3);
        let store = Arc::new(MemoryJobStore::new());
        let service = ExportService::new(store.clone(), tmp.path().join("artifacts"), tmp.path().join("attachments"));
        let config = ExportConfig {
            max_chain_depth: 1,
            ..ExportConfig::default()
        };
        let orchestrator = JobOrchestrator::new(store.clone(), FakeSource::with(&ids), service, config.clone());
        let mut d = Dispatcher::new(orchestrator, &config);

        let (job_id, _) = d.submit(source_ids::to_json(&ids)).await.unwrap();
        d.write_stage(job_id, Stage::FlowRunning).await.unwrap();
        for &id in &ids {
            let dir = d.orchestrator().export().survey_dir(job_id, id);
            tokio::fs::create_dir_all(&dir).await.unwrap();
            tokio::fs::write(dir.join("summary.pdf"), pdf::blank_pdf(1)).await.unwrap();
        }

        // Each outside write runs exactly one step.
        d.write_stage(job_id, Stage::ReadyForMerge).await.unwrap();
        let merged = store.get(job_id).await.unwrap();
        assert_eq!(merged.stage, Stage::ReadyForZip, "{}", merged.error_message);
        d.deliver(edge(Stage::ReadyForMerge, merged)).await.unwrap();
        let zipped = store.get(job_id).await.unwrap();
        assert_eq!(zipped.stage, Stage::ReadyForCleanup, "{}", zipped.error_message);

        let attachment = d.orchestrator().export().attachment_path(job_id);
        tokio::fs::remove_file(&attachment).await.unwrap();

        d.max_chain_depth = ExportConfig::default().max_chain_depth;
        let summary = d.deliver(edge(Stage::ZipInProgress, zipped)).await.unwrap();

        let job = store.get(job_id).await.unwrap();
        assert_eq!(job.stage, Stage::Completed, "{}", job.error_message);
        assert!(job.error_message.is_empty());
        assert_eq!(summary.steps, 3);
        let bytes = tokio::fs::read(&attachment).await.unwrap();
        assert_eq!(archive::read_manifest(&bytes).unwrap().entries.len(), 3);
        assert!(!d.orchestrator().export().job_dir(job_id).exists());
    }
}
