use chrono::{DateTime, Utc};

use super::job::{JobPatch, JobRecord, StageEvent};
use super::stage::{Stage, Worker};
use crate::error::{FailureKind, truncate_message};

/// What the orchestrator should do with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Ignore(IgnoreReason),
    BuildPayload,
    Work(Worker),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Before and after carry the same stage.
    NoStageChange,
    /// A nested update (depth > 1) landing on a non-worker stage.
    NestedUpdate { depth: u32 },
    /// The new stage has no server-side work attached.
    NotActionable(Stage),
}

/// What a finished step asks of whoever delivers notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    /// Nothing further; any stage edge the step wrote drives the chain.
    Done,
    /// The step stopped at its batch bound with work left over.
    Continue,
    /// A consistency gate held the stage; try again after a delay.
    RetryLater,
}

/// The pure half of the orchestrator: routing plus the patch each step
/// outcome produces. Nothing here touches storage.
pub struct StageMachine;

impl StageMachine {
    /// Decide the work for a notification. Only stage edges are acted upon,
    /// and nested updates may only re-enter worker stages.
    pub fn route(event: &StageEvent) -> Route {
        let previous = event.previous_stage();
        let next = event.new_stage();

        if event.recursion_depth > 1 && !next.is_worker() {
            return Route::Ignore(IgnoreReason::NestedUpdate {
                depth: event.recursion_depth,
            });
        }
        if previous == next {
            return Route::Ignore(IgnoreReason::NoStageChange);
        }
        if next == Stage::ReadyForServer {
            return Route::BuildPayload;
        }
        match next.worker() {
            Some(worker) => Route::Work(worker),
            None => Route::Ignore(IgnoreReason::NotActionable(next)),
        }
    }

    pub fn payload_built(payload: String, work_orders: usize, now: DateTime<Utc>) -> JobPatch {
        JobPatch {
            export_payload: Some(payload),
            ..JobPatch::heartbeat(now, format!("Export payload built for {work_orders} work orders"))
        }
        .with_stage(Stage::ReadyForFlow)
        .succeeded()
    }

    /// Patch after a merge batch. `reported_index` is what the export service
    /// returned; it is clamped to `id_count`.
    pub fn merge_progress(
        record: &JobRecord,
        id_count: usize,
        reported_index: usize,
        now: DateTime<Utc>,
    ) -> (JobPatch, FollowUp) {
        let start = record.next_merge_index.min(id_count);
        let new_index = reported_index.clamp(start, id_count);
        let processed = (new_index - start) as u32;
        let finished = new_index == id_count;

        let stage = if finished {
            Stage::ReadyForZip
        } else {
            Stage::MergeInProgress
        };
        let patch = JobPatch {
            next_merge_index: Some(new_index),
            done_units: Some(record.done_units_plus(processed)),
            ..JobPatch::heartbeat(now, format!("Merged {new_index}/{id_count} work orders"))
        }
        .with_stage(stage)
        .succeeded();

        let follow_up = if finished {
            FollowUp::Done
        } else {
            FollowUp::Continue
        };
        (patch, follow_up)
    }

    /// Patch after rebuilding the archive. Advancing requires a confirmed read-back.
    pub fn zip_outcome(record: &JobRecord, present: bool, now: DateTime<Utc>) -> (JobPatch, FollowUp) {
        if present {
            let patch = JobPatch {
                done_units: Some(record.done_units_plus(1)),
                ..JobPatch::heartbeat(now, "Final archive created")
            }
            .with_stage(Stage::ReadyForCleanup)
            .succeeded();
            (patch, FollowUp::Done)
        } else {
            let patch = JobPatch::heartbeat(now, "Waiting for final archive to become available")
                .with_stage(Stage::ZipInProgress);
            (patch, FollowUp::RetryLater)
        }
    }

    /// Patch after deleting intermediates. A vanished archive rolls back to zip.
    pub fn cleanup_outcome(present: bool, now: DateTime<Utc>) -> (JobPatch, FollowUp) {
        if present {
            let patch = JobPatch::heartbeat(now, "Export completed")
                .with_stage(Stage::Completed)
                .succeeded();
            (patch, FollowUp::Done)
        } else {
            let patch = JobPatch::heartbeat(now, "Final archive missing after cleanup, rebuilding")
                .with_stage(Stage::ReadyForZip);
            (patch, FollowUp::Done)
        }
    }

    pub fn failed(kind: FailureKind, detail: &str, limit: usize, now: DateTime<Utc>) -> JobPatch {
        JobPatch {
            error_message: Some(truncate_message(detail, limit)),
            ..JobPatch::heartbeat(now, format!("{kind} failure"))
        }
        .with_stage(Stage::Error)
    }
}
