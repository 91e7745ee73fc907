use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::Stage;
use crate::error::ExportError;

/// The persisted export job. `stage` is the only attribute that drives behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub stage: Stage,
    /// Raw `sourceIds` JSON as written by the client.
    pub source_ids: String,
    /// Serialized export payload, set by the build-payload step.
    pub export_payload: Option<String>,
    /// Cursor into the parsed source ids; merging resumes here.
    pub next_merge_index: usize,
    pub done_units: u32,
    pub total_units: u32,
    pub last_heartbeat: DateTime<Utc>,
    pub progress_message: String,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    /// A fresh record in `Active`. `total_units` is one merge unit per work
    /// order plus one for the archive.
    pub fn new(source_ids: String, work_order_count: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            stage: Stage::Active,
            source_ids,
            export_payload: None,
            next_merge_index: 0,
            done_units: 0,
            total_units: work_order_count as u32 + 1,
            last_heartbeat: now,
            progress_message: String::new(),
            error_message: String::new(),
            created_at: now,
        }
    }

    /// Apply `patch` in place, enforcing the stage edge table and the
    /// progress counter invariants. On error the record is untouched.
    pub fn apply(&mut self, patch: &JobPatch) -> Result<(), ExportError> {
        if let Some(next) = patch.stage {
            if !self.stage.can_transition_to(next) {
                return Err(ExportError::IllegalTransition {
                    from: self.stage,
                    to: next,
                });
            }
        }
        if let Some(done) = patch.done_units {
            if done < self.done_units {
                return Err(ExportError::Invariant(format!(
                    "done_units may not decrease ({} -> {done})",
                    self.done_units
                )));
            }
            if self.total_units > 0 && done > self.total_units {
                return Err(ExportError::Invariant(format!(
                    "done_units {done} exceeds total_units {}",
                    self.total_units
                )));
            }
        }

        if let Some(stage) = patch.stage {
            self.stage = stage;
        }
        if let Some(payload) = &patch.export_payload {
            self.export_payload = Some(payload.clone());
        }
        if let Some(index) = patch.next_merge_index {
            self.next_merge_index = index;
        }
        if let Some(done) = patch.done_units {
            self.done_units = done;
        }
        if let Some(at) = patch.last_heartbeat {
            self.last_heartbeat = at;
        }
        if let Some(message) = &patch.progress_message {
            self.progress_message = message.clone();
        }
        if let Some(message) = &patch.error_message {
            self.error_message = message.clone();
        }
        Ok(())
    }

    /// `done_units + delta`, capped at `total_units` when it is set.
    pub fn done_units_plus(&self, delta: u32) -> u32 {
        let done = self.done_units.saturating_add(delta);
        if self.total_units > 0 {
            done.min(self.total_units)
        } else {
            done
        }
    }
}

/// A partial update. Every field set here is committed in one atomic write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub stage: Option<Stage>,
    pub export_payload: Option<String>,
    pub next_merge_index: Option<usize>,
    pub done_units: Option<u32>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub progress_message: Option<String>,
    pub error_message: Option<String>,
}

impl JobPatch {
    pub fn heartbeat(at: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            last_heartbeat: Some(at),
            progress_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn stage(stage: Stage) -> Self {
        Self {
            stage: Some(stage),
            ..Default::default()
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Marks a successful transition: the previous failure text is cleared.
    pub fn succeeded(mut self) -> Self {
        self.error_message = Some(String::new());
        self
    }
}

/// A committed write as seen by the store: the record before and after.
#[derive(Debug, Clone)]
pub struct Change {
    pub before: JobRecord,
    pub after: JobRecord,
}

impl Change {
    pub fn stage_changed(&self) -> bool {
        self.before.stage != self.after.stage
    }
}

/// An update notification delivered to the orchestrator.
#[derive(Debug, Clone)]
pub struct StageEvent {
    pub job_id: Uuid,
    /// 1 for a write made by an outside actor, +1 for each write made while
    /// handling an earlier event of the same chain.
    pub recursion_depth: u32,
    pub before: JobRecord,
    pub after: JobRecord,
}

impl StageEvent {
    pub fn from_change(change: Change, recursion_depth: u32) -> Self {
        Self {
            job_id: change.after.id,
            recursion_depth,
            before: change.before,
            after: change.after,
        }
    }

    pub fn previous_stage(&self) -> Stage {
        self.before.stage
    }

    pub fn new_stage(&self) -> Stage {
        self.after.stage
    }
}
