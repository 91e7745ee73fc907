use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The thirteen stages of an export job record.
///
/// Happy path: ACTIVE → CLIENT_PROCESSING → READY_FOR_SERVER → READY_FOR_FLOW
/// → FLOW_RUNNING → READY_FOR_MERGE ⇄ MERGE_IN_PROGRESS → READY_FOR_ZIP ⇄
/// ZIP_IN_PROGRESS → READY_FOR_CLEANUP ⇄ CLEANUP_IN_PROGRESS → COMPLETED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Active,
    ClientProcessing,
    ReadyForServer,
    ReadyForFlow,
    FlowRunning,
    ReadyForMerge,
    MergeInProgress,
    ReadyForZip,
    ZipInProgress,
    ReadyForCleanup,
    CleanupInProgress,
    Completed,
    Error,
}

impl Stage {
    pub const ALL: [Stage; 13] = [
        Stage::Active,
        Stage::ClientProcessing,
        Stage::ReadyForServer,
        Stage::ReadyForFlow,
        Stage::FlowRunning,
        Stage::ReadyForMerge,
        Stage::MergeInProgress,
        Stage::ReadyForZip,
        Stage::ZipInProgress,
        Stage::ReadyForCleanup,
        Stage::CleanupInProgress,
        Stage::Completed,
        Stage::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Active => "ACTIVE",
            Stage::ClientProcessing => "CLIENT_PROCESSING",
            Stage::ReadyForServer => "READY_FOR_SERVER",
            Stage::ReadyForFlow => "READY_FOR_FLOW",
            Stage::FlowRunning => "FLOW_RUNNING",
            Stage::ReadyForMerge => "READY_FOR_MERGE",
            Stage::MergeInProgress => "MERGE_IN_PROGRESS",
            Stage::ReadyForZip => "READY_FOR_ZIP",
            Stage::ZipInProgress => "ZIP_IN_PROGRESS",
            Stage::ReadyForCleanup => "READY_FOR_CLEANUP",
            Stage::CleanupInProgress => "CLEANUP_IN_PROGRESS",
            Stage::Completed => "COMPLETED",
            Stage::Error => "ERROR",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Error)
    }

    /// Merge, zip and cleanup stages, ready or in progress.
    pub fn is_worker(self) -> bool {
        self.worker().is_some()
    }

    pub fn worker(self) -> Option<Worker> {
        match self {
            Stage::ReadyForMerge | Stage::MergeInProgress => Some(Worker::Merge),
            Stage::ReadyForZip | Stage::ZipInProgress => Some(Worker::Zip),
            Stage::ReadyForCleanup | Stage::CleanupInProgress => Some(Worker::Cleanup),
            _ => None,
        }
    }

    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            Stage::MergeInProgress | Stage::ZipInProgress | Stage::CleanupInProgress
        )
    }

    /// Whether a store may move a record from `self` to `next`.
    ///
    /// Rewriting the current stage is always allowed; it is not an edge.
    pub fn can_transition_to(self, next: Stage) -> bool {
        use Stage::*;

        if self == next {
            return true;
        }
        if next == Error {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Active, ClientProcessing)
                | (ClientProcessing, ReadyForServer)
                | (ReadyForServer, ReadyForFlow)
                | (ReadyForFlow, FlowRunning)
                | (FlowRunning, ReadyForMerge)
                | (ReadyForMerge, MergeInProgress)
                | (MergeInProgress, ReadyForMerge)
                | (ReadyForMerge | MergeInProgress, ReadyForZip)
                | (ReadyForZip, ZipInProgress)
                | (ZipInProgress, ReadyForZip)
                | (ReadyForZip | ZipInProgress, ReadyForCleanup)
                | (ReadyForCleanup, CleanupInProgress)
                | (CleanupInProgress, ReadyForCleanup)
                | (ReadyForCleanup | CleanupInProgress, Completed)
                | (ReadyForCleanup | CleanupInProgress, ReadyForZip)
                | (Error, ReadyForServer | ReadyForMerge | ReadyForZip | ReadyForCleanup)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    /// Accepts the display label in any case, with `-` or `_` separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_uppercase();
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

/// The three batch workers, each owning a ready/in-progress stage pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Worker {
    Merge,
    Zip,
    Cleanup,
}

impl Worker {
    pub fn ready_stage(self) -> Stage {
        match self {
            Worker::Merge => Stage::ReadyForMerge,
            Worker::Zip => Stage::ReadyForZip,
            Worker::Cleanup => Stage::ReadyForCleanup,
        }
    }

    pub fn in_progress_stage(self) -> Stage {
        match self {
            Worker::Merge => Stage::MergeInProgress,
            Worker::Zip => Stage::ZipInProgress,
            Worker::Cleanup => Stage::CleanupInProgress,
        }
    }
}
