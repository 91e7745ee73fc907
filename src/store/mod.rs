//! Durable job record storage.
//!
//! A [`JobStore`] supports point reads and partial updates. Every update is
//! one atomic write that returns the record before and after it, which is
//! what the dispatcher turns into a [`StageEvent`](crate::state_machine::StageEvent).
//! Stores also hold the inline archive blob and the per-job lease.

mod file;
#[cfg(test)]
mod memory;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExportError;
use crate::state_machine::{Change, JobPatch, JobRecord};

pub use file::FileJobStore;
#[cfg(test)]
pub use memory::MemoryJobStore;

pub trait JobStore {
    async fn insert(&self, record: JobRecord) -> Result<(), ExportError>;

    /// Fails with [`ExportError::JobNotFound`] for an unknown id.
    async fn get(&self, id: Uuid) -> Result<JobRecord, ExportError>;

    /// Apply `patch` atomically. Illegal stage edges and counter invariant
    /// violations are rejected and leave the record unchanged.
    async fn update(&self, id: Uuid, patch: &JobPatch) -> Result<Change, ExportError>;

    async fn list(&self) -> Result<Vec<JobRecord>, ExportError>;

    /// Store the final archive inline, replacing any previous blob.
    async fn put_archive(&self, id: Uuid, bytes: Vec<u8>) -> Result<(), ExportError>;

    async fn read_archive(&self, id: Uuid) -> Result<Option<Vec<u8>>, ExportError>;

    /// Take the job's lease for `holder`. Returns `false` while another
    /// holder's lease is live. Re-acquiring one's own lease extends it.
    async fn try_acquire_lease(
        &self,
        id: Uuid,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, ExportError>;

    /// Release the lease if `holder` still owns it.
    async fn release_lease(&self, id: Uuid, holder: &str) -> Result<(), ExportError>;

    async fn current_lease(&self, id: Uuid) -> Result<Option<Lease>, ExportError>;
}

/// Exclusive right to process one job until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(holder: &str, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            holder: holder.to_string(),
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(120)),
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
