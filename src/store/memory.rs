use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::{JobStore, Lease};
use crate::error::ExportError;
use crate::state_machine::{Change, JobPatch, JobRecord};

/// In-process store backing the unit tests.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<Uuid, JobRecord>>,
    archives: RwLock<HashMap<Uuid, Vec<u8>>>,
    leases: RwLock<HashMap<Uuid, Lease>>,
}

fn poison_err<T>(_: PoisonError<T>) -> ExportError {
    ExportError::Invariant("store lock poisoned".into())
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the inline archive, as an outside actor might.
    #[cfg(test)]
    pub fn remove_archive(&self, id: Uuid) {
        self.archives.write().unwrap().remove(&id);
    }
}

impl JobStore for MemoryJobStore {
    async fn insert(&self, record: JobRecord) -> Result<(), ExportError> {
        self.records
            .write()
            .map_err(poison_err)?
            .insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<JobRecord, ExportError> {
        self.records
            .read()
            .map_err(poison_err)?
            .get(&id)
            .cloned()
            .ok_or(ExportError::JobNotFound(id))
    }

    async fn update(&self, id: Uuid, patch: &JobPatch) -> Result<Change, ExportError> {
        let mut records = self.records.write().map_err(poison_err)?;
        let current = records.get_mut(&id).ok_or(ExportError::JobNotFound(id))?;
        let before = current.clone();
        let mut after = before.clone();
        after.apply(patch)?;
        *current = after.clone();
        Ok(Change { before, after })
    }

    async fn list(&self) -> Result<Vec<JobRecord>, ExportError> {
        let mut all: Vec<JobRecord> = self
            .records
            .read()
            .map_err(poison_err)?
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|r| r.created_at);
        Ok(all)
    }

    async fn put_archive(&self, id: Uuid, bytes: Vec<u8>) -> Result<(), ExportError> {
        self.archives.write().map_err(poison_err)?.insert(id, bytes);
        Ok(())
    }

    async fn read_archive(&self, id: Uuid) -> Result<Option<Vec<u8>>, ExportError> {
        Ok(self.archives.read().map_err(poison_err)?.get(&id).cloned())
    }

    async fn try_acquire_lease(
        &self,
        id: Uuid,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, ExportError> {
        let mut leases = self.leases.write().map_err(poison_err)?;
        let now = Utc::now();
        if let Some(lease) = leases.get(&id) {
            if lease.is_live(now) && lease.holder != holder {
                return Ok(false);
            }
        }
        leases.insert(id, Lease::new(holder, ttl, now));
        Ok(true)
    }

    async fn release_lease(&self, id: Uuid, holder: &str) -> Result<(), ExportError> {
        let mut leases = self.leases.write().map_err(poison_err)?;
        if leases.get(&id).is_some_and(|lease| lease.holder == holder) {
            leases.remove(&id);
        }
        Ok(())
    }

    async fn current_lease(&self, id: Uuid) -> Result<Option<Lease>, ExportError> {
        Ok(self.leases.read().map_err(poison_err)?.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[tokio::test]
    async fn insert_get_update() {
        contract::insert_get_update(&MemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn missing_job() {
        contract::missing_job(&MemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn illegal_update_leaves_record() {
        contract::illegal_update_leaves_record(&MemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn archive_blob() {
        contract::archive_blob(&MemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn lease_exclusion() {
        contract::lease_exclusion(&MemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        contract::expired_lease_is_taken_over(&MemoryJobStore::new()).await;
    }
}
