use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{JobStore, Lease};
use crate::error::ExportError;
use crate::state_machine::{Change, JobPatch, JobRecord};

/// Store backed by one JSON file per job under `<root>/jobs`, the inline
/// archive next to it, and lease files under `<root>/leases`.
///
/// Writes go through a temporary file and a rename, so a reader never sees a
/// half-written record. Updates from this process are serialized; writers in
/// other processes are excluded by the job lease.
pub struct FileJobStore {
    jobs: PathBuf,
    leases: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJobStore {
    pub async fn open(root: &Path) -> Result<Self, ExportError> {
        let jobs = root.join("jobs");
        let leases = root.join("leases");
        tokio::fs::create_dir_all(&jobs).await?;
        tokio::fs::create_dir_all(&leases).await?;
        Ok(Self {
            jobs,
            leases,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.jobs.join(format!("{id}.json"))
    }

    fn archive_path(&self, id: Uuid) -> PathBuf {
        self.jobs.join(format!("{id}.archive"))
    }

    fn lease_path(&self, id: Uuid) -> PathBuf {
        self.leases.join(format!("{id}.lease"))
    }

    async fn read_record(&self, id: Uuid) -> Result<JobRecord, ExportError> {
        read_json(&self.record_path(id))
            .await?
            .ok_or(ExportError::JobNotFound(id))
    }

    /// Remove a lease file that is expired or, if unreadable, older than `ttl`.
    async fn clear_stale_lease(&self, path: &Path, holder: &str, ttl: Duration) -> Result<bool, ExportError> {
        match read_json::<Lease>(path).await {
            Ok(Some(lease)) => {
                if lease.is_live(Utc::now()) && lease.holder != holder {
                    return Ok(false);
                }
            }
            Ok(None) => return Ok(true),
            Err(_) => {
                let modified = tokio::fs::metadata(path).await?.modified()?;
                let age = SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or(Duration::ZERO);
                if age < ttl {
                    return Ok(false);
                }
            }
        }
        remove_if_exists(path).await?;
        Ok(true)
    }
}

impl JobStore for FileJobStore {
    async fn insert(&self, record: JobRecord) -> Result<(), ExportError> {
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.record_path(record.id), &serde_json::to_vec_pretty(&record)?).await
    }

    async fn get(&self, id: Uuid) -> Result<JobRecord, ExportError> {
        self.read_record(id).await
    }

    async fn update(&self, id: Uuid, patch: &JobPatch) -> Result<Change, ExportError> {
        let _guard = self.write_lock.lock().await;
        let before = self.read_record(id).await?;
        let mut after = before.clone();
        after.apply(patch)?;
        write_atomic(&self.record_path(id), &serde_json::to_vec_pretty(&after)?).await?;
        Ok(Change { before, after })
    }

    async fn list(&self) -> Result<Vec<JobRecord>, ExportError> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.jobs).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = read_json::<JobRecord>(&path).await? {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn put_archive(&self, id: Uuid, bytes: Vec<u8>) -> Result<(), ExportError> {
        write_atomic(&self.archive_path(id), &bytes).await
    }

    async fn read_archive(&self, id: Uuid) -> Result<Option<Vec<u8>>, ExportError> {
        match tokio::fs::read(self.archive_path(id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn try_acquire_lease(
        &self,
        id: Uuid,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, ExportError> {
        let path = self.lease_path(id);
        let body = serde_json::to_vec(&Lease::new(holder, ttl, Utc::now()))?;

        // Two rounds: the first may only clear an expired or own lease.
        for _ in 0..2 {
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match opened {
                Ok(mut file) => {
                    file.write_all(&body).await?;
                    file.flush().await?;
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !self.clear_stale_lease(&path, holder, ttl).await? {
                        return Ok(false);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    async fn release_lease(&self, id: Uuid, holder: &str) -> Result<(), ExportError> {
        let path = self.lease_path(id);
        if let Ok(Some(lease)) = read_json::<Lease>(&path).await {
            if lease.holder == holder {
                remove_if_exists(&path).await?;
            }
        }
        Ok(())
    }

    async fn current_lease(&self, id: Uuid) -> Result<Option<Lease>, ExportError> {
        read_json(&self.lease_path(id)).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ExportError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<(), ExportError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
