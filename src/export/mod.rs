//! Merge, archive and cleanup mechanics behind the worker stages.
//!
//! Artifacts for a job live under `<artifacts>/<job>/`:
//!
//! - `surveys/<work order>/*.pdf`: the document set produced by the external
//!   document flow (`summary.pdf` sorts first)
//! - `merged/<work order>.pdf`: one merged PDF per work order
//!
//! The final archive is either an inline blob in the job store or
//! `<attachments>/<job>/export.zip`, depending on [`StorageMode`].

pub mod archive;
pub mod pdf;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StorageMode;
use crate::error::ExportError;
use crate::state_machine::JobPatch;
use crate::store::JobStore;
use crate::workorder::WorkOrderId;

pub const SUMMARY_NAME: &str = "summary.pdf";
pub const ARCHIVE_NAME: &str = "export.zip";

/// The operations the worker stages need.
pub trait ExportOps {
    /// Merge the document sets of `ids[start..start + batch_size]` and return
    /// the index after the last work order merged.
    async fn merge_batch(
        &self,
        job_id: Uuid,
        ids: &[WorkOrderId],
        start: usize,
        batch_size: usize,
    ) -> Result<usize, ExportError>;

    /// Rebuild the final archive from every merged PDF, replacing any
    /// previous archive.
    async fn create_and_persist_final_archive(
        &self,
        job_id: Uuid,
        ids: &[WorkOrderId],
        mode: StorageMode,
    ) -> Result<(), ExportError>;

    /// Read the persisted archive back and check it is complete.
    async fn is_final_archive_present(&self, job_id: Uuid, mode: StorageMode) -> Result<bool, ExportError>;

    /// Remove intermediates. Merged documents stay until the final archive
    /// is confirmed, so a missing archive can still be rebuilt.
    async fn cleanup_intermediate_artifacts(&self, job_id: Uuid, mode: StorageMode) -> Result<(), ExportError>;

    async fn update_heartbeat(&self, job_id: Uuid, message: &str) -> Result<(), ExportError>;
}

pub struct ExportService<S> {
    store: Arc<S>,
    artifacts: PathBuf,
    attachments: PathBuf,
}

impl<S: JobStore> ExportService<S> {
    pub fn new(store: Arc<S>, artifacts: impl Into<PathBuf>, attachments: impl Into<PathBuf>) -> Self {
        Self {
            store,
            artifacts: artifacts.into(),
            attachments: attachments.into(),
        }
    }

    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.artifacts.join(job_id.to_string())
    }

    pub fn survey_dir(&self, job_id: Uuid, id: WorkOrderId) -> PathBuf {
        self.job_dir(job_id).join("surveys").join(id.to_string())
    }

    pub fn merged_path(&self, job_id: Uuid, id: WorkOrderId) -> PathBuf {
        self.job_dir(job_id).join("merged").join(format!("{id}.pdf"))
    }

    pub fn attachment_path(&self, job_id: Uuid) -> PathBuf {
        self.attachments.join(job_id.to_string()).join(ARCHIVE_NAME)
    }

    /// The final archive bytes as persisted, if any.
    pub async fn read_final_archive(&self, job_id: Uuid, mode: StorageMode) -> Result<Option<Vec<u8>>, ExportError> {
        match mode {
            StorageMode::Inline => self.store.read_archive(job_id).await,
            StorageMode::Attachment => read_optional(&self.attachment_path(job_id)).await,
        }
    }

    async fn document_set(&self, job_id: Uuid, id: WorkOrderId) -> Result<Vec<Vec<u8>>, ExportError> {
        let dir = self.survey_dir(job_id, id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ExportError::Artifact(format!("no documents for work order {id}")));
            }
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_pdf = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
            if is_pdf {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(ExportError::Artifact(format!("no documents for work order {id}")));
        }
        paths.sort_by_key(|p| {
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
            (name != SUMMARY_NAME, name)
        });

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            documents.push(tokio::fs::read(&path).await?);
        }
        Ok(documents)
    }
}

impl<S: JobStore> ExportOps for ExportService<S> {
    async fn merge_batch(
        &self,
        job_id: Uuid,
        ids: &[WorkOrderId],
        start: usize,
        batch_size: usize,
    ) -> Result<usize, ExportError> {
        let end = start.saturating_add(batch_size).min(ids.len());
        for &id in ids.get(start..end).unwrap_or_default() {
            let documents = self.document_set(job_id, id).await?;
            let merged = pdf::merge(&documents)?;
            let path = self.merged_path(job_id, id);
            write_atomic(&path, &merged).await?;
            debug!(%job_id, work_order = %id, documents = documents.len(), "merged work order documents");
        }
        Ok(end.max(start.min(ids.len())))
    }

    async fn create_and_persist_final_archive(
        &self,
        job_id: Uuid,
        ids: &[WorkOrderId],
        mode: StorageMode,
    ) -> Result<(), ExportError> {
        let mut documents = Vec::with_capacity(ids.len());
        for &id in ids {
            let bytes = read_optional(&self.merged_path(job_id, id))
                .await?
                .ok_or_else(|| ExportError::Artifact(format!("merged document missing for work order {id}")))?;
            documents.push((id, bytes));
        }
        let bytes = archive::build(job_id, &documents)?;
        let size = bytes.len();

        match mode {
            StorageMode::Inline => self.store.put_archive(job_id, bytes).await?,
            StorageMode::Attachment => write_atomic(&self.attachment_path(job_id), &bytes).await?,
        }
        info!(%job_id, ?mode, size, work_orders = ids.len(), "final archive persisted");
        Ok(())
    }

    async fn is_final_archive_present(&self, job_id: Uuid, mode: StorageMode) -> Result<bool, ExportError> {
        Ok(self
            .read_final_archive(job_id, mode)
            .await?
            .is_some_and(|bytes| archive::verify(&bytes, job_id)))
    }

    async fn cleanup_intermediate_artifacts(&self, job_id: Uuid, mode: StorageMode) -> Result<(), ExportError> {
        let job_dir = self.job_dir(job_id);
        remove_dir_if_exists(&job_dir.join("surveys")).await?;
        // The merged PDFs are the only input for rebuilding the archive.
        if !self.is_final_archive_present(job_id, mode).await? {
            warn!(%job_id, ?mode, "final archive not confirmed, keeping merged documents");
            return Ok(());
        }
        remove_dir_if_exists(&job_dir.join("merged")).await?;
        // Leaves the job directory in place if anything else was put there.
        if let Err(e) = tokio::fs::remove_dir(&job_dir).await {
            debug!(%job_id, error = %e, "job artifact directory kept");
        }
        info!(%job_id, ?mode, "intermediate artifacts removed");
        Ok(())
    }

    async fn update_heartbeat(&self, job_id: Uuid, message: &str) -> Result<(), ExportError> {
        self.store
            .update(job_id, &JobPatch::heartbeat(Utc::now(), message))
            .await?;
        Ok(())
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, ExportError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_dir_if_exists(path: &Path) -> Result<(), ExportError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
