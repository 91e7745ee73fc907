//! In-memory fakes shared by the orchestrator and dispatcher tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use crate::config::StorageMode;
use crate::error::ExportError;
use crate::export::ExportOps;
use crate::source_ids;
use crate::state_machine::{JobPatch, JobRecord};
use crate::store::{JobStore, MemoryJobStore};
use crate::workorder::{RetrieveError, WorkOrderData, WorkOrderId, WorkOrderSource};

pub fn work_order_ids(count: usize) -> Vec<WorkOrderId> {
    (0..count).map(|_| WorkOrderId(Uuid::new_v4())).collect()
}

pub fn job_with_ids(ids: &[WorkOrderId]) -> JobRecord {
    JobRecord::new(source_ids::to_json(ids), ids.len())
}

pub fn work_order(id: WorkOrderId) -> WorkOrderData {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "number": format!("WO-{}", &id.to_string()[..8]),
        "name": "Quarterly inspection",
        "customer": "Acme",
    }))
    .unwrap()
}

/// Serves canned work orders, or fails every fetch with one message.
pub struct FakeSource {
    orders: HashMap<WorkOrderId, WorkOrderData>,
    failure: Option<String>,
    fetches: AtomicUsize,
}

impl FakeSource {
    pub fn with(ids: &[WorkOrderId]) -> Self {
        Self {
            orders: ids.iter().map(|&id| (id, work_order(id))).collect(),
            failure: None,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            orders: HashMap::new(),
            failure: Some(message.into()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl WorkOrderSource for FakeSource {
    async fn fetch(&self, id: WorkOrderId) -> Result<WorkOrderData, RetrieveError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(RetrieveError::Malformed(message.clone()));
        }
        self.orders.get(&id).cloned().ok_or(RetrieveError::NotFound(id))
    }
}

/// Records calls and answers presence checks from a script (default: present).
pub struct FakeExport {
    store: Arc<MemoryJobStore>,
    merge_starts: Mutex<Vec<usize>>,
    archives_created: AtomicUsize,
    cleanups: AtomicUsize,
    presence: Mutex<VecDeque<bool>>,
    fail_merges: AtomicBool,
}

impl FakeExport {
    pub fn new(store: Arc<MemoryJobStore>) -> Self {
        Self {
            store,
            merge_starts: Mutex::new(Vec::new()),
            archives_created: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
            presence: Mutex::new(VecDeque::new()),
            fail_merges: AtomicBool::new(false),
        }
    }

    pub fn script_presence(&self, answers: &[bool]) {
        self.presence.lock().unwrap().extend(answers);
    }

    pub fn fail_merges(&self, fail: bool) {
        self.fail_merges.store(fail, Ordering::SeqCst);
    }

    pub fn merge_starts(&self) -> Vec<usize> {
        self.merge_starts.lock().unwrap().clone()
    }

    pub fn archives_created(&self) -> usize {
        self.archives_created.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    /// Work calls; heartbeats and presence checks are not counted.
    pub fn calls(&self) -> usize {
        self.merge_starts().len() + self.archives_created() + self.cleanups()
    }
}

impl ExportOps for FakeExport {
    async fn merge_batch(
        &self,
        _job_id: Uuid,
        ids: &[WorkOrderId],
        start: usize,
        batch_size: usize,
    ) -> Result<usize, ExportError> {
        self.merge_starts.lock().unwrap().push(start);
        if self.fail_merges.load(Ordering::SeqCst) {
            return Err(ExportError::Artifact("document set unreadable".into()));
        }
        Ok((start + batch_size).min(ids.len()))
    }

    async fn create_and_persist_final_archive(
        &self,
        _job_id: Uuid,
        _ids: &[WorkOrderId],
        _mode: StorageMode,
    ) -> Result<(), ExportError> {
        self.archives_created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_final_archive_present(&self, _job_id: Uuid, _mode: StorageMode) -> Result<bool, ExportError> {
        Ok(self.presence.lock().unwrap().pop_front().unwrap_or(true))
    }

    async fn cleanup_intermediate_artifacts(&self, _job_id: Uuid, _mode: StorageMode) -> Result<(), ExportError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_heartbeat(&self, job_id: Uuid, message: &str) -> Result<(), ExportError> {
        self.store
            .update(job_id, &JobPatch::heartbeat(Utc::now(), message))
            .await
            .map(|_| ())
    }
}
