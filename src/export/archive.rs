//! Assembly and verification of the final export archive.

use std::io::{Cursor, Read, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ExportError;
use crate::workorder::WorkOrderId;

pub const MANIFEST_NAME: &str = "manifest.json";

/// Index of the archive, written last so a readable manifest implies a
/// complete archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub job_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub work_order_id: WorkOrderId,
    pub file_name: String,
    pub size: u64,
}

pub fn entry_name(id: WorkOrderId) -> String {
    format!("{id}.pdf")
}

/// Build the zip: one `<work order id>.pdf` per document, then the manifest.
pub fn build(job_id: Uuid, documents: &[(WorkOrderId, Vec<u8>)]) -> Result<Vec<u8>, ExportError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    let mut entries = Vec::with_capacity(documents.len());
    for (id, bytes) in documents {
        let file_name = entry_name(*id);
        writer.start_file(file_name.as_str(), file_options())?;
        writer.write_all(bytes)?;
        entries.push(ManifestEntry {
            work_order_id: *id,
            file_name,
            size: bytes.len() as u64,
        });
    }

    let manifest = Manifest {
        job_id,
        created_at: Utc::now(),
        entries,
    };
    writer.start_file(MANIFEST_NAME, file_options())?;
    writer.write_all(&serde_json::to_vec_pretty(&manifest)?)?;

    Ok(writer.finish()?.into_inner())
}

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

pub fn read_manifest(bytes: &[u8]) -> Result<Manifest, ExportError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut file = archive.by_name(MANIFEST_NAME)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Whether `bytes` is a complete archive for `job_id`: it opens as a zip,
/// its manifest names the job, and every listed entry is present.
pub fn verify(bytes: &[u8], job_id: Uuid) -> bool {
    let Ok(manifest) = read_manifest(bytes) else {
        return false;
    };
    let Ok(mut archive) = ZipArchive::new(Cursor::new(bytes)) else {
        return false;
    };
    manifest.job_id == job_id
        && manifest
            .entries
            .iter()
            .all(|entry| archive.by_name(&entry.file_name).is_ok_and(|f| f.size() == entry.size))
}
