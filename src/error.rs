use thiserror::Error;
use uuid::Uuid;

use crate::state_machine::Stage;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Illegal stage transition {from} -> {to}")]
    IllegalTransition { from: Stage, to: Stage },

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Classifies a step failure for logging. All kinds are terminal for the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Empty or oversized id list, unreadable `sourceIds`.
    Validation,
    /// Fetching or mapping work-order data failed while building the payload.
    Retrieval,
    /// Merge, zip or cleanup failed.
    Worker,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Validation => write!(f, "Validation"),
            FailureKind::Retrieval => write!(f, "Retrieval"),
            FailureKind::Worker => write!(f, "Worker"),
        }
    }
}

/// Marker appended to an error message that had to be shortened.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Cap `message` at `limit` characters. A shortened message ends with
/// [`TRUNCATION_MARKER`] and still fits within `limit`.
pub fn truncate_message(message: &str, limit: usize) -> String {
    if message.chars().count() <= limit {
        return message.to_string();
    }
    let keep = limit.saturating_sub(TRUNCATION_MARKER.chars().count());
    let mut out: String = message.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}
