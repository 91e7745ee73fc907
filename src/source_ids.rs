//! Parsing of the `sourceIds` payload written by the client.
//!
//! Two shapes are accepted, tried in this order:
//!
//! - `{ "ids": ["<guid>", ...] }`
//! - `{ "workOrders": [ "<guid>" | { "<id key>": "<guid>", ... }, ... ] }`
//!
//! Entries that cannot be read as a work-order id are skipped and counted
//! in [`ParsedSourceIds::skipped`].

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ExportError;
use crate::workorder::WorkOrderId;

/// Keys tried, in order, on object entries of `workOrders`.
const ID_KEYS: &[&str] = &["id", "workOrderId", "workorderid", "recordId"];

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourceIdsShape {
    Ids {
        ids: Vec<Value>,
    },
    WorkOrders {
        #[serde(rename = "workOrders")]
        work_orders: Vec<Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSourceIds {
    pub ids: Vec<WorkOrderId>,
    pub skipped: usize,
}

impl ParsedSourceIds {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

pub fn parse(raw: &str) -> Result<ParsedSourceIds, ExportError> {
    let shape: SourceIdsShape = serde_json::from_str(raw).map_err(|e| {
        ExportError::Validation(format!(
            "sourceIds must be {{\"ids\": [...]}} or {{\"workOrders\": [...]}}: {e}"
        ))
    })?;

    let entries = match shape {
        SourceIdsShape::Ids { ids } => ids,
        SourceIdsShape::WorkOrders { work_orders } => work_orders,
    };

    let total = entries.len();
    let ids: Vec<WorkOrderId> = entries.iter().filter_map(entry_id).collect();
    Ok(ParsedSourceIds {
        skipped: total - ids.len(),
        ids,
    })
}

/// Parse and enforce the batch bounds: at least one id, at most `max`.
pub fn parse_batch(raw: &str, max: usize) -> Result<ParsedSourceIds, ExportError> {
    let parsed = parse(raw)?;
    if parsed.is_empty() {
        return Err(ExportError::Validation(
            "sourceIds contains no work order ids".into(),
        ));
    }
    if parsed.len() > max {
        return Err(ExportError::Validation(format!(
            "batch of {} work orders exceeds the limit of {max}",
            parsed.len()
        )));
    }
    Ok(parsed)
}

/// Render ids in the canonical `{"ids": [...]}` shape.
pub fn to_json(ids: &[WorkOrderId]) -> String {
    serde_json::json!({ "ids": ids }).to_string()
}

fn entry_id(entry: &Value) -> Option<WorkOrderId> {
    match entry {
        Value::String(s) => parse_id(s),
        Value::Object(map) => ID_KEYS
            .iter()
            .filter_map(|key| map.get(*key).and_then(Value::as_str))
            .find_map(parse_id),
        _ => None,
    }
}

fn parse_id(s: &str) -> Option<WorkOrderId> {
    Uuid::parse_str(s.trim()).ok().map(WorkOrderId)
}
