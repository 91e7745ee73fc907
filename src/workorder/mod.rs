pub mod error;
pub mod mapper;
pub mod retriever;
pub mod types;

#[cfg(test)]
pub use error::RetrieveError;
pub use mapper::{ExportMapper, ExportPayload};
pub use retriever::{ConfiguredSource, WorkOrderSource};
pub use types::WorkOrderId;
#[cfg(test)]
pub use types::WorkOrderData;
