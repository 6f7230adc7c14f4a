//! ---
//! meter_section: "01-core-functionality"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Device state store, history queries, and aggregation."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use gridmeter_persistence::StorageError;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Error taxonomy surfaced to callers. Every operation is all-or-nothing:
/// an error carries no partial mutation.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Unknown device, bill, or user identifier.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Acting on a resource not owned by the caller without admin rights.
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    /// Missing or malformed fields, unknown action/method/status values.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A concurrent mutation would violate an engine invariant.
    #[error("conflict: {0}")]
    Conflict(String),
    /// A state transition not allowed from the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Persistence failure; callers may retry.
    #[error("storage unavailable: {0}")]
    Storage(#[from] StorageError),
}

impl CoreError {
    /// Stable machine-readable kind label for API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::InvalidInput(_) => "invalid_input",
            CoreError::Conflict(_) => "conflict",
            CoreError::InvalidState(_) => "invalid_state",
            CoreError::Storage(_) => "storage_unavailable",
        }
    }
}

pub mod aggregate;
pub mod model;
pub mod storage;
pub mod store;

pub use aggregate::{compute_metrics, user_load_summaries, MetricsSnapshot};
pub use model::{
    Bill, BillStatus, Device, DeviceScope, DeviceStatus, HistoryPoint, PaymentMethod,
    PendingPayment, Principal, Reading, ReadingInput,
};
pub use storage::{FsStorage, Storage};
pub use store::{ApplyOutcome, MeterStore};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(CoreError::NotFound("device").kind(), "not_found");
        assert_eq!(
            CoreError::Storage(StorageError::HashMismatch).kind(),
            "storage_unavailable"
        );
    }
}
