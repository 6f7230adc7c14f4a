//! ---
//! meter_section: "03-persistence-logging"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Persistence abstractions and storage bindings."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Durable storage primitives backing the device table, bill table, and the
//! append-only history log. Table snapshots are written atomically (temp file
//! plus rename) so a reader never observes a half-written record; history
//! appends are flushed before the call returns.

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error type for the persistence subsystem. Callers surface these as the
/// `StorageUnavailable` error kind and may retry.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Wrapper for IO errors encountered while reading/writing persistence files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Reported when a table snapshot fails integrity verification.
    #[error("table hash mismatch")]
    HashMismatch,
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub mod history_log;
pub mod metrics;
pub mod tables;

pub use history_log::replay as replay_history_log;
pub use history_log::{HistoryLogEntry, HistoryLogReader, HistoryLogWriter};
pub use metrics::StorageMetrics;
pub use tables::{load_table, save_table, TABLE_VERSION};
