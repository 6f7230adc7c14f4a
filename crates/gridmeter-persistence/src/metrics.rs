//! ---
//! meter_section: "03-persistence-logging"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Persistence abstractions and storage bindings."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{CounterVec, IntCounterVec, Opts, Registry};

use crate::Result;

/// Metrics published by the storage subsystem.
#[derive(Clone)]
pub struct StorageMetrics {
    tables_saved: IntCounterVec,
    tables_failed: IntCounterVec,
    history_bytes: CounterVec,
    #[allow(dead_code)]
    registry: Arc<Registry>,
}

impl StorageMetrics {
    /// Register all storage metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let tables_saved = IntCounterVec::new(
            Opts::new(
                "gridmeter_tables_saved_total",
                "Total number of table snapshots successfully persisted",
            ),
            &["table"],
        )?;
        registry.register(Box::new(tables_saved.clone()))?;

        let tables_failed = IntCounterVec::new(
            Opts::new(
                "gridmeter_tables_failed_total",
                "Total number of table snapshot persist operations that failed",
            ),
            &["table"],
        )?;
        registry.register(Box::new(tables_failed.clone()))?;

        let history_bytes = CounterVec::new(
            Opts::new(
                "gridmeter_history_bytes_total",
                "Total bytes appended to the history log",
            ),
            &["log"],
        )?;
        registry.register(Box::new(history_bytes.clone()))?;

        Ok(Self {
            tables_saved,
            tables_failed,
            history_bytes,
            registry,
        })
    }

    /// Record a successful snapshot of the named table.
    pub fn record_table_saved(&self, table: &str) {
        self.tables_saved.with_label_values(&[table]).inc();
    }

    /// Record a failed snapshot attempt for the named table.
    pub fn record_table_failed(&self, table: &str) {
        self.tables_failed.with_label_values(&[table]).inc();
    }

    /// Add to the total number of bytes written to the history log.
    pub fn record_history_bytes(&self, log: &str, bytes: usize) {
        self.history_bytes
            .with_label_values(&[log])
            .inc_by(bytes as f64);
    }
}

impl std::fmt::Debug for StorageMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageMetrics").finish_non_exhaustive()
    }
}
