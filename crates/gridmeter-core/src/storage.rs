//! ---
//! meter_section: "01-core-functionality"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Device state store, history queries, and aggregation."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use gridmeter_persistence::{
    load_table, save_table, HistoryLogEntry, HistoryLogWriter, StorageError, StorageMetrics,
};
use parking_lot::Mutex;
use tracing::debug;

use crate::model::{Bill, Device, HistoryPoint};

const DEVICES_TABLE: &str = "devices.json";
const BILLS_TABLE: &str = "bills.json";
const HISTORY_LOG: &str = "history.ndjson";

/// Durable load/save seam injected into the state store and billing engine.
///
/// Contract: writes made before a call returns are durable before the next
/// read can observe a different value; no read ever observes a half-written
/// record.
pub trait Storage: Send + Sync + 'static {
    fn load_devices(&self) -> Result<Vec<Device>, StorageError>;
    fn save_devices(&self, devices: &[Device]) -> Result<(), StorageError>;
    fn load_bills(&self) -> Result<Vec<Bill>, StorageError>;
    fn save_bills(&self, bills: &[Bill]) -> Result<(), StorageError>;
    fn append_history(&self, point: &HistoryPoint) -> Result<(), StorageError>;
    fn load_history(&self) -> Result<Vec<HistoryPoint>, StorageError>;
}

/// Filesystem-backed [`Storage`]: table snapshots for devices and bills,
/// an append-only newline-delimited log for history points.
pub struct FsStorage {
    devices_path: PathBuf,
    bills_path: PathBuf,
    history_path: PathBuf,
    history: Mutex<HistoryLogWriter>,
    metrics: Option<StorageMetrics>,
}

impl FsStorage {
    /// Open (or initialise) the storage layout under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let history_path = data_dir.join(HISTORY_LOG);
        let history = HistoryLogWriter::open(&history_path)?;
        debug!(data_dir = %data_dir.display(), "storage opened");
        Ok(Self {
            devices_path: data_dir.join(DEVICES_TABLE),
            bills_path: data_dir.join(BILLS_TABLE),
            history_path,
            history: Mutex::new(history),
            metrics: None,
        })
    }

    /// Attach storage metrics recorded on every persist operation.
    pub fn with_metrics(mut self, metrics: StorageMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record_save(&self, table: &str, result: &Result<(), StorageError>) {
        if let Some(metrics) = &self.metrics {
            match result {
                Ok(()) => metrics.record_table_saved(table),
                Err(_) => metrics.record_table_failed(table),
            }
        }
    }
}

impl Storage for FsStorage {
    fn load_devices(&self) -> Result<Vec<Device>, StorageError> {
        load_table(&self.devices_path)
    }

    fn save_devices(&self, devices: &[Device]) -> Result<(), StorageError> {
        let result = save_table(devices, &self.devices_path);
        self.record_save("devices", &result);
        result
    }

    fn load_bills(&self) -> Result<Vec<Bill>, StorageError> {
        load_table(&self.bills_path)
    }

    fn save_bills(&self, bills: &[Bill]) -> Result<(), StorageError> {
        let result = save_table(bills, &self.bills_path);
        self.record_save("bills", &result);
        result
    }

    fn append_history(&self, point: &HistoryPoint) -> Result<(), StorageError> {
        let payload = serde_json::to_value(point)?;
        let (_, bytes) = self.history.lock().append(HistoryLogEntry::new(payload))?;
        if let Some(metrics) = &self.metrics {
            metrics.record_history_bytes("history", bytes);
        }
        Ok(())
    }

    fn load_history(&self) -> Result<Vec<HistoryPoint>, StorageError> {
        if !self.history_path.exists() {
            return Ok(Vec::new());
        }
        let mut points = Vec::new();
        gridmeter_persistence::replay_history_log(&self.history_path, |entry| {
            let point: HistoryPoint = serde_json::from_value(entry.payload)?;
            points.push(point);
            Ok(())
        })?;
        Ok(points)
    }
}
