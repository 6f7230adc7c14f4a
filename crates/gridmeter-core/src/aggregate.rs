//! ---
//! meter_section: "01-core-functionality"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Device state store, history queries, and aggregation."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{round2, Device, DeviceScope};
use crate::store::MeterStore;

/// Per-device row in an aggregation snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetrics {
    pub id: Uuid,
    pub name: String,
    pub status: crate::model::DeviceStatus,
    pub last_voltage: f64,
    pub last_current: f64,
    pub last_power: f64,
    pub last_energy_wh: f64,
}

impl From<&Device> for DeviceMetrics {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id,
            name: device.name.clone(),
            status: device.status,
            last_voltage: device.last_voltage,
            last_current: device.last_current,
            last_power: device.last_power,
            last_energy_wh: device.last_energy_wh,
        }
    }
}

/// User-level totals derived from the live device snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTotals {
    /// Summed instantaneous power in watts.
    pub power: f64,
    /// Summed cumulative energy in Wh.
    pub energy_wh: f64,
    /// Mean voltage across devices; 0 when the user has no devices.
    pub avg_voltage: f64,
    /// Mean current across devices; 0 when the user has no devices.
    pub avg_current: f64,
    /// Derived cost: `(energy_wh / 1000) × tariff`, rounded to 2 decimals.
    pub cost: f64,
    pub cost_per_kwh: f64,
}

/// Aggregation snapshot for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub devices: Vec<DeviceMetrics>,
    pub totals: MetricTotals,
}

/// Combine the user's live device snapshot into per-user totals.
///
/// Pure read of a point-in-time snapshot; safe to call concurrently with
/// ingestion.
pub fn compute_metrics(store: &MeterStore, user_id: Uuid, tariff: f64) -> MetricsSnapshot {
    let devices = store.list_devices(DeviceScope::User(user_id));
    let rows: Vec<DeviceMetrics> = devices.iter().map(DeviceMetrics::from).collect();

    let mut power = 0.0;
    let mut energy_wh = 0.0;
    let mut voltage = 0.0;
    let mut current = 0.0;
    for device in &devices {
        power += device.last_power;
        energy_wh += device.last_energy_wh;
        voltage += device.last_voltage;
        current += device.last_current;
    }
    let count = devices.len() as f64;
    let (avg_voltage, avg_current) = if devices.is_empty() {
        (0.0, 0.0)
    } else {
        (voltage / count, current / count)
    };
    let cost = round2(energy_wh / 1000.0 * tariff);

    MetricsSnapshot {
        devices: rows,
        totals: MetricTotals {
            power,
            energy_wh,
            avg_voltage,
            avg_current,
            cost,
            cost_per_kwh: tariff,
        },
    }
}

/// One row of the administrative per-user load overview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLoadSummary {
    pub user_id: Uuid,
    pub device_count: usize,
    pub total_power: f64,
    pub total_energy_wh: f64,
}

/// Group the full device snapshot by owning user (administrative view).
pub fn user_load_summaries(store: &MeterStore) -> Vec<UserLoadSummary> {
    let mut by_user: std::collections::BTreeMap<Uuid, UserLoadSummary> =
        std::collections::BTreeMap::new();
    for device in store.list_devices(DeviceScope::All) {
        let entry = by_user
            .entry(device.user_id)
            .or_insert_with(|| UserLoadSummary {
                user_id: device.user_id,
                device_count: 0,
                total_power: 0.0,
                total_energy_wh: 0.0,
            });
        entry.device_count += 1;
        entry.total_power = round2(entry.total_power + device.last_power);
        entry.total_energy_wh = crate::model::round4(entry.total_energy_wh + device.last_energy_wh);
    }
    by_user.into_values().collect()
}
