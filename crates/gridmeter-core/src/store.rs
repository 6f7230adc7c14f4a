//! ---
//! meter_section: "01-core-functionality"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Device state store, history queries, and aggregation."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::{round4, Device, DeviceScope, DeviceStatus, HistoryPoint, Principal, Reading};
use crate::storage::Storage;
use crate::{CoreError, Result};

struct DeviceSlot {
    device: Device,
    last_point_ts: Option<DateTime<Utc>>,
}

/// Result of applying one reading: the updated device and the history point
/// that was appended for it.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub device: Device,
    pub point: HistoryPoint,
    /// True when the apply path auto-created the device.
    pub created: bool,
}

/// In-memory table of current per-device state backed by the append-only
/// history log, both durably persisted through the injected [`Storage`].
///
/// Mutation is funneled through per-device locks: concurrent applications to
/// the same device serialize, unrelated devices never contend on a single
/// global lock.
pub struct MeterStore {
    devices: RwLock<HashMap<Uuid, Arc<Mutex<DeviceSlot>>>>,
    history: Mutex<Vec<HistoryPoint>>,
    storage: Arc<dyn Storage>,
}

impl MeterStore {
    /// Restore the device table and history index from storage.
    ///
    /// The history log is authoritative for cumulative energy: if the device
    /// table snapshot trails the log (e.g. the process stopped between a log
    /// append and a table save) the device is rolled forward to its latest
    /// recorded point.
    pub fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let device_rows = storage.load_devices()?;
        let mut history = storage.load_history()?;
        history.sort_by_key(|p| p.ts);

        let mut slots = HashMap::new();
        for mut device in device_rows {
            let last = history.iter().rev().find(|p| p.device_id == device.id);
            let last_point_ts = last.map(|p| p.ts);
            if let Some(point) = last {
                if point.energy_wh > device.last_energy_wh {
                    debug!(device = %device.id, "device table trailed history log; rolling forward");
                    device.last_energy_wh = point.energy_wh;
                }
            }
            slots.insert(
                device.id,
                Arc::new(Mutex::new(DeviceSlot {
                    device,
                    last_point_ts,
                })),
            );
        }

        info!(
            devices = slots.len(),
            history_points = history.len(),
            "meter store restored"
        );
        Ok(Self {
            devices: RwLock::new(slots),
            history: Mutex::new(history),
            storage,
        })
    }

    /// Atomically apply one reading to a device.
    ///
    /// Looks up (or, on the ingestion path only, auto-creates) the device,
    /// updates its last-reading fields, accrues `power × interval / 3600` Wh,
    /// appends a history point, and persists both the device table and the
    /// log. Serialized per device.
    pub fn apply_reading(
        &self,
        user_id: Uuid,
        device_id: Option<Uuid>,
        name: Option<&str>,
        reading: Reading,
        interval: Duration,
        auto_create: bool,
    ) -> Result<ApplyOutcome> {
        reading.validate()?;
        if interval.is_zero() {
            return Err(CoreError::InvalidInput(
                "reading interval must be positive".to_owned(),
            ));
        }

        let (slot, created) = self.slot_for_apply(user_id, device_id, name, auto_create)?;
        let (device, point) = {
            let mut slot = slot.lock();
            if slot.device.user_id != user_id {
                return Err(CoreError::Forbidden("device is owned by another user"));
            }

            // Per-device timestamps never go backwards.
            let now = Utc::now();
            let ts = match slot.last_point_ts {
                Some(prev) if prev > now => prev,
                _ => now,
            };

            let increment = round4(reading.power * interval.as_secs_f64() / 3600.0);
            let mut device = slot.device.clone();
            device.last_voltage = reading.voltage;
            device.last_current = reading.current;
            device.last_power = reading.power;
            device.last_energy_wh = round4(device.last_energy_wh + increment);

            let point = HistoryPoint {
                ts,
                user_id: device.user_id,
                device_id: device.id,
                voltage: reading.voltage,
                current: reading.current,
                power: reading.power,
                energy_wh: device.last_energy_wh,
            };

            // The log append is the commit point: nothing is mutated until
            // the point is durable.
            {
                let mut history = self.history.lock();
                self.storage.append_history(&point)?;
                history.push(point.clone());
            }
            slot.device = device.clone();
            slot.last_point_ts = Some(ts);
            (device, point)
        };

        self.persist_devices()?;
        Ok(ApplyOutcome {
            device,
            point,
            created,
        })
    }

    fn slot_for_apply(
        &self,
        user_id: Uuid,
        device_id: Option<Uuid>,
        name: Option<&str>,
        auto_create: bool,
    ) -> Result<(Arc<Mutex<DeviceSlot>>, bool)> {
        if let Some(id) = device_id {
            if let Some(slot) = self.devices.read().get(&id) {
                return Ok((slot.clone(), false));
            }
        }
        if !auto_create {
            return Err(CoreError::NotFound("device"));
        }

        let mut devices = self.devices.write();
        if let Some(id) = device_id {
            if let Some(slot) = devices.get(&id) {
                return Ok((slot.clone(), false));
            }
        }
        let mut device = Device::new(user_id, name.unwrap_or("Auto Device"), DeviceStatus::On);
        if let Some(id) = device_id {
            device.id = id;
        }
        let id = device.id;
        let slot = Arc::new(Mutex::new(DeviceSlot {
            device,
            last_point_ts: None,
        }));
        devices.insert(id, slot.clone());
        Ok((slot, true))
    }

    /// Create a named device for the calling user. New devices start `OFF`
    /// with zeroed readings.
    pub fn create_device(&self, principal: &Principal, name: &str) -> Result<Device> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::InvalidInput(
                "device name must not be empty".to_owned(),
            ));
        }
        let device = Device::new(principal.user_id, name, DeviceStatus::Off);
        let id = device.id;
        self.devices.write().insert(
            id,
            Arc::new(Mutex::new(DeviceSlot {
                device: device.clone(),
                last_point_ts: None,
            })),
        );
        self.persist_devices()?;
        Ok(device)
    }

    /// Delete a device. History recorded for it is left intact.
    pub fn delete_device(&self, principal: &Principal, device_id: Uuid) -> Result<Device> {
        // Slot locks are never taken while holding the map lock.
        let slot = self
            .devices
            .read()
            .get(&device_id)
            .cloned()
            .ok_or(CoreError::NotFound("device"))?;
        let owner = slot.lock().device.user_id;
        if !principal.may_act_for(owner) {
            return Err(CoreError::Forbidden("device belongs to another user"));
        }

        let removed = self
            .devices
            .write()
            .remove(&device_id)
            .ok_or(CoreError::NotFound("device"))?;
        let device = removed.lock().device.clone();
        self.persist_devices()?;
        Ok(device)
    }

    /// Toggle a device `ON`/`OFF`.
    pub fn set_status(
        &self,
        principal: &Principal,
        device_id: Uuid,
        status: DeviceStatus,
    ) -> Result<Device> {
        self.update_device(principal, device_id, |device| {
            device.status = status;
            Ok(())
        })
    }

    /// Rename a device, preserving its id and history linkage.
    pub fn rename_device(
        &self,
        principal: &Principal,
        device_id: Uuid,
        name: &str,
    ) -> Result<Device> {
        let name = name.trim().to_owned();
        if name.is_empty() {
            return Err(CoreError::InvalidInput(
                "device name must not be empty".to_owned(),
            ));
        }
        self.update_device(principal, device_id, move |device| {
            device.name = name.clone();
            Ok(())
        })
    }

    fn update_device<F>(&self, principal: &Principal, device_id: Uuid, mutate: F) -> Result<Device>
    where
        F: Fn(&mut Device) -> Result<()>,
    {
        let slot = self
            .devices
            .read()
            .get(&device_id)
            .cloned()
            .ok_or(CoreError::NotFound("device"))?;
        let device = {
            let mut slot = slot.lock();
            if !principal.may_act_for(slot.device.user_id) {
                return Err(CoreError::Forbidden("device belongs to another user"));
            }
            mutate(&mut slot.device)?;
            slot.device.clone()
        };
        self.persist_devices()?;
        Ok(device)
    }

    /// Fetch one device by id.
    pub fn device(&self, device_id: Uuid) -> Result<Device> {
        let slot = self
            .devices
            .read()
            .get(&device_id)
            .cloned()
            .ok_or(CoreError::NotFound("device"))?;
        let device = slot.lock().device.clone();
        Ok(device)
    }

    /// Snapshot the devices visible in `scope`, ordered by creation time.
    /// No in-progress mutation is visible partially.
    pub fn list_devices(&self, scope: DeviceScope) -> Vec<Device> {
        let mut out: Vec<Device> = {
            let devices = self.devices.read();
            devices
                .values()
                .map(|slot| slot.lock().device.clone())
                .filter(|device| match scope {
                    DeviceScope::User(user_id) => device.user_id == user_id,
                    DeviceScope::All => true,
                })
                .collect()
        };
        out.sort_by_key(|d| (d.created_at, d.id));
        out
    }

    /// Query history points for a user, optionally narrowed to one device and
    /// a time window (inclusive bounds). Returned in timestamp-ascending
    /// order. This is the only read path over the log.
    pub fn query_history(
        &self,
        user_id: Uuid,
        device_id: Option<Uuid>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<HistoryPoint> {
        let mut points: Vec<HistoryPoint> = self
            .history
            .lock()
            .iter()
            .filter(|p| p.user_id == user_id)
            .filter(|p| device_id.map_or(true, |id| p.device_id == id))
            .filter(|p| from.map_or(true, |start| p.ts >= start))
            .filter(|p| to.map_or(true, |end| p.ts <= end))
            .cloned()
            .collect();
        points.sort_by_key(|p| p.ts);
        points
    }

    fn persist_devices(&self) -> Result<()> {
        let snapshot = self.list_devices(DeviceScope::All);
        self.storage.save_devices(&snapshot)?;
        Ok(())
    }
}

impl std::fmt::Debug for MeterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeterStore")
            .field("devices", &self.devices.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsStorage;
    use tempfile::tempdir;

    fn store(dir: &std::path::Path) -> MeterStore {
        MeterStore::open(Arc::new(FsStorage::open(dir).unwrap())).unwrap()
    }

    fn reading(power: f64) -> Reading {
        Reading {
            voltage: 230.0,
            current: power / 230.0,
            power,
        }
    }

    #[test]
    fn energy_accrues_per_interval_formula() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let user = Uuid::new_v4();

        // 3600 W over 1 s adds exactly 1 Wh per reading.
        let first = store
            .apply_reading(
                user,
                None,
                Some("Oven"),
                reading(3600.0),
                Duration::from_secs(1),
                true,
            )
            .unwrap();
        assert!(first.created);
        let second = store
            .apply_reading(
                user,
                Some(first.device.id),
                None,
                reading(3600.0),
                Duration::from_secs(1),
                true,
            )
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.device.last_energy_wh, 2.0);

        let points = store.query_history(user, Some(first.device.id), None, None);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].energy_wh, 1.0);
        assert_eq!(points[1].energy_wh, 2.0);
        assert!(points[0].ts <= points[1].ts);
    }

    #[test]
    fn cumulative_energy_never_decreases() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let user = Uuid::new_v4();
        let device = store
            .apply_reading(
                user,
                None,
                None,
                reading(500.0),
                Duration::from_secs(2),
                true,
            )
            .unwrap()
            .device;

        let mut last = 0.0;
        for power in [120.0, 0.0, 3000.0, 42.5] {
            let outcome = store
                .apply_reading(
                    user,
                    Some(device.id),
                    None,
                    reading(power),
                    Duration::from_secs(2),
                    false,
                )
                .unwrap();
            assert!(outcome.device.last_energy_wh >= last);
            last = outcome.device.last_energy_wh;
        }
    }

    #[test]
    fn control_paths_never_auto_create() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let user = Uuid::new_v4();
        let err = store
            .apply_reading(
                user,
                Some(Uuid::new_v4()),
                None,
                reading(100.0),
                Duration::from_secs(2),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn ownership_enforced_for_control_operations() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let owner = Principal::user(Uuid::new_v4());
        let stranger = Principal::user(Uuid::new_v4());
        let admin = Principal::admin(Uuid::new_v4());

        let device = store.create_device(&owner, "Fridge").unwrap();
        assert_eq!(device.status, DeviceStatus::Off);

        let err = store
            .set_status(&stranger, device.id, DeviceStatus::On)
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));

        let updated = store
            .set_status(&admin, device.id, DeviceStatus::On)
            .unwrap();
        assert_eq!(updated.status, DeviceStatus::On);
    }

    #[test]
    fn rename_preserves_id_and_history() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let owner = Principal::user(Uuid::new_v4());
        let device = store.create_device(&owner, "Old Name").unwrap();
        store
            .apply_reading(
                owner.user_id,
                Some(device.id),
                None,
                reading(60.0),
                Duration::from_secs(2),
                false,
            )
            .unwrap();

        let renamed = store
            .rename_device(&owner, device.id, "New Name")
            .unwrap();
        assert_eq!(renamed.id, device.id);
        assert_eq!(renamed.name, "New Name");
        let history = store.query_history(owner.user_id, Some(device.id), None, None);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn deletion_keeps_history() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let owner = Principal::user(Uuid::new_v4());
        let device = store
            .apply_reading(
                owner.user_id,
                None,
                None,
                reading(900.0),
                Duration::from_secs(2),
                true,
            )
            .unwrap()
            .device;

        store.delete_device(&owner, device.id).unwrap();
        assert!(matches!(
            store.device(device.id),
            Err(CoreError::NotFound(_))
        ));
        let history = store.query_history(owner.user_id, Some(device.id), None, None);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn listing_is_scoped() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let alice = Principal::user(Uuid::new_v4());
        let bob = Principal::user(Uuid::new_v4());
        store.create_device(&alice, "A1").unwrap();
        store.create_device(&alice, "A2").unwrap();
        store.create_device(&bob, "B1").unwrap();

        assert_eq!(store.list_devices(DeviceScope::User(alice.user_id)).len(), 2);
        assert_eq!(store.list_devices(DeviceScope::User(bob.user_id)).len(), 1);
        assert_eq!(store.list_devices(DeviceScope::All).len(), 3);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let user = Uuid::new_v4();
        let device_id;
        {
            let store = store(dir.path());
            let outcome = store
                .apply_reading(
                    user,
                    None,
                    Some("Pump"),
                    reading(1800.0),
                    Duration::from_secs(2),
                    true,
                )
                .unwrap();
            device_id = outcome.device.id;
        }

        let store = store(dir.path());
        let device = store.device(device_id).unwrap();
        assert_eq!(device.name, "Pump");
        assert_eq!(device.last_energy_wh, 1.0);
        assert_eq!(store.query_history(user, None, None, None).len(), 1);
    }

    #[test]
    fn readings_on_different_devices_commit_independently() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let user = Uuid::new_v4();
        let devices: Vec<Uuid> = (0..8)
            .map(|n| {
                store
                    .create_device(&Principal::user(user), &format!("Meter {n}"))
                    .unwrap()
                    .id
            })
            .collect();

        std::thread::scope(|scope| {
            for device_id in &devices {
                let store = &store;
                scope.spawn(move || {
                    for _ in 0..200 {
                        store
                            .apply_reading(
                                user,
                                Some(*device_id),
                                None,
                                reading(3600.0),
                                Duration::from_secs(1),
                                false,
                            )
                            .unwrap();
                    }
                });
            }
        });

        for device_id in &devices {
            let device = store.device(*device_id).unwrap();
            assert_eq!(device.last_energy_wh, 200.0);
        }
        assert_eq!(store.query_history(user, None, None, None).len(), 1600);

        // The devices table on disk must still verify after the racing saves.
        let store = MeterStore::open(Arc::new(FsStorage::open(dir.path()).unwrap())).unwrap();
        assert_eq!(store.list_devices(DeviceScope::User(user)).len(), 8);
    }
}
