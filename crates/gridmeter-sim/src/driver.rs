//! ---
//! meter_section: "11-simulation-test-harness"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Synthetic reading generation and the ingestion driver."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use gridmeter_core::{ApplyOutcome, DeviceScope, DeviceStatus, MeterStore, ReadingInput, Result};
use gridmeter_hub::{BroadcastHub, EventFrame};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::generator::ReadingGenerator;

/// Single entry point for telemetry: validates and completes a reading,
/// applies it through the store, and fans the resulting metrics frame out to
/// live viewers. Both the API ingest route and the periodic simulation tick
/// go through here.
pub struct IngestionDriver {
    store: Arc<MeterStore>,
    hub: Arc<BroadcastHub>,
    generator: Mutex<ReadingGenerator>,
    interval: Duration,
}

impl IngestionDriver {
    pub fn new(
        store: Arc<MeterStore>,
        hub: Arc<BroadcastHub>,
        seed: u64,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            hub,
            generator: Mutex::new(ReadingGenerator::new(seed)),
            interval,
        }
    }

    /// The accrual interval used for each applied reading.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Apply one reading on behalf of `user_id`, synthesizing any absent
    /// fields. Unknown devices are auto-created on this path only.
    pub fn ingest(
        &self,
        user_id: Uuid,
        device_id: Option<Uuid>,
        name: Option<&str>,
        input: ReadingInput,
    ) -> Result<ApplyOutcome> {
        let reading = self.generator.lock().complete(input);
        let outcome =
            self.store
                .apply_reading(user_id, device_id, name, reading, self.interval, true)?;
        self.hub.publish(
            EventFrame::Metrics {
                device: outcome.device.clone(),
                point: outcome.point.clone(),
            },
            user_id,
        );
        Ok(outcome)
    }

    /// One simulation pass: a synthetic reading for every device currently
    /// `ON`. A failure on one device is logged and never stalls the rest.
    fn run_tick(&self) {
        for device in self.store.list_devices(DeviceScope::All) {
            if device.status != DeviceStatus::On {
                continue;
            }
            let reading = self.generator.lock().synthesize();
            match self.store.apply_reading(
                device.user_id,
                Some(device.id),
                None,
                reading,
                self.interval,
                false,
            ) {
                Ok(outcome) => {
                    self.hub.publish(
                        EventFrame::Metrics {
                            device: outcome.device,
                            point: outcome.point,
                        },
                        device.user_id,
                    );
                }
                Err(err) => {
                    warn!(device = %device.id, error = %err, "simulation tick skipped device");
                }
            }
        }
    }

    /// Spawn the periodic simulation loop. Ticks that fall behind are delayed
    /// rather than bursted.
    pub fn spawn(self: &Arc<Self>) -> DriverHandle {
        let driver = self.clone();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(driver.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval = ?driver.interval, "simulation driver started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => driver.run_tick(),
                    _ = shutdown_rx.changed() => {
                        debug!("simulation driver stopping");
                        break;
                    }
                }
            }
        });
        DriverHandle { shutdown_tx, task }
    }
}

impl std::fmt::Debug for IngestionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionDriver")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Handle used to stop the simulation loop.
pub struct DriverHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    /// Signal the loop to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridmeter_core::{FsStorage, Principal, Storage};
    use gridmeter_hub::ConnectionScope;
    use tempfile::tempdir;

    fn driver(dir: &std::path::Path) -> (Arc<IngestionDriver>, Arc<MeterStore>, Arc<BroadcastHub>)
    {
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::open(dir).unwrap());
        let store = Arc::new(MeterStore::open(storage).unwrap());
        let hub = Arc::new(BroadcastHub::new(64));
        let driver = Arc::new(IngestionDriver::new(
            store.clone(),
            hub.clone(),
            0x5EED,
            Duration::from_secs(2),
        ));
        (driver, store, hub)
    }

    #[tokio::test]
    async fn ingest_auto_creates_and_publishes_metrics() {
        let dir = tempdir().unwrap();
        let (driver, _store, hub) = driver(dir.path());
        let user = Uuid::new_v4();
        let (_, mut rx) = hub.register(ConnectionScope::User(user));

        let outcome = driver
            .ingest(user, None, Some("Kettle"), ReadingInput::default())
            .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.device.name, "Kettle");
        assert!(outcome.device.last_energy_wh > 0.0);
        assert_eq!(rx.recv().await.unwrap().kind(), "metrics");
    }

    #[tokio::test]
    async fn tick_touches_only_powered_devices() {
        let dir = tempdir().unwrap();
        let (driver, store, _hub) = driver(dir.path());
        let owner = Principal::user(Uuid::new_v4());

        let on = store.create_device(&owner, "Heater").unwrap();
        store
            .set_status(&owner, on.id, DeviceStatus::On)
            .unwrap();
        let off = store.create_device(&owner, "Lamp").unwrap();

        driver.run_tick();

        let heater = store.device(on.id).unwrap();
        assert!(heater.last_energy_wh > 0.0);
        let lamp = store.device(off.id).unwrap();
        assert_eq!(lamp.last_energy_wh, 0.0);
        assert_eq!(
            store
                .query_history(owner.user_id, Some(off.id), None, None)
                .len(),
            0
        );
    }

    #[tokio::test]
    async fn tick_failure_on_one_device_does_not_stall_others() {
        let dir = tempdir().unwrap();
        let (driver, store, _hub) = driver(dir.path());
        let owner = Principal::user(Uuid::new_v4());

        let doomed = store.create_device(&owner, "Ghost").unwrap();
        store
            .set_status(&owner, doomed.id, DeviceStatus::On)
            .unwrap();
        let survivor = store.create_device(&owner, "Fridge").unwrap();
        store
            .set_status(&owner, survivor.id, DeviceStatus::On)
            .unwrap();

        // Delete between the listing a tick would take and its apply.
        store.delete_device(&owner, doomed.id).unwrap();
        driver.run_tick();

        assert!(store.device(survivor.id).unwrap().last_energy_wh > 0.0);
    }

    #[tokio::test]
    async fn spawned_loop_shuts_down_cleanly() {
        let dir = tempdir().unwrap();
        let (driver, _store, _hub) = driver(dir.path());
        let handle = driver.spawn();
        handle.shutdown().await;
    }
}
