//! ---
//! meter_section: "02-billing-payments"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Billing-window consumption bills and payment settlement."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gridmeter_common::config::BillingConfig;
use gridmeter_core::model::{round2, round4};
use gridmeter_core::{
    Bill, BillStatus, CoreError, DeviceScope, MeterStore, Principal, Result, Storage,
};
use gridmeter_hub::{BroadcastHub, EventFrame};
use parking_lot::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

/// Generates consumption bills over per-user billing windows and settles
/// payments against them.
///
/// Bill generation is serialized per user so two concurrent requests can
/// never produce overlapping windows; readings keep flowing while a bill is
/// being computed.
pub struct BillingEngine {
    bills: RwLock<HashMap<Uuid, Bill>>,
    user_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    store: Arc<MeterStore>,
    hub: Arc<BroadcastHub>,
    storage: Arc<dyn Storage>,
    config: BillingConfig,
}

impl BillingEngine {
    /// Restore previously generated bills from storage.
    pub fn open(
        store: Arc<MeterStore>,
        hub: Arc<BroadcastHub>,
        storage: Arc<dyn Storage>,
        config: BillingConfig,
    ) -> Result<Self> {
        let rows = storage.load_bills()?;
        info!(bills = rows.len(), "billing engine restored");
        let bills = rows.into_iter().map(|b| (b.id, b)).collect();
        Ok(Self {
            bills: RwLock::new(bills),
            user_locks: Mutex::new(HashMap::new()),
            store,
            hub,
            storage,
            config,
        })
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    fn user_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        self.user_locks
            .lock()
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Start of the next billing window for `user_id`: the creation instant
    /// of the latest existing bill, or the epoch when none exists.
    fn window_start(&self, user_id: Uuid) -> DateTime<Utc> {
        self.bills
            .read()
            .values()
            .filter(|b| b.user_id == user_id)
            .map(|b| b.created_at)
            .max()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Generate a bill for `target` (defaults to the caller) covering the
    /// window since their previous bill.
    ///
    /// Each device contributes the non-negative delta between its last and
    /// first cumulative-energy points inside the window; devices with fewer
    /// than two points in the window contribute nothing. A zero-amount bill
    /// is created already settled.
    pub fn generate_bill(
        &self,
        principal: &Principal,
        target: Option<Uuid>,
        tariff: Option<f64>,
    ) -> Result<Bill> {
        let user_id = target.unwrap_or(principal.user_id);
        if !principal.may_act_for(user_id) {
            return Err(CoreError::Forbidden("cannot bill another user"));
        }
        let tariff = tariff.unwrap_or(self.config.default_tariff);
        if !tariff.is_finite() || tariff <= 0.0 {
            return Err(CoreError::InvalidInput(
                "tariff must be a positive number".to_owned(),
            ));
        }

        let lock = self.user_lock(user_id);
        let _guard = lock.lock();

        let from = self.window_start(user_id);
        let to = Utc::now();

        let mut energy_wh = 0.0;
        for device in self.store.list_devices(DeviceScope::User(user_id)) {
            let points = self
                .store
                .query_history(user_id, Some(device.id), Some(from), Some(to));
            if points.len() < 2 {
                continue;
            }
            let first = points.first().map(|p| p.energy_wh).unwrap_or(0.0);
            let last = points.last().map(|p| p.energy_wh).unwrap_or(0.0);
            energy_wh += (last - first).max(0.0);
        }
        let energy_wh = round4(energy_wh);
        let kwh = round4(energy_wh / 1000.0);
        let amount = round2(kwh * tariff);

        let bill = Bill {
            id: Uuid::new_v4(),
            user_id,
            amount,
            energy_wh,
            kwh,
            tariff,
            // Nothing owed means nothing to collect.
            status: if amount == 0.0 {
                BillStatus::Paid
            } else {
                BillStatus::Unpaid
            },
            created_at: to,
            paid_at: None,
            paid_by: None,
            payment_method: None,
            pending_payment: None,
        };

        self.bills.write().insert(bill.id, bill.clone());
        self.persist_bills()?;
        info!(
            bill = %bill.id,
            user = %user_id,
            amount = bill.amount,
            kwh = bill.kwh,
            "bill generated"
        );
        self.hub
            .publish(EventFrame::BillCreated { bill: bill.clone() }, user_id);
        Ok(bill)
    }

    /// Bills visible to the caller for `target` (defaults to the caller),
    /// newest first.
    pub fn list_bills(&self, principal: &Principal, target: Option<Uuid>) -> Result<Vec<Bill>> {
        let user_id = target.unwrap_or(principal.user_id);
        if !principal.may_act_for(user_id) {
            return Err(CoreError::Forbidden("cannot view another user's bills"));
        }
        let mut bills: Vec<Bill> = self
            .bills
            .read()
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bills.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bills)
    }

    /// Fetch one bill, enforcing ownership.
    pub fn get_bill(&self, principal: &Principal, bill_id: Uuid) -> Result<Bill> {
        let bill = self
            .bills
            .read()
            .get(&bill_id)
            .cloned()
            .ok_or(CoreError::NotFound("bill"))?;
        if !principal.may_act_for(bill.user_id) {
            return Err(CoreError::Forbidden("bill belongs to another user"));
        }
        Ok(bill)
    }

    pub(crate) fn update_bill<F>(&self, bill_id: Uuid, mutate: F) -> Result<Bill>
    where
        F: FnOnce(&mut Bill) -> Result<()>,
    {
        let updated = {
            let mut bills = self.bills.write();
            let bill = bills.get_mut(&bill_id).ok_or(CoreError::NotFound("bill"))?;
            mutate(bill)?;
            bill.clone()
        };
        self.persist_bills()?;
        Ok(updated)
    }

    fn persist_bills(&self) -> Result<()> {
        let mut snapshot: Vec<Bill> = self.bills.read().values().cloned().collect();
        snapshot.sort_by_key(|b| (b.created_at, b.id));
        self.storage.save_bills(&snapshot)?;
        Ok(())
    }

    pub(crate) fn publish_paid(&self, bill: &Bill) {
        self.hub
            .publish(EventFrame::BillPaid { bill: bill.clone() }, bill.user_id);
    }
}

impl std::fmt::Debug for BillingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingEngine")
            .field("bills", &self.bills.read().len())
            .finish_non_exhaustive()
    }
}
