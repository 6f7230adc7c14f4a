//! ---
//! meter_section: "01-core-functionality"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Device state store, history queries, and aggregation."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, Result};

/// Caller identity resolved by the identity collaborator. The core trusts
/// this without re-validating credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub admin: bool,
}

impl Principal {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            admin: false,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            admin: true,
        }
    }

    /// Whether this principal may act on resources owned by `user_id`.
    pub fn may_act_for(&self, user_id: Uuid) -> bool {
        self.admin || self.user_id == user_id
    }
}

/// Mutable on/off state of a metered device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    Default,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum DeviceStatus {
    On,
    #[default]
    Off,
}

/// A meter-instrumented load owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub status: DeviceStatus,
    pub last_voltage: f64,
    pub last_current: f64,
    pub last_power: f64,
    /// Cumulative energy in watt-hours; never decreases while the device exists.
    pub last_energy_wh: f64,
    pub created_at: DateTime<Utc>,
}

impl Device {
    /// A fresh device with zeroed readings.
    pub fn new(user_id: Uuid, name: impl Into<String>, status: DeviceStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            status,
            last_voltage: 0.0,
            last_current: 0.0,
            last_power: 0.0,
            last_energy_wh: 0.0,
            created_at: Utc::now(),
        }
    }
}

/// One complete telemetry tuple reported by (or synthesized for) a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

impl Reading {
    /// Readings must be finite and non-negative.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("voltage", self.voltage),
            ("current", self.current),
            ("power", self.power),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::InvalidInput(format!(
                    "reading field '{field}' must be a non-negative number"
                )));
            }
        }
        Ok(())
    }
}

/// A partially specified reading; absent fields are synthesized by the
/// reading generator using the same distributions as the simulation tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingInput {
    #[serde(default)]
    pub voltage: Option<f64>,
    #[serde(default)]
    pub current: Option<f64>,
    #[serde(default)]
    pub power: Option<f64>,
}

/// One immutable timestamped reading for one device. Appended in timestamp
/// order per device; never mutated and never deleted, even after the device
/// itself is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub ts: DateTime<Utc>,
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    /// Cumulative device energy in Wh at this instant.
    pub energy_wh: f64,
}

/// Visibility class used when listing devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceScope {
    /// Devices owned by a single user.
    User(Uuid),
    /// Every device (administrative view).
    All,
}

/// Settlement state of a bill.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum BillStatus {
    Unpaid,
    Paid,
}

/// Supported payment methods. `wallet` settles synchronously; the others
/// require an external confirmation step.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PaymentMethod {
    Upi,
    Netbanking,
    Wallet,
}

impl PaymentMethod {
    /// Whether the method settles without an external confirmation step.
    pub fn is_synchronous(&self) -> bool {
        matches!(self, PaymentMethod::Wallet)
    }
}

/// Descriptor of an in-flight asynchronous payment attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPayment {
    pub method: PaymentMethod,
    pub started_at: DateTime<Utc>,
    pub by_user: Uuid,
}

/// A billing statement over one user's consumption window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Currency amount, rounded to 2 decimals.
    pub amount: f64,
    pub energy_wh: f64,
    pub kwh: f64,
    /// Currency units per kWh used for this bill.
    pub tariff: f64,
    pub status: BillStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paid_by: Option<Uuid>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub pending_payment: Option<PendingPayment>,
}

/// Round to 2 decimal places (currency amounts, synthesized voltages/powers).
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Round to 3 decimal places (synthesized currents).
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Round to 4 decimal places (energy accumulators).
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_uppercase() {
        assert_eq!(
            serde_json::to_string(&DeviceStatus::On).unwrap(),
            "\"ON\""
        );
        assert_eq!(DeviceStatus::from_str("off").unwrap(), DeviceStatus::Off);
        assert!(DeviceStatus::from_str("standby").is_err());
    }

    #[test]
    fn payment_method_parses_lowercase() {
        assert_eq!(
            PaymentMethod::from_str("wallet").unwrap(),
            PaymentMethod::Wallet
        );
        assert!(PaymentMethod::Wallet.is_synchronous());
        assert!(!PaymentMethod::Upi.is_synchronous());
        assert!(PaymentMethod::from_str("cheque").is_err());
    }

    #[test]
    fn negative_reading_rejected() {
        let reading = Reading {
            voltage: 230.0,
            current: -0.5,
            power: 100.0,
        };
        assert!(matches!(
            reading.validate(),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn principal_scoping() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(Principal::user(a).may_act_for(a));
        assert!(!Principal::user(a).may_act_for(b));
        assert!(Principal::admin(a).may_act_for(b));
    }

    #[test]
    fn rounding_helpers() {
        assert_eq!(round2(19.996), 20.0);
        assert_eq!(round3(0.12345), 0.123);
        assert_eq!(round4(1.00004), 1.0);
    }
}
