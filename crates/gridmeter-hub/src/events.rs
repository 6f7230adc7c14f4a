//! ---
//! meter_section: "05-networking-external-interfaces"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Scoped live-event fan-out for connected viewers."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use gridmeter_core::{Bill, Device, HistoryPoint};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event pushed to live viewers. Serialized with a `type` tag matching the
/// wire vocabulary consumed by subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventFrame {
    /// Initial snapshot of the devices in the connection's scope, sent once
    /// before any live event.
    Init { devices: Vec<Device> },
    /// A reading was applied to a device.
    Metrics { device: Device, point: HistoryPoint },
    DeviceCreated { device: Device },
    DeviceUpdated { device: Device },
    DeviceDeleted { device_id: Uuid },
    BillCreated { bill: Bill },
    BillPaid { bill: Bill },
}

impl EventFrame {
    /// Stable label used for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EventFrame::Init { .. } => "init",
            EventFrame::Metrics { .. } => "metrics",
            EventFrame::DeviceCreated { .. } => "device-created",
            EventFrame::DeviceUpdated { .. } => "device-updated",
            EventFrame::DeviceDeleted { .. } => "device-deleted",
            EventFrame::BillCreated { .. } => "bill-created",
            EventFrame::BillPaid { .. } => "bill-paid",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridmeter_core::DeviceStatus;

    #[test]
    fn frames_tag_with_kebab_case_type() {
        let device = Device::new(Uuid::new_v4(), "Lamp", DeviceStatus::On);
        let json = serde_json::to_value(EventFrame::DeviceCreated { device }).unwrap();
        assert_eq!(json["type"], "device-created");

        let json = serde_json::to_value(EventFrame::DeviceDeleted {
            device_id: Uuid::new_v4(),
        })
        .unwrap();
        assert_eq!(json["type"], "device-deleted");
    }
}
