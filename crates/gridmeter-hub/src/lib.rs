//! ---
//! meter_section: "05-networking-external-interfaces"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Scoped live-event fan-out for connected viewers."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
pub mod events;
pub mod hub;
pub mod metrics;

pub use events::EventFrame;
pub use hub::{BroadcastHub, ConnectionId, ConnectionScope};
pub use metrics::HubMetrics;
