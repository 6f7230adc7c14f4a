//! ---
//! meter_section: "01-core-functionality"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Shared primitives and utilities for the gridmeter runtime."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
pub mod config;
pub mod logging;
pub mod metrics;

pub use config::AppConfig;
pub use logging::init_tracing;
pub use metrics::{new_registry, SharedRegistry};
