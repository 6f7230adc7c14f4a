//! ---
//! meter_section: "11-simulation-test-harness"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Synthetic reading generation and the ingestion driver."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
pub mod driver;
pub mod generator;

pub use driver::{DriverHandle, IngestionDriver};
pub use generator::ReadingGenerator;
