//! ---
//! meter_section: "02-billing-payments"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Billing-window consumption bills and payment settlement."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
pub mod engine;
pub mod payment;

pub use engine::BillingEngine;
pub use payment::{PaymentArtifact, PaymentOutcome};
