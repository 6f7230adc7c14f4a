//! ---
//! meter_section: "02-billing-payments"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Billing-window consumption bills and payment settlement."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use chrono::Utc;
use gridmeter_core::{Bill, BillStatus, CoreError, PaymentMethod, PendingPayment, Principal, Result};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::BillingEngine;

/// Client-facing artifact for an asynchronous payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentArtifact {
    /// UPI deep-link payload to render as a QR code.
    UpiQr { payload: String },
    /// Gateway URL the client should navigate to.
    Redirect { url: String },
}

/// Result of starting a payment: either settled on the spot (wallet) or
/// pending external confirmation.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    Pending(PaymentArtifact),
    Settled(Bill),
}

impl BillingEngine {
    /// Begin paying a bill. Wallet settles immediately; UPI and netbanking
    /// record a pending attempt and hand back the artifact the client needs
    /// to complete it. At most one attempt may be in flight per bill.
    pub fn start_payment(
        &self,
        principal: &Principal,
        bill_id: Uuid,
        method: PaymentMethod,
    ) -> Result<PaymentOutcome> {
        let now = Utc::now();
        let bill = self.update_bill(bill_id, |bill| {
            if !principal.may_act_for(bill.user_id) {
                return Err(CoreError::Forbidden("bill belongs to another user"));
            }
            if bill.status == BillStatus::Paid {
                return Err(CoreError::InvalidState("bill is already paid".to_owned()));
            }
            if bill.pending_payment.is_some() {
                return Err(CoreError::Conflict(
                    "a payment for this bill is already in progress".to_owned(),
                ));
            }
            if method.is_synchronous() {
                bill.status = BillStatus::Paid;
                bill.paid_at = Some(now);
                bill.paid_by = Some(principal.user_id);
                bill.payment_method = Some(method);
            } else {
                bill.pending_payment = Some(PendingPayment {
                    method,
                    started_at: now,
                    by_user: principal.user_id,
                });
            }
            Ok(())
        })?;

        if method.is_synchronous() {
            info!(bill = %bill.id, %method, "bill settled");
            self.publish_paid(&bill);
            return Ok(PaymentOutcome::Settled(bill));
        }

        info!(bill = %bill.id, %method, "payment started");
        let artifact = match method {
            PaymentMethod::Upi => PaymentArtifact::UpiQr {
                payload: format!(
                    "upi://pay?pa={}&pn=Gridmeter&am={:.2}&cu={}&tn={}",
                    self.config().upi_payee,
                    bill.amount,
                    self.config().currency,
                    bill.id
                ),
            },
            PaymentMethod::Netbanking | PaymentMethod::Wallet => PaymentArtifact::Redirect {
                url: format!(
                    "{}?bill={}&amount={:.2}",
                    self.config().netbanking_gateway,
                    bill.id,
                    bill.amount
                ),
            },
        };
        Ok(PaymentOutcome::Pending(artifact))
    }

    /// Confirm the pending payment attempt on a bill.
    ///
    /// Confirming an already settled bill is a no-op that returns the bill
    /// unchanged; confirming with no attempt in flight is an error.
    pub fn confirm_payment(&self, principal: &Principal, bill_id: Uuid) -> Result<Bill> {
        let now = Utc::now();
        let mut settled = false;
        let bill = self.update_bill(bill_id, |bill| {
            if !principal.may_act_for(bill.user_id) {
                return Err(CoreError::Forbidden("bill belongs to another user"));
            }
            if bill.status == BillStatus::Paid {
                return Ok(());
            }
            match bill.pending_payment.take() {
                Some(pending) => {
                    bill.status = BillStatus::Paid;
                    bill.paid_at = Some(now);
                    bill.paid_by = Some(principal.user_id);
                    bill.payment_method = Some(pending.method);
                    settled = true;
                    Ok(())
                }
                None => Err(CoreError::InvalidState(
                    "bill has no payment in progress".to_owned(),
                )),
            }
        })?;

        if settled {
            info!(bill = %bill.id, "payment confirmed");
            self.publish_paid(&bill);
        }
        Ok(bill)
    }
}
