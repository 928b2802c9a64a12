use uuid::Uuid;

use super::errors::DomainError;

/// A create-and-confirm charge request for the external processor.
///
/// `amount_minor` is in the currency's minor unit (cents for USD).
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub customer_ref: Uuid,
    pub payment_method: String,
}

/// The processor's answer to a charge request. `succeeded` is false for any
/// non-success terminal status; the raw status string is kept for logging.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub payment_ref: String,
    pub status: String,
    pub succeeded: bool,
}

/// The external payment processor, as consumed by the checkout orchestrator.
///
/// The call is a synchronous network round-trip made outside any database
/// transaction; callers run it on a blocking thread. A transport error is a
/// payment failure from the orchestrator's point of view.
pub trait PaymentProcessor: Send + Sync + 'static {
    fn charge(&self, request: ChargeRequest) -> Result<PaymentConfirmation, DomainError>;
}
