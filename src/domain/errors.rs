use thiserror::Error;

/// Failure taxonomy for the reservation & settlement pipeline.
///
/// The first five variants are expected, client-recoverable outcomes.
/// `FinalizationFailed` is the "lost write" case: the processor captured the
/// payment but the local commit did not land. It must always reach the log
/// with its payment reference attached.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Operation not permitted for this user")]
    Forbidden,

    #[error("Only {available} items left in stock")]
    InsufficientStock { available: i32 },

    #[error("Cart has expired")]
    CartExpired,

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Payment {payment_ref} succeeded but order finalization failed")]
    FinalizationFailed { payment_ref: String },

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
