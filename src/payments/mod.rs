//! Payment gateway notifications.
//!
//! The gateway reports status changes by HTTP callback. [`midtrans`]
//! verifies the callback signature and translates it into a
//! [`PaymentUpdate`](crate::store::PaymentUpdate) for the store.

pub mod midtrans;

pub use self::midtrans::{verify_signature, MidtransNotification};

/// Errors from payment notification handling.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// The signature does not match the payload.
    #[error("invalid notification signature")]
    InvalidSignature,

    /// No server key is configured, so notifications cannot be verified.
    #[error("payment server key is not configured")]
    NotConfigured,

    /// The transaction status is not one we know.
    #[error("unknown transaction status: {0}")]
    UnknownStatus(String),

    /// The gross amount is malformed.
    #[error("invalid gross amount: {0}")]
    InvalidAmount(String),
}
