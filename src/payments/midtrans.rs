//! Midtrans HTTP notification handling.
//!
//! The signature is `sha512(order_id + status_code + gross_amount +
//! server_key)` as lowercase hex, compared in constant time.

use serde::Deserialize;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

use super::PaymentError;
use crate::store::{PaymentStatus, PaymentUpdate};

/// Fields of a Midtrans notification that we use. Everything else in the
/// payload is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct MidtransNotification {
    /// Our order number.
    pub order_id: String,
    /// Gateway status code, e.g. `"200"`.
    pub status_code: String,
    /// Amount with two decimals, e.g. `"150000.00"`.
    pub gross_amount: String,
    /// Hex SHA-512 signature.
    pub signature_key: String,
    /// Transaction state.
    pub transaction_status: String,
    /// Fraud screening result for card captures.
    #[serde(default)]
    pub fraud_status: Option<String>,
    /// Payment channel, e.g. `bank_transfer`.
    #[serde(default)]
    pub payment_type: Option<String>,
    /// Gateway transaction id.
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// Expected signature for a notification.
pub fn expected_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check the notification signature against the server key.
///
/// # Errors
///
/// Returns [`PaymentError::InvalidSignature`] on mismatch.
pub fn verify_signature(
    notification: &MidtransNotification,
    server_key: &str,
) -> Result<(), PaymentError> {
    let expected = expected_signature(
        &notification.order_id,
        &notification.status_code,
        &notification.gross_amount,
        server_key,
    );
    let provided = notification.signature_key.trim().to_ascii_lowercase();
    if bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
        Ok(())
    } else {
        Err(PaymentError::InvalidSignature)
    }
}

/// Map `transaction_status` and `fraud_status` to a payment status.
///
/// # Errors
///
/// Returns [`PaymentError::UnknownStatus`] for unrecognised states.
pub fn map_status(
    transaction_status: &str,
    fraud_status: Option<&str>,
) -> Result<PaymentStatus, PaymentError> {
    match (transaction_status, fraud_status) {
        ("capture", None | Some("accept")) | ("settlement", _) => Ok(PaymentStatus::Paid),
        ("capture", Some("challenge")) | ("pending" | "authorize", _) => {
            Ok(PaymentStatus::Pending)
        }
        ("capture", Some(_)) | ("deny" | "cancel" | "failure", _) => Ok(PaymentStatus::Failed),
        ("expire", _) => Ok(PaymentStatus::Expired),
        ("refund" | "partial_refund", _) => Ok(PaymentStatus::Refunded),
        (other, _) => Err(PaymentError::UnknownStatus(other.to_owned())),
    }
}

/// Parse a gross amount in whole currency units. Only a zero fractional
/// part is accepted.
///
/// # Errors
///
/// Returns [`PaymentError::InvalidAmount`] if the value is not a
/// non-negative whole amount.
pub fn parse_gross_amount(raw: &str) -> Result<i64, PaymentError> {
    let invalid = || PaymentError::InvalidAmount(raw.to_owned());
    let trimmed = raw.trim();
    let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    if whole.is_empty()
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b == b'0')
    {
        return Err(invalid());
    }
    whole.parse::<i64>().map_err(|_| invalid())
}

impl MidtransNotification {
    /// Translate into a store update.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError`] for unknown states or malformed amounts.
    pub fn to_update(&self) -> Result<PaymentUpdate, PaymentError> {
        Ok(PaymentUpdate {
            order_number: self.order_id.clone(),
            status: map_status(&self.transaction_status, self.fraud_status.as_deref())?,
            amount: parse_gross_amount(&self.gross_amount)?,
            method: self.payment_type.clone(),
            transaction_id: self.transaction_id.clone(),
        })
    }
}
