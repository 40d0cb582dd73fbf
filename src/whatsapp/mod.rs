//! WhatsApp channel over Twilio.
//!
//! Inbound messages arrive as form-encoded webhooks and are answered inline
//! with TwiML. Messages that do not answer an inbound request (agent replies
//! from the dashboard) go out through an [`OutboundSender`].

pub mod twilio;

use async_trait::async_trait;

pub use self::twilio::{render_twiml, InboundWhatsApp, TwilioSender};

/// Errors from the WhatsApp channel.
#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    /// HTTP request to Twilio failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Twilio rejected the message.
    #[error("Twilio returned status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Sanitised response body.
        body: String,
    },

    /// The webhook payload is missing a required field.
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    /// Outbound messaging is not configured.
    #[error("outbound WhatsApp is not configured")]
    NotConfigured,
}

/// Sends a WhatsApp message outside the request/response cycle.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    /// Send `text` to the phone number `to` (E.164, no prefix). Returns the
    /// provider's message id.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError`] if the message could not be submitted.
    async fn send(&self, to: &str, text: &str) -> Result<String, WhatsAppError>;
}
