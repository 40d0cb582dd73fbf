//! Twilio webhook parsing, TwiML rendering and the REST sender.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{OutboundSender, WhatsAppError};
use crate::providers::sanitize_http_error_body;
use crate::store::customers::normalize_contact;

const API_BASE: &str = "https://api.twilio.com/2010-04-01";
const CONNECT_TIMEOUT_SECS: u64 = 5;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Form fields Twilio posts for an inbound WhatsApp message. Unknown fields
/// are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundWhatsApp {
    /// Sender, `whatsapp:+62812...`.
    #[serde(rename = "From", default)]
    pub from: String,
    /// Message text.
    #[serde(rename = "Body", default)]
    pub body: String,
    /// WhatsApp profile name, when shared.
    #[serde(rename = "ProfileName", default)]
    pub profile_name: Option<String>,
    /// Twilio message id.
    #[serde(rename = "MessageSid", default)]
    pub message_sid: Option<String>,
}

impl InboundWhatsApp {
    /// Sender phone number with the channel prefix and punctuation removed.
    ///
    /// # Errors
    ///
    /// Returns [`WhatsAppError::InvalidPayload`] if `From` is empty.
    pub fn contact(&self) -> Result<String, WhatsAppError> {
        let contact = normalize_contact(&self.from);
        if contact.is_empty() {
            return Err(WhatsAppError::InvalidPayload("missing From".to_owned()));
        }
        Ok(contact)
    }

    /// Profile name, if non-blank.
    pub fn name(&self) -> Option<&str> {
        self.profile_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }
}

/// Escape text for an XML element body.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// TwiML response body. `None` renders an empty `<Response/>` so Twilio
/// sends nothing.
pub fn render_twiml(reply: Option<&str>) -> String {
    match reply {
        Some(text) => format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message>{}</Message></Response>",
            escape_xml(text)
        ),
        None => "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response/>".to_owned(),
    }
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
}

/// Twilio REST client for outbound WhatsApp messages.
#[derive(Clone)]
pub struct TwilioSender {
    account_sid: String,
    auth_token: String,
    from_number: String,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for TwilioSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioSender")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("from_number", &self.from_number)
            .finish()
    }
}

impl TwilioSender {
    /// Create a sender for the given account and WhatsApp number.
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: normalize_contact(&from_number.into()),
            base_url: API_BASE.to_owned(),
            client,
        }
    }

    /// Point the sender at a different API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    /// Form fields for a message to `to`.
    #[doc(hidden)]
    pub fn build_form(&self, to: &str, text: &str) -> Vec<(&'static str, String)> {
        vec![
            ("From", format!("whatsapp:{}", self.from_number)),
            ("To", format!("whatsapp:{}", normalize_contact(to))),
            ("Body", text.to_owned()),
        ]
    }
}

#[async_trait]
impl OutboundSender for TwilioSender {
    async fn send(&self, to: &str, text: &str) -> Result<String, WhatsAppError> {
        let url = format!(
            "{}/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        );
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&self.build_form(to, text))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(WhatsAppError::Rejected {
                status: status.as_u16(),
                body: sanitize_http_error_body(&body),
            });
        }
        let resource: MessageResource = serde_json::from_str(&body)
            .map_err(|e| WhatsAppError::InvalidPayload(e.to_string()))?;
        debug!(sid = %resource.sid, "WhatsApp message queued");
        Ok(resource.sid)
    }
}
