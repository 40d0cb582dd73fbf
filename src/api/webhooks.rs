//! Inbound webhooks from Twilio and the payment gateway.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use super::{ok, ApiError, ApiResult, AppState};
use crate::chat::{ChatError, Inbound};
use crate::payments::{verify_signature, MidtransNotification, PaymentError};
use crate::store::{Channel, OrderStatus, PaymentStatus};
use crate::whatsapp::{render_twiml, InboundWhatsApp};

#[derive(Debug, Deserialize)]
pub(super) struct WebhookQuery {
    #[serde(default)]
    token: Option<String>,
}

fn twiml(reply: Option<&str>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/xml")],
        render_twiml(reply),
    )
        .into_response()
}

/// Twilio inbound WhatsApp message. The reply goes back inline as TwiML.
pub(super) async fn whatsapp(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    Form(inbound): Form<InboundWhatsApp>,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.whatsapp_webhook_token.as_deref() {
        let provided = query.token.unwrap_or_default();
        if !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
            warn!("rejected WhatsApp webhook with bad token");
            return Err(ApiError::Forbidden("invalid webhook token".to_owned()));
        }
    }

    let contact = inbound.contact()?;
    let result = state
        .chat
        .handle(Inbound {
            channel: Channel::WhatsApp,
            contact,
            name: inbound.name().map(str::to_owned),
            text: inbound.body.clone(),
        })
        .await;

    match result {
        Ok(outcome) => Ok(twiml(outcome.reply.text())),
        // Media-only messages arrive with an empty body.
        Err(ChatError::EmptyMessage) => Ok(twiml(None)),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Serialize)]
pub(super) struct PaymentAck {
    order_number: String,
    payment_status: PaymentStatus,
    order_status: OrderStatus,
    changed: bool,
}

/// Payment gateway status notification.
pub(super) async fn payment(
    State(state): State<AppState>,
    Json(notification): Json<MidtransNotification>,
) -> ApiResult<PaymentAck> {
    let server_key = state
        .payment_server_key
        .as_deref()
        .ok_or(PaymentError::NotConfigured)?;
    if let Err(e) = verify_signature(&notification, server_key) {
        warn!(order_number = %notification.order_id, "rejected payment notification");
        return Err(e.into());
    }

    let update = notification.to_update()?;
    let outcome = state.store.apply_payment_update(&update).await?;
    info!(
        order_number = %update.order_number,
        payment_status = outcome.payment.status.as_str(),
        order_status = outcome.order_status.as_str(),
        changed = outcome.changed,
        "payment notification applied"
    );
    ok(PaymentAck {
        order_number: update.order_number,
        payment_status: outcome.payment.status,
        order_status: outcome.order_status,
        changed: outcome.changed,
    })
}
