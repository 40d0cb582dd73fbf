//! HTTP surface: public chat and catalogue endpoints, channel webhooks and
//! the bearer-authenticated agent dashboard API.
//!
//! Every JSON response uses the envelope
//! `{"success": bool, "data"?: ..., "error"?: string}`.

mod admin;
mod catalog;
mod chat;
mod webhooks;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::chat::cache::ResponseCache;
use crate::chat::{ChatEngine, ChatError, ChatSettings};
use crate::config::{Config, Secrets};
use crate::knowledge::pinecone::PineconeKnowledgeBase;
use crate::knowledge::{KnowledgeBase, NullKnowledgeBase};
use crate::payments::PaymentError;
use crate::providers::anthropic::AnthropicProvider;
use crate::providers::LlmProvider;
use crate::store::{Store, StoreError};
use crate::whatsapp::{OutboundSender, TwilioSender, WhatsAppError};

/// Largest page any list endpoint returns.
const MAX_PAGE: usize = 200;
/// Page size when the client does not ask for one.
const DEFAULT_PAGE: usize = 50;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Database.
    pub store: Store,
    /// Customer message pipeline.
    pub chat: Arc<ChatEngine>,
    /// Sender for agent replies on WhatsApp conversations.
    pub outbound: Option<Arc<dyn OutboundSender>>,
    /// Token expected on the WhatsApp webhook, if enforced.
    pub whatsapp_webhook_token: Option<String>,
    /// Payment gateway server key used to verify notifications.
    pub payment_server_key: Option<String>,
    /// Allowed browser origins; empty allows any.
    pub cors_origins: Vec<String>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("chat", &self.chat)
            .field("outbound", &self.outbound.is_some())
            .field(
                "whatsapp_webhook_token",
                &self.whatsapp_webhook_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "payment_server_key",
                &self.payment_server_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wire the engine and channel clients from configuration.
    ///
    /// Integrations whose credentials are missing are left out: no model
    /// key means every unanswered question gets the fallback reply, no
    /// index means no knowledge snippets, no Twilio credentials means agent
    /// replies on WhatsApp are stored but not delivered.
    pub fn from_config(config: &Config, secrets: &Secrets, store: Store) -> Self {
        let provider: Option<Arc<dyn LlmProvider>> = match secrets.anthropic_api_key.as_deref() {
            Some(key) => Some(Arc::new(AnthropicProvider::new(&config.llm.model, key))),
            None => {
                warn!(
                    var = %config.llm.api_key_env,
                    "no model API key, unanswered questions get the fallback reply"
                );
                None
            }
        };

        let knowledge: Arc<dyn KnowledgeBase> = match (
            config.knowledge.index_host.as_deref(),
            secrets.knowledge_api_key.as_deref(),
        ) {
            (Some(host), Some(key)) => Arc::new(PineconeKnowledgeBase::new(
                host,
                &config.knowledge.namespace,
                key,
                config.knowledge.min_score,
            )),
            (Some(_), None) => {
                warn!(
                    var = %config.knowledge.api_key_env,
                    "knowledge index configured without an API key, retrieval disabled"
                );
                Arc::new(NullKnowledgeBase)
            }
            (None, _) => Arc::new(NullKnowledgeBase),
        };

        let outbound: Option<Arc<dyn OutboundSender>> = match (
            config.whatsapp.account_sid.as_deref(),
            secrets.twilio_auth_token.as_deref(),
            config.whatsapp.from_number.as_deref(),
        ) {
            (Some(sid), Some(token), Some(from)) => {
                Some(Arc::new(TwilioSender::new(sid, token, from)))
            }
            _ => None,
        };

        let cache = Arc::new(ResponseCache::new(
            Duration::from_secs(config.cache.ttl_secs),
            config.cache.max_entries,
        ));
        let chat = Arc::new(ChatEngine::new(
            store.clone(),
            provider,
            knowledge,
            cache,
            ChatSettings::from_config(config),
        ));

        Self {
            store,
            chat,
            outbound,
            whatsapp_webhook_token: secrets.whatsapp_webhook_token.clone(),
            payment_server_key: secrets.payment_server_key.clone(),
            cors_origins: config.server.cors_origins.clone(),
        }
    }
}

/// JSON response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handler result carrying an enveloped payload.
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Wrap a payload in a success envelope.
pub(crate) fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse {
        success: true,
        data: Some(data),
        error: None,
    }))
}

/// Clamp a requested page size.
pub(crate) fn page(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE)
}

/// Errors returned by handlers, rendered as an error envelope.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or invalid input.
    #[error("{0}")]
    BadRequest(String),
    /// Missing or unknown credentials.
    #[error("unauthorized")]
    Unauthorized,
    /// Authenticated but not allowed, or a bad webhook signature.
    #[error("{0}")]
    Forbidden(String),
    /// Unknown record.
    #[error("{0}")]
    NotFound(String),
    /// State-machine violation or lost race.
    #[error("{0}")]
    Conflict(String),
    /// An upstream service failed.
    #[error("{0}")]
    BadGateway(String),
    /// Anything else.
    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for the error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let Self::Internal(detail) = &self {
            error!(error = %detail, "request failed");
        }
        let body = Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.to_string()),
        });
        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::Validation(msg) => Self::BadRequest(msg),
            StoreError::NotAssigned { .. } => Self::Forbidden(err.to_string()),
            StoreError::InvalidTransition { .. }
            | StoreError::AlreadyClaimed { .. }
            | StoreError::NotCancellable { .. }
            | StoreError::InsufficientStock { .. }
            | StoreError::SlotUnavailable => Self::Conflict(err.to_string()),
            StoreError::Database(_) | StoreError::InvalidEnum { .. } => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Store(e) => e.into(),
            ChatError::EmptyMessage | ChatError::MessageTooLong => {
                Self::BadRequest(err.to_string())
            }
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InvalidSignature => Self::Forbidden(err.to_string()),
            PaymentError::NotConfigured => Self::Internal(err.to_string()),
            PaymentError::UnknownStatus(_) | PaymentError::InvalidAmount(_) => {
                Self::BadRequest(err.to_string())
            }
        }
    }
}

impl From<WhatsAppError> for ApiError {
    fn from(err: WhatsAppError) -> Self {
        match err {
            WhatsAppError::InvalidPayload(msg) => Self::BadRequest(msg),
            WhatsAppError::NotConfigured => Self::Internal(err.to_string()),
            WhatsAppError::Http(_) | WhatsAppError::Rejected { .. } => {
                Self::BadGateway(err.to_string())
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

async fn health() -> ApiResult<Health> {
    ok(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", post(chat::send_message))
        .route(
            "/api/chat/{conversation_id}/messages",
            get(chat::poll_messages),
        )
        .route("/api/orders", post(catalog::create_order))
        .route("/api/orders/{number}", get(catalog::get_order))
        .route("/api/orders/{number}/cancel", post(catalog::cancel_order))
        .route("/api/shipping/{number}", get(catalog::get_shipping))
        .route("/api/inventory", get(catalog::list_inventory))
        .route("/api/services", get(catalog::list_services))
        .route("/api/bookings", post(catalog::create_booking))
        .route("/api/bookings/{number}", get(catalog::get_booking))
        .route(
            "/api/bookings/{number}/cancel",
            post(catalog::cancel_booking),
        )
        .route("/webhooks/whatsapp", post(webhooks::whatsapp))
        .route("/webhooks/payment", post(webhooks::payment));

    let admin = admin::routes().layer(middleware::from_fn_with_state(
        state.clone(),
        admin::require_agent,
    ));

    let cors = cors_layer(&state.cors_origins);
    Router::new()
        .merge(public)
        .nest("/api/admin", admin)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
