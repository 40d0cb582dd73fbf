//! Agent dashboard API under `/api/admin`, authenticated with a bearer
//! token issued by `concierge create-agent`.

use axum::body::Bytes;
use axum::extract::{Path, Query, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ok, page, ApiError, ApiResult, AppState};
use crate::chat::cache::CacheStats;
use crate::store::{
    AdminUser, Booking, BookingStatus, Channel, ChatMessage, ConversationOverview,
    ConversationStatus, ConversationSummary, Handoff, HandoffStatus, InventoryItem,
    NewInventoryItem, NewService, Notification, Order, OrderStatus, SalesSummary, Service,
    ShippingInfo, ShippingUpdate,
};

/// Longest analytics window.
const MAX_ANALYTICS_DAYS: u32 = 366;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(me))
        .route("/agents", get(list_agents))
        .route("/conversations", get(list_conversations))
        .route("/conversations/{id}/messages", get(conversation_messages))
        .route("/conversations/{id}/reply", post(reply))
        .route("/handoffs", get(list_handoffs))
        .route("/handoffs/{id}/claim", post(claim_handoff))
        .route("/handoffs/{id}/release", post(release_handoff))
        .route("/handoffs/{id}/resolve", post(resolve_handoff))
        .route("/handoffs/{id}/return", post(return_to_bot))
        .route("/notifications", get(list_notifications))
        .route("/notifications/{id}/read", post(mark_notification_read))
        .route("/analytics/sales", get(sales_summary))
        .route("/analytics/conversations", get(conversation_summary))
        .route("/cache", get(cache_stats).delete(clear_cache))
        .route("/orders", get(list_orders))
        .route("/orders/{number}/advance", post(advance_order))
        .route("/orders/{number}/shipping", axum::routing::put(update_shipping))
        .route("/bookings/{number}/status", post(set_booking_status))
        .route("/inventory", post(upsert_inventory))
        .route("/services", post(create_service))
}

/// Resolve the bearer token to an active agent and attach it to the request.
pub(super) async fn require_agent(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthorized)?;

    let agent = state
        .store
        .authenticate_admin(token)
        .await?
        .ok_or(ApiError::Unauthorized)?;
    req.extensions_mut().insert(agent);
    Ok(next.run(req).await)
}

fn require_admin(agent: &AdminUser) -> Result<(), ApiError> {
    if agent.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("admin role required".to_owned()))
    }
}

fn parse_filter<T>(
    raw: Option<&str>,
    parse: impl Fn(&str) -> Result<T, crate::store::StoreError>,
) -> Result<Option<T>, ApiError> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse(s).map_err(|_| ApiError::BadRequest(format!("unknown status: {s}"))))
        .transpose()
}

async fn me(Extension(agent): Extension<AdminUser>) -> ApiResult<AdminUser> {
    ok(agent)
}

async fn list_agents(
    State(state): State<AppState>,
    Extension(agent): Extension<AdminUser>,
) -> ApiResult<Vec<AdminUser>> {
    require_admin(&agent)?;
    ok(state.store.list_admins().await?)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<ConversationOverview>> {
    let status = parse_filter(query.status.as_deref(), ConversationStatus::parse)?;
    ok(state
        .store
        .list_conversations(status, page(query.limit))
        .await?)
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    #[serde(default)]
    after: Option<i64>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn conversation_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Vec<ChatMessage>> {
    let conversation = state.store.conversation(&id).await?;
    ok(state
        .store
        .messages(&conversation.id, query.after, page(query.limit))
        .await?)
}

#[derive(Debug, Deserialize)]
struct ReplyRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct ReplyResponse {
    message: ChatMessage,
    /// `None` for web chats, which poll for new messages.
    delivered: Option<bool>,
}

async fn reply(
    State(state): State<AppState>,
    Extension(agent): Extension<AdminUser>,
    Path(id): Path<String>,
    Json(request): Json<ReplyRequest>,
) -> ApiResult<ReplyResponse> {
    let text = request.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("reply text must not be empty".to_owned()));
    }
    let message = state.store.record_agent_reply(&id, &agent, text).await?;

    let conversation = state.store.conversation(&id).await?;
    let delivered = match conversation.channel {
        Channel::Web => None,
        Channel::WhatsApp => {
            let customer = state.store.customer(&conversation.customer_id).await?;
            match state.outbound.as_ref() {
                Some(sender) => match sender.send(&customer.phone, text).await {
                    Ok(_) => Some(true),
                    Err(e) => {
                        warn!(error = %e, conversation_id = %id, "agent reply not delivered");
                        Some(false)
                    }
                },
                None => {
                    warn!(conversation_id = %id, "outbound WhatsApp not configured");
                    Some(false)
                }
            }
        }
    };
    ok(ReplyResponse { message, delivered })
}

async fn list_handoffs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<Handoff>> {
    let status = parse_filter(query.status.as_deref(), HandoffStatus::parse)?;
    ok(state.store.list_handoffs(status, page(query.limit)).await?)
}

async fn claim_handoff(
    State(state): State<AppState>,
    Extension(agent): Extension<AdminUser>,
    Path(id): Path<String>,
) -> ApiResult<Handoff> {
    let handoff = state.store.claim_handoff(&id, &agent).await?;
    info!(handoff_id = %id, agent_id = %agent.id, "handoff claimed");
    ok(handoff)
}

async fn release_handoff(
    State(state): State<AppState>,
    Extension(agent): Extension<AdminUser>,
    Path(id): Path<String>,
) -> ApiResult<Handoff> {
    let handoff = state.store.release_handoff(&id, &agent).await?;
    info!(handoff_id = %id, agent_id = %agent.id, "handoff released");
    ok(handoff)
}

#[derive(Debug, Default, Deserialize)]
struct ResolveRequest {
    #[serde(default)]
    note: Option<String>,
}

async fn resolve_handoff(
    State(state): State<AppState>,
    Extension(agent): Extension<AdminUser>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Handoff> {
    let request: ResolveRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ResolveRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid body: {e}")))?
    };
    let handoff = state
        .store
        .resolve_handoff(&id, &agent, request.note.as_deref())
        .await?;
    info!(handoff_id = %id, agent_id = %agent.id, "handoff resolved");
    ok(handoff)
}

async fn return_to_bot(
    State(state): State<AppState>,
    Extension(agent): Extension<AdminUser>,
    Path(id): Path<String>,
) -> ApiResult<Handoff> {
    let handoff = state.store.return_to_bot(&id, &agent).await?;
    info!(handoff_id = %id, agent_id = %agent.id, "conversation returned to assistant");
    ok(handoff)
}

#[derive(Debug, Deserialize)]
struct NotificationQuery {
    #[serde(default)]
    unread: bool,
    #[serde(default)]
    limit: Option<usize>,
}

async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Vec<Notification>> {
    ok(state
        .store
        .list_notifications(query.unread, page(query.limit))
        .await?)
}

async fn mark_notification_read(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<i64> {
    state.store.mark_notification_read(id).await?;
    ok(id)
}

#[derive(Debug, Deserialize)]
struct SalesQuery {
    #[serde(default)]
    days: Option<u32>,
}

async fn sales_summary(
    State(state): State<AppState>,
    Query(query): Query<SalesQuery>,
) -> ApiResult<SalesSummary> {
    let days = query.days.unwrap_or(30).clamp(1, MAX_ANALYTICS_DAYS);
    ok(state.store.sales_summary(days).await?)
}

async fn conversation_summary(State(state): State<AppState>) -> ApiResult<ConversationSummary> {
    ok(state.store.conversation_summary().await?)
}

#[derive(Debug, Serialize)]
struct CacheReport {
    #[serde(flatten)]
    stats: CacheStats,
    tokens_used_today: u64,
    daily_token_limit: u64,
}

async fn cache_stats(State(state): State<AppState>) -> ApiResult<CacheReport> {
    ok(CacheReport {
        stats: state.chat.cache().stats(),
        tokens_used_today: state.chat.budget().used(),
        daily_token_limit: state.chat.budget().limit(),
    })
}

async fn clear_cache(
    State(state): State<AppState>,
    Extension(agent): Extension<AdminUser>,
) -> ApiResult<CacheStats> {
    state.chat.cache().clear();
    info!(agent_id = %agent.id, "response cache cleared");
    ok(state.chat.cache().stats())
}

async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<Order>> {
    let status = parse_filter(query.status.as_deref(), OrderStatus::parse)?;
    ok(state.store.list_orders(status, page(query.limit)).await?)
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: String,
}

async fn advance_order(
    State(state): State<AppState>,
    Extension(agent): Extension<AdminUser>,
    Path(number): Path<String>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<Order> {
    let to = parse_filter(Some(&request.status), OrderStatus::parse)?
        .ok_or_else(|| ApiError::BadRequest("status is required".to_owned()))?;
    let order = state.store.advance_order(&number, to).await?;
    info!(order_number = %number, status = to.as_str(), agent_id = %agent.id, "order advanced");
    ok(order)
}

async fn update_shipping(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Json(update): Json<ShippingUpdate>,
) -> ApiResult<ShippingInfo> {
    ok(state.store.upsert_shipping(&number, &update).await?)
}

async fn set_booking_status(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<Booking> {
    let to = parse_filter(Some(&request.status), BookingStatus::parse)?
        .ok_or_else(|| ApiError::BadRequest("status is required".to_owned()))?;
    ok(state.store.set_booking_status(&number, to).await?)
}

async fn upsert_inventory(
    State(state): State<AppState>,
    Extension(agent): Extension<AdminUser>,
    Json(item): Json<NewInventoryItem>,
) -> ApiResult<InventoryItem> {
    require_admin(&agent)?;
    ok(state.store.upsert_inventory(&item).await?)
}

async fn create_service(
    State(state): State<AppState>,
    Extension(agent): Extension<AdminUser>,
    Json(service): Json<NewService>,
) -> ApiResult<Service> {
    require_admin(&agent)?;
    ok(state.store.create_service(&service).await?)
}
