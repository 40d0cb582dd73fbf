//! Public order, shipping, catalogue and booking endpoints.
//!
//! Lookups by reference number also require the customer's phone number;
//! a reference that belongs to someone else is reported as not found.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ok, page, ApiError, ApiResult, AppState};
use crate::store::{
    Booking, Channel, InventoryItem, NewOrderItem, Order, Payment, Service, ShippingInfo,
    StoreError,
};

#[derive(Debug, Deserialize)]
pub(super) struct ContactQuery {
    #[serde(default)]
    phone: Option<String>,
}

fn required_phone(phone: Option<&str>) -> Result<&str, ApiError> {
    phone
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("phone is required".to_owned()))
}

#[derive(Debug, Serialize)]
pub(super) struct OrderView {
    #[serde(flatten)]
    order: Order,
    payment: Option<Payment>,
}

async fn order_view(state: &AppState, order: Order) -> Result<OrderView, ApiError> {
    let payment = match state.store.payment_for_order(&order.order_number).await {
        Ok(payment) => Some(payment),
        Err(StoreError::NotFound { .. }) => None,
        Err(e) => return Err(e.into()),
    };
    Ok(OrderView { order, payment })
}

pub(super) async fn get_order(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Query(query): Query<ContactQuery>,
) -> ApiResult<OrderView> {
    let phone = required_phone(query.phone.as_deref())?;
    let order = state.store.order_for_contact(&number, phone).await?;
    ok(order_view(&state, order).await?)
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateOrderRequest {
    phone: String,
    #[serde(default)]
    name: Option<String>,
    items: Vec<NewOrderItem>,
    #[serde(default)]
    shipping_address: Option<String>,
}

pub(super) async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> ApiResult<OrderView> {
    let phone = required_phone(Some(&request.phone))?;
    let customer = state
        .store
        .find_or_create_customer(phone, request.name.as_deref(), Channel::Web)
        .await?;
    let order = state
        .store
        .create_order(
            &customer.id,
            &request.items,
            request.shipping_address.as_deref(),
        )
        .await?;
    ok(order_view(&state, order).await?)
}

#[derive(Debug, Deserialize)]
pub(super) struct CancelOrderRequest {
    phone: String,
    #[serde(default)]
    reason: Option<String>,
}

pub(super) async fn cancel_order(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Json(request): Json<CancelOrderRequest>,
) -> ApiResult<OrderView> {
    let phone = required_phone(Some(&request.phone))?;
    let order = state.store.order_for_contact(&number, phone).await?;
    let reason = request
        .reason
        .as_deref()
        .unwrap_or("cancelled by customer");
    let cancelled = state
        .store
        .cancel_order(&order.order_number, Some(reason))
        .await?;
    ok(order_view(&state, cancelled).await?)
}

pub(super) async fn get_shipping(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Query(query): Query<ContactQuery>,
) -> ApiResult<ShippingInfo> {
    let phone = required_phone(query.phone.as_deref())?;
    let order = state.store.order_for_contact(&number, phone).await?;
    ok(state.store.shipping_for_order(&order.order_number).await?)
}

#[derive(Debug, Deserialize)]
pub(super) struct InventoryQuery {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

pub(super) async fn list_inventory(
    State(state): State<AppState>,
    Query(query): Query<InventoryQuery>,
) -> ApiResult<Vec<InventoryItem>> {
    let items = match query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        Some(q) => state.store.search_inventory(q, page(query.limit)).await?,
        None => state.store.list_inventory(query.category.as_deref()).await?,
    };
    ok(items)
}

pub(super) async fn list_services(State(state): State<AppState>) -> ApiResult<Vec<Service>> {
    ok(state.store.list_services(false).await?)
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateBookingRequest {
    phone: String,
    #[serde(default)]
    name: Option<String>,
    service_id: String,
    starts_at: DateTime<Utc>,
    #[serde(default)]
    notes: Option<String>,
}

pub(super) async fn create_booking(
    State(state): State<AppState>,
    Json(request): Json<CreateBookingRequest>,
) -> ApiResult<Booking> {
    let phone = required_phone(Some(&request.phone))?;
    let customer = state
        .store
        .find_or_create_customer(phone, request.name.as_deref(), Channel::Web)
        .await?;
    let booking = state
        .store
        .create_booking(
            &customer.id,
            &request.service_id,
            request.starts_at,
            request.notes.as_deref(),
            Utc::now(),
        )
        .await?;
    ok(booking)
}

pub(super) async fn get_booking(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Query(query): Query<ContactQuery>,
) -> ApiResult<Booking> {
    let phone = required_phone(query.phone.as_deref())?;
    ok(state.store.booking_for_contact(&number, phone).await?)
}

#[derive(Debug, Deserialize)]
pub(super) struct CancelBookingRequest {
    phone: String,
}

pub(super) async fn cancel_booking(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Json(request): Json<CancelBookingRequest>,
) -> ApiResult<Booking> {
    let phone = required_phone(Some(&request.phone))?;
    let booking = state.store.booking_for_contact(&number, phone).await?;
    ok(state.store.cancel_booking(&booking.booking_number).await?)
}
