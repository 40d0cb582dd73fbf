//! Courier tracking for shipped orders.

use serde::{Deserialize, Serialize};

use super::orders::{order_by_number_in, set_status_in, OrderStatus};
use super::{new_id, Store, StoreError, StoreResult};

/// Tracking details of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShippingInfo {
    /// Order number.
    pub order_number: String,
    /// Courier name.
    pub courier: String,
    /// Courier tracking number.
    pub tracking_number: String,
    /// Courier-reported status text.
    pub status: String,
    /// Last reported location.
    pub last_location: Option<String>,
    /// Estimated delivery date.
    pub estimated_delivery: Option<String>,
    /// Last change timestamp.
    pub updated_at: String,
}

/// A tracking update entered from the dashboard.
#[derive(Debug, Clone, Deserialize)]
pub struct ShippingUpdate {
    /// Courier name.
    pub courier: String,
    /// Courier tracking number.
    pub tracking_number: String,
    /// Courier-reported status text; `delivered` completes the order.
    pub status: String,
    /// Last reported location.
    #[serde(default)]
    pub last_location: Option<String>,
    /// Estimated delivery date.
    #[serde(default)]
    pub estimated_delivery: Option<String>,
}

type ShippingRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
);

fn from_row(row: ShippingRow) -> ShippingInfo {
    let (
        order_number,
        courier,
        tracking_number,
        status,
        last_location,
        estimated_delivery,
        updated_at,
    ) = row;
    ShippingInfo {
        order_number,
        courier,
        tracking_number,
        status,
        last_location,
        estimated_delivery,
        updated_at,
    }
}

const SHIPPING_SELECT: &str = "SELECT o.order_number, s.courier, s.tracking_number, s.status, \
     s.last_location, s.estimated_delivery, s.updated_at \
     FROM shipping_tracking s JOIN orders o ON o.id = s.order_id";

impl Store {
    /// Tracking details of an order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the order has no tracking yet.
    pub async fn shipping_for_order(&self, order_number: &str) -> StoreResult<ShippingInfo> {
        let row: Option<ShippingRow> = sqlx::query_as(&format!(
            "{SHIPPING_SELECT} WHERE o.order_number = ?1 COLLATE NOCASE"
        ))
        .bind(order_number.trim())
        .fetch_optional(&self.pool)
        .await?;
        row.map(from_row)
            .ok_or_else(|| StoreError::not_found("shipping", order_number))
    }

    /// Record or replace the tracking details of an order.
    ///
    /// The first update ships a `PROCESSING` order; a `delivered` status
    /// completes a `SHIPPED` one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] for orders that are not yet
    /// paid or are cancelled.
    pub async fn upsert_shipping(
        &self,
        order_number: &str,
        update: &ShippingUpdate,
    ) -> StoreResult<ShippingInfo> {
        if update.courier.trim().is_empty() || update.tracking_number.trim().is_empty() {
            return Err(StoreError::Validation(
                "courier and tracking number are required".into(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let order = order_by_number_in(&mut tx, order_number).await?;
        if matches!(order.status, OrderStatus::Pending | OrderStatus::Cancelled) {
            return Err(StoreError::InvalidTransition {
                entity: "order",
                from: order.status.as_str().to_owned(),
                to: OrderStatus::Shipped.as_str().to_owned(),
            });
        }

        sqlx::query(
            "INSERT INTO shipping_tracking \
                (id, order_id, courier, tracking_number, status, last_location, estimated_delivery) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(order_id) DO UPDATE SET courier = excluded.courier, \
                tracking_number = excluded.tracking_number, status = excluded.status, \
                last_location = excluded.last_location, \
                estimated_delivery = excluded.estimated_delivery, updated_at = datetime('now')",
        )
        .bind(new_id())
        .bind(&order.id)
        .bind(update.courier.trim())
        .bind(update.tracking_number.trim())
        .bind(update.status.trim())
        .bind(&update.last_location)
        .bind(&update.estimated_delivery)
        .execute(&mut *tx)
        .await?;

        set_status_in(&mut tx, &order.id, OrderStatus::Processing, OrderStatus::Shipped).await?;
        if update.status.trim().eq_ignore_ascii_case("delivered") {
            set_status_in(&mut tx, &order.id, OrderStatus::Shipped, OrderStatus::Delivered)
                .await?;
        }

        let row: ShippingRow = sqlx::query_as(&format!("{SHIPPING_SELECT} WHERE o.id = ?1"))
            .bind(&order.id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(from_row(row))
    }
}
