//! Orders, their lines, and the order state machine.
//!
//! `PENDING -> PROCESSING -> SHIPPED -> DELIVERED`, with `CANCELLED`
//! reachable only from `PENDING` or `PROCESSING`. Creation reserves stock
//! and cancellation returns it, each inside one transaction, so stock never
//! goes negative and is never lost.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::info;

use super::customers::normalize_contact;
use super::{
    generate_reference, is_unique_violation, new_id, sql_limit, Store, StoreError, StoreResult,
};

/// Attempts at drawing an unused order number before giving up.
const REFERENCE_ATTEMPTS: usize = 3;

/// Order lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Awaiting payment.
    Pending,
    /// Paid, being prepared.
    Processing,
    /// Handed to the courier.
    Shipped,
    /// Received by the customer.
    Delivered,
    /// Cancelled; stock returned.
    Cancelled,
}

impl OrderStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse from text, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "SHIPPED" => Ok(Self::Shipped),
            "DELIVERED" => Ok(Self::Delivered),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(StoreError::invalid_enum("order status", s)),
        }
    }

    /// Whether the order may still be cancelled.
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// The forward step from this status, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Processing),
            Self::Processing => Some(Self::Shipped),
            Self::Shipped => Some(Self::Delivered),
            Self::Delivered | Self::Cancelled => None,
        }
    }
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItem {
    /// Product SKU.
    pub sku: String,
    /// Product name at the time of the order.
    pub name: String,
    /// Units ordered.
    pub quantity: i64,
    /// Price per unit at the time of the order.
    pub unit_price: i64,
}

/// A requested order line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewOrderItem {
    /// Product SKU.
    pub sku: String,
    /// Units wanted.
    pub quantity: i64,
}

/// An order with its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    /// Record id.
    pub id: String,
    /// Public reference, `ORD-YYYYMMDD-XXXX`.
    pub order_number: String,
    /// Ordering customer.
    pub customer_id: String,
    /// Lifecycle state.
    pub status: OrderStatus,
    /// Sum of all lines in whole currency units.
    pub total_amount: i64,
    /// Delivery address.
    pub shipping_address: Option<String>,
    /// Why the order was cancelled.
    pub cancel_reason: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last change timestamp.
    pub updated_at: String,
    /// When the order was cancelled.
    pub cancelled_at: Option<String>,
    /// Order lines.
    pub items: Vec<OrderItem>,
}

type OrderRow = (
    String,
    String,
    String,
    String,
    i64,
    Option<String>,
    Option<String>,
    String,
    String,
    Option<String>,
);

const ORDER_COLUMNS: &str = "id, order_number, customer_id, status, total_amount, \
     shipping_address, cancel_reason, created_at, updated_at, cancelled_at";

async fn load_items(conn: &mut SqliteConnection, order_id: &str) -> StoreResult<Vec<OrderItem>> {
    let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(
        "SELECT i.sku, i.name, oi.quantity, oi.unit_price \
         FROM order_items oi JOIN inventory i ON i.id = oi.inventory_id \
         WHERE oi.order_id = ?1 ORDER BY oi.id",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(sku, name, quantity, unit_price)| OrderItem {
            sku,
            name,
            quantity,
            unit_price,
        })
        .collect())
}

async fn hydrate(conn: &mut SqliteConnection, row: OrderRow) -> StoreResult<Order> {
    let (
        id,
        order_number,
        customer_id,
        status,
        total_amount,
        shipping_address,
        cancel_reason,
        created_at,
        updated_at,
        cancelled_at,
    ) = row;
    let items = load_items(conn, &id).await?;
    Ok(Order {
        id,
        order_number,
        customer_id,
        status: OrderStatus::parse(&status)?,
        total_amount,
        shipping_address,
        cancel_reason,
        created_at,
        updated_at,
        cancelled_at,
        items,
    })
}

pub(crate) async fn order_by_number_in(
    conn: &mut SqliteConnection,
    order_number: &str,
) -> StoreResult<Order> {
    let row: Option<OrderRow> = sqlx::query_as(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = ?1 COLLATE NOCASE"
    ))
    .bind(order_number.trim())
    .fetch_optional(&mut *conn)
    .await?;
    match row {
        Some(row) => hydrate(conn, row).await,
        None => Err(StoreError::not_found("order", order_number)),
    }
}

pub(crate) async fn order_by_id_in(conn: &mut SqliteConnection, id: &str) -> StoreResult<Order> {
    let row: Option<OrderRow> =
        sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    match row {
        Some(row) => hydrate(conn, row).await,
        None => Err(StoreError::not_found("order", id)),
    }
}

/// Move an order from `from` to `to` if it is still in `from`. Returns
/// whether the row changed.
pub(crate) async fn set_status_in(
    conn: &mut SqliteConnection,
    order_id: &str,
    from: OrderStatus,
    to: OrderStatus,
) -> StoreResult<bool> {
    let result = sqlx::query(
        "UPDATE orders SET status = ?3, updated_at = datetime('now') \
         WHERE id = ?1 AND status = ?2",
    )
    .bind(order_id)
    .bind(from.as_str())
    .bind(to.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Cancel an order on an existing connection: status change, restock and
/// payment settlement (`paid` becomes `refunded`, `pending` becomes
/// `failed`).
pub(crate) async fn cancel_in(
    conn: &mut SqliteConnection,
    order_number: &str,
    reason: Option<&str>,
) -> StoreResult<Order> {
    let cancelled: Option<(String,)> = sqlx::query_as(
        "UPDATE orders SET status = 'CANCELLED', cancel_reason = ?2, \
            cancelled_at = datetime('now'), updated_at = datetime('now') \
         WHERE order_number = ?1 COLLATE NOCASE AND status IN ('PENDING', 'PROCESSING') \
         RETURNING id",
    )
    .bind(order_number.trim())
    .bind(reason)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((order_id,)) = cancelled else {
        let current = order_by_number_in(conn, order_number).await?;
        return Err(StoreError::NotCancellable {
            order_number: current.order_number,
            status: current.status.as_str().to_owned(),
        });
    };

    sqlx::query(
        "UPDATE inventory SET \
            stock = stock + (SELECT COALESCE(SUM(oi.quantity), 0) FROM order_items oi \
                             WHERE oi.order_id = ?1 AND oi.inventory_id = inventory.id), \
            updated_at = datetime('now') \
         WHERE id IN (SELECT inventory_id FROM order_items WHERE order_id = ?1)",
    )
    .bind(&order_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "UPDATE payments SET status = CASE status \
                WHEN 'paid' THEN 'refunded' WHEN 'pending' THEN 'failed' ELSE status END, \
            updated_at = datetime('now') \
         WHERE order_id = ?1",
    )
    .bind(&order_id)
    .execute(&mut *conn)
    .await?;

    order_by_id_in(conn, &order_id).await
}

impl Store {
    /// Place an order: reserve stock for every line, record the order and
    /// open a pending payment for its total.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for empty orders or non-positive
    /// quantities, [`StoreError::NotFound`] for unknown SKUs and
    /// [`StoreError::InsufficientStock`] when a line cannot be filled.
    pub async fn create_order(
        &self,
        customer_id: &str,
        items: &[NewOrderItem],
        shipping_address: Option<&str>,
    ) -> StoreResult<Order> {
        if items.is_empty() {
            return Err(StoreError::Validation(
                "an order needs at least one item".into(),
            ));
        }
        if let Some(bad) = items.iter().find(|i| i.quantity <= 0) {
            return Err(StoreError::Validation(format!(
                "quantity for {} must be positive",
                bad.sku
            )));
        }

        let mut tx = self.pool.begin().await?;

        let mut lines = Vec::with_capacity(items.len());
        let mut total: i64 = 0;
        for item in items {
            let reserved: Option<(String, i64)> = sqlx::query_as(
                "UPDATE inventory SET stock = stock - ?2, updated_at = datetime('now') \
                 WHERE sku = ?1 AND stock >= ?2 RETURNING id, price",
            )
            .bind(&item.sku)
            .bind(item.quantity)
            .fetch_optional(&mut *tx)
            .await?;

            let Some((inventory_id, price)) = reserved else {
                let available: Option<(i64,)> =
                    sqlx::query_as("SELECT stock FROM inventory WHERE sku = ?1")
                        .bind(&item.sku)
                        .fetch_optional(&mut *tx)
                        .await?;
                return Err(match available {
                    Some((available,)) => StoreError::InsufficientStock {
                        sku: item.sku.clone(),
                        requested: item.quantity,
                        available,
                    },
                    None => StoreError::not_found("inventory item", item.sku.as_str()),
                });
            };

            let line_total = price
                .checked_mul(item.quantity)
                .and_then(|line| total.checked_add(line))
                .ok_or_else(|| StoreError::Validation("order total is too large".into()))?;
            total = line_total;
            lines.push((inventory_id, item.quantity, price));
        }

        let order_id = new_id();
        let mut order_number = None;
        for _ in 0..REFERENCE_ATTEMPTS {
            let candidate = generate_reference("ORD", Utc::now());
            let inserted = sqlx::query(
                "INSERT INTO orders (id, order_number, customer_id, total_amount, shipping_address) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&order_id)
            .bind(&candidate)
            .bind(customer_id)
            .bind(total)
            .bind(shipping_address.map(str::trim).filter(|a| !a.is_empty()))
            .execute(&mut *tx)
            .await;
            match inserted {
                Ok(_) => {
                    order_number = Some(candidate);
                    break;
                }
                Err(e) if is_unique_violation(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let Some(order_number) = order_number else {
            return Err(StoreError::Validation(
                "could not allocate an order number".into(),
            ));
        };

        for (inventory_id, quantity, unit_price) in &lines {
            sqlx::query(
                "INSERT INTO order_items (order_id, inventory_id, quantity, unit_price) \
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&order_id)
            .bind(inventory_id)
            .bind(*quantity)
            .bind(*unit_price)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("INSERT INTO payments (id, order_id, amount) VALUES (?1, ?2, ?3)")
            .bind(new_id())
            .bind(&order_id)
            .bind(total)
            .execute(&mut *tx)
            .await?;

        let order = order_by_id_in(&mut tx, &order_id).await?;
        tx.commit().await?;
        info!(order_number = %order.order_number, total, "order created");
        Ok(order)
    }

    /// Look up an order by its public number.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such order exists.
    pub async fn order_by_number(&self, order_number: &str) -> StoreResult<Order> {
        let mut conn = self.pool.acquire().await?;
        order_by_number_in(&mut conn, order_number).await
    }

    /// Look up an order on behalf of a customer identified by contact.
    /// Orders of other customers are reported as not found.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the order does not exist or does
    /// not belong to the contact.
    pub async fn order_for_contact(&self, order_number: &str, contact: &str) -> StoreResult<Order> {
        let phone = normalize_contact(contact);
        let mut conn = self.pool.acquire().await?;
        let order = order_by_number_in(&mut conn, order_number).await?;
        let owner: Option<(String,)> = sqlx::query_as("SELECT phone FROM customers WHERE id = ?1")
            .bind(&order.customer_id)
            .fetch_optional(&mut *conn)
            .await?;
        match owner {
            Some((owner_phone,)) if owner_phone == phone => Ok(order),
            _ => Err(StoreError::not_found("order", order_number)),
        }
    }

    /// A customer's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn orders_for_customer(
        &self,
        customer_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE customer_id = ?1 \
             ORDER BY created_at DESC, rowid DESC LIMIT ?2"
        ))
        .bind(customer_id)
        .bind(sql_limit(limit))
        .fetch_all(&mut *conn)
        .await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(hydrate(&mut conn, row).await?);
        }
        Ok(orders)
    }

    /// All orders, optionally by status, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list_orders(
        &self,
        status: Option<OrderStatus>,
        limit: usize,
    ) -> StoreResult<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE ?1 IS NULL OR status = ?1 \
             ORDER BY created_at DESC, rowid DESC LIMIT ?2"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(sql_limit(limit))
        .fetch_all(&mut *conn)
        .await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(hydrate(&mut conn, row).await?);
        }
        Ok(orders)
    }

    /// Cancel an order while it is `PENDING` or `PROCESSING`, returning its
    /// stock and settling its payment.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotCancellable`] once the order has shipped
    /// (or is already cancelled) and [`StoreError::NotFound`] for unknown
    /// numbers.
    pub async fn cancel_order(&self, order_number: &str, reason: Option<&str>) -> StoreResult<Order> {
        let mut tx = self.pool.begin().await?;
        let order = cancel_in(&mut tx, order_number, reason).await?;
        tx.commit().await?;
        info!(order_number = %order.order_number, "order cancelled");
        Ok(order)
    }

    /// Move an order one step forward in the fulfilment sequence.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] unless `to` is the direct
    /// successor of the current status. Cancellation goes through
    /// [`Store::cancel_order`].
    pub async fn advance_order(&self, order_number: &str, to: OrderStatus) -> StoreResult<Order> {
        let mut tx = self.pool.begin().await?;
        let current = order_by_number_in(&mut tx, order_number).await?;
        let invalid = || StoreError::InvalidTransition {
            entity: "order",
            from: current.status.as_str().to_owned(),
            to: to.as_str().to_owned(),
        };
        if current.status.next() != Some(to) {
            return Err(invalid());
        }
        if !set_status_in(&mut tx, &current.id, current.status, to).await? {
            return Err(invalid());
        }
        let order = order_by_id_in(&mut tx, &current.id).await?;
        tx.commit().await?;
        info!(order_number = %order.order_number, status = to.as_str(), "order advanced");
        Ok(order)
    }
}
