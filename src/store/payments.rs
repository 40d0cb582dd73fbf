//! Payment records and the effect of gateway status updates on orders.
//!
//! Gateways retry notifications, so applying an update is idempotent: a
//! status the payment already has changes nothing, and updates that would
//! move a payment backwards (a settled payment reported as pending again,
//! say) are ignored rather than rejected.

use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use super::notifications;
use super::orders::{cancel_in, order_by_number_in, set_status_in, OrderStatus};
use super::{Store, StoreError, StoreResult};

/// Payment lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Awaiting the customer.
    Pending,
    /// Settled.
    Paid,
    /// Denied or cancelled at the gateway.
    Failed,
    /// The payment window closed.
    Expired,
    /// Money returned to the customer.
    Refunded,
}

impl PaymentStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Refunded => "refunded",
        }
    }

    /// Parse from text.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            "refunded" => Ok(Self::Refunded),
            other => Err(StoreError::invalid_enum("payment status", other)),
        }
    }

    /// Whether a gateway update may move a payment from `self` to `to`.
    ///
    /// Money that arrives after a payment was written off as failed or
    /// expired is still recorded, so staff can refund it.
    pub fn accepts(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Paid)
                | (Self::Pending, Self::Failed)
                | (Self::Pending, Self::Expired)
                | (Self::Failed, Self::Paid)
                | (Self::Expired, Self::Paid)
                | (Self::Paid, Self::Refunded)
        )
    }
}

/// A payment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payment {
    /// Record id.
    pub id: String,
    /// Order the payment is for.
    pub order_id: String,
    /// Expected amount in whole currency units.
    pub amount: i64,
    /// Lifecycle state.
    pub status: PaymentStatus,
    /// Payment method reported by the gateway.
    pub method: Option<String>,
    /// Gateway transaction id.
    pub gateway_transaction_id: Option<String>,
    /// When the payment settled.
    pub paid_at: Option<String>,
    /// Last change timestamp.
    pub updated_at: String,
}

/// A verified status report from the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentUpdate {
    /// Order number the gateway reports on.
    pub order_number: String,
    /// Mapped payment status.
    pub status: PaymentStatus,
    /// Amount the gateway reports, in whole currency units.
    pub amount: i64,
    /// Payment method, e.g. `bank_transfer`.
    pub method: Option<String>,
    /// Gateway transaction id.
    pub transaction_id: Option<String>,
}

/// Result of applying a [`PaymentUpdate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOutcome {
    /// The payment after the update.
    pub payment: Payment,
    /// The order status after the update.
    pub order_status: OrderStatus,
    /// Whether anything changed.
    pub changed: bool,
}

type PaymentRow = (
    String,
    String,
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
);

const PAYMENT_COLUMNS: &str =
    "id, order_id, amount, status, method, gateway_transaction_id, paid_at, updated_at";

fn from_row(row: PaymentRow) -> StoreResult<Payment> {
    let (id, order_id, amount, status, method, gateway_transaction_id, paid_at, updated_at) = row;
    Ok(Payment {
        id,
        order_id,
        amount,
        status: PaymentStatus::parse(&status)?,
        method,
        gateway_transaction_id,
        paid_at,
        updated_at,
    })
}

async fn payment_for_order_in(
    conn: &mut SqliteConnection,
    order_id: &str,
) -> StoreResult<Payment> {
    let row: Option<PaymentRow> = sqlx::query_as(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = ?1"
    ))
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(from_row)
        .transpose()?
        .ok_or_else(|| StoreError::not_found("payment", order_id))
}

impl Store {
    /// The payment of an order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the order or payment is unknown.
    pub async fn payment_for_order(&self, order_number: &str) -> StoreResult<Payment> {
        let mut conn = self.pool.acquire().await?;
        let order = order_by_number_in(&mut conn, order_number).await?;
        payment_for_order_in(&mut conn, &order.id).await
    }

    /// Apply a verified gateway status update.
    ///
    /// A settled payment moves a `PENDING` order to `PROCESSING`; a failed
    /// or expired payment cancels a `PENDING` order and returns its stock.
    /// A payment settling on an already cancelled order, and a refund of an
    /// order that has shipped, raise a notification for staff. A refund
    /// before shipping cancels the order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown orders and
    /// [`StoreError::Validation`] if the reported amount differs from the
    /// amount due.
    pub async fn apply_payment_update(&self, update: &PaymentUpdate) -> StoreResult<PaymentOutcome> {
        let mut tx = self.pool.begin().await?;
        let order = order_by_number_in(&mut tx, &update.order_number).await?;
        let payment = payment_for_order_in(&mut tx, &order.id).await?;

        if payment.amount != update.amount {
            return Err(StoreError::Validation(format!(
                "payment amount mismatch for {}: expected {}, got {}",
                order.order_number, payment.amount, update.amount
            )));
        }

        if payment.status == update.status {
            return Ok(PaymentOutcome {
                payment,
                order_status: order.status,
                changed: false,
            });
        }
        if !payment.status.accepts(update.status) {
            warn!(
                order_number = %order.order_number,
                from = payment.status.as_str(),
                to = update.status.as_str(),
                "ignoring out-of-order payment update"
            );
            return Ok(PaymentOutcome {
                payment,
                order_status: order.status,
                changed: false,
            });
        }

        sqlx::query(
            "UPDATE payments SET status = ?2, \
                method = COALESCE(?3, method), \
                gateway_transaction_id = COALESCE(?4, gateway_transaction_id), \
                paid_at = CASE WHEN ?2 = 'paid' THEN datetime('now') ELSE paid_at END, \
                updated_at = datetime('now') \
             WHERE id = ?1",
        )
        .bind(&payment.id)
        .bind(update.status.as_str())
        .bind(&update.method)
        .bind(&update.transaction_id)
        .execute(&mut *tx)
        .await?;

        match update.status {
            PaymentStatus::Paid if order.status == OrderStatus::Cancelled => {
                warn!(
                    order_number = %order.order_number,
                    amount = payment.amount,
                    "payment settled on a cancelled order"
                );
                notifications::insert_in(
                    &mut tx,
                    "payment",
                    "Paid after cancellation, refund needed",
                    &format!(
                        "Order {} was cancelled but a payment of {} arrived ({}).",
                        order.order_number,
                        payment.amount,
                        update.transaction_id.as_deref().unwrap_or("no transaction id")
                    ),
                    Some(&order.order_number),
                )
                .await?;
            }
            PaymentStatus::Paid => {
                if set_status_in(
                    &mut tx,
                    &order.id,
                    OrderStatus::Pending,
                    OrderStatus::Processing,
                )
                .await?
                {
                    notifications::insert_in(
                        &mut tx,
                        "payment",
                        "Payment received",
                        &format!("Order {} has been paid.", order.order_number),
                        Some(&order.order_number),
                    )
                    .await?;
                }
            }
            PaymentStatus::Refunded if order.status == OrderStatus::Processing => {
                cancel_in(&mut tx, &order.order_number, Some("payment refunded")).await?;
            }
            PaymentStatus::Refunded if order.status != OrderStatus::Cancelled => {
                notifications::insert_in(
                    &mut tx,
                    "payment",
                    "Payment refunded",
                    &format!(
                        "The payment for order {} was refunded while the order is {}.",
                        order.order_number,
                        order.status.as_str()
                    ),
                    Some(&order.order_number),
                )
                .await?;
            }
            PaymentStatus::Failed | PaymentStatus::Expired
                if order.status == OrderStatus::Pending =>
            {
                cancel_in(
                    &mut tx,
                    &order.order_number,
                    Some(&format!("payment {}", update.status.as_str())),
                )
                .await?;
            }
            _ => {}
        }

        let payment = payment_for_order_in(&mut tx, &order.id).await?;
        let order = order_by_number_in(&mut tx, &order.order_number).await?;
        tx.commit().await?;

        info!(
            order_number = %order.order_number,
            payment_status = payment.status.as_str(),
            order_status = order.status.as_str(),
            "payment update applied"
        );
        Ok(PaymentOutcome {
            payment,
            order_status: order.status,
            changed: true,
        })
    }
}
