//! Aggregates for the dashboard.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{Store, StoreError, StoreResult};

/// Number of best sellers reported.
const TOP_PRODUCTS: i64 = 5;

/// Revenue for one calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyRevenue {
    /// `YYYY-MM-DD`.
    pub date: String,
    /// Settled revenue in whole currency units.
    pub revenue: i64,
    /// Payments settled that day.
    pub payments: i64,
}

/// Units and revenue for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductSales {
    /// Product SKU.
    pub sku: String,
    /// Product name.
    pub name: String,
    /// Units sold.
    pub units: i64,
    /// Line revenue in whole currency units.
    pub revenue: i64,
}

/// Sales over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesSummary {
    /// Window length in days.
    pub days: u32,
    /// Revenue from settled payments.
    pub revenue: i64,
    /// Number of settled payments.
    pub paid_orders: i64,
    /// Orders placed in the window, any status.
    pub order_count: i64,
    /// `revenue / paid_orders`, zero without sales.
    pub average_order_value: i64,
    /// Orders placed in the window, by status.
    pub orders_by_status: BTreeMap<String, i64>,
    /// Revenue per day, oldest first; days without sales are omitted.
    pub daily_revenue: Vec<DailyRevenue>,
    /// Best sellers by units among non-cancelled orders.
    pub top_products: Vec<ProductSales>,
}

/// How conversations are being handled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSummary {
    /// Conversations by status.
    pub conversations_by_status: BTreeMap<String, i64>,
    /// Handoffs waiting for an agent.
    pub pending_handoffs: i64,
    /// Handoffs owned by an agent.
    pub claimed_handoffs: i64,
    /// Messages by source (`customer`, `pattern`, `cache`, `llm`, `agent`, `system`).
    pub messages_by_source: BTreeMap<String, i64>,
    /// Share of bot answers served without a model call.
    pub short_circuit_ratio: f64,
}

fn window_modifier(days: u32) -> String {
    format!("-{days} days")
}

async fn grouped_counts(
    store: &Store,
    sql: &str,
    bind: Option<&str>,
) -> StoreResult<BTreeMap<String, i64>> {
    let mut query = sqlx::query_as::<_, (String, i64)>(sql);
    if let Some(value) = bind {
        query = query.bind(value);
    }
    let rows = query.fetch_all(&store.pool).await?;
    Ok(rows.into_iter().collect())
}

fn ratio(part: i64, whole: i64) -> StoreResult<f64> {
    if whole <= 0 {
        return Ok(0.0);
    }
    let to_f64 = |n: i64| {
        u32::try_from(n)
            .map(f64::from)
            .map_err(|_| StoreError::Validation(format!("count {n} out of range")))
    };
    Ok(to_f64(part)? / to_f64(whole)?)
}

impl Store {
    /// Sales over the last `days` days.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn sales_summary(&self, days: u32) -> StoreResult<SalesSummary> {
        let since = window_modifier(days);

        let (revenue, paid_orders): (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(amount), 0), COUNT(*) FROM payments \
             WHERE status = 'paid' AND paid_at >= datetime('now', ?1)",
        )
        .bind(&since)
        .fetch_one(&self.pool)
        .await?;

        let (order_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM orders WHERE created_at >= datetime('now', ?1)")
                .bind(&since)
                .fetch_one(&self.pool)
                .await?;

        let orders_by_status = grouped_counts(
            self,
            "SELECT status, COUNT(*) FROM orders WHERE created_at >= datetime('now', ?1) \
             GROUP BY status",
            Some(&since),
        )
        .await?;

        let daily: Vec<(String, i64, i64)> = sqlx::query_as(
            "SELECT date(paid_at), SUM(amount), COUNT(*) FROM payments \
             WHERE status = 'paid' AND paid_at >= datetime('now', ?1) \
             GROUP BY date(paid_at) ORDER BY date(paid_at)",
        )
        .bind(&since)
        .fetch_all(&self.pool)
        .await?;

        let top: Vec<(String, String, i64, i64)> = sqlx::query_as(
            "SELECT i.sku, i.name, SUM(oi.quantity), SUM(oi.quantity * oi.unit_price) \
             FROM order_items oi \
             JOIN orders o ON o.id = oi.order_id \
             JOIN inventory i ON i.id = oi.inventory_id \
             WHERE o.status != 'CANCELLED' AND o.created_at >= datetime('now', ?1) \
             GROUP BY i.id ORDER BY SUM(oi.quantity) DESC, i.name LIMIT ?2",
        )
        .bind(&since)
        .bind(TOP_PRODUCTS)
        .fetch_all(&self.pool)
        .await?;

        Ok(SalesSummary {
            days,
            revenue,
            paid_orders,
            order_count,
            average_order_value: revenue.checked_div(paid_orders).unwrap_or(0),
            orders_by_status,
            daily_revenue: daily
                .into_iter()
                .map(|(date, revenue, payments)| DailyRevenue {
                    date,
                    revenue,
                    payments,
                })
                .collect(),
            top_products: top
                .into_iter()
                .map(|(sku, name, units, revenue)| ProductSales {
                    sku,
                    name,
                    units,
                    revenue,
                })
                .collect(),
        })
    }

    /// Conversation and handoff counts, and where bot answers came from.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn conversation_summary(&self) -> StoreResult<ConversationSummary> {
        let conversations_by_status = grouped_counts(
            self,
            "SELECT status, COUNT(*) FROM conversations GROUP BY status",
            None,
        )
        .await?;
        let handoffs = grouped_counts(
            self,
            "SELECT status, COUNT(*) FROM conversation_handoffs \
             WHERE status IN ('pending', 'claimed') GROUP BY status",
            None,
        )
        .await?;
        let messages_by_source = grouped_counts(
            self,
            "SELECT source, COUNT(*) FROM messages GROUP BY source",
            None,
        )
        .await?;

        let count = |map: &BTreeMap<String, i64>, key: &str| map.get(key).copied().unwrap_or(0);
        let short_circuited =
            count(&messages_by_source, "pattern").saturating_add(count(&messages_by_source, "cache"));
        let bot_answers = short_circuited.saturating_add(count(&messages_by_source, "llm"));

        Ok(ConversationSummary {
            pending_handoffs: count(&handoffs, "pending"),
            claimed_handoffs: count(&handoffs, "claimed"),
            short_circuit_ratio: ratio(short_circuited, bot_answers)?,
            conversations_by_status,
            messages_by_source,
        })
    }
}
