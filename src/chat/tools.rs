//! Tools the model may call while answering, and their dispatch.
//!
//! Every lookup is scoped to the customer in the conversation: an order
//! number belonging to someone else is reported as not found.

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::providers::ToolDefinition;
use crate::store::{Customer, Store, StoreError};

/// Maximum inventory rows returned by `check_stock`.
const STOCK_RESULTS: usize = 5;

/// Order lookup tool.
pub const CHECK_ORDER_STATUS: &str = "check_order_status";
/// Catalogue search tool.
pub const CHECK_STOCK: &str = "check_stock";
/// Service list tool.
pub const LIST_SERVICES: &str = "list_services";
/// Escalation tool.
pub const REQUEST_HUMAN_AGENT: &str = "request_human_agent";

/// Definitions sent to the model.
pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: CHECK_ORDER_STATUS.to_owned(),
            description: "Look up the status, items, payment and shipping of one of this \
                          customer's orders by order number (ORD-YYYYMMDD-XXXX)."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "order_number": {"type": "string", "description": "Order number"}
                },
                "required": ["order_number"]
            }),
        },
        ToolDefinition {
            name: CHECK_STOCK.to_owned(),
            description: "Search the product catalogue by name, SKU or category and return \
                          prices and stock on hand."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Product name, SKU or category"}
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: LIST_SERVICES.to_owned(),
            description: "List the services that can be booked, with duration and price."
                .to_owned(),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolDefinition {
            name: REQUEST_HUMAN_AGENT.to_owned(),
            description: "Hand the conversation to a human agent. Use when the customer asks \
                          for a person or when you cannot resolve their problem."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "reason": {"type": "string", "description": "Short reason for the handoff"}
                },
                "required": ["reason"]
            }),
        },
    ]
}

/// What the engine needs to run a tool.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext<'a> {
    /// Database.
    pub store: &'a Store,
    /// Customer being served.
    pub customer: &'a Customer,
    /// Current conversation.
    pub conversation_id: &'a str,
}

/// Result of one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    /// Content returned to the model.
    pub content: String,
    /// Whether the tool failed.
    pub is_error: bool,
    /// Whether the call opened a handoff.
    pub handoff_requested: bool,
}

impl ToolOutcome {
    fn ok(value: &Value) -> Self {
        Self {
            content: value.to_string(),
            is_error: false,
            handoff_requested: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
            handoff_requested: false,
        }
    }
}

fn string_arg<'v>(input: &'v Value, key: &str) -> Option<&'v str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Run the named tool. Failures are reported to the model as error
/// results rather than aborting the conversation.
pub async fn dispatch(ctx: ToolContext<'_>, name: &str, input: &Value) -> ToolOutcome {
    debug!(tool = name, conversation_id = ctx.conversation_id, "running tool");
    let outcome = match name {
        CHECK_ORDER_STATUS => check_order_status(ctx, input).await,
        CHECK_STOCK => check_stock(ctx, input).await,
        LIST_SERVICES => list_services(ctx).await,
        REQUEST_HUMAN_AGENT => request_human_agent(ctx, input).await,
        other => Ok(ToolOutcome::error(format!("unknown tool: {other}"))),
    };
    outcome.unwrap_or_else(|e| {
        warn!(tool = name, error = %e, "tool failed");
        ToolOutcome::error("lookup failed, please try again later")
    })
}

async fn check_order_status(
    ctx: ToolContext<'_>,
    input: &Value,
) -> Result<ToolOutcome, StoreError> {
    let Some(order_number) = string_arg(input, "order_number") else {
        return Ok(ToolOutcome::error("order_number is required"));
    };
    let order = match ctx.store.order_by_number(order_number).await {
        Ok(order) if order.customer_id == ctx.customer.id => order,
        Ok(_) | Err(StoreError::NotFound { .. }) => {
            return Ok(ToolOutcome::error(format!(
                "no order {order_number} found for this customer"
            )));
        }
        Err(e) => return Err(e),
    };
    let payment = ctx.store.payment_for_order(&order.order_number).await.ok();
    let shipping = ctx.store.shipping_for_order(&order.order_number).await.ok();
    Ok(ToolOutcome::ok(&json!({
        "order_number": order.order_number,
        "status": order.status,
        "total_amount": order.total_amount,
        "created_at": order.created_at,
        "items": order.items,
        "payment_status": payment.map(|p| p.status),
        "shipping": shipping,
    })))
}

async fn check_stock(ctx: ToolContext<'_>, input: &Value) -> Result<ToolOutcome, StoreError> {
    let Some(query) = string_arg(input, "query") else {
        return Ok(ToolOutcome::error("query is required"));
    };
    let items = ctx.store.search_inventory(query, STOCK_RESULTS).await?;
    let results: Vec<Value> = items
        .iter()
        .map(|item| {
            json!({
                "sku": item.sku,
                "name": item.name,
                "price": item.price,
                "stock": item.stock,
                "in_stock": item.stock > 0,
            })
        })
        .collect();
    Ok(ToolOutcome::ok(&json!({ "query": query, "results": results })))
}

async fn list_services(ctx: ToolContext<'_>) -> Result<ToolOutcome, StoreError> {
    let services = ctx.store.list_services(false).await?;
    Ok(ToolOutcome::ok(&json!({ "services": services })))
}

async fn request_human_agent(
    ctx: ToolContext<'_>,
    input: &Value,
) -> Result<ToolOutcome, StoreError> {
    let reason = string_arg(input, "reason").unwrap_or("requested by assistant");
    let request = ctx.store.request_handoff(ctx.conversation_id, reason).await?;
    Ok(ToolOutcome {
        content: json!({
            "handoff_id": request.handoff.id,
            "status": request.handoff.status,
            "note": "A human agent will take over. Tell the customer briefly and stop.",
        })
        .to_string(),
        is_error: false,
        handoff_requested: true,
    })
}
