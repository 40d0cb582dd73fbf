//! Model tool dispatch tests.

use serde_json::{json, Value};

use concierge::chat::tools::{self, ToolContext};
use concierge::store::{ConversationStatus, NewService};

use crate::fixtures::{conversation, customer, place_order, stock_item, store};

fn parse(content: &str) -> Value {
    serde_json::from_str(content).expect("tool output is JSON")
}

#[test]
fn definitions_cover_every_tool() {
    let names: Vec<String> = tools::definitions().into_iter().map(|d| d.name).collect();
    assert_eq!(
        names,
        [
            tools::CHECK_ORDER_STATUS,
            tools::CHECK_STOCK,
            tools::LIST_SERVICES,
            tools::REQUEST_HUMAN_AGENT
        ]
    );
}

#[tokio::test]
async fn order_lookup_is_scoped_to_the_customer() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 5).await;
    let owner = customer(&store, "+628170").await;
    let stranger = customer(&store, "+628171").await;
    let order = place_order(&store, &owner, &[("KOPI-250", 2)]).await;
    let conv = conversation(&store, &owner).await;
    let input = json!({ "order_number": order.order_number });

    let ctx = ToolContext {
        store: &store,
        customer: &owner,
        conversation_id: &conv.id,
    };
    let outcome = tools::dispatch(ctx, tools::CHECK_ORDER_STATUS, &input).await;
    assert!(!outcome.is_error);
    let body = parse(&outcome.content);
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["total_amount"], 170_000);
    assert_eq!(body["payment_status"], "pending");
    assert!(body["shipping"].is_null());

    let other_conv = conversation(&store, &stranger).await;
    let ctx = ToolContext {
        store: &store,
        customer: &stranger,
        conversation_id: &other_conv.id,
    };
    let outcome = tools::dispatch(ctx, tools::CHECK_ORDER_STATUS, &input).await;
    assert!(outcome.is_error);
    assert!(outcome.content.contains("no order"));
}

#[tokio::test]
async fn stock_search_and_service_list() {
    let store = store().await;
    stock_item(&store, "KOPI-GAYO", 95_000, 0).await;
    store
        .create_service(&NewService {
            name: "Cupping class".to_owned(),
            description: None,
            duration_minutes: 120,
            price: 200_000,
        })
        .await
        .expect("service");
    let customer = customer(&store, "+628172").await;
    let conv = conversation(&store, &customer).await;
    let ctx = ToolContext {
        store: &store,
        customer: &customer,
        conversation_id: &conv.id,
    };

    let stock = tools::dispatch(ctx, tools::CHECK_STOCK, &json!({"query": "gayo"})).await;
    let body = parse(&stock.content);
    assert_eq!(body["results"][0]["sku"], "KOPI-GAYO");
    assert_eq!(body["results"][0]["in_stock"], false);

    let missing = tools::dispatch(ctx, tools::CHECK_STOCK, &json!({})).await;
    assert!(missing.is_error);

    let services = tools::dispatch(ctx, tools::LIST_SERVICES, &json!({})).await;
    assert_eq!(parse(&services.content)["services"][0]["name"], "Cupping class");

    let unknown = tools::dispatch(ctx, "delete_everything", &json!({})).await;
    assert!(unknown.is_error);
    assert!(unknown.content.contains("unknown tool"));
}

#[tokio::test]
async fn human_agent_tool_opens_a_handoff() {
    let store = store().await;
    let customer = customer(&store, "+628173").await;
    let conv = conversation(&store, &customer).await;
    let ctx = ToolContext {
        store: &store,
        customer: &customer,
        conversation_id: &conv.id,
    };

    let outcome = tools::dispatch(
        ctx,
        tools::REQUEST_HUMAN_AGENT,
        &json!({"reason": "damaged item"}),
    )
    .await;
    assert!(outcome.handoff_requested);
    assert!(!outcome.is_error);

    let handoff = store
        .open_handoff_for_conversation(&conv.id)
        .await
        .expect("lookup")
        .expect("open handoff");
    assert_eq!(handoff.reason, "damaged item");
    assert_eq!(parse(&outcome.content)["handoff_id"], handoff.id);
    assert_eq!(
        store.conversation(&conv.id).await.expect("conversation").status,
        ConversationStatus::Redirected
    );
}
