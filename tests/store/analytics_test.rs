//! Dashboard aggregate tests.

use concierge::store::{
    AdminRole, MessageSource, OrderStatus, PaymentStatus, PaymentUpdate, Sender,
};

use crate::fixtures::{agent, conversation, customer, place_order, stock_item, store};

#[tokio::test]
async fn sales_summary_counts_settled_revenue() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 20).await;
    stock_item(&store, "FILTER", 40_000, 20).await;
    let customer = customer(&store, "+628160").await;

    let paid = place_order(&store, &customer, &[("KOPI-250", 2)]).await;
    let also_paid = place_order(&store, &customer, &[("FILTER", 1)]).await;
    let unpaid = place_order(&store, &customer, &[("KOPI-250", 1)]).await;
    let cancelled = place_order(&store, &customer, &[("FILTER", 5)]).await;

    for order in [&paid, &also_paid] {
        store
            .apply_payment_update(&PaymentUpdate {
                order_number: order.order_number.clone(),
                status: PaymentStatus::Paid,
                amount: order.total_amount,
                method: None,
                transaction_id: None,
            })
            .await
            .expect("settle");
    }
    store
        .cancel_order(&cancelled.order_number, None)
        .await
        .expect("cancel");

    let summary = store.sales_summary(30).await.expect("summary");
    assert_eq!(summary.days, 30);
    assert_eq!(summary.revenue, 210_000);
    assert_eq!(summary.paid_orders, 2);
    assert_eq!(summary.average_order_value, 105_000);
    assert_eq!(summary.order_count, 4);
    assert_eq!(summary.orders_by_status.get("PROCESSING"), Some(&2));
    assert_eq!(summary.orders_by_status.get("PENDING"), Some(&1));
    assert_eq!(summary.orders_by_status.get("CANCELLED"), Some(&1));
    assert_eq!(summary.daily_revenue.len(), 1);
    assert_eq!(summary.daily_revenue[0].revenue, 210_000);

    // Cancelled lines are excluded from best sellers.
    assert_eq!(summary.top_products[0].sku, "KOPI-250");
    assert_eq!(summary.top_products[0].units, 3);
    let filter = summary
        .top_products
        .iter()
        .find(|p| p.sku == "FILTER")
        .expect("filter sold");
    assert_eq!(filter.units, 1);

    assert_eq!(
        store.order_by_number(&unpaid.order_number).await.expect("order").status,
        OrderStatus::Pending
    );
}

#[tokio::test]
async fn empty_store_reports_zeroes() {
    let store = store().await;
    let sales = store.sales_summary(7).await.expect("sales");
    assert_eq!(sales.revenue, 0);
    assert_eq!(sales.average_order_value, 0);
    assert!(sales.top_products.is_empty());

    let conversations = store.conversation_summary().await.expect("conversations");
    assert_eq!(conversations.pending_handoffs, 0);
    assert!(conversations.short_circuit_ratio.abs() < f64::EPSILON);
}

#[tokio::test]
async fn conversation_summary_reports_short_circuit_ratio() {
    let store = store().await;
    let first = customer(&store, "+628161").await;
    let second = customer(&store, "+628162").await;
    let conv = conversation(&store, &first).await;
    let other = conversation(&store, &second).await;

    for source in [
        MessageSource::Pattern,
        MessageSource::Cache,
        MessageSource::Llm,
        MessageSource::Llm,
    ] {
        store
            .add_message(&conv.id, Sender::Bot, source, "answer", None)
            .await
            .expect("message");
    }
    store
        .add_message(&conv.id, Sender::Customer, MessageSource::Customer, "q", None)
        .await
        .expect("message");

    let rina = agent(&store, "Rina", AdminRole::Agent).await;
    let handoff = store
        .request_handoff(&other.id, "help")
        .await
        .expect("handoff")
        .handoff;
    store.claim_handoff(&handoff.id, &rina).await.expect("claim");
    store.request_handoff(&conv.id, "help").await.expect("handoff");

    let summary = store.conversation_summary().await.expect("summary");
    assert_eq!(summary.pending_handoffs, 1);
    assert_eq!(summary.claimed_handoffs, 1);
    assert_eq!(summary.conversations_by_status.get("redirected"), Some(&2));
    assert_eq!(summary.messages_by_source.get("llm"), Some(&2));
    assert!((summary.short_circuit_ratio - 0.5).abs() < f64::EPSILON);
}
