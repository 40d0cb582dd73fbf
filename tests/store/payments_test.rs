//! Payment gateway update tests.

use concierge::store::{OrderStatus, PaymentStatus, PaymentUpdate, StoreError};

use crate::fixtures::{customer, place_order, stock_item, stock_of, store};

fn update(order_number: &str, status: PaymentStatus, amount: i64) -> PaymentUpdate {
    PaymentUpdate {
        order_number: order_number.to_owned(),
        status,
        amount,
        method: Some("bank_transfer".to_owned()),
        transaction_id: Some("tx-001".to_owned()),
    }
}

#[tokio::test]
async fn settlement_moves_order_to_processing_once() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 5).await;
    let customer = customer(&store, "+628130").await;
    let order = place_order(&store, &customer, &[("KOPI-250", 2)]).await;

    let first = store
        .apply_payment_update(&update(&order.order_number, PaymentStatus::Paid, 170_000))
        .await
        .expect("settle");
    assert!(first.changed);
    assert_eq!(first.order_status, OrderStatus::Processing);
    assert_eq!(first.payment.status, PaymentStatus::Paid);
    assert_eq!(first.payment.method.as_deref(), Some("bank_transfer"));
    assert_eq!(first.payment.gateway_transaction_id.as_deref(), Some("tx-001"));
    assert!(first.payment.paid_at.is_some());

    // The gateway retries notifications; a duplicate changes nothing.
    let second = store
        .apply_payment_update(&update(&order.order_number, PaymentStatus::Paid, 170_000))
        .await
        .expect("duplicate");
    assert!(!second.changed);
    assert_eq!(second.order_status, OrderStatus::Processing);

    let payments = store
        .list_notifications(false, 10)
        .await
        .expect("notifications")
        .into_iter()
        .filter(|n| n.kind == "payment")
        .count();
    assert_eq!(payments, 1);
}

#[tokio::test]
async fn amount_mismatch_is_rejected() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 5).await;
    let customer = customer(&store, "+628131").await;
    let order = place_order(&store, &customer, &[("KOPI-250", 1)]).await;

    assert!(matches!(
        store
            .apply_payment_update(&update(&order.order_number, PaymentStatus::Paid, 1_000))
            .await,
        Err(StoreError::Validation(_))
    ));
    let payment = store
        .payment_for_order(&order.order_number)
        .await
        .expect("payment");
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn expiry_cancels_pending_order_and_restocks() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 5).await;
    let customer = customer(&store, "+628132").await;
    let order = place_order(&store, &customer, &[("KOPI-250", 3)]).await;
    assert_eq!(stock_of(&store, "KOPI-250").await, 2);

    let outcome = store
        .apply_payment_update(&update(&order.order_number, PaymentStatus::Expired, 255_000))
        .await
        .expect("expire");
    assert!(outcome.changed);
    assert_eq!(outcome.payment.status, PaymentStatus::Expired);
    assert_eq!(outcome.order_status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&store, "KOPI-250").await, 5);

    let order = store.order_by_number(&order.order_number).await.expect("order");
    assert_eq!(order.cancel_reason.as_deref(), Some("payment expired"));
}

#[tokio::test]
async fn late_updates_do_not_downgrade_settled_payment() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 5).await;
    let customer = customer(&store, "+628133").await;
    let order = place_order(&store, &customer, &[("KOPI-250", 1)]).await;

    store
        .apply_payment_update(&update(&order.order_number, PaymentStatus::Paid, 85_000))
        .await
        .expect("settle");
    let late = store
        .apply_payment_update(&update(&order.order_number, PaymentStatus::Expired, 85_000))
        .await
        .expect("late expiry");
    assert!(!late.changed);
    assert_eq!(late.payment.status, PaymentStatus::Paid);
    assert_eq!(late.order_status, OrderStatus::Processing);
    assert_eq!(stock_of(&store, "KOPI-250").await, 4);
}

#[tokio::test]
async fn cancelling_a_paid_order_refunds_it() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 5).await;
    let customer = customer(&store, "+628134").await;
    let order = place_order(&store, &customer, &[("KOPI-250", 1)]).await;
    store
        .apply_payment_update(&update(&order.order_number, PaymentStatus::Paid, 85_000))
        .await
        .expect("settle");

    let cancelled = store
        .cancel_order(&order.order_number, None)
        .await
        .expect("cancel processing order");
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    let payment = store
        .payment_for_order(&order.order_number)
        .await
        .expect("payment");
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(stock_of(&store, "KOPI-250").await, 5);
}

#[tokio::test]
async fn payment_after_cancellation_is_recorded_for_refund() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 5).await;
    let customer = customer(&store, "+628135").await;
    let order = place_order(&store, &customer, &[("KOPI-250", 1)]).await;
    store
        .cancel_order(&order.order_number, Some("changed my mind"))
        .await
        .expect("cancel");

    let mut late = update(&order.order_number, PaymentStatus::Paid, 85_000);
    late.transaction_id = Some("tx-late".to_owned());
    let outcome = store.apply_payment_update(&late).await.expect("late settle");
    assert!(outcome.changed);
    assert_eq!(outcome.payment.status, PaymentStatus::Paid);
    assert_eq!(outcome.payment.gateway_transaction_id.as_deref(), Some("tx-late"));
    // The order stays cancelled and the stock is not taken again.
    assert_eq!(outcome.order_status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&store, "KOPI-250").await, 5);

    let notices: Vec<_> = store
        .list_notifications(true, 10)
        .await
        .expect("notifications")
        .into_iter()
        .filter(|n| n.kind == "payment")
        .collect();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].title.contains("refund needed"));
    assert_eq!(
        notices[0].reference_id.as_deref(),
        Some(order.order_number.as_str())
    );

    // The gateway retrying the same settlement adds nothing.
    let again = store.apply_payment_update(&late).await.expect("retry");
    assert!(!again.changed);
}

#[tokio::test]
async fn expired_payment_that_settles_late_is_flagged() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 5).await;
    let customer = customer(&store, "+628136").await;
    let order = place_order(&store, &customer, &[("KOPI-250", 1)]).await;
    store
        .apply_payment_update(&update(&order.order_number, PaymentStatus::Expired, 85_000))
        .await
        .expect("expire");

    let outcome = store
        .apply_payment_update(&update(&order.order_number, PaymentStatus::Paid, 85_000))
        .await
        .expect("late settle");
    assert_eq!(outcome.payment.status, PaymentStatus::Paid);
    assert_eq!(outcome.order_status, OrderStatus::Cancelled);
    let flagged = store
        .list_notifications(false, 10)
        .await
        .expect("notifications")
        .iter()
        .filter(|n| n.title.contains("refund needed"))
        .count();
    assert_eq!(flagged, 1);
}

#[tokio::test]
async fn refund_before_shipping_cancels_the_order() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 5).await;
    let customer = customer(&store, "+628137").await;
    let order = place_order(&store, &customer, &[("KOPI-250", 2)]).await;
    store
        .apply_payment_update(&update(&order.order_number, PaymentStatus::Paid, 170_000))
        .await
        .expect("settle");

    let outcome = store
        .apply_payment_update(&update(&order.order_number, PaymentStatus::Refunded, 170_000))
        .await
        .expect("refund");
    assert_eq!(outcome.payment.status, PaymentStatus::Refunded);
    assert_eq!(outcome.order_status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&store, "KOPI-250").await, 5);
    assert!(store
        .advance_order(&order.order_number, OrderStatus::Shipped)
        .await
        .is_err());
}

#[tokio::test]
async fn refund_after_shipping_notifies_staff() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 5).await;
    let customer = customer(&store, "+628138").await;
    let order = place_order(&store, &customer, &[("KOPI-250", 1)]).await;
    store
        .apply_payment_update(&update(&order.order_number, PaymentStatus::Paid, 85_000))
        .await
        .expect("settle");
    store
        .advance_order(&order.order_number, OrderStatus::Shipped)
        .await
        .expect("ship");

    let outcome = store
        .apply_payment_update(&update(&order.order_number, PaymentStatus::Refunded, 85_000))
        .await
        .expect("refund");
    assert_eq!(outcome.order_status, OrderStatus::Shipped);
    let refunds = store
        .list_notifications(false, 10)
        .await
        .expect("notifications")
        .iter()
        .filter(|n| n.title == "Payment refunded")
        .count();
    assert_eq!(refunds, 1);
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let store = store().await;
    assert!(matches!(
        store
            .apply_payment_update(&update("ORD-20260101-ZZZZ", PaymentStatus::Paid, 1))
            .await,
        Err(StoreError::NotFound { .. })
    ));
}
