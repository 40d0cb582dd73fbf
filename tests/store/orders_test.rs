//! Order, stock and shipping tests.

use concierge::store::{NewOrderItem, OrderStatus, PaymentStatus, ShippingUpdate, StoreError};

use crate::fixtures::{customer, place_order, stock_item, stock_of, store};

fn tracking(status: &str) -> ShippingUpdate {
    ShippingUpdate {
        courier: "JNE".to_owned(),
        tracking_number: "JNE123456".to_owned(),
        status: status.to_owned(),
        last_location: Some("Jakarta hub".to_owned()),
        estimated_delivery: None,
    }
}

#[tokio::test]
async fn create_order_reserves_stock_and_opens_payment() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 10).await;
    stock_item(&store, "FILTER-V60", 40_000, 3).await;
    let customer = customer(&store, "+628120").await;

    let order = place_order(&store, &customer, &[("KOPI-250", 2), ("FILTER-V60", 1)]).await;

    assert!(order.order_number.starts_with("ORD-"));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_amount, 210_000);
    assert_eq!(order.items.len(), 2);
    assert_eq!(order.shipping_address.as_deref(), Some("Jl. Merdeka 1, Bandung"));
    assert_eq!(stock_of(&store, "KOPI-250").await, 8);
    assert_eq!(stock_of(&store, "FILTER-V60").await, 2);

    let payment = store
        .payment_for_order(&order.order_number)
        .await
        .expect("payment");
    assert_eq!(payment.amount, 210_000);
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn insufficient_stock_leaves_everything_untouched() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 10).await;
    stock_item(&store, "GRINDER", 750_000, 1).await;
    let customer = customer(&store, "+628121").await;

    let items = vec![
        NewOrderItem {
            sku: "KOPI-250".to_owned(),
            quantity: 4,
        },
        NewOrderItem {
            sku: "GRINDER".to_owned(),
            quantity: 2,
        },
    ];
    match store.create_order(&customer.id, &items, None).await {
        Err(StoreError::InsufficientStock {
            sku,
            requested,
            available,
        }) => {
            assert_eq!(sku, "GRINDER");
            assert_eq!(requested, 2);
            assert_eq!(available, 1);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    // The first line's reservation was rolled back with the transaction.
    assert_eq!(stock_of(&store, "KOPI-250").await, 10);
    assert!(store
        .orders_for_customer(&customer.id, 10)
        .await
        .expect("orders")
        .is_empty());
}

#[tokio::test]
async fn create_order_validates_input() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 10).await;
    let customer = customer(&store, "+628122").await;

    assert!(matches!(
        store.create_order(&customer.id, &[], None).await,
        Err(StoreError::Validation(_))
    ));
    let zero = [NewOrderItem {
        sku: "KOPI-250".to_owned(),
        quantity: 0,
    }];
    assert!(matches!(
        store.create_order(&customer.id, &zero, None).await,
        Err(StoreError::Validation(_))
    ));
    let unknown = [NewOrderItem {
        sku: "NOPE".to_owned(),
        quantity: 1,
    }];
    assert!(matches!(
        store.create_order(&customer.id, &unknown, None).await,
        Err(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn cancel_pending_order_restocks() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 5).await;
    let customer = customer(&store, "+628123").await;
    let order = place_order(&store, &customer, &[("KOPI-250", 3)]).await;
    assert_eq!(stock_of(&store, "KOPI-250").await, 2);

    let cancelled = store
        .cancel_order(&order.order_number, Some("changed my mind"))
        .await
        .expect("cancel");
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("changed my mind"));
    assert!(cancelled.cancelled_at.is_some());
    assert_eq!(stock_of(&store, "KOPI-250").await, 5);

    let payment = store
        .payment_for_order(&order.order_number)
        .await
        .expect("payment");
    assert_eq!(payment.status, PaymentStatus::Failed);

    // Cancelling twice is rejected and does not restock again.
    assert!(matches!(
        store.cancel_order(&order.order_number, None).await,
        Err(StoreError::NotCancellable { .. })
    ));
    assert_eq!(stock_of(&store, "KOPI-250").await, 5);
}

#[tokio::test]
async fn shipped_order_cannot_be_cancelled() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 5).await;
    let customer = customer(&store, "+628124").await;
    let order = place_order(&store, &customer, &[("KOPI-250", 1)]).await;
    store
        .advance_order(&order.order_number, OrderStatus::Processing)
        .await
        .expect("processing");
    store
        .advance_order(&order.order_number, OrderStatus::Shipped)
        .await
        .expect("shipped");

    match store.cancel_order(&order.order_number, None).await {
        Err(StoreError::NotCancellable { status, .. }) => assert_eq!(status, "SHIPPED"),
        other => panic!("expected NotCancellable, got {other:?}"),
    }
    assert_eq!(stock_of(&store, "KOPI-250").await, 4);
}

#[tokio::test]
async fn advance_only_moves_one_step_forward() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 5).await;
    let customer = customer(&store, "+628125").await;
    let order = place_order(&store, &customer, &[("KOPI-250", 1)]).await;

    assert!(matches!(
        store.advance_order(&order.order_number, OrderStatus::Shipped).await,
        Err(StoreError::InvalidTransition { .. })
    ));
    assert!(matches!(
        store.advance_order(&order.order_number, OrderStatus::Cancelled).await,
        Err(StoreError::InvalidTransition { .. })
    ));

    let processing = store
        .advance_order(&order.order_number, OrderStatus::Processing)
        .await
        .expect("advance");
    assert_eq!(processing.status, OrderStatus::Processing);

    assert!(matches!(
        store.advance_order(&order.order_number, OrderStatus::Pending).await,
        Err(StoreError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn order_lookup_is_scoped_to_the_customer() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 5).await;
    let owner = customer(&store, "+628126").await;
    customer(&store, "+628127").await;
    let order = place_order(&store, &owner, &[("KOPI-250", 1)]).await;

    assert!(store.order_for_contact(&order.order_number, "+628126").await.is_ok());
    assert!(matches!(
        store.order_for_contact(&order.order_number, "+628127").await,
        Err(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn shipping_updates_drive_fulfilment() {
    let store = store().await;
    stock_item(&store, "KOPI-250", 85_000, 5).await;
    let customer = customer(&store, "+628128").await;
    let order = place_order(&store, &customer, &[("KOPI-250", 1)]).await;

    // Unpaid orders cannot ship.
    assert!(matches!(
        store.upsert_shipping(&order.order_number, &tracking("in transit")).await,
        Err(StoreError::InvalidTransition { .. })
    ));
    assert!(matches!(
        store.shipping_for_order(&order.order_number).await,
        Err(StoreError::NotFound { .. })
    ));

    store
        .advance_order(&order.order_number, OrderStatus::Processing)
        .await
        .expect("processing");
    let info = store
        .upsert_shipping(&order.order_number, &tracking("in transit"))
        .await
        .expect("ship");
    assert_eq!(info.courier, "JNE");
    assert_eq!(info.status, "in transit");
    assert_eq!(
        store.order_by_number(&order.order_number).await.expect("order").status,
        OrderStatus::Shipped
    );

    store
        .upsert_shipping(&order.order_number, &tracking("delivered"))
        .await
        .expect("deliver");
    assert_eq!(
        store.order_by_number(&order.order_number).await.expect("order").status,
        OrderStatus::Delivered
    );
    let info = store
        .shipping_for_order(&order.order_number)
        .await
        .expect("tracking");
    assert_eq!(info.status, "delivered");
}
