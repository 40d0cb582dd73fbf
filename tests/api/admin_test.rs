//! Agent dashboard endpoints.

use axum::http::StatusCode;
use serde_json::json;

use concierge::store::AdminRole;

use crate::fixtures::{conversation, customer, store};
use crate::harness::{app, get, get_as, post_as, send, token};

#[tokio::test]
async fn dashboard_requires_a_known_bearer_token() {
    let store = store().await;

    let (status, body) = send(app(&store), get("/api/admin/me")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = send(app(&store), get_as("/api/admin/me", "cg_not-a-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = token(&store, "Rina", AdminRole::Agent).await;
    let (status, body) = send(app(&store), get_as("/api/admin/me", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "rina@shop.test");
    assert!(body["data"].get("token_hash").is_none());
}

#[tokio::test]
async fn agent_listing_is_admin_only() {
    let store = store().await;
    let agent = token(&store, "Rina", AdminRole::Agent).await;
    let admin = token(&store, "Budi", AdminRole::Admin).await;

    let (status, _) = send(app(&store), get_as("/api/admin/agents", &agent)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(app(&store), get_as("/api/admin/agents", &admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn handoff_claim_conflict_and_resolution() {
    let store = store().await;
    let rina = token(&store, "Rina", AdminRole::Agent).await;
    let dewi = token(&store, "Dewi", AdminRole::Agent).await;
    let customer = customer(&store, "+628170").await;
    let conversation = conversation(&store, &customer).await;
    let request = store
        .request_handoff(&conversation.id, "customer asked for a person")
        .await
        .expect("handoff");
    let id = request.handoff.id;

    let (status, body) = send(app(&store), get_as("/api/admin/handoffs?status=pending", &rina)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["id"], id.as_str());

    let (status, body) = send(
        app(&store),
        post_as(&format!("/api/admin/handoffs/{id}/claim"), &rina, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "claimed");

    let (status, _) = send(
        app(&store),
        post_as(&format!("/api/admin/handoffs/{id}/claim"), &dewi, None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        app(&store),
        post_as(&format!("/api/admin/handoffs/{id}/resolve"), &dewi, None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        app(&store),
        post_as(
            &format!("/api/admin/handoffs/{id}/resolve"),
            &rina,
            Some(&json!({"note": "refund issued"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "resolved");
    assert_eq!(body["data"]["resolution_note"], "refund issued");

    let (status, _) = send(
        app(&store),
        post_as(&format!("/api/admin/handoffs/{id}/claim"), &rina, None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn resolve_accepts_an_empty_body() {
    let store = store().await;
    let rina = token(&store, "Rina", AdminRole::Agent).await;
    let customer = customer(&store, "+628171").await;
    let conversation = conversation(&store, &customer).await;
    let id = store
        .request_handoff(&conversation.id, "complaint")
        .await
        .expect("handoff")
        .handoff
        .id;

    let (status, _) = send(
        app(&store),
        post_as(&format!("/api/admin/handoffs/{id}/claim"), &rina, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(
        app(&store),
        post_as(&format!("/api/admin/handoffs/{id}/resolve"), &rina, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "resolved");
}

#[tokio::test]
async fn agent_reply_is_stored_even_without_outbound_sender() {
    let store = store().await;
    let rina = token(&store, "Rina", AdminRole::Agent).await;
    let customer = customer(&store, "+628172").await;
    let conversation = conversation(&store, &customer).await;
    let id = store
        .request_handoff(&conversation.id, "complaint")
        .await
        .expect("handoff")
        .handoff
        .id;
    let (status, _) = send(
        app(&store),
        post_as(&format!("/api/admin/handoffs/{id}/claim"), &rina, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/api/admin/conversations/{}/reply", conversation.id);
    let (status, _) = send(app(&store), post_as(&uri, &rina, Some(&json!({"text": "  "})))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        app(&store),
        post_as(&uri, &rina, Some(&json!({"text": "Hi, this is Rina."}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["message"]["sender"], "agent");
    assert_eq!(body["data"]["delivered"], false);

    let (status, body) = send(
        app(&store),
        get_as(
            &format!("/api/admin/conversations/{}/messages", conversation.id),
            &rina,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["data"].as_array().expect("messages");
    assert!(messages.iter().any(|m| m["content"] == "Hi, this is Rina."));
}

#[tokio::test]
async fn notifications_and_filters() {
    let store = store().await;
    let rina = token(&store, "Rina", AdminRole::Agent).await;
    let customer = customer(&store, "+628173").await;
    let conversation = conversation(&store, &customer).await;
    store
        .request_handoff(&conversation.id, "complaint")
        .await
        .expect("handoff");

    let (status, body) = send(
        app(&store),
        get_as("/api/admin/notifications?unread=true", &rina),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["data"][0]["id"].as_i64().expect("notification id");

    let (status, _) = send(
        app(&store),
        post_as(&format!("/api/admin/notifications/{id}/read"), &rina, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        app(&store),
        get_as("/api/admin/notifications?unread=true", &rina),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(0));

    let (status, _) = send(
        app(&store),
        get_as("/api/admin/conversations?status=sleeping", &rina),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cache_report_and_analytics() {
    let store = store().await;
    let rina = token(&store, "Rina", AdminRole::Agent).await;

    let (status, body) = send(app(&store), get_as("/api/admin/cache", &rina)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tokens_used_today"], 0);

    let (status, body) = send(
        app(&store),
        get_as("/api/admin/analytics/sales?days=7", &rina),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["days"], 7);
    assert_eq!(body["data"]["revenue"], 0);

    let (status, _) = send(
        app(&store),
        get_as("/api/admin/analytics/conversations", &rina),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
