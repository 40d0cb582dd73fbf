//! Router construction and request helpers.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use concierge::api::{self, AppState};
use concierge::store::{AdminRole, Store};

pub const WEBHOOK_TOKEN: &str = "hook-token";
pub const SERVER_KEY: &str = "SB-Mid-server-test";

pub fn state(store: &Store) -> AppState {
    AppState {
        store: store.clone(),
        chat: Arc::new(crate::support::engine(store, None)),
        outbound: None,
        whatsapp_webhook_token: Some(WEBHOOK_TOKEN.to_owned()),
        payment_server_key: Some(SERVER_KEY.to_owned()),
        cors_origins: vec![],
    }
}

pub fn app(store: &Store) -> Router {
    api::router(state(store))
}

/// Create a dashboard account and return its bearer token.
pub async fn token(store: &Store, name: &str, role: AdminRole) -> String {
    let email = format!("{}@shop.test", name.to_ascii_lowercase());
    match store.create_admin(name, &email, role).await {
        Ok((_agent, token)) => token,
        Err(err) => panic!("agent should be created: {err}"),
    }
}

pub async fn send_raw(app: Router, request: Request<Body>) -> (StatusCode, String) {
    let response = match app.oneshot(request).await {
        Ok(response) => response,
        Err(err) => panic!("router is infallible: {err}"),
    };
    let status = response.status();
    let bytes = match response.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => panic!("body should read: {err}"),
    };
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send_raw(app, request).await;
    let value = serde_json::from_str(&body).unwrap_or(Value::Null);
    (status, value)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

pub fn get_as(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .expect("request")
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn post_as(uri: &str, token: &str, body: Option<&Value>) -> Request<Body> {
    let builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

pub fn post_form(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish();
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .expect("request")
}
