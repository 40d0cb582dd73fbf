//! Upstream error bodies are made safe to log before they leave the client.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use concierge::providers::{check_http_response, sanitize_http_error_body, ProviderError};

#[test]
fn keys_of_every_upstream_are_redacted() {
    for key in [
        "sk-ant-REDACTED",
        "pcsk_4fQx_abcdefghijklmnop",
        "SB-Mid-server-AbCdEfGh12345678",
        "Mid-server-ProdKey987654321",
    ] {
        let body = sanitize_http_error_body(&format!("{{\"error\": \"bad key {key}\"}}"));
        assert!(!body.contains(key), "{body}");
        assert!(body.contains("[REDACTED]"));
    }
}

#[test]
fn long_bodies_are_collapsed_and_truncated() {
    let body = sanitize_http_error_body(&format!("line one\n\n   {}", "x".repeat(400)));
    assert!(body.starts_with("line one x"));
    assert!(body.ends_with("...[truncated]"));
}

async fn reply_once(status_line: &'static str, body: &'static str) -> String {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(err) => panic!("listener should bind: {err}"),
    };
    let addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(err) => panic!("listener should expose local addr: {err}"),
    };
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0_u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });
    format!("http://{addr}/")
}

#[tokio::test]
async fn error_status_carries_sanitised_body() {
    let url = reply_once("401 Unauthorized", "invalid x-api-key sk-ant-api03-leakedleaked").await;
    let response = reqwest::get(url).await.expect("request");

    match check_http_response(response).await {
        Err(ProviderError::HttpStatus { status, body }) => {
            assert_eq!(status, 401);
            assert_eq!(body, "invalid x-api-key [REDACTED]");
        }
        Err(other) => panic!("expected http status error, got: {other}"),
        Ok(_) => panic!("401 should be an error"),
    }
}

#[tokio::test]
async fn success_returns_body_untouched() {
    let url = reply_once("200 OK", "{\"ok\":true}").await;
    let response = reqwest::get(url).await.expect("request");
    let body = check_http_response(response).await;
    assert_eq!(body.ok().as_deref(), Some("{\"ok\":true}"));
}
