//! HTTP 入口集成测试：真实监听端口 + reqwest 客户端，后端使用 mock 模型

#![cfg(feature = "server")]

use metachat::agent::{create_agent_components, ChatService};
use metachat::config::AppConfig;
use metachat::server::{build_router, SESSION_HEADER};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

async fn spawn_server() -> (String, CancellationToken) {
    let mut cfg = AppConfig::default();
    cfg.llm.provider = "mock".to_string();
    let components = create_agent_components(&cfg);
    let service = ChatService::new(components.registry);

    let shutdown = CancellationToken::new();
    let router = build_router(service, shutdown.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let token = shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .unwrap();
    });
    (format!("http://{}", addr), shutdown)
}

#[tokio::test]
async fn test_health() {
    let (base, shutdown) = spawn_server().await;
    let body = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "OK");
    shutdown.cancel();
}

#[tokio::test]
async fn test_chat_assigns_and_reuses_session() {
    let (base, shutdown) = spawn_server().await;
    let client = reqwest::Client::new();

    let first = client
        .post(format!("{}/chat", base))
        .json(&json!({"message": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    let session_id = first
        .headers()
        .get(SESSION_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(!session_id.is_empty());
    assert!(first.headers().get("set-cookie").is_some());
    let body: Value = first.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["answer"], "Echo from Mock: hello");

    let second = client
        .post(format!("{}/chat", base))
        .header(SESSION_HEADER, &session_id)
        .json(&json!({"message": "again"}))
        .send()
        .await
        .unwrap();
    assert_eq!(
        second.headers().get(SESSION_HEADER).unwrap().to_str().unwrap(),
        session_id
    );
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["answer"], "Echo from Mock: again");
    shutdown.cancel();
}

#[tokio::test]
async fn test_chat_rejects_bad_input() {
    let (base, shutdown) = spawn_server().await;
    let client = reqwest::Client::new();

    let invalid = client
        .post(format!("{}/chat", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), 400);
    let body: Value = invalid.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Invalid JSON body");

    let blank = client
        .post(format!("{}/chat", base))
        .json(&json!({"message": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(blank.status(), 400);
    shutdown.cancel();
}

#[tokio::test]
async fn test_reset_requires_session() {
    let (base, shutdown) = spawn_server().await;
    let client = reqwest::Client::new();

    let missing = client
        .post(format!("{}/chat/reset", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 400);

    let ok = client
        .post(format!("{}/chat/reset", base))
        .header("cookie", "chat_session=abc")
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    let body: Value = ok.json().await.unwrap();
    assert_eq!(body["success"], true);
    shutdown.cancel();
}

#[tokio::test]
async fn test_malformed_session_id_is_rejected() {
    let (base, shutdown) = spawn_server().await;
    let client = reqwest::Client::new();

    let chat = client
        .post(format!("{}/chat", base))
        .header(SESSION_HEADER, "abc; Max-Age=0")
        .json(&json!({"message": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(chat.status(), 400);
    assert!(chat.headers().get("set-cookie").is_none());
    let body: Value = chat.json().await.unwrap();
    assert_eq!(body["error"], "Invalid session id");

    let reset = client
        .post(format!("{}/chat/reset", base))
        .header(SESSION_HEADER, "a=b")
        .send()
        .await
        .unwrap();
    assert_eq!(reset.status(), 400);
    shutdown.cancel();
}

#[tokio::test]
async fn test_cookie_not_reissued_for_same_session() {
    let (base, shutdown) = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .header("cookie", "chat_session=keep-me")
        .json(&json!({"message": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get(SESSION_HEADER).unwrap().to_str().unwrap(),
        "keep-me"
    );
    assert!(response.headers().get("set-cookie").is_none());
    shutdown.cancel();
}
