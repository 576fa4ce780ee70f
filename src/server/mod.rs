//! HTTP 入口（axum）
//!
//! - `GET /health` → `OK`
//! - `POST /chat` `{"message": "..."}`：session id 依次取 X-Session-Id 头、chat_session cookie，都没有则新建 uuid；
//!   响应回写 X-Session-Id 头，cookie 与 id 不一致时重设 HttpOnly cookie。
//!   id 只允许 `[A-Za-z0-9_-]`（至多 128 字符），否则 400
//! - `POST /chat/reset`：必须带 session id；会话有运行在进行中时返回 409
//!
//! 客户端断开时 axum 丢弃 handler future，运行随之取消、会话锁随之释放。

use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::{ChatRequest, ChatResponse, ChatService, Failure};

pub const SESSION_HEADER: &str = "x-session-id";
pub const SESSION_COOKIE: &str = "chat_session";

/// handler 共享状态
#[derive(Clone)]
pub struct ServerState {
    pub service: ChatService,
    /// 进程关闭时取消进行中的运行
    pub shutdown: CancellationToken,
}

pub fn build_router(service: ChatService, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/chat/reset", post(reset))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(ServerState { service, shutdown })
}

/// 绑定地址并服务，直到 shutdown 被取消
pub async fn serve(
    addr: SocketAddr,
    service: ChatService,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metachat listening on {}", listener.local_addr()?);
    let router = build_router(service, shutdown.clone());
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn health() -> &'static str {
    "OK"
}

async fn chat(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let cookie_id = cookie_value(&headers, SESSION_COOKIE);
    let session_id = match session_id_from(&headers) {
        Some(id) if !is_valid_session_id(&id) => return invalid_session_id(),
        Some(id) => id,
        None => uuid::Uuid::new_v4().to_string(),
    };

    let (status, response) = match body {
        Err(rejection) => {
            tracing::debug!(error = %rejection, "invalid chat body");
            (StatusCode::BAD_REQUEST, ChatResponse::error("Invalid JSON body"))
        }
        Ok(Json(request)) => {
            let cancel = state.shutdown.child_token();
            match state
                .service
                .handle_with_cancel(&session_id, &request.message, &cancel)
                .await
            {
                Ok(response) => (StatusCode::OK, response),
                Err((failure, response)) => (status_for(failure), response),
            }
        }
    };

    let mut http = (status, Json(response)).into_response();
    attach_session(http.headers_mut(), &session_id, cookie_id.as_deref());
    http
}

async fn reset(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_id_from(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ChatResponse::error("Session id is required")),
        )
            .into_response();
    };
    if !is_valid_session_id(&session_id) {
        return invalid_session_id();
    }

    match state.service.reset(&session_id).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err((failure, response)) => (status_for(failure), Json(response)).into_response(),
    }
}

fn invalid_session_id() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ChatResponse::error("Invalid session id")),
    )
        .into_response()
}

fn status_for(failure: Failure) -> StatusCode {
    match failure {
        Failure::BadRequest => StatusCode::BAD_REQUEST,
        Failure::Conflict => StatusCode::CONFLICT,
        Failure::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// X-Session-Id 头优先，其次 chat_session cookie；空白值视为缺失
pub fn session_id_from(headers: &HeaderMap) -> Option<String> {
    let from_header = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    from_header.or_else(|| cookie_value(headers, SESSION_COOKIE))
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// id 会原样写进响应头与 Set-Cookie，只接受 `[A-Za-z0-9_-]`
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn attach_session(headers: &mut HeaderMap, session_id: &str, cookie_id: Option<&str>) {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        headers.insert(HeaderName::from_static(SESSION_HEADER), value);
    }
    if cookie_id == Some(session_id) {
        return;
    }
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, session_id
    );
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        headers.insert(SET_COOKIE, value);
    }
}
