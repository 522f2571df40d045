//! Streaming-HTTP transport. Session identity lives in the
//! `mcp-session-id` header; a 404 response always carries a freshly
//! minted, fully-initialized session id so the client can retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::config::ResolvedConfig;
use crate::error::AppError;
use crate::mcp::handlers::{HandlerContext, SERVER_NAME, SERVER_VERSION};
use crate::mcp::protocol::{parse_request, JsonRpcResponse};
use crate::session::{SessionManager, SessionStatus};

const SESSION_HEADER: &str = "mcp-session-id";

/// Guards the deferred server↔transport connect for one session so that
/// concurrent first requests don't race each other into connecting
/// twice.
struct ConnectGuard {
    in_progress: AtomicBool,
    ready: AtomicBool,
    notify: Notify,
}

impl ConnectGuard {
    fn new() -> Self {
        Self {
            in_progress: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }
}

#[derive(Clone)]
struct AppState {
    session_manager: Arc<SessionManager>,
    config: ResolvedConfig,
    connecting: Arc<DashMap<String, Arc<ConnectGuard>>>,
    request_gates: Arc<DashMap<String, Arc<AsyncMutex<()>>>>,
}

async fn ensure_connected(state: &AppState, session_id: &str) {
    let guard = Arc::clone(
        state
            .connecting
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(ConnectGuard::new()))
            .value(),
    );
    if guard.ready.load(Ordering::SeqCst) {
        return;
    }
    if !guard.in_progress.swap(true, Ordering::SeqCst) {
        state
            .session_manager
            .update_status(session_id, SessionStatus::Active);
        guard.ready.store(true, Ordering::SeqCst);
        guard.notify.notify_waiters();
    } else {
        while !guard.ready.load(Ordering::SeqCst) {
            guard.notify.notified().await;
        }
    }
}

/// Disposes its session on `Drop` unless `defuse` was called first; armed
/// only around the in-flight dispatch, so it fires exactly when the
/// handler future itself is cancelled mid-flight (client disconnect),
/// not on a normal JSON-RPC error response.
struct DisposeOnAbort {
    session_id: Option<String>,
    session_manager: Arc<SessionManager>,
}

impl DisposeOnAbort {
    fn defuse(&mut self) {
        self.session_id = None;
    }
}

impl Drop for DisposeOnAbort {
    fn drop(&mut self) {
        if let Some(id) = self.session_id.take() {
            let manager = Arc::clone(&self.session_manager);
            warn!(session_id = %id, "http request aborted mid-flight, disposing session");
            tokio::spawn(async move {
                manager.dispose_session(&id).await;
            });
        }
    }
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

fn session_not_found_body() -> serde_json::Value {
    json!({ "jsonrpc": "2.0", "error": { "code": -32001, "message": "Session not found" }, "id": null })
}

/// The HTTP status a `JsonRpcResponse` should be answered with: 200 on
/// success, otherwise whatever `AppError::http_status_for_rpc_code`
/// maps its error code to.
fn status_for_response(response: &JsonRpcResponse) -> StatusCode {
    match &response.error {
        Some(err) => AppError::http_status_for_rpc_code(err.code),
        None => StatusCode::OK,
    }
}

async fn get_mcp(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let header = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match header {
        None => Json(json!({
            "success": true,
            "message": "MCP PTY server is running",
            "version": SERVER_VERSION,
        }))
        .into_response(),
        Some(id) => match state.session_manager.get_session(&id) {
            Some(session) => Json(json!({
                "success": true,
                "session_id": id,
                "status": session.status.as_str(),
            }))
            .into_response(),
            None => {
                let new_id = state.session_manager.create_session();
                ensure_connected(&state, &new_id).await;
                let resp = (StatusCode::NOT_FOUND, Json(session_not_found_body())).into_response();
                with_session_header(resp, &new_id)
            }
        },
    }
}

async fn post_mcp(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let existing = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (session_id, needs_404) = match existing {
        None => (state.session_manager.create_session(), false),
        Some(id) => match state.session_manager.get_session(&id) {
            Some(session) if session.status != SessionStatus::Terminated => (id, false),
            _ => (state.session_manager.create_session(), true),
        },
    };

    ensure_connected(&state, &session_id).await;

    if needs_404 {
        let resp = (StatusCode::NOT_FOUND, Json(session_not_found_body())).into_response();
        return with_session_header(resp, &session_id);
    }

    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(_) => {
            let resp = (
                StatusCode::BAD_REQUEST,
                Json(serde_json::to_value(JsonRpcResponse::parse_error()).unwrap_or(json!({}))),
            )
                .into_response();
            return with_session_header(resp, &session_id);
        }
    };

    let gate = Arc::clone(
        state
            .request_gates
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .value(),
    );
    let _permit = gate.lock().await;

    let ctx = HandlerContext {
        session_id: session_id.clone(),
        session_manager: Arc::clone(&state.session_manager),
        deactivate_resources: state.config.deactivate_resources,
    };

    let mut abort_guard = DisposeOnAbort {
        session_id: Some(session_id.clone()),
        session_manager: Arc::clone(&state.session_manager),
    };
    let request_id = request.id.clone().unwrap_or(Value::Null);
    let response = match std::panic::AssertUnwindSafe(crate::mcp::dispatch(&ctx, request))
        .catch_unwind()
        .await
    {
        Ok(response) => response,
        Err(_) => {
            error!(session_id = %session_id, "tool/resource handler panicked");
            JsonRpcResponse::from_app_error(
                request_id,
                &AppError::Internal("handler panicked".to_string()),
            )
        }
    };
    abort_guard.defuse();

    let status = status_for_response(&response);
    with_session_header(
        (status, Json(response)).into_response(),
        &session_id,
    )
}

async fn delete_mcp(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let header = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok());
    let Some(id) = header else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "jsonrpc": "2.0", "error": { "code": -32600, "message": "Invalid Request" }, "id": null })),
        )
            .into_response();
    };
    let id = id.to_string();
    let disposed = state.session_manager.dispose_session(&id).await;
    state.connecting.remove(&id);
    state.request_gates.remove(&id);
    Json(json!({ "success": disposed, "session_id": id })).into_response()
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/mcp", get(get_mcp).post(post_mcp).delete(delete_mcp))
        .with_state(state)
        .layer(
            CorsLayer::permissive().expose_headers([axum::http::HeaderName::from_static(
                SESSION_HEADER,
            )]),
        )
}

/// Listens on `config.port` and serves `/mcp` until a shutdown signal
/// arrives; every live session is disposed in parallel before returning.
pub async fn run(session_manager: Arc<SessionManager>, config: ResolvedConfig) -> std::io::Result<()> {
    let port = config.port;
    let state = AppState {
        session_manager: Arc::clone(&session_manager),
        config,
        connecting: Arc::new(DashMap::new()),
        request_gates: Arc::new(DashMap::new()),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "http transport listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(super::shutdown_signal())
        .await?;

    info!("disposing all sessions before exit");
    let ids: Vec<String> = session_manager
        .get_all_sessions()
        .into_iter()
        .map(|s| s.id)
        .collect();
    let disposals = ids
        .into_iter()
        .map(|id| {
            let manager = Arc::clone(&session_manager);
            tokio::spawn(async move {
                manager.dispose_session(&id).await;
            })
        })
        .collect::<Vec<_>>();
    let _ = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        futures::future::join_all(disposals),
    )
    .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_name_and_version_are_nonempty() {
        assert!(!SERVER_NAME.is_empty());
        assert!(!SERVER_VERSION.is_empty());
    }
}
