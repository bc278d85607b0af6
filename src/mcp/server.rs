//! HTTP transport for the protocol dispatcher.
//!
//! One POST endpoint carries all JSON-RPC traffic. Handshake methods run
//! without auth; everything else needs a bearer-derived principal, with
//! session ids tracked in the `Mcp-Session-Id` header. A DELETE on the
//! endpoint tears a session down.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::mcp::protocol::{
    content_envelope, InitializeResult, JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR,
    INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::mcp::session::{Principal, SessionTable};
use crate::mcp::tools::{ToolCallError, Toolbox};
use crate::mcp::TokenVerifier;

pub const SESSION_HEADER: &str = "Mcp-Session-Id";

const WWW_AUTHENTICATE_CHALLENGE: &str =
    "Bearer resource_metadata=\"/.well-known/oauth-protected-resource\"";

/// Methods that run before a session or bearer context exists.
const HANDSHAKE_METHODS: &[&str] = &["initialize", "notifications/initialized", "tools/list"];

/// Shared dispatcher state.
pub struct McpState {
    pub verifier: Arc<dyn TokenVerifier>,
    pub sessions: SessionTable,
    pub toolbox: Toolbox,
}

pub fn router(state: Arc<McpState>) -> Router {
    Router::new()
        .route("/mcp", post(handle_post).delete(handle_delete))
        .with_state(state)
}

async fn handle_post(
    State(state): State<Arc<McpState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let raw: Value = match serde_json::from_str(&body) {
        Ok(raw) => raw,
        Err(err) => {
            return Json(JsonRpcResponse::error(
                Value::Null,
                PARSE_ERROR,
                format!("parse error: {}", err),
            ))
            .into_response()
        }
    };
    let request: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(err) => {
            return Json(JsonRpcResponse::error(
                Value::Null,
                INVALID_REQUEST,
                format!("invalid request: {}", err),
            ))
            .into_response()
        }
    };

    if HANDSHAKE_METHODS.contains(&request.method.as_str()) {
        return handle_handshake(&state, &headers, request).await;
    }

    let Some(principal) = authenticate(&state, &headers).await else {
        return unauthorized();
    };

    // A stale or absent session id from an authenticated caller gets a
    // freshly minted replacement instead of a rejection.
    let presented = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok());
    let session_id = match presented {
        Some(id) if state.sessions.touch(id).await.is_some() => id.to_string(),
        stale => {
            if let Some(id) = stale {
                debug!(session = %id, "replacing stale session id");
            }
            state.sessions.mint(principal.clone()).await
        }
    };

    if request.is_notification() {
        return with_session_header(StatusCode::ACCEPTED.into_response(), &session_id);
    }

    let id = request.id.clone().unwrap_or(Value::Null);
    let response = match request.method.as_str() {
        "tools/call" => handle_tools_call(&state, &principal, id, request.params).await,
        other => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("unknown method {}", other)),
    };
    with_session_header(Json(response).into_response(), &session_id)
}

async fn handle_handshake(
    state: &Arc<McpState>,
    headers: &HeaderMap,
    request: JsonRpcRequest,
) -> Response {
    let id = request.id.clone().unwrap_or(Value::Null);
    match request.method.as_str() {
        "initialize" => {
            let result = serde_json::json!(InitializeResult::current());
            let response = Json(JsonRpcResponse::success(id, result)).into_response();
            // An already-authenticated initialize gets its session up front.
            if let Some(principal) = authenticate(state, headers).await {
                let session_id = state.sessions.mint(principal).await;
                return with_session_header(response, &session_id);
            }
            response
        }
        "notifications/initialized" => StatusCode::ACCEPTED.into_response(),
        "tools/list" => Json(JsonRpcResponse::success(id, state.toolbox.list())).into_response(),
        other => {
            Json(JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("unknown method {}", other),
            ))
            .into_response()
        }
    }
}

async fn handle_tools_call(
    state: &Arc<McpState>,
    principal: &Principal,
    id: Value,
    params: Option<Value>,
) -> JsonRpcResponse {
    let params = params.unwrap_or(Value::Null);
    let Some(name) = params["name"].as_str() else {
        return JsonRpcResponse::error(id, INVALID_PARAMS, "missing tool name");
    };
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    match state.toolbox.call(principal, name, arguments).await {
        Ok(reply) => JsonRpcResponse::success(id, content_envelope(reply.text, reply.is_error)),
        Err(ToolCallError::UnknownTool(name)) => {
            JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("unknown tool {}", name))
        }
        Err(ToolCallError::InvalidParams(detail)) => {
            JsonRpcResponse::error(id, INVALID_PARAMS, detail)
        }
        Err(ToolCallError::Internal(detail)) => {
            warn!(tool = name, error = %detail, "tool handler failed");
            JsonRpcResponse::error(id, INTERNAL_ERROR, detail)
        }
    }
}

async fn handle_delete(State(state): State<Arc<McpState>>, headers: HeaderMap) -> Response {
    let Some(principal) = authenticate(&state, &headers).await else {
        return unauthorized();
    };
    let _ = principal;
    let Some(id) = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if state.sessions.remove(id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn authenticate(state: &Arc<McpState>, headers: &HeaderMap) -> Option<Principal> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))?;
    state.verifier.verify(token).await
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, WWW_AUTHENTICATE_CHALLENGE)],
    )
        .into_response()
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = session_id.parse() {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}
