//! Wire-level tests for the protocol dispatcher: auth, session renewal,
//! and JSON-RPC error mapping, driven through the router in-process.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use switchboard::collab::{AgentSummary, SearchHit};
use switchboard::executor::ActionExecutor;
use switchboard::mcp::{router, McpState, Principal, SessionTable, Toolbox, SESSION_HEADER};
use switchboard::registry::{BundleRegistry, ToolSetCache};
use switchboard::testing::{
    MapRenderer, MemorySessionStore, RecordingPublisher, StaticCatalog, StaticDirectory,
    StaticVerifier, StaticWorkspace,
};

const TOKEN: &str = "token-1";

fn app() -> Router {
    let verifier = StaticVerifier::default().with(
        TOKEN,
        Principal {
            tenant_id: "acme".into(),
            user_id: "user-1".into(),
        },
    );
    let directory = StaticDirectory {
        agents: vec![AgentSummary {
            id: "dispatcher".into(),
            name: "Dispatcher".into(),
            description: "Routes requests".into(),
        }],
        teams: Vec::new(),
    };
    let workspace = StaticWorkspace {
        hits: vec![SearchHit {
            title: "Onboarding guide".into(),
            url: "https://workspace/onboarding".into(),
            snippet: "How to onboard a new tenant".into(),
        }],
    };
    let tool_sets = Arc::new(ToolSetCache::new(Arc::new(BundleRegistry::new())));
    let executor = Arc::new(ActionExecutor::new(
        Arc::new(MemorySessionStore::new()),
        Arc::new(StaticCatalog::default()),
        Arc::new(MapRenderer::default()),
        Arc::new(RecordingPublisher::default()),
    ));
    let state = Arc::new(McpState {
        verifier: Arc::new(verifier),
        sessions: SessionTable::new(Duration::from_secs(1800)),
        toolbox: Toolbox::new(
            Arc::new(directory),
            Arc::new(workspace),
            executor,
            tool_sets,
        ),
    });
    router(state)
}

fn rpc(method: &str, params: Value) -> String {
    json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params}).to_string()
}

fn post(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn post_authed(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn tools_list_needs_no_auth() {
    let response = app()
        .oneshot(post(rpc("tools/list", json!({}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let tools = body["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    assert!(names.contains(&"agents_list"));
    assert!(names.contains(&"workspace_search"));
    assert!(names.contains(&"action_execute"));
    assert!(tools.iter().all(|t| t["inputSchema"]["type"] == "object"));
}

#[tokio::test]
async fn initialize_reports_server_info_and_mints_session_when_authed() {
    let app = app();

    // Anonymous initialize succeeds but carries no session.
    let response = app
        .clone()
        .oneshot(post(rpc("initialize", json!({}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(SESSION_HEADER).is_none());
    let body = body_json(response).await;
    assert_eq!(body["result"]["serverInfo"]["name"], "switchboard");
    assert!(body["result"]["protocolVersion"].is_string());

    // Authenticated initialize gets a session id up front.
    let response = app
        .oneshot(post_authed(rpc("initialize", json!({}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(SESSION_HEADER).is_some());
}

#[tokio::test]
async fn tool_call_without_bearer_is_challenged() {
    let response = app()
        .oneshot(post(rpc(
            "tools/call",
            json!({"name": "agents_list", "arguments": {}}),
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(challenge.starts_with("Bearer "));
}

#[tokio::test]
async fn authenticated_tool_call_returns_envelope_and_session() {
    let response = app()
        .oneshot(post_authed(rpc(
            "tools/call",
            json!({"name": "agents_list", "arguments": {}}),
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(SESSION_HEADER).is_some());

    let body = body_json(response).await;
    assert_eq!(body["result"]["isError"], false);
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("dispatcher"));
}

#[tokio::test]
async fn stale_session_id_is_silently_replaced() {
    let app = app();
    let stale = "00000000-0000-0000-0000-000000000000";

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .header(SESSION_HEADER, stale)
        .body(Body::from(rpc(
            "tools/call",
            json!({"name": "teams_list", "arguments": {}}),
        )))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let renewed = response
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert_ne!(renewed, stale);
}

#[tokio::test]
async fn unknown_tool_maps_to_method_not_found() {
    let response = app()
        .oneshot(post_authed(rpc(
            "tools/call",
            json!({"name": "no_such_tool", "arguments": {}}),
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn missing_required_argument_maps_to_invalid_params() {
    let response = app()
        .oneshot(post_authed(rpc(
            "tools/call",
            json!({"name": "workspace_search", "arguments": {}}),
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32602);
    assert!(body["error"]["message"].as_str().unwrap().contains("query"));
}

#[tokio::test]
async fn workspace_search_returns_hits() {
    let response = app()
        .oneshot(post_authed(rpc(
            "tools/call",
            json!({"name": "workspace_search", "arguments": {"query": "onboard", "limit": 5}}),
        )))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["result"]["isError"], false);
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("Onboarding guide"));
}

#[tokio::test]
async fn unparseable_body_is_a_parse_error() {
    let response = app()
        .oneshot(post("{not json".to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test]
async fn json_without_a_method_is_an_invalid_request() {
    let response = app()
        .oneshot(post(json!({"jsonrpc": "2.0", "id": 1}).to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32600);
}

#[tokio::test]
async fn notification_is_accepted_without_a_body() {
    let body = json!({
        "jsonrpc": "2.0",
        "method": "notifications/initialized",
    })
    .to_string();
    let response = app().oneshot(post(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn delete_tears_down_a_session_exactly_once() {
    let app = app();

    // Mint a session through an authenticated call.
    let response = app
        .clone()
        .oneshot(post_authed(rpc(
            "tools/call",
            json!({"name": "agents_list", "arguments": {}}),
        )))
        .await
        .unwrap();
    let session_id = response
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();

    let delete = |id: String| {
        Request::builder()
            .method("DELETE")
            .uri("/mcp")
            .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
            .header(SESSION_HEADER, id)
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(delete(session_id.clone())).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.oneshot(delete(session_id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_without_auth_is_challenged() {
    let request = Request::builder()
        .method("DELETE")
        .uri("/mcp")
        .header(SESSION_HEADER, "anything")
        .body(Body::empty())
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
