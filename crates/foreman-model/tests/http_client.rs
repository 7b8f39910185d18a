//! Tests for the HTTP model client against a local chat-completions stub.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use foreman_model::{ChatMessage, HttpModelClient, ModelClient, ModelError, ModelReply, ModelRequest};

// ---------------------------------------------------------------------------
// Stub server
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StubState {
    responses: Mutex<VecDeque<(StatusCode, Value)>>,
    /// Authorization header and body of every request received.
    requests: Mutex<Vec<(Option<String>, Value)>>,
}

async fn completions(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.requests.lock().await.push((auth, body));

    match state.responses.lock().await.pop_front() {
        Some((status, body)) => (status, Json(body)),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "no scripted response"})),
        ),
    }
}

async fn start_stub(responses: Vec<(StatusCode, Value)>) -> (String, Arc<StubState>) {
    let state = Arc::new(StubState {
        responses: Mutex::new(responses.into()),
        ..Default::default()
    });
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind stub server");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/v1"), state)
}

fn choice(content: Value) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
    })
}

fn client(base: &str) -> HttpModelClient {
    HttpModelClient::new(base)
        .with_api_key("test-key")
        .with_model("stub-model")
        .with_backoff(Duration::from_millis(10))
}

fn request() -> ModelRequest {
    ModelRequest::new(vec![ChatMessage::user("List the workspace.")])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_reply_is_decoded_from_first_choice() {
    let (base, stub) = start_stub(vec![(
        StatusCode::OK,
        choice(json!(r#"{"tool": "list_files", "path": "."}"#)),
    )])
    .await;

    let reply = client(&base).complete(&request()).await.unwrap();
    assert_eq!(
        reply,
        ModelReply::Payload(json!({"tool": "list_files", "path": "."}))
    );

    let requests = stub.requests.lock().await;
    assert_eq!(requests.len(), 1);
    let (auth, body) = &requests[0];
    assert_eq!(auth.as_deref(), Some("Bearer test-key"));
    assert_eq!(body["model"], "stub-model");
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][0]["content"], "List the workspace.");
}

#[tokio::test]
async fn test_fenced_json_is_unwrapped() {
    let content = "```json\n{\"tool\": \"read_file\", \"path\": \"a.txt\"}\n```";
    let (base, _stub) = start_stub(vec![(StatusCode::OK, choice(json!(content)))]).await;

    let reply = client(&base).complete(&request()).await.unwrap();
    assert_eq!(
        reply,
        ModelReply::Payload(json!({"tool": "read_file", "path": "a.txt"}))
    );
}

#[tokio::test]
async fn test_server_errors_are_retried_until_success() {
    let (base, stub) = start_stub(vec![
        (StatusCode::SERVICE_UNAVAILABLE, json!({"error": "overloaded"})),
        (StatusCode::TOO_MANY_REQUESTS, json!({"error": "slow down"})),
        (StatusCode::OK, choice(json!("All done."))),
    ])
    .await;

    let reply = client(&base).complete(&request()).await.unwrap();
    assert_eq!(reply, ModelReply::Text("All done.".to_string()));
    assert_eq!(stub.requests.lock().await.len(), 3);
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let (base, stub) = start_stub(vec![
        (StatusCode::SERVICE_UNAVAILABLE, json!({})),
        (StatusCode::SERVICE_UNAVAILABLE, json!({})),
        (StatusCode::OK, choice(json!("too late"))),
    ])
    .await;

    let err = client(&base)
        .with_max_attempts(2)
        .complete(&request())
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Status { code: 503, .. }));
    assert_eq!(stub.requests.lock().await.len(), 2);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let (base, stub) = start_stub(vec![(
        StatusCode::UNAUTHORIZED,
        json!({"error": "bad key"}),
    )])
    .await;

    let err = client(&base).complete(&request()).await.unwrap_err();
    match err {
        ModelError::Status { code, body } => {
            assert_eq!(code, 401);
            assert!(body.contains("bad key"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(stub.requests.lock().await.len(), 1);
}

#[tokio::test]
async fn test_null_content_is_an_empty_response() {
    let (base, stub) = start_stub(vec![(StatusCode::OK, choice(Value::Null))]).await;

    let err = client(&base).complete(&request()).await.unwrap_err();
    assert!(matches!(err, ModelError::EmptyResponse));
    assert_eq!(stub.requests.lock().await.len(), 1);
}

#[tokio::test]
async fn test_missing_choices_is_an_empty_response() {
    let (base, _stub) = start_stub(vec![(StatusCode::OK, json!({"choices": []}))]).await;

    let err = client(&base).complete(&request()).await.unwrap_err();
    assert!(matches!(err, ModelError::EmptyResponse));
}
