//! HTTP-level tests for the chat API, driven in-process through the router
//! with the dummy provider and a temp-dir SQLite file.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use workout_buddi::chat::ChatService;
use workout_buddi::config::Config;
use workout_buddi::http::{AppState, build_router};
use workout_buddi::llm::LlmProvider;
use workout_buddi::llm::providers;
use workout_buddi::llm::providers::ollama::OllamaProvider;
use workout_buddi::store::Store;

// ── Helpers ───────────────────────────────────────────────────────────────────

struct Harness {
    _dir: TempDir,
    store: Arc<Store>,
    router: Router,
}

fn harness(reply: Option<&str>) -> Harness {
    let dir = TempDir::new().unwrap();
    let cfg = Config::test_default(dir.path(), reply);
    let store = Arc::new(Store::open(&cfg.storage.db_path).unwrap());
    let llm = providers::build(&cfg.llm).unwrap();
    let chat = ChatService::new(store.clone(), llm, cfg.llm.system_prompt.clone());
    Harness { _dir: dir, store, router: build_router(AppState::new(chat)) }
}

/// Router whose model endpoint refuses connections.
async fn unreachable_model_harness() -> Harness {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(&dir.path().join("test.db")).unwrap());
    let llm = LlmProvider::Ollama(OllamaProvider::new(format!("http://{addr}"), 0.7, 0.9).unwrap());
    let chat = ChatService::new(store.clone(), llm, None);
    Harness { _dir: dir, store, router: build_router(AppState::new(chat)) }
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(router, req).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

// ── Buffered chat ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_logs_workout_and_persists_both_messages() {
    let h = harness(Some("Great job!"));
    let body = json!({ "message": "I did workout: bench press, sets: 3, reps: 10, weight: 60kg" });

    let (status, value) = send_json(&h.router, post_json("/chat", &body.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!({ "message": "Great job!" }));

    let messages = h.store.list_messages().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role.as_str(), "user");
    assert_eq!(messages[1].role.as_str(), "assistant");
    assert_eq!(messages[1].content, "Great job!");

    let workouts = h.store.list_workouts().unwrap();
    assert_eq!(workouts.len(), 1);
    let w = &workouts[0];
    assert_eq!(w.exercise, "bench press");
    assert_eq!(w.sets, Some(3));
    assert_eq!(w.reps, Some(10));
    assert_eq!(w.weight, Some(60.0));
    assert_eq!(w.weight_unit.as_deref(), Some("kg"));

    assert!(h.store.list_food_logs().unwrap().is_empty());
}

#[tokio::test]
async fn chat_logs_food() {
    let h = harness(Some("Yum"));
    let body = json!({ "message": "food: chicken salad, calories: 450, protein: 35g, carbs: 20, fat: 12.5" });

    let (status, _) = send_json(&h.router, post_json("/chat", &body.to_string())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, logs) = send_json(&h.router, get("/food-logs")).await;
    assert_eq!(status, StatusCode::OK);
    let logs = logs.as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["food_name"], "chicken salad");
    assert_eq!(logs[0]["calories"], 450);
    assert_eq!(logs[0]["protein"], 35.0);
    assert_eq!(logs[0]["fat"], 12.5);
    assert_eq!(logs[0]["user_id"], "default-user");
}

#[tokio::test]
async fn missing_message_is_rejected_without_writes() {
    let h = harness(Some("unused"));

    let (status, value) = send_json(&h.router, post_json("/chat", "{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value, json!({ "error": "Message is required" }));

    let (status, value) = send_json(&h.router, post_json("/chat", r#"{"message":""}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value, json!({ "error": "Message is required" }));

    let (status, _) = send_json(&h.router, post_json("/chat/stream", "{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(h.store.list_messages().unwrap().is_empty());
    assert!(h.store.list_workouts().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let h = harness(Some("unused"));
    let (status, value) = send_json(&h.router, post_json("/chat", "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value, json!({ "error": "Invalid request body" }));
    assert!(h.store.list_messages().unwrap().is_empty());
}

#[tokio::test]
async fn model_failure_is_generic_500_and_keeps_user_message() {
    let h = unreachable_model_harness().await;
    let body = json!({ "message": "workout: squat, sets: 5" }).to_string();

    let (status, value) = send_json(&h.router, post_json("/chat", &body)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(value, json!({ "error": "Failed to process chat request" }));

    // The user write committed before generation failed stays; extraction
    // never ran.
    let messages = h.store.list_messages().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role.as_str(), "user");
    assert!(h.store.list_workouts().unwrap().is_empty());
}

// ── Streaming chat ────────────────────────────────────────────────────────────

#[tokio::test]
async fn stream_relays_tokens_and_persists_reply() {
    let h = harness(Some("Keep pushing, you got this"));
    let req = post_json("/chat/stream", r#"{"message":"workout: squats, sets: 5"}"#);

    let resp = h.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "text/plain; charset=utf-8");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-transform");
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");

    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"Keep pushing, you got this");

    let messages = h.store.list_messages().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "Keep pushing, you got this");

    let workouts = h.store.list_workouts().unwrap();
    assert_eq!(workouts.len(), 1);
    assert_eq!(workouts[0].exercise, "squats");
    assert_eq!(workouts[0].sets, Some(5));
}

#[tokio::test]
async fn stream_open_failure_is_json_500_before_any_token() {
    let h = unreachable_model_harness().await;
    let req = post_json("/chat/stream", r#"{"message":"workout: squat"}"#);

    let resp = h.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value, json!({ "error": "Failed to process streaming chat request" }));

    // The streaming path logs before opening the model stream, so both the
    // user message and the workout survive; no assistant message exists.
    let messages = h.store.list_messages().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role.as_str(), "user");
    assert_eq!(h.store.list_workouts().unwrap().len(), 1);
}

// ── Read endpoints ────────────────────────────────────────────────────────────

#[tokio::test]
async fn messages_returned_in_order() {
    let h = harness(None);
    for text in ["first", "second"] {
        let body = json!({ "message": text }).to_string();
        let (status, _) = send_json(&h.router, post_json("/chat", &body)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, value) = send_json(&h.router, get("/messages")).await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<&str> = value
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, ["first", "[echo] first", "second", "[echo] second"]);

    let first = &value[0];
    assert_eq!(first["role"], "user");
    let ts = first["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
}

#[tokio::test]
async fn empty_history_is_empty_array() {
    let h = harness(None);
    let (status, value) = send_json(&h.router, get("/messages")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!([]));

    let (_, value) = send_json(&h.router, get("/workouts")).await;
    assert_eq!(value, json!([]));
}

#[tokio::test]
async fn health_reports_ok() {
    let h = harness(None);
    let (status, value) = send_json(&h.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!({ "status": "ok" }));
}
