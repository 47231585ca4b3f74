use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use th_config_store::{ConfigStore, InstanceConfig, Qualifier};
use th_domain::config::Config;
use th_domain::stream::{ChunkStream, StreamChunk};
use th_domain::tool::{ToolDescriptor, ToolError};
use th_gateway::api;
use th_gateway::bootstrap;
use th_gateway::state::AppState;
use th_tools::{demo_parameters, demo_registry, DirRoot};

fn test_state(dir: &Path) -> AppState {
    let store = Arc::new(ConfigStore::new(dir.join("config")));
    let instance = InstanceConfig::new(store, "toolhost", Qualifier::Port(8080)).unwrap();
    let dir_root = DirRoot::new(dir);
    bootstrap::wire_dir_root(&instance, &dir_root, dir.to_path_buf()).unwrap();

    let registry = demo_registry(dir_root.clone()).streaming_tool(
        ToolDescriptor::new("abc", "Stream three letters"),
        |_| {
            let stream = async_stream::stream! {
                for letter in ["a", "b", "c"] {
                    yield Ok::<StreamChunk, ToolError>(StreamChunk::from(letter));
                }
            };
            Ok(Box::pin(stream) as ChunkStream)
        },
    );

    AppState {
        config: Arc::new(Config::default()),
        registry: Arc::new(registry),
        resources: Arc::new(bootstrap::local_resources(dir_root.clone(), instance.clone())),
        instance,
        parameters: Arc::new(demo_parameters(dir)),
        dir_root,
        upstream: None,
        started_at: Instant::now(),
    }
}

fn app(state: AppState) -> Router {
    api::router().with_state(state)
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, String) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Split an SSE body into `(event, data)` pairs.
fn parse_sse(body: &str) -> Vec<(Option<String>, String)> {
    body.split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .map(|frame| {
            let mut event = None;
            let mut data = Vec::new();
            for line in frame.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = Some(v.trim().to_owned());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push(v.strip_prefix(' ').unwrap_or(v));
                }
            }
            (event, data.join("\n"))
        })
        .collect()
}

fn delta_contents(frames: &[(Option<String>, String)]) -> String {
    frames
        .iter()
        .filter_map(|(_, data)| serde_json::from_str::<Value>(data).ok())
        .filter_map(|v| v["choices"][0]["delta"]["content"].as_str().map(str::to_owned))
        .collect()
}

// ── Health / info ────────────────────────────────────────────────────

#[tokio::test]
async fn health_and_info() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    let (status, body) = send(app(state.clone()), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["status"], "ok");

    let (_, body) = send(app(state), get("/info")).await;
    let info: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(info["instance"], "port 8080");
    assert_eq!(info["server"], "toolhost");
    assert_eq!(info["upstream"], false);
    assert!(info["config_path"]
        .as_str()
        .unwrap()
        .ends_with("toolhost_port_8080_server_config.json"));
}

// ── Tools ────────────────────────────────────────────────────────────

#[tokio::test]
async fn tools_list_filters_by_role() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    let names = |body: &str| -> Vec<String> {
        let v: Value = serde_json::from_str(body).unwrap();
        v["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_owned())
            .collect()
    };

    let (_, all) = send(app(state.clone()), get("/tools/list")).await;
    assert!(names(&all).contains(&"list_dir".to_owned()));

    let (_, planner) = send(app(state.clone()), get("/tools/list?role=planner")).await;
    let planner = names(&planner);
    assert!(planner.contains(&"echo".to_owned()));
    assert!(!planner.contains(&"list_dir".to_owned()));

    let (_, files) = send(app(state), get("/tools/list?role=files")).await;
    assert!(names(&files).contains(&"list_dir".to_owned()));
}

#[tokio::test]
async fn tool_call_returns_full_result() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    let (status, body) = send(
        app(state),
        post_json("/tool/call", json!({ "tool_name": "echo", "arguments": { "text": "hi" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["success"], true);
    assert_eq!(v["result"]["text"], "hi");
}

#[tokio::test]
async fn tool_call_aggregates_streaming_tools() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    let (status, body) = send(
        app(state),
        post_json(
            "/tool/call",
            json!({ "tool_name": "generate_sequence", "arguments": { "count": 3, "prefix": "n" } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["result"], "n 1\nn 2\nn 3\n");
}

#[tokio::test]
async fn tool_call_errors_map_to_status() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    let (status, body) = send(
        app(state.clone()),
        post_json("/tool/call", json!({ "tool_name": "nope", "arguments": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["success"], false);

    let (status, _) = send(
        app(state.clone()),
        post_json("/tool/call", json!({ "tool_name": "add", "arguments": { "a": 1 } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        app(state),
        post_json(
            "/tool/call",
            json!({ "tool_name": "generate_sequence", "arguments": { "count": 3, "fail_at": 2 } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

// ── SSE ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn openai_stream_concatenates_to_abc() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    let (status, body) = send(
        app(state),
        post_json("/sse/openai/tool/call", json!({ "tool_name": "abc", "arguments": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let frames = parse_sse(&body);
    assert_eq!(frames.len(), 6);
    let first: Value = serde_json::from_str(&frames[0].1).unwrap();
    assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
    assert_eq!(delta_contents(&frames), "abc");
    let stop: Value = serde_json::from_str(&frames[4].1).unwrap();
    assert_eq!(stop["choices"][0]["finish_reason"], "stop");
    assert_eq!(frames[5].1, "[DONE]");
}

#[tokio::test]
async fn openai_get_variant_and_alias_route() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    for uri in [
        "/sse/openai/tool/call?tool_name=abc",
        "/mcp/sse/openai/tool/call?tool_name=abc&arguments=%7B%7D",
    ] {
        let (status, body) = send(app(state.clone()), get(uri)).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        let frames = parse_sse(&body);
        assert_eq!(delta_contents(&frames), "abc");
        assert_eq!(frames.last().unwrap().1, "[DONE]");
    }
}

#[tokio::test]
async fn openai_get_with_bad_arguments_reports_error_frame() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    let (_, body) = send(
        app(state),
        get("/sse/openai/tool/call?tool_name=echo&arguments=%7Bnope"),
    )
    .await;
    let frames = parse_sse(&body);
    assert_eq!(frames.len(), 2);
    let err: Value = serde_json::from_str(&frames[0].1).unwrap();
    assert_eq!(err["error"]["type"], "tool_execution_error");
    assert_eq!(frames[1].1, "[DONE]");
}

#[tokio::test]
async fn openai_stream_of_plain_tool_is_single_delta() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    let (_, body) = send(
        app(state),
        post_json("/sse/openai/tool/call", json!({ "tool_name": "echo", "arguments": { "text": "hi" } })),
    )
    .await;
    let frames = parse_sse(&body);
    assert_eq!(frames.len(), 4);
    let content: Value = serde_json::from_str(&delta_contents(&frames)).unwrap();
    assert_eq!(content, json!({ "text": "hi" }));
}

#[tokio::test]
async fn raw_stream_error_frame_then_end() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    let (status, body) = send(
        app(state),
        post_json(
            "/sse/tool/call",
            json!({ "tool_name": "generate_sequence", "arguments": { "count": 5, "fail_at": 2 } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let frames = parse_sse(&body);
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].0, None);
    assert_eq!(frames[0].1.trim_end(), "item 1");
    assert_eq!(frames[1].0.as_deref(), Some("error"));
    let err: Value = serde_json::from_str(&frames[1].1).unwrap();
    assert!(err["error"].as_str().unwrap().contains("failed at 2"));
    assert_eq!(frames[2], (Some("end".to_owned()), "[END]".to_owned()));
}

#[tokio::test]
async fn raw_stream_text_with_carriage_returns() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    let (status, body) = send(
        app(state),
        post_json(
            "/sse/tool/call",
            json!({ "tool_name": "generate_sequence", "arguments": { "count": 2, "prefix": "a\rb\r\nc" } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.contains('\r'));

    let frames = parse_sse(&body);
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].1, "a\nb\nc 1\n");
    assert_eq!(frames[1].1, "a\nb\nc 2\n");
    assert_eq!(frames[2], (Some("end".to_owned()), "[END]".to_owned()));
}

#[tokio::test]
async fn raw_stream_of_deltas_carries_json() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    let (_, body) = send(
        app(state),
        post_json("/sse/tool/call", json!({ "tool_name": "stream_words", "arguments": { "text": "x y" } })),
    )
    .await;
    let frames = parse_sse(&body);
    assert_eq!(frames.len(), 3);
    assert_eq!(serde_json::from_str::<Value>(&frames[0].1).unwrap(), json!({ "content": "x " }));
    assert_eq!(serde_json::from_str::<Value>(&frames[1].1).unwrap(), json!({ "content": "y" }));
    assert_eq!(frames[2].1, "[END]");
}

#[tokio::test]
async fn raw_stream_unknown_tool_is_in_band_error() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    let (status, body) = send(
        app(state),
        post_json("/sse/tool/call", json!({ "tool_name": "missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let frames = parse_sse(&body);
    assert_eq!(frames[0].0.as_deref(), Some("error"));
    assert_eq!(frames[1].1, "[END]");
}

// ── Config ───────────────────────────────────────────────────────────

#[tokio::test]
async fn config_update_moves_list_dir_root() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());
    let sub = dir.path().join("data");
    std::fs::create_dir(&sub).unwrap();
    std::fs::write(sub.join("inside.txt"), "x").unwrap();

    let (status, body) = send(app(state.clone()), get("/config")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["values"], json!({}));

    let (status, body) = send(
        app(state.clone()),
        post_json("/config", json!({ "values": { "default_dir": sub.display().to_string() } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["values"]["default_dir"], sub.display().to_string());
    assert_eq!(state.dir_root.get(), sub);
    assert!(state.instance.path().unwrap().exists());

    let (_, body) = send(
        app(state),
        post_json("/tool/call", json!({ "tool_name": "list_dir", "arguments": {} })),
    )
    .await;
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["result"]["entries"][0]["name"], "inside.txt");
}

#[tokio::test]
async fn slow_config_callback_does_not_stall_other_requests() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());
    state
        .instance
        .on_change(|_, _| {
            std::thread::sleep(std::time::Duration::from_millis(800));
            Ok(())
        })
        .unwrap();

    // Single-threaded runtime: if the write ran on the worker, the health
    // request could not be served until the callback returned.
    let start = Instant::now();
    let (update, health) = tokio::join!(
        send(app(state.clone()), post_json("/config", json!({ "values": { "mode": "slow" } }))),
        async {
            let (status, _) = send(app(state.clone()), get("/health")).await;
            (status, start.elapsed())
        }
    );
    assert_eq!(update.0, StatusCode::OK);
    assert_eq!(health.0, StatusCode::OK);
    assert!(health.1 < std::time::Duration::from_millis(400), "health took {:?}", health.1);
}

#[tokio::test]
async fn resources_are_listed_and_read() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), "hi there").unwrap();
    let state = test_state(dir.path());

    let (status, body) = send(app(state.clone()), get("/resources")).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&body).unwrap();
    let uris: Vec<&str> = v["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["uri"].as_str().unwrap())
        .collect();
    assert_eq!(uris, vec!["file://", "dir://root", "config://instance"]);
    assert_eq!(v["resources"][1]["mimeType"], "application/json");

    let (status, body) = send(app(state.clone()), get("/resources/read?uri=file://hello.txt")).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["text"], "hi there");
    assert_eq!(v["mime_type"], "text/plain");

    let (status, _) = send(app(state.clone()), get("/resources/read?uri=file://nope.txt")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(app(state.clone()), get("/resources/read?uri=file://../x")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(app(state), get("/resources/read?uri=memory://todos")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn declared_settings_are_type_checked() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    let (status, body) = send(app(state.clone()), get("/config/parameters")).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["parameters"][0]["name"], "default_dir");
    assert_eq!(v["parameters"][0]["type"], "path");

    let (status, body) = send(
        app(state.clone()),
        post_json("/config", json!({ "values": { "default_dir": 42, "mode": "fast" } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("default_dir"), "{body}");
    assert_eq!(state.dir_root.get(), dir.path());

    let (_, body) = send(app(state), get("/config")).await;
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["values"], json!({}));
}
