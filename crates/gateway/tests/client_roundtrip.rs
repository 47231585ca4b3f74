//! The client facade and the remote registry against the real `toolhost`
//! binary running in stdio mode.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use th_client::{ClientError, ClientOptions, RemoteRegistry, SimpleClient};
use th_config_store::{ConfigStore, InstanceConfig, Qualifier};
use th_domain::config::{Config, TransportConfig};
use th_domain::resource::{ResourceError, ResourceRegistry};
use th_domain::tool::{ToolError, ToolOutput, ToolRegistry};
use th_gateway::api;
use th_gateway::state::AppState;
use th_tools::{demo_parameters, DirRoot};

fn options(config_dir: &std::path::Path, alias: &str) -> ClientOptions {
    let transport = TransportConfig {
        startup_grace_ms: 200,
        ..TransportConfig::default()
    };
    ClientOptions::new(env!("CARGO_BIN_EXE_toolhost"))
        .transport(transport)
        .alias(alias)
        .config_dir(config_dir)
}

#[tokio::test]
async fn simple_client_talks_to_stdio_server() {
    let dir = tempfile::tempdir().unwrap();
    let client = SimpleClient::connect(options(dir.path(), "e2e")).await.unwrap();

    assert_eq!(client.server_info().instance.as_deref(), Some("alias e2e"));
    assert!(client.tools().contains(&"echo".to_owned()));
    assert!(client.tool_info("generate_sequence").unwrap().streaming);

    let echoed = client.call("echo", json!({ "text": "hello" })).await.unwrap();
    assert_eq!(echoed["text"], "hello");

    let sequence = client
        .call("generate_sequence", json!({ "count": 2, "prefix": "p" }))
        .await
        .unwrap();
    assert_eq!(sequence, json!("p 1\np 2\n"));

    let err = client
        .call("generate_sequence", json!({ "fail_at": 1 }))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Tool { .. }));

    client.set_config("mode", json!("fast")).await.unwrap();
    assert_eq!(client.get_config("mode").await.unwrap(), json!("fast"));
    assert!(dir.path().join("toolhost_alias_e2e_server_config.json").exists());

    client.ping().await.unwrap();
    client.close().await;
}

#[tokio::test]
async fn remote_registry_proxies_tools() {
    let dir = tempfile::tempdir().unwrap();
    let remote = RemoteRegistry::connect(options(dir.path(), "proxy")).await.unwrap();

    let names: Vec<String> = remote.list_tools().into_iter().map(|t| t.name).collect();
    assert!(names.contains(&"add".to_owned()));

    match remote.invoke_tool("add", json!({ "a": 2, "b": 40 })).await.unwrap() {
        ToolOutput::Full(v) => assert_eq!(v, Value::from(42)),
        other => panic!("unexpected {other:?}"),
    }

    let err = remote.invoke_tool("missing", json!({})).await.unwrap_err();
    assert_eq!(err, ToolError::NotFound("missing".into()));

    let err = remote.invoke_tool("add", json!({ "a": "two" })).await.unwrap_err();
    assert!(matches!(err, ToolError::InvalidArguments(_)), "got {err:?}");

    let err = remote
        .invoke_tool("generate_sequence", json!({ "fail_at": 1 }))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Execution(_)), "got {err:?}");

    remote.close().await;
}

#[tokio::test]
async fn proxied_errors_keep_their_http_status() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(RemoteRegistry::connect(options(dir.path(), "upstream")).await.unwrap());

    let store = Arc::new(ConfigStore::new(dir.path().join("gateway")));
    let state = AppState {
        config: Arc::new(Config::default()),
        registry: remote.clone(),
        resources: remote.clone(),
        instance: InstanceConfig::new(store, "toolhost", Qualifier::alias("front")).unwrap(),
        parameters: Arc::new(demo_parameters(dir.path())),
        dir_root: DirRoot::new(dir.path()),
        upstream: Some(remote.clone()),
        started_at: Instant::now(),
    };

    let call = |body: Value| {
        let app = api::router().with_state(state.clone());
        async move {
            let req = Request::builder()
                .method("POST")
                .uri("/tool/call")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            app.oneshot(req).await.unwrap().status()
        }
    };

    assert_eq!(call(json!({ "tool_name": "add", "arguments": { "a": 1, "b": 2 } })).await, StatusCode::OK);
    assert_eq!(
        call(json!({ "tool_name": "add", "arguments": { "a": "two" } })).await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(call(json!({ "tool_name": "missing" })).await, StatusCode::NOT_FOUND);
    assert_eq!(
        call(json!({ "tool_name": "generate_sequence", "arguments": { "fail_at": 1 } })).await,
        StatusCode::INTERNAL_SERVER_ERROR
    );

    remote.close().await;
}

#[tokio::test]
async fn remote_registry_proxies_resources_and_settings() {
    let dir = tempfile::tempdir().unwrap();
    let remote = RemoteRegistry::connect(options(dir.path(), "res")).await.unwrap();

    let uris: Vec<String> = remote.list_resources().into_iter().map(|r| r.uri).collect();
    assert!(uris.contains(&"config://instance".to_owned()));
    assert!(uris.contains(&"file://".to_owned()));

    // The child seeded its declared default at startup.
    let record = remote.read_resource("config://instance").await.unwrap();
    let record: Value = serde_json::from_str(&record.text).unwrap();
    assert!(record["default_dir"].is_string());

    let err = remote.read_resource("file://no-such-file.txt").await.unwrap_err();
    assert_eq!(err, ResourceError::NotFound("file://no-such-file.txt".into()));
    let err = remote.read_resource("memory://x").await.unwrap_err();
    assert_eq!(err, ResourceError::NotFound("memory://x".into()));

    let parameters = remote.client().server_parameters().await.unwrap();
    assert_eq!(parameters[0].name, "default_dir");
    let err = remote
        .client()
        .set_config("default_dir", json!(7))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Rejected(ref e) if e.code == -32602), "got {err:?}");

    remote.close().await;
}
