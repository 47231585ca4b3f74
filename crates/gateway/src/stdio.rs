//! Line-delimited JSON-RPC server over stdin/stdout.
//!
//! Every request runs on its own task; responses funnel through one
//! writer task so lines never interleave. Logs must go to stderr since
//! stdout is the protocol channel.

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use th_client::protocol::{
    self, ConfigGetParams, ConfigParametersResult, ConfigSetParams, ConfigUpdateParams,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId, ResourceReadParams,
    ResourceReadResult, ResourcesListResult, ServerInfo, ToolCallParams, ToolsListParams,
    ToolsListResult, METHOD_CONFIG_GET, METHOD_CONFIG_PARAMETERS, METHOD_CONFIG_SET,
    METHOD_CONFIG_UPDATE, METHOD_INITIALIZE, METHOD_PING, METHOD_RESOURCES_LIST,
    METHOD_RESOURCES_READ, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use th_config_store::{ConfigMap, ConfigStoreError};
use th_domain::resource::ResourceError;
use th_domain::settings::SettingError;
use th_domain::tool::ToolError;

use crate::state::AppState;
use crate::stream;

const RESPONSE_QUEUE: usize = 64;

/// Serve the process's own stdin/stdout until stdin closes.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    tracing::info!(instance = %state.instance_label(), "stdio server ready");
    serve(state, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Serve requests read from `reader`, writing responses to `writer`.
///
/// Returns once `reader` reaches EOF and every in-flight request has
/// been answered.
pub async fn serve<R, W>(state: AppState, mut reader: R, writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<JsonRpcResponse>(RESPONSE_QUEUE);
    let writer_task = tokio::spawn(write_responses(rx, writer));

    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .context("reading request stream")?;
        if n == 0 {
            tracing::debug!("stdin closed, draining in-flight requests");
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_line(line) {
            Incoming::Request(req) => {
                let state = state.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let resp = dispatch(&state, req).await;
                    // The writer only goes away if stdout failed.
                    let _ = tx.send(resp).await;
                });
            }
            Incoming::Notification(method) => {
                tracing::debug!(method = %method, "ignoring notification");
            }
            Incoming::Invalid(resp) => {
                if tx.send(resp).await.is_err() {
                    break;
                }
            }
        }
    }

    // Every spawned request holds a sender; the writer finishes after the last one.
    drop(tx);
    writer_task
        .await
        .context("response writer panicked")?
        .context("writing responses")?;
    Ok(())
}

async fn write_responses<W>(mut rx: mpsc::Receiver<JsonRpcResponse>, mut writer: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(resp) = rx.recv().await {
        let mut line = serde_json::to_vec(&resp)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Incoming {
    Request(JsonRpcRequest),
    Notification(String),
    Invalid(JsonRpcResponse),
}

fn parse_line(line: &str) -> Incoming {
    let message: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "malformed request line");
            return Incoming::Invalid(JsonRpcResponse::failure(
                None,
                JsonRpcError::new(JsonRpcError::PARSE_ERROR, format!("Parse error: {e}")),
            ));
        }
    };

    let has_id = message.get("id").is_some_and(|id| !id.is_null());
    if !has_id {
        if let Some(method) = message.get("method").and_then(Value::as_str) {
            return Incoming::Notification(method.to_owned());
        }
    }

    let id = message
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<RequestId>(id).ok());
    match serde_json::from_value::<JsonRpcRequest>(message) {
        Ok(req) => Incoming::Request(req),
        Err(e) => Incoming::Invalid(JsonRpcResponse::failure(
            id,
            JsonRpcError::new(JsonRpcError::INVALID_REQUEST, format!("Invalid request: {e}")),
        )),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn dispatch(state: &AppState, req: JsonRpcRequest) -> JsonRpcResponse {
    let start = std::time::Instant::now();
    let result = handle(state, &req.method, req.params).await;
    tracing::debug!(
        method = %req.method,
        id = %req.id,
        ok = result.is_ok(),
        duration_ms = start.elapsed().as_millis() as u64,
        "request handled"
    );
    match result {
        Ok(value) => JsonRpcResponse::success(req.id, value),
        Err(error) => JsonRpcResponse::failure(Some(req.id), error),
    }
}

async fn handle(state: &AppState, method: &str, params: Value) -> Result<Value, JsonRpcError> {
    match method {
        METHOD_INITIALIZE => to_result(ServerInfo {
            name: state.instance.server().to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            instance: Some(state.instance_label()),
        }),
        METHOD_PING => Ok(json!({})),
        METHOD_TOOLS_LIST => {
            let p: ToolsListParams = params_of(params)?;
            to_result(ToolsListResult {
                tools: state.registry.tools_for_role(p.role.as_deref()),
            })
        }
        METHOD_TOOLS_CALL => {
            let p: ToolCallParams = params_of(params)?;
            stream::invoke_full(state.registry.as_ref(), &p.name, p.arguments)
                .await
                .map_err(|e| tool_rpc_error(&p.name, e))
        }
        METHOD_RESOURCES_LIST => to_result(ResourcesListResult {
            resources: state.resources.list_resources(),
        }),
        METHOD_RESOURCES_READ => {
            let p: ResourceReadParams = params_of(params)?;
            let content = state
                .resources
                .read_resource(&p.uri)
                .await
                .map_err(|e| resource_rpc_error(&p.uri, e))?;
            to_result(ResourceReadResult {
                contents: vec![content],
            })
        }
        METHOD_CONFIG_PARAMETERS => to_result(ConfigParametersResult {
            parameters: state.parameters.as_ref().clone(),
        }),
        METHOD_CONFIG_GET => {
            let p: ConfigGetParams = params_of(params)?;
            let value = state
                .with_instance(move |instance| match p.key {
                    Some(key) => instance.get(&key, Value::Null),
                    None => instance.load().map(Value::Object),
                })
                .await;
            value.map_err(task_rpc_error)?.map_err(config_rpc_error)
        }
        METHOD_CONFIG_SET => {
            let p: ConfigSetParams = params_of(params)?;
            let mut write = ConfigMap::new();
            write.insert(p.key.clone(), p.value.clone());
            state.check_settings(&write).map_err(setting_rpc_error)?;
            let record = state
                .with_instance(move |instance| instance.set(&p.key, p.value))
                .await;
            record
                .map_err(task_rpc_error)?
                .map(Value::Object)
                .map_err(config_rpc_error)
        }
        METHOD_CONFIG_UPDATE => {
            let p: ConfigUpdateParams = params_of(params)?;
            state.check_settings(&p.values).map_err(setting_rpc_error)?;
            let record = state
                .with_instance(move |instance| instance.update(p.values))
                .await;
            record
                .map_err(task_rpc_error)?
                .map(Value::Object)
                .map_err(config_rpc_error)
        }
        other => Err(JsonRpcError::new(
            JsonRpcError::METHOD_NOT_FOUND,
            format!("method not found: {other}"),
        )),
    }
}

fn params_of<T: DeserializeOwned>(params: Value) -> Result<T, JsonRpcError> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params)
        .map_err(|e| JsonRpcError::new(JsonRpcError::INVALID_PARAMS, format!("invalid params: {e}")))
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::new(JsonRpcError::TOOL_ERROR, format!("encoding result: {e}")))
}

fn tool_rpc_error(tool: &str, error: ToolError) -> JsonRpcError {
    tracing::warn!(tool, error = %error, "tool call failed");
    let (code, kind, detail) = match &error {
        ToolError::NotFound(d) => (JsonRpcError::INVALID_PARAMS, protocol::KIND_NOT_FOUND, d),
        ToolError::InvalidArguments(d) => {
            (JsonRpcError::INVALID_PARAMS, protocol::KIND_INVALID_ARGUMENTS, d)
        }
        ToolError::Execution(d) => (JsonRpcError::TOOL_ERROR, protocol::KIND_EXECUTION, d),
        ToolError::Unavailable(d) => (JsonRpcError::TOOL_ERROR, protocol::KIND_UNAVAILABLE, d),
    };
    JsonRpcError::new(code, error.to_string()).with_data(json!({ "kind": kind, "detail": detail }))
}

fn resource_rpc_error(uri: &str, error: ResourceError) -> JsonRpcError {
    tracing::warn!(uri, error = %error, "resource read failed");
    let (code, kind, detail) = match &error {
        ResourceError::NotFound(d) => (JsonRpcError::INVALID_PARAMS, protocol::KIND_NOT_FOUND, d),
        ResourceError::InvalidUri(d) => {
            (JsonRpcError::INVALID_PARAMS, protocol::KIND_INVALID_ARGUMENTS, d)
        }
        ResourceError::Read(d) => (JsonRpcError::TOOL_ERROR, protocol::KIND_EXECUTION, d),
        ResourceError::Unavailable(d) => (JsonRpcError::TOOL_ERROR, protocol::KIND_UNAVAILABLE, d),
    };
    JsonRpcError::new(code, error.to_string()).with_data(json!({ "kind": kind, "detail": detail }))
}

fn setting_rpc_error(error: SettingError) -> JsonRpcError {
    tracing::warn!(error = %error, "rejected configuration write");
    JsonRpcError::new(JsonRpcError::INVALID_PARAMS, error.to_string()).with_data(json!({
        "kind": protocol::KIND_INVALID_ARGUMENTS,
        "detail": error.to_string(),
    }))
}

fn task_rpc_error(error: tokio::task::JoinError) -> JsonRpcError {
    tracing::error!(error = %error, "configuration task failed");
    JsonRpcError::new(JsonRpcError::CONFIG_ERROR, format!("configuration task failed: {error}"))
}

fn config_rpc_error(error: ConfigStoreError) -> JsonRpcError {
    tracing::warn!(error = %error, "configuration store error");
    JsonRpcError::new(JsonRpcError::CONFIG_ERROR, error.to_string())
}
