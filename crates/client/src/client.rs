//! High-level client for a toolhost server running as a child process.
//!
//! [`SimpleClient`] spawns `<server> stdio`, performs the `initialize`
//! handshake and wraps the JSON-RPC methods in typed calls.

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use th_domain::config::TransportConfig;
use th_domain::resource::{ResourceContent, ResourceDescriptor};
use th_domain::settings::ServerParameter;
use th_domain::tool::ToolDescriptor;

use crate::protocol::{
    self, ConfigGetParams, ConfigParametersResult, ConfigSetParams, ConfigUpdateParams,
    JsonRpcError, ResourceReadParams, ResourceReadResult, ResourcesListResult, ServerInfo,
    ToolCallParams, ToolsListParams, ToolsListResult,
};
use crate::transport::{ConnectOptions, ProcessSession, TransportError};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which server to start and how to address its configuration record.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub server_path: String,
    pub alias: Option<String>,
    pub port: Option<u16>,
    pub config_dir: Option<PathBuf>,
    /// Appended after the generated `stdio` arguments.
    pub extra_args: Vec<String>,
    pub call_timeout: Duration,
    pub transport: TransportConfig,
}

impl ClientOptions {
    pub fn new(server_path: impl Into<String>) -> Self {
        let transport = TransportConfig::default();
        Self {
            server_path: server_path.into(),
            alias: None,
            port: None,
            config_dir: None,
            extra_args: Vec::new(),
            call_timeout: transport.call_timeout(),
            transport,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.call_timeout = transport.call_timeout();
        self.transport = transport;
        self
    }

    /// Arguments passed to the server: `stdio [--alias A | --port P] [--config-dir D] ...`.
    ///
    /// An alias takes precedence over a port.
    pub fn server_args(&self) -> Vec<String> {
        let mut args = vec!["stdio".to_owned()];
        if let Some(alias) = &self.alias {
            args.push("--alias".into());
            args.push(alias.clone());
        } else if let Some(port) = self.port {
            args.push("--port".into());
            args.push(port.to_string());
        }
        if let Some(dir) = &self.config_dir {
            args.push("--config-dir".into());
            args.push(dir.display().to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::from_config(self.server_path.clone(), &self.transport).args(self.server_args())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("tool `{tool}` failed: {message}")]
    Tool { tool: String, message: String },

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("invalid arguments for `{tool}`: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("server rejected request: {0}")]
    Rejected(JsonRpcError),

    #[error("unexpected response payload: {0}")]
    Protocol(String),
}

impl From<ClientError> for th_domain::error::Error {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Tool { .. }
            | ClientError::ToolNotFound(_)
            | ClientError::InvalidArguments { .. } => th_domain::error::Error::Tool(e.to_string()),
            ClientError::Transport(TransportError::Timeout { .. }) => {
                th_domain::error::Error::Timeout(e.to_string())
            }
            _ => th_domain::error::Error::Transport(e.to_string()),
        }
    }
}

/// Classify a `tools/call` rejection by its code and `data.kind` tag.
fn tool_call_error(tool: &str, err: JsonRpcError) -> ClientError {
    let tool = tool.to_owned();
    match (err.code, err.kind()) {
        (JsonRpcError::METHOD_NOT_FOUND, _)
        | (JsonRpcError::INVALID_PARAMS, Some(protocol::KIND_NOT_FOUND)) => {
            ClientError::ToolNotFound(tool)
        }
        (JsonRpcError::INVALID_PARAMS, _) => ClientError::InvalidArguments {
            tool,
            message: err.detail().to_owned(),
        },
        _ => ClientError::Tool {
            tool,
            message: err.detail().to_owned(),
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SimpleClient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A connected toolhost server.
pub struct SimpleClient {
    session: ProcessSession,
    server: ServerInfo,
    tools: RwLock<Vec<ToolDescriptor>>,
    call_timeout: Duration,
}

impl SimpleClient {
    /// Spawn the server, run `initialize` and fetch the tool list.
    pub async fn connect(opts: ClientOptions) -> Result<Self, ClientError> {
        let session = ProcessSession::connect(opts.connect_options()).await?;

        let mut client = Self {
            session,
            server: ServerInfo {
                name: String::new(),
                version: String::new(),
                instance: None,
            },
            tools: RwLock::new(Vec::new()),
            call_timeout: opts.call_timeout,
        };

        let init = serde_json::json!({
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let handshake = client.request::<ServerInfo>(protocol::METHOD_INITIALIZE, init).await;
        match handshake {
            Ok(info) => client.server = info,
            Err(e) => {
                client.session.close().await;
                return Err(e);
            }
        }
        if let Err(e) = client.list_tools().await {
            client.session.close().await;
            return Err(e);
        }

        tracing::info!(
            server = %client.server.name,
            version = %client.server.version,
            instance = ?client.server.instance,
            tool_count = client.tools.read().len(),
            "connected to tool server"
        );
        Ok(client)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: impl Serialize,
    ) -> Result<T, ClientError> {
        let params = serde_json::to_value(params).map_err(TransportError::from)?;
        let value = match self.session.call(method, params, self.call_timeout).await {
            Ok(value) => value,
            Err(TransportError::Remote(err)) => return Err(ClientError::Rejected(err)),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_value(value)
            .map_err(|e| ClientError::Protocol(format!("`{method}` result: {e}")))
    }

    /// What the server reported during `initialize`.
    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    /// Names of the tools known from the last listing.
    pub fn tools(&self) -> Vec<String> {
        self.tools.read().iter().map(|t| t.name.clone()).collect()
    }

    /// Fetch descriptors from the server and refresh the local cache.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        let listed: ToolsListResult = self
            .request(protocol::METHOD_TOOLS_LIST, ToolsListParams::default())
            .await?;
        *self.tools.write() = listed.tools.clone();
        Ok(listed.tools)
    }

    /// Descriptors visible to `role`, filtered server-side.
    pub async fn list_tools_for_role(&self, role: &str) -> Result<Vec<ToolDescriptor>, ClientError> {
        let params = ToolsListParams {
            role: Some(role.to_owned()),
        };
        let listed: ToolsListResult = self.request(protocol::METHOD_TOOLS_LIST, params).await?;
        Ok(listed.tools)
    }

    /// Cached descriptors from the last listing.
    pub fn cached_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.read().clone()
    }

    pub fn tool_info(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.read().iter().find(|t| t.name == name).cloned()
    }

    /// Invoke a tool. Streaming tools come back aggregated as text.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value, ClientError> {
        let params = ToolCallParams {
            name: name.to_owned(),
            arguments,
        };
        match self.request(protocol::METHOD_TOOLS_CALL, params).await {
            Err(ClientError::Rejected(err)) => Err(tool_call_error(name, err)),
            other => other,
        }
    }

    /// The whole configuration record of the server's instance.
    pub async fn config(&self) -> Result<Map<String, Value>, ClientError> {
        self.request(protocol::METHOD_CONFIG_GET, ConfigGetParams::default())
            .await
    }

    /// A single setting, `Value::Null` when absent.
    pub async fn get_config(&self, key: &str) -> Result<Value, ClientError> {
        let params = ConfigGetParams {
            key: Some(key.to_owned()),
        };
        self.request(protocol::METHOD_CONFIG_GET, params).await
    }

    /// Set one setting; returns the record after the write.
    pub async fn set_config(
        &self,
        key: &str,
        value: Value,
    ) -> Result<Map<String, Value>, ClientError> {
        let params = ConfigSetParams {
            key: key.to_owned(),
            value,
        };
        self.request(protocol::METHOD_CONFIG_SET, params).await
    }

    /// Merge several settings; returns the record after the write.
    pub async fn update_config(
        &self,
        values: Map<String, Value>,
    ) -> Result<Map<String, Value>, ClientError> {
        self.request(protocol::METHOD_CONFIG_UPDATE, ConfigUpdateParams { values })
            .await
    }

    /// Settings the server declares for its configuration record.
    pub async fn server_parameters(&self) -> Result<Vec<ServerParameter>, ClientError> {
        let result: ConfigParametersResult = self
            .request(protocol::METHOD_CONFIG_PARAMETERS, serde_json::json!({}))
            .await?;
        Ok(result.parameters)
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, ClientError> {
        let result: ResourcesListResult = self
            .request(protocol::METHOD_RESOURCES_LIST, serde_json::json!({}))
            .await?;
        Ok(result.resources)
    }

    /// Read one resource. Rejections come back as [`ClientError::Rejected`]
    /// with the server's `data.kind` tag intact.
    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContent, ClientError> {
        let params = ResourceReadParams { uri: uri.to_owned() };
        let result: ResourceReadResult = self.request(protocol::METHOD_RESOURCES_READ, params).await?;
        result
            .contents
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Protocol(format!("`resources/read` returned nothing for {uri}")))
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        let _: Value = self
            .request(protocol::METHOD_PING, serde_json::json!({}))
            .await?;
        Ok(())
    }

    pub fn session(&self) -> &ProcessSession {
        &self.session
    }

    pub async fn close(&self) {
        self.session.close().await;
    }
}

/// Connect, call one tool, and close.
pub async fn quick_call(
    server_path: impl Into<String>,
    tool: &str,
    arguments: Value,
) -> Result<Value, ClientError> {
    let client = SimpleClient::connect(ClientOptions::new(server_path)).await?;
    let result = client.call(tool, arguments).await;
    client.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_wins_over_port() {
        let opts = ClientOptions::new("./server").alias("dev").port(8081);
        assert_eq!(opts.server_args(), vec!["stdio", "--alias", "dev"]);
    }

    #[test]
    fn port_and_config_dir_args() {
        let opts = ClientOptions::new("./server").port(8081).config_dir("/tmp/cfg");
        assert_eq!(
            opts.server_args(),
            vec!["stdio", "--port", "8081", "--config-dir", "/tmp/cfg"]
        );
    }

    #[test]
    fn transport_config_sets_call_timeout() {
        let transport = TransportConfig {
            call_timeout_ms: 250,
            ..TransportConfig::default()
        };
        let opts = ClientOptions::new("x").transport(transport);
        assert_eq!(opts.call_timeout, Duration::from_millis(250));
    }

    #[test]
    fn tool_call_rejections_keep_their_kind() {
        let not_found = JsonRpcError::new(JsonRpcError::INVALID_PARAMS, "tool not found: x")
            .with_data(serde_json::json!({ "kind": "not_found", "detail": "x" }));
        assert!(matches!(tool_call_error("x", not_found), ClientError::ToolNotFound(t) if t == "x"));

        let unknown_method = JsonRpcError::new(JsonRpcError::METHOD_NOT_FOUND, "no such tool");
        assert!(matches!(tool_call_error("x", unknown_method), ClientError::ToolNotFound(_)));

        let bad_args = JsonRpcError::new(JsonRpcError::INVALID_PARAMS, "invalid arguments: a")
            .with_data(serde_json::json!({ "kind": "invalid_arguments", "detail": "a" }));
        match tool_call_error("add", bad_args) {
            ClientError::InvalidArguments { tool, message } => {
                assert_eq!(tool, "add");
                assert_eq!(message, "a");
            }
            other => panic!("unexpected {other:?}"),
        }

        let failed = JsonRpcError::new(JsonRpcError::TOOL_ERROR, "kaboom");
        assert!(matches!(tool_call_error("x", failed), ClientError::Tool { message, .. } if message == "kaboom"));
    }
}
