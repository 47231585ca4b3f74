use async_trait::async_trait;
use serde_json::Value;

use th_domain::resource::{
    match_resource, ResourceContent, ResourceDescriptor, ResourceError, ResourceRegistry,
};
use th_domain::tool::{ToolDescriptor, ToolError, ToolOutput, ToolRegistry};

use crate::client::{ClientError, ClientOptions, SimpleClient};
use crate::protocol::{self, JsonRpcError};
use crate::transport::TransportError;

/// A [`ToolRegistry`] and [`ResourceRegistry`] whose entries live in a
/// child process.
///
/// Descriptors are fetched once at connect; invocations go through
/// `tools/call` and `resources/read`. Streaming tools arrive already
/// aggregated, so every invocation yields [`ToolOutput::Full`].
pub struct RemoteRegistry {
    client: SimpleClient,
    resources: Vec<ResourceDescriptor>,
}

impl RemoteRegistry {
    pub async fn connect(opts: ClientOptions) -> Result<Self, ClientError> {
        let client = SimpleClient::connect(opts).await?;
        let resources = match client.list_resources().await {
            Ok(resources) => resources,
            Err(ClientError::Rejected(err)) if err.code == JsonRpcError::METHOD_NOT_FOUND => {
                tracing::debug!("upstream serves no resources");
                Vec::new()
            }
            Err(e) => {
                client.close().await;
                return Err(e);
            }
        };
        Ok(Self { client, resources })
    }

    pub fn client(&self) -> &SimpleClient {
        &self.client
    }

    pub async fn close(&self) {
        self.client.close().await;
    }
}

#[async_trait]
impl ToolRegistry for RemoteRegistry {
    fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.client.cached_tools()
    }

    async fn invoke_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
        if self.client.tool_info(name).is_none() {
            return Err(ToolError::NotFound(name.to_owned()));
        }
        match self.client.call(name, arguments).await {
            Ok(value) => Ok(ToolOutput::Full(value)),
            Err(ClientError::Tool { message, .. }) => Err(ToolError::Execution(message)),
            Err(ClientError::ToolNotFound(tool)) => Err(ToolError::NotFound(tool)),
            Err(ClientError::InvalidArguments { message, .. }) => {
                Err(ToolError::InvalidArguments(message))
            }
            Err(ClientError::Transport(TransportError::Timeout { after, .. })) => Err(
                ToolError::Unavailable(format!("upstream did not answer within {after:?}")),
            ),
            Err(e) => Err(ToolError::Unavailable(e.to_string())),
        }
    }
}

#[async_trait]
impl ResourceRegistry for RemoteRegistry {
    fn list_resources(&self) -> Vec<ResourceDescriptor> {
        self.resources.clone()
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, ResourceError> {
        if match_resource(&self.resources, uri).is_none() {
            return Err(ResourceError::NotFound(uri.to_owned()));
        }
        match self.client.read_resource(uri).await {
            Ok(content) => Ok(content),
            Err(ClientError::Rejected(err)) => Err(resource_rejection(uri, &err)),
            Err(ClientError::Transport(TransportError::Timeout { after, .. })) => Err(
                ResourceError::Unavailable(format!("upstream did not answer within {after:?}")),
            ),
            Err(e) => Err(ResourceError::Unavailable(e.to_string())),
        }
    }
}

fn resource_rejection(uri: &str, err: &JsonRpcError) -> ResourceError {
    match err.kind() {
        Some(protocol::KIND_NOT_FOUND) => ResourceError::NotFound(uri.to_owned()),
        Some(protocol::KIND_INVALID_ARGUMENTS) => ResourceError::InvalidUri(err.detail().to_owned()),
        Some(protocol::KIND_UNAVAILABLE) => ResourceError::Unavailable(err.detail().to_owned()),
        _ => ResourceError::Read(err.detail().to_owned()),
    }
}
