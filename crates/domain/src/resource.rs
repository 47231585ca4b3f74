use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Descriptors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A readable resource exposed next to the tools.
///
/// A `uri` ending in `://` (e.g. `file://`) is a scheme prefix: it stands
/// for every URI of that scheme and the reader receives the full URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "d_mime")]
    pub mime_type: String,
}

fn d_mime() -> String {
    "text/plain".into()
}

impl ResourceDescriptor {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: String::new(),
            mime_type: d_mime(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn mime(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn is_scheme_prefix(&self) -> bool {
        self.uri.ends_with("://")
    }

    /// Whether this descriptor serves `uri`.
    pub fn serves(&self, uri: &str) -> bool {
        if self.is_scheme_prefix() {
            uri.len() > self.uri.len() && uri.starts_with(&self.uri)
        } else {
            self.uri == uri
        }
    }
}

/// Pick the descriptor serving `uri`: an exact URI beats a scheme prefix.
pub fn match_resource<'a>(
    descriptors: &'a [ResourceDescriptor],
    uri: &str,
) -> Option<&'a ResourceDescriptor> {
    descriptors
        .iter()
        .find(|d| !d.is_scheme_prefix() && d.uri == uri)
        .or_else(|| descriptors.iter().find(|d| d.is_scheme_prefix() && d.serves(uri)))
}

/// The body of a read resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
    pub uri: String,
    #[serde(default = "d_mime")]
    pub mime_type: String,
    pub text: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResourceError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("invalid resource URI: {0}")]
    InvalidUri(String),

    #[error("failed to read resource: {0}")]
    Read(String),

    #[error("resource backend unavailable: {0}")]
    Unavailable(String),
}

impl From<ResourceError> for crate::error::Error {
    fn from(e: ResourceError) -> Self {
        crate::error::Error::Resource(e.to_string())
    }
}

/// Counterpart of [`ToolRegistry`](crate::tool::ToolRegistry) for resources.
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    fn list_resources(&self) -> Vec<ResourceDescriptor>;

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, ResourceError>;
}
