//! A [`ResourceRegistry`] backed by async Rust functions.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use th_domain::resource::{
    match_resource, ResourceContent, ResourceDescriptor, ResourceError, ResourceRegistry,
};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Reader receiving the full requested URI and returning the body text.
type Reader = Arc<dyn Fn(String) -> BoxFuture<Result<String, ResourceError>> + Send + Sync>;

/// Explicit table of resources, in registration order.
#[derive(Default)]
pub struct FnResources {
    descriptors: Vec<ResourceDescriptor>,
    readers: HashMap<String, Reader>,
}

impl FnResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource<F, Fut>(mut self, descriptor: ResourceDescriptor, reader: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ResourceError>> + Send + 'static,
    {
        let reader: Reader = Arc::new(move |uri: String| Box::pin(reader(uri)) as BoxFuture<_>);
        let uri = descriptor.uri.clone();
        if self.readers.insert(uri.clone(), reader).is_some() {
            tracing::warn!(uri = %uri, "resource registered twice, replacing earlier entry");
            self.descriptors.retain(|d| d.uri != uri);
        }
        self.descriptors.push(descriptor);
        self
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[async_trait]
impl ResourceRegistry for FnResources {
    fn list_resources(&self) -> Vec<ResourceDescriptor> {
        self.descriptors.clone()
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, ResourceError> {
        let descriptor = match_resource(&self.descriptors, uri)
            .ok_or_else(|| ResourceError::NotFound(uri.to_owned()))?;
        let reader = self
            .readers
            .get(&descriptor.uri)
            .ok_or_else(|| ResourceError::NotFound(uri.to_owned()))?;

        tracing::debug!(uri, served_by = %descriptor.uri, "reading resource");
        let text = reader(uri.to_owned()).await?;
        Ok(ResourceContent {
            uri: uri.to_owned(),
            mime_type: descriptor.mime_type.clone(),
            text,
        })
    }
}
