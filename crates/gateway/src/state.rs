use std::sync::Arc;
use std::time::Instant;

use th_client::RemoteRegistry;
use th_config_store::{ConfigMap, ConfigStoreError, InstanceConfig};
use th_domain::config::Config;
use th_domain::resource::ResourceRegistry;
use th_domain::settings::{check_settings, ServerParameter, SettingError};
use th_domain::tool::ToolRegistry;
use th_tools::DirRoot;
use tokio::task::JoinError;

/// Shared application state passed to all API handlers and the stdio
/// server.
///
/// - **Core**: runtime config, the tool and resource registries
/// - **Instance**: this process's configuration record and its declared settings
/// - **Lifecycle**: upstream child (when proxying), start time
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub registry: Arc<dyn ToolRegistry>,
    pub resources: Arc<dyn ResourceRegistry>,

    // ── Instance ──────────────────────────────────────────────────────
    pub instance: InstanceConfig,
    pub parameters: Arc<Vec<ServerParameter>>,
    /// Root of the local `list_dir` tool, driven by the `default_dir` setting.
    pub dir_root: DirRoot,

    // ── Lifecycle ─────────────────────────────────────────────────────
    /// Set when tools are served from a child process (`--upstream`).
    pub upstream: Option<Arc<RemoteRegistry>>,
    pub started_at: Instant,
}

impl AppState {
    /// Human-readable instance label, e.g. `port 8080` or `alias dev`.
    pub fn instance_label(&self) -> String {
        self.instance.qualifier().to_string()
    }

    /// Check a record write against the declared settings.
    pub fn check_settings(&self, values: &ConfigMap) -> Result<(), SettingError> {
        check_settings(&self.parameters, values)
    }

    /// Run `op` against the instance record on the blocking pool.
    ///
    /// Store writes fsync and run change callbacks inline, so they must
    /// stay off the async workers.
    pub async fn with_instance<T, F>(&self, op: F) -> Result<Result<T, ConfigStoreError>, JoinError>
    where
        F: FnOnce(&InstanceConfig) -> Result<T, ConfigStoreError> + Send + 'static,
        T: Send + 'static,
    {
        let instance = self.instance.clone();
        tokio::task::spawn_blocking(move || op(&instance)).await
    }

    /// Close the upstream child, if any.
    pub async fn shutdown(&self) {
        if let Some(upstream) = &self.upstream {
            tracing::info!("closing upstream tool server");
            upstream.close().await;
        }
    }
}
