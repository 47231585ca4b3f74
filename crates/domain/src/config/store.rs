use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where and under which name per-instance settings are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Configuration directory. Lower precedence than `--config-dir` and
    /// `MCP_CONFIG_DIR`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Server identity used in configuration file names.
    #[serde(default = "d_server_name")]
    pub server_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: None,
            server_name: d_server_name(),
        }
    }
}

fn d_server_name() -> String {
    "toolhost".into()
}
