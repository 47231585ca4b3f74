use std::ffi::OsString;
use std::path::{Path, PathBuf};

use th_domain::config::CONFIG_DIR_ENV;

/// Directory name used under the working directory when nothing else is set.
pub const DEFAULT_DIR_NAME: &str = "config";

/// Resolve the configuration directory.
///
/// Precedence: `explicit` → `MCP_CONFIG_DIR` → `./config`. Empty values are
/// treated as unset.
pub fn resolve_config_dir(explicit: Option<&Path>) -> PathBuf {
    resolve_with(explicit, std::env::var_os(CONFIG_DIR_ENV))
}

fn resolve_with(explicit: Option<&Path>, env: Option<OsString>) -> PathBuf {
    if let Some(dir) = explicit.filter(|d| !d.as_os_str().is_empty()) {
        return dir.to_path_buf();
    }
    if let Some(dir) = env.filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(DEFAULT_DIR_NAME)
}
