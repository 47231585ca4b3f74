//! Directory listing and file reads confined to a root directory.
//!
//! Requested paths are relative to the root; absolute paths, `..`
//! components and symlinks escaping the root are rejected.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use th_domain::tool::ToolError;

#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub modified: String,
    pub is_dir: bool,
}

/// Resolve `requested` inside `root`, returning the canonical path.
pub fn resolve_within(root: &Path, requested: &str) -> Result<PathBuf, ToolError> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(ToolError::InvalidArguments(format!(
            "absolute paths are not allowed; use a path relative to the root (got '{requested}')"
        )));
    }
    if requested_path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ToolError::InvalidArguments(
            "path must not contain '..' components".to_owned(),
        ));
    }

    let canonical_root = root.canonicalize().map_err(|e| {
        ToolError::Unavailable(format!("cannot resolve root '{}': {e}", root.display()))
    })?;
    let resolved = canonical_root
        .join(requested_path)
        .canonicalize()
        .map_err(|e| ToolError::Execution(format!("cannot resolve '{requested}': {e}")))?;

    if !resolved.starts_with(&canonical_root) {
        return Err(ToolError::InvalidArguments(format!(
            "path '{requested}' resolves outside root '{}'",
            canonical_root.display()
        )));
    }
    Ok(resolved)
}

/// List the entries of `requested` under `root`, sorted by name.
pub async fn list_dir(root: &Path, requested: &str) -> Result<Value, ToolError> {
    let path = resolve_within(root, requested)?;

    let mut read_dir = tokio::fs::read_dir(&path)
        .await
        .map_err(|e| ToolError::Execution(format!("failed to read directory '{requested}': {e}")))?;

    let mut entries: Vec<DirEntry> = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| ToolError::Execution(format!("failed to read directory entry: {e}")))?
    {
        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(path = %entry.path().display(), error = %e, "skipping entry");
                continue;
            }
        };
        let modified = metadata
            .modified()
            .ok()
            .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
            .unwrap_or_default();

        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: metadata.len(),
            modified,
            is_dir: metadata.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(serde_json::json!({
        "root": root.display().to_string(),
        "path": requested,
        "count": entries.len(),
        "entries": entries,
    }))
}

/// Largest file [`read_text`] returns.
pub const MAX_READ_BYTES: u64 = 1024 * 1024;

/// Read a UTF-8 file at `requested` under `root`.
pub async fn read_text(root: &Path, requested: &str) -> Result<String, ToolError> {
    let path = resolve_within(root, requested)?;
    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|e| ToolError::Execution(format!("cannot stat '{requested}': {e}")))?;
    if !metadata.is_file() {
        return Err(ToolError::InvalidArguments(format!("'{requested}' is not a file")));
    }
    if metadata.len() > MAX_READ_BYTES {
        return Err(ToolError::Execution(format!(
            "'{requested}' is {} bytes, limit is {MAX_READ_BYTES}",
            metadata.len()
        )));
    }
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| ToolError::Execution(format!("failed to read '{requested}': {e}")))
}
