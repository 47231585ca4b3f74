//! Demo tools shipped with the `toolhost` binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{json, Value};

use th_domain::resource::{ResourceDescriptor, ResourceError};
use th_domain::settings::ServerParameter;
use th_domain::stream::{ChunkStream, StreamChunk};
use th_domain::tool::{ParamType, ToolDescriptor, ToolError, ToolParameter};

use crate::fs;
use crate::registry::FnRegistry;
use crate::resources::FnResources;

/// Setting that moves the `list_dir` root at runtime.
pub const DEFAULT_DIR_KEY: &str = "default_dir";

/// Root directory shared between `list_dir` and whoever reconfigures it.
#[derive(Debug, Clone)]
pub struct DirRoot(Arc<RwLock<PathBuf>>);

impl DirRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(Arc::new(RwLock::new(path.into())))
    }

    pub fn get(&self) -> PathBuf {
        self.0.read().clone()
    }

    pub fn set(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        tracing::info!(root = %path.display(), "list_dir root changed");
        *self.0.write() = path;
    }
}

/// All demo tools.
pub fn demo_registry(root: DirRoot) -> FnRegistry {
    FnRegistry::new()
        .tool(
            ToolDescriptor::new("echo", "Return the given text unchanged")
                .param(ToolParameter::required("text", ParamType::String).describe("Text to echo")),
            |args| async move { Ok(json!({ "text": args["text"] })) },
        )
        .tool(
            ToolDescriptor::new("add", "Add two numbers")
                .param(ToolParameter::required("a", ParamType::Number))
                .param(ToolParameter::required("b", ParamType::Number)),
            |args| async move { add(&args["a"], &args["b"]) },
        )
        .streaming_tool(
            ToolDescriptor::new("generate_sequence", "Stream numbered lines")
                .param(ToolParameter::optional("count", ParamType::Integer, json!(5)).range(1, 1000))
                .param(ToolParameter::optional("prefix", ParamType::String, json!("item")))
                .param(
                    ToolParameter::optional("delay_ms", ParamType::Integer, json!(0))
                        .range(0, 5000)
                        .describe("Pause before each line"),
                )
                .param(
                    ToolParameter::optional("fail_at", ParamType::Integer, json!(0))
                        .range(0, 1000)
                        .describe("Fail instead of producing this line (0 = never)"),
                ),
            |args| Ok(generate_sequence(&args)),
        )
        .streaming_tool(
            ToolDescriptor::new("stream_words", "Stream the words of a text as content deltas")
                .param(ToolParameter::required("text", ParamType::String)),
            |args| Ok(stream_words(args["text"].as_str().unwrap_or_default())),
        )
        .tool(
            ToolDescriptor::new("list_dir", "List a directory below the configured root")
                .param(
                    ToolParameter::optional("path", ParamType::Path, json!("."))
                        .describe("Directory relative to the root"),
                )
                .role("files"),
            move |args| {
                let root = root.get();
                async move { fs::list_dir(&root, args["path"].as_str().unwrap_or(".")).await }
            },
        )
}

/// Settings the demo server declares. `default_dir` defaults to `fallback`.
pub fn demo_parameters(fallback: &std::path::Path) -> Vec<ServerParameter> {
    vec![ServerParameter::new(DEFAULT_DIR_KEY, "Default directory", ParamType::Path)
        .describe("Root directory for list_dir and file:// resources")
        .default_value(fallback.display().to_string())]
}

/// Demo resources: files below the root and a JSON listing of the root.
pub fn demo_resources(root: DirRoot) -> FnResources {
    let listing_root = root.clone();
    FnResources::new()
        .resource(
            ResourceDescriptor::new("file://", "Files")
                .describe("Text files below the list_dir root, e.g. file://notes/today.txt"),
            move |uri| {
                let root = root.get();
                async move {
                    let relative = uri.trim_start_matches("file://");
                    fs::read_text(&root, relative).await.map_err(|e| file_error(&uri, e))
                }
            },
        )
        .resource(
            ResourceDescriptor::new("dir://root", "Root listing")
                .describe("Entries of the list_dir root")
                .mime("application/json"),
            move |uri| {
                let root = listing_root.get();
                async move {
                    let listing = fs::list_dir(&root, ".").await.map_err(|e| file_error(&uri, e))?;
                    serde_json::to_string_pretty(&listing).map_err(|e| ResourceError::Read(e.to_string()))
                }
            },
        )
}

fn file_error(uri: &str, err: ToolError) -> ResourceError {
    match err {
        ToolError::InvalidArguments(msg) => ResourceError::InvalidUri(msg),
        ToolError::Execution(msg) if msg.starts_with("cannot resolve") => {
            ResourceError::NotFound(uri.to_owned())
        }
        ToolError::Unavailable(msg) => ResourceError::Unavailable(msg),
        other => ResourceError::Read(other.to_string()),
    }
}

fn add(a: &Value, b: &Value) -> Result<Value, ToolError> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Ok(json!(sum));
        }
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok(json!(x + y)),
        _ => Err(ToolError::InvalidArguments("`a` and `b` must be numbers".into())),
    }
}

fn generate_sequence(args: &Value) -> ChunkStream {
    let count = args["count"].as_u64().unwrap_or(5);
    let prefix = args["prefix"].as_str().unwrap_or("item").to_owned();
    let delay = Duration::from_millis(args["delay_ms"].as_u64().unwrap_or(0));
    let fail_at = args["fail_at"].as_u64().unwrap_or(0);

    let stream = async_stream::stream! {
        for i in 1..=count {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if i == fail_at {
                yield Err(ToolError::Execution(format!("sequence failed at {i}")));
                return;
            }
            yield Ok::<StreamChunk, ToolError>(StreamChunk::Text(format!("{prefix} {i}\n")));
        }
    };
    Box::pin(stream)
}

fn stream_words(text: &str) -> ChunkStream {
    let words: Vec<String> = text.split_whitespace().map(str::to_owned).collect();
    let stream = async_stream::stream! {
        let last = words.len().saturating_sub(1);
        for (i, word) in words.into_iter().enumerate() {
            let content = if i == last { word } else { format!("{word} ") };
            yield Ok::<StreamChunk, ToolError>(StreamChunk::Delta(json!({ "content": content })));
        }
    };
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use th_domain::tool::{ToolOutput, ToolRegistry};

    async fn collect(output: ToolOutput) -> Vec<Result<StreamChunk, ToolError>> {
        match output {
            ToolOutput::Stream(stream) => stream.collect().await,
            ToolOutput::Full(v) => panic!("expected stream, got {v}"),
        }
    }

    fn registry() -> FnRegistry {
        demo_registry(DirRoot::new("."))
    }

    #[tokio::test]
    async fn add_keeps_integers_exact() {
        let out = registry().invoke_tool("add", json!({ "a": 2, "b": 3 })).await.unwrap();
        assert!(matches!(out, ToolOutput::Full(v) if v == json!(5)));
        let out = registry().invoke_tool("add", json!({ "a": 0.5, "b": 1 })).await.unwrap();
        assert!(matches!(out, ToolOutput::Full(v) if v == json!(1.5)));
    }

    #[tokio::test]
    async fn sequence_streams_in_order() {
        let out = registry()
            .invoke_tool("generate_sequence", json!({ "count": 3, "prefix": "n" }))
            .await
            .unwrap();
        let chunks: Vec<String> = collect(out).await.into_iter().map(|c| c.unwrap().to_wire()).collect();
        assert_eq!(chunks, vec!["n 1\n", "n 2\n", "n 3\n"]);
    }

    #[tokio::test]
    async fn sequence_fails_mid_stream() {
        let out = registry()
            .invoke_tool("generate_sequence", json!({ "count": 5, "fail_at": 2 }))
            .await
            .unwrap();
        let items = collect(out).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(ToolError::Execution(_))));
    }

    #[tokio::test]
    async fn words_become_content_deltas() {
        let out = registry()
            .invoke_tool("stream_words", json!({ "text": "a b  c" }))
            .await
            .unwrap();
        let text: String = collect(out).await.into_iter().map(|c| c.unwrap().content()).collect();
        assert_eq!(text, "a b c");
    }

    #[tokio::test]
    async fn list_dir_follows_root_changes() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("only-here.txt"), "x").unwrap();

        let root = DirRoot::new(first.path());
        let registry = demo_registry(root.clone());

        let out = registry.invoke_tool("list_dir", json!({})).await.unwrap();
        assert!(matches!(out, ToolOutput::Full(ref v) if v["count"] == 0));

        root.set(second.path());
        let out = registry.invoke_tool("list_dir", json!({})).await.unwrap();
        match out {
            ToolOutput::Full(v) => assert_eq!(v["entries"][0]["name"], "only-here.txt"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn list_dir_is_role_restricted() {
        let registry = registry();
        let for_files: Vec<String> = registry
            .tools_for_role(Some("files"))
            .into_iter()
            .map(|t| t.name)
            .collect();
        let for_planner: Vec<String> = registry
            .tools_for_role(Some("planner"))
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert!(for_files.contains(&"list_dir".to_owned()));
        assert!(!for_planner.contains(&"list_dir".to_owned()));
        assert!(for_planner.contains(&"echo".to_owned()));
    }

    #[tokio::test]
    async fn file_resources_stay_below_root() {
        use th_domain::resource::ResourceRegistry;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi").unwrap();
        let resources = demo_resources(DirRoot::new(dir.path()));

        let content = resources.read_resource("file://hello.txt").await.unwrap();
        assert_eq!(content.text, "hi");
        assert_eq!(
            resources.read_resource("file://missing.txt").await.unwrap_err(),
            ResourceError::NotFound("file://missing.txt".into())
        );
        assert!(matches!(
            resources.read_resource("file://../etc/passwd").await,
            Err(ResourceError::InvalidUri(_))
        ));

        let listing = resources.read_resource("dir://root").await.unwrap();
        assert_eq!(listing.mime_type, "application/json");
        let listing: Value = serde_json::from_str(&listing.text).unwrap();
        assert_eq!(listing["entries"][0]["name"], "hello.txt");
    }

    #[test]
    fn default_dir_parameter_defaults_to_fallback() {
        let params = demo_parameters(std::path::Path::new("/srv/data"));
        assert_eq!(params[0].name, DEFAULT_DIR_KEY);
        assert_eq!(params[0].default_value, Some(json!("/srv/data")));
    }
}
