//! AppState construction shared by `serve` and `stdio`.
//!
//! Resolves which configuration record this process owns (port or alias),
//! opens the store, seeds declared setting defaults, builds the tool and
//! resource registries (local demo entries or an upstream child) and wires
//! the `default_dir` setting to the `list_dir` root.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use serde_json::Value;

use th_client::{ClientOptions, RemoteRegistry};
use th_config_store::{resolve_config_dir, ConfigStore, InstanceConfig, Qualifier, SubscriptionId};
use th_domain::config::{Config, ConfigSeverity, CONFIG_DIR_ENV, SERVER_PORT_ENV};
use th_domain::resource::{ResourceDescriptor, ResourceError, ResourceRegistry};
use th_domain::settings::{missing_defaults, ServerParameter};
use th_domain::tool::ToolRegistry;
use th_tools::{
    demo_parameters, demo_registry, demo_resources, DirRoot, FnResources, DEFAULT_DIR_KEY,
};

use crate::state::AppState;

/// Instance selection and sourcing flags common to `serve` and `stdio`.
#[derive(Debug, Clone, Default)]
pub struct InstanceArgs {
    pub port: Option<u16>,
    pub alias: Option<String>,
    pub config_dir: Option<PathBuf>,
    /// Serve the tools of this child server instead of the local ones.
    pub upstream: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolution helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// HTTP port: `--port`, then `MCP_SERVER_PORT`, then `server.port`.
pub fn resolve_port(cli: Option<u16>, env: Option<&str>, config: &Config) -> u16 {
    if let Some(port) = cli {
        return port;
    }
    if let Some(raw) = env.map(str::trim).filter(|v| !v.is_empty()) {
        match raw.parse::<u16>() {
            Ok(port) if port > 0 => return port,
            _ => tracing::warn!(value = raw, "ignoring invalid {SERVER_PORT_ENV}"),
        }
    }
    config.server.port
}

/// The alias wins when both an alias and a port are given.
pub fn resolve_qualifier(alias: Option<&str>, port: u16) -> Qualifier {
    match alias {
        Some(alias) => Qualifier::alias(alias),
        None => Qualifier::Port(port),
    }
}

/// Config directory: `--config-dir`, then `MCP_CONFIG_DIR`, then
/// `store.dir` from the TOML file, then `./config`.
pub fn resolve_store_dir(cli: Option<&Path>, config: &Config) -> PathBuf {
    if cli.is_some() {
        return resolve_config_dir(cli);
    }
    let env_set = std::env::var_os(CONFIG_DIR_ENV).is_some_and(|v| !v.is_empty());
    if env_set {
        return resolve_config_dir(None);
    }
    resolve_config_dir(config.store.dir.as_deref())
}

/// Open the configuration record this process owns.
pub fn open_instance(config: &Config, args: &InstanceArgs) -> anyhow::Result<InstanceConfig> {
    let env_port = std::env::var(SERVER_PORT_ENV).ok();
    let port = resolve_port(args.port, env_port.as_deref(), config);
    let qualifier = resolve_qualifier(args.alias.as_deref(), port);
    let dir = resolve_store_dir(args.config_dir.as_deref(), config);

    let store = Arc::new(ConfigStore::new(&dir));
    let instance = InstanceConfig::new(store, config.store.server_name.clone(), qualifier)
        .context("selecting configuration record")?;
    tracing::info!(
        dir = %dir.display(),
        server = instance.server(),
        instance = %instance.qualifier(),
        "configuration store ready"
    );
    Ok(instance)
}

/// Write the defaults of declared settings the record does not hold yet.
pub fn seed_defaults(instance: &InstanceConfig, parameters: &[ServerParameter]) -> anyhow::Result<()> {
    let current = instance.load().context("loading configuration record")?;
    let seeded = missing_defaults(parameters, &current);
    if seeded.is_empty() {
        return Ok(());
    }
    let keys: Vec<&String> = seeded.keys().collect();
    tracing::info!(?keys, "seeding setting defaults");
    instance.update(seeded).context("seeding setting defaults")?;
    Ok(())
}

/// Demo resources plus `config://instance`, the record as JSON.
pub fn local_resources(root: DirRoot, instance: InstanceConfig) -> FnResources {
    demo_resources(root).resource(
        ResourceDescriptor::new("config://instance", "Instance configuration")
            .describe("This instance's configuration record")
            .mime("application/json"),
        move |_| {
            let instance = instance.clone();
            async move {
                let record = tokio::task::spawn_blocking(move || instance.load())
                    .await
                    .map_err(|e| ResourceError::Unavailable(e.to_string()))?
                    .map_err(|e| ResourceError::Read(e.to_string()))?;
                serde_json::to_string_pretty(&record).map_err(|e| ResourceError::Read(e.to_string()))
            }
        },
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hot reload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Point `root` at the record's `default_dir` now and on every change.
///
/// Removing the setting returns the root to `fallback`. A non-string value
/// is reported as a callback failure and leaves the root unchanged.
pub fn wire_dir_root(
    instance: &InstanceConfig,
    root: &DirRoot,
    fallback: PathBuf,
) -> anyhow::Result<SubscriptionId> {
    match instance.get(DEFAULT_DIR_KEY, Value::Null) {
        Ok(Value::String(dir)) => root.set(dir),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "cannot read {DEFAULT_DIR_KEY}; keeping default root"),
    }

    let root = root.clone();
    let id = instance
        .on_change(move |prev, cur| {
            let next = cur.get(DEFAULT_DIR_KEY);
            if next == prev.get(DEFAULT_DIR_KEY) {
                return Ok(());
            }
            match next {
                Some(Value::String(dir)) => root.set(dir),
                None | Some(Value::Null) => root.set(fallback.clone()),
                Some(other) => {
                    return Err(format!("`{DEFAULT_DIR_KEY}` must be a string, got {other}").into())
                }
            }
            Ok(())
        })
        .context("registering config change callback")?;
    Ok(id)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AppState
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate config, open the instance record, build the registry and
/// return a fully-wired [`AppState`].
pub async fn build_app_state(config: Arc<Config>, args: &InstanceArgs) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }

    // ── Instance record ──────────────────────────────────────────────
    let instance = open_instance(&config, args)?;

    let fallback = std::env::current_dir().context("reading working directory")?;
    let parameters = demo_parameters(&fallback);
    seed_defaults(&instance, &parameters)?;

    // ── Registries ───────────────────────────────────────────────────
    let dir_root = DirRoot::new(fallback.clone());
    wire_dir_root(&instance, &dir_root, fallback)?;

    let (registry, resources, upstream): (Arc<dyn ToolRegistry>, Arc<dyn ResourceRegistry>, _) =
        match &args.upstream {
            Some(path) => {
                let opts = ClientOptions::new(path.clone()).transport(config.transport.clone());
                let remote = Arc::new(
                    RemoteRegistry::connect(opts)
                        .await
                        .with_context(|| format!("starting upstream tool server {path}"))?,
                );
                tracing::info!(
                    upstream = %path,
                    tools = remote.list_tools().len(),
                    resources = remote.list_resources().len(),
                    "serving upstream tools"
                );
                (
                    remote.clone() as Arc<dyn ToolRegistry>,
                    remote.clone() as Arc<dyn ResourceRegistry>,
                    Some(remote),
                )
            }
            None => {
                let local = demo_registry(dir_root.clone());
                let files = local_resources(dir_root.clone(), instance.clone());
                tracing::info!(
                    tools = local.len(),
                    resources = files.len(),
                    "serving local tools"
                );
                (
                    Arc::new(local) as Arc<dyn ToolRegistry>,
                    Arc::new(files) as Arc<dyn ResourceRegistry>,
                    None,
                )
            }
        };

    Ok(AppState {
        config,
        registry,
        resources,
        instance,
        parameters: Arc::new(parameters),
        dir_root,
        upstream,
        started_at: Instant::now(),
    })
}
