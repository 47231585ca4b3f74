pub mod call;
pub mod config;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::bootstrap::InstanceArgs;

/// Environment variable naming the runtime TOML file.
pub const CONFIG_PATH_ENV: &str = "TOOLHOST_CONFIG";

/// toolhost: serve tools over HTTP/SSE or line-delimited JSON-RPC.
#[derive(Debug, Parser)]
#[command(name = "toolhost", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP gateway (default when no subcommand is given).
    Serve {
        #[command(flatten)]
        instance: InstanceFlags,
        /// Bind address (overrides `server.host`).
        #[arg(long)]
        host: Option<String>,
        /// Serve the tools of this child server instead of the built-in ones.
        #[arg(long)]
        upstream: Option<String>,
    },
    /// Serve the built-in tools as JSON-RPC over stdin/stdout.
    Stdio {
        #[command(flatten)]
        instance: InstanceFlags,
    },
    /// Call one tool and print its result.
    Call {
        /// Tool name.
        tool: String,
        /// Arguments as a JSON object.
        #[arg(default_value = "{}")]
        arguments: String,
        /// Run the call against this server executable instead of in-process.
        #[arg(long)]
        server: Option<String>,
        #[command(flatten)]
        instance: InstanceFlags,
        /// Per-call timeout in milliseconds (overrides `transport.call_timeout_ms`).
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// List available tools.
    Tools {
        /// List the tools of this server executable instead of the built-in ones.
        #[arg(long)]
        server: Option<String>,
        /// Only tools visible to this role.
        #[arg(long)]
        role: Option<String>,
        /// Print descriptors as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Flags selecting this process's configuration record.
#[derive(Debug, Clone, Default, Args)]
pub struct InstanceFlags {
    /// Instance port (also the HTTP port for `serve`).
    #[arg(long)]
    pub port: Option<u16>,
    /// Named instance; wins over `--port` for record selection.
    #[arg(long)]
    pub alias: Option<String>,
    /// Directory holding per-instance configuration files.
    #[arg(long)]
    pub config_dir: Option<PathBuf>,
}

impl InstanceFlags {
    pub fn into_args(self, upstream: Option<String>) -> InstanceArgs {
        InstanceArgs {
            port: self.port,
            alias: self.alias,
            config_dir: self.config_dir,
            upstream,
        }
    }
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `TOOLHOST_CONFIG`
/// (or `toolhost.toml` by default). Returns the parsed config and the
/// path that was used. A missing file yields the defaults.
pub fn load_config() -> anyhow::Result<(th_domain::config::Config, String)> {
    let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "toolhost.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        th_domain::config::Config::default()
    };

    Ok((config, config_path))
}
