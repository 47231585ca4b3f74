mod server;
mod store;
mod transport;

pub use server::*;
pub use store::*;
pub use transport::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Environment variable selecting the configuration directory.
pub const CONFIG_DIR_ENV: &str = "MCP_CONFIG_DIR";

/// Environment variable selecting the default HTTP port.
pub const SERVER_PORT_ENV: &str = "MCP_SERVER_PORT";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runtime configuration of the `toolhost` binary (`toolhost.toml`).
///
/// Per-instance tool settings are not kept here; those live in the
/// configuration store, one JSON file per instance.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn error(field: &str, message: &str) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: &str) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            issues.push(ConfigIssue::error("server.host", "host must not be empty"));
        }
        if self.transport.call_timeout_ms == 0 {
            issues.push(ConfigIssue::error(
                "transport.call_timeout_ms",
                "call timeout must be greater than 0",
            ));
        }
        if self.transport.interpreter.trim().is_empty() {
            issues.push(ConfigIssue::error(
                "transport.interpreter",
                "interpreter must not be empty",
            ));
        }
        if self.transport.shutdown_grace_ms == 0 {
            issues.push(ConfigIssue::warning(
                "transport.shutdown_grace_ms",
                "a zero grace period force-kills child processes immediately",
            ));
        }
        for origin in &self.server.cors.allowed_origins {
            if !server::is_valid_origin(origin) {
                issues.push(ConfigIssue::error(
                    "server.cors.allowed_origins",
                    &format!("`{origin}` is not an http(s) origin (a `:*` port wildcard is allowed)"),
                ));
            }
        }
        if !is_valid_server_name(&self.store.server_name) {
            issues.push(ConfigIssue::error(
                "store.server_name",
                "server name must be non-empty and use only letters, digits, '.' and '-'",
            ));
        }

        issues
    }
}

/// Server names become part of configuration file names, so they are
/// restricted to a character set that cannot collide with the separators.
pub fn is_valid_server_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && name != "."
        && name != ".."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        let issues = cfg.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ConfigSeverity::Error);
        assert_eq!(issues[0].field, "server.port");
    }

    #[test]
    fn underscore_server_name_rejected() {
        assert!(is_valid_server_name("expert-server.v2"));
        assert!(!is_valid_server_name("expert_server"));
        assert!(!is_valid_server_name(""));
        assert!(!is_valid_server_name(".."));
    }

    #[test]
    fn bare_wildcard_origin_rejected() {
        let mut cfg = Config::default();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issues = cfg.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "server.cors.allowed_origins");
        assert_eq!(issues[0].severity, ConfigSeverity::Error);
    }

    #[test]
    fn issue_display_includes_severity_tag() {
        let issue = ConfigIssue::warning("a.b", "careful");
        assert_eq!(issue.to_string(), "[WARN] a.b: careful");
    }
}
