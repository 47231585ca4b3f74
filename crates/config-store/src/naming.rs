//! Mapping between `(server, qualifier)` and configuration file names.
//!
//! `{server}_port_{port}_server_config.json` and
//! `{server}_alias_{alias}_server_config.json`. Server names cannot contain
//! `_`, so the prefix up to the first `_` is always the server name and the
//! mapping is injective.

use std::fmt;

use th_domain::config::is_valid_server_name;

use crate::error::ConfigStoreError;

const SUFFIX: &str = "_server_config.json";

/// Selects one configuration record of a server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Qualifier {
    Port(u16),
    Alias(String),
}

impl Qualifier {
    pub fn alias(alias: impl Into<String>) -> Self {
        Qualifier::Alias(alias.into())
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::Port(port) => write!(f, "port {port}"),
            Qualifier::Alias(alias) => write!(f, "alias {alias}"),
        }
    }
}

pub fn is_valid_alias(alias: &str) -> bool {
    !alias.is_empty()
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && alias != "."
        && alias != ".."
}

pub fn validate(server: &str, qualifier: &Qualifier) -> Result<(), ConfigStoreError> {
    if !is_valid_server_name(server) {
        return Err(ConfigStoreError::InvalidName {
            kind: "server",
            name: server.to_owned(),
        });
    }
    if let Qualifier::Alias(alias) = qualifier {
        if !is_valid_alias(alias) {
            return Err(ConfigStoreError::InvalidName {
                kind: "alias",
                name: alias.clone(),
            });
        }
    }
    Ok(())
}

pub fn file_name(server: &str, qualifier: &Qualifier) -> Result<String, ConfigStoreError> {
    validate(server, qualifier)?;
    Ok(match qualifier {
        Qualifier::Port(port) => format!("{server}_port_{port}{SUFFIX}"),
        Qualifier::Alias(alias) => format!("{server}_alias_{alias}{SUFFIX}"),
    })
}

/// Inverse of [`file_name`]; `None` for files of other servers or foreign files.
pub fn parse_file_name(server: &str, file_name: &str) -> Option<Qualifier> {
    let rest = file_name.strip_prefix(server)?.strip_prefix('_')?;
    let rest = rest.strip_suffix(SUFFIX)?;

    if let Some(port) = rest.strip_prefix("port_") {
        let parsed: u16 = port.parse().ok()?;
        // Reject non-canonical spellings such as `08080`.
        return (parsed.to_string() == port).then_some(Qualifier::Port(parsed));
    }
    if let Some(alias) = rest.strip_prefix("alias_") {
        return is_valid_alias(alias).then(|| Qualifier::Alias(alias.to_owned()));
    }
    None
}
