use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigStoreError {
    #[error("failed to write config {}: {}", .path.display(), .source)]
    WriteFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read config {}: {}", .path.display(), .source)]
    ReadFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("corrupt config file {}: {}", .path.display(), .source)]
    ParseFailure {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid {kind} name `{name}`")]
    InvalidName { kind: &'static str, name: String },
}

impl From<ConfigStoreError> for th_domain::error::Error {
    fn from(e: ConfigStoreError) -> Self {
        th_domain::error::Error::Config(e.to_string())
    }
}
