use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timings and defaults for spawned tool servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// How long to let a child settle before probing whether it survived startup.
    #[serde(default = "d_1000")]
    pub startup_grace_ms: u64,
    /// Default deadline for a single request/response cycle.
    #[serde(default = "d_30000")]
    pub call_timeout_ms: u64,
    /// How long `close()` waits after the interrupt before force-killing.
    #[serde(default = "d_5000")]
    pub shutdown_grace_ms: u64,
    /// Interpreter used for targets that are not directly runnable and
    /// carry no usable shebang line.
    #[serde(default = "d_interpreter")]
    pub interpreter: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            startup_grace_ms: 1_000,
            call_timeout_ms: 30_000,
            shutdown_grace_ms: 5_000,
            interpreter: d_interpreter(),
        }
    }
}

impl TransportConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn d_1000() -> u64 {
    1_000
}
fn d_30000() -> u64 {
    30_000
}
fn d_5000() -> u64 {
    5_000
}
fn d_interpreter() -> String {
    "python3".into()
}
