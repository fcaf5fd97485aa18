//! Accrual service client configuration.

use std::time::Duration;

use serde::Deserialize;

/// Where and how to reach the accrual service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AccrualConfig {
    /// Base address. A bare `host:port` gets `http://` prepended.
    pub address: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            address: "http://localhost:8080".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl AccrualConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}
