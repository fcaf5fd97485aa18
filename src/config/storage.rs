//! Storage configuration types.

use serde::Deserialize;

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type (`sqlite` or `postgres`).
    #[serde(rename = "type")]
    pub storage_type: String,
    /// Path to the SQLite database file.
    pub path: String,
    /// PostgreSQL connection URI.
    pub uri: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: "sqlite".to_string(),
            path: "./data/loyalty.db".to_string(),
            uri: None,
        }
    }
}
