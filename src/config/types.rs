//! Configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub deletion: DeletionConfig,
    pub policy: PolicyConfig,
    pub database: DatabaseConfig,
}

/// HTTP server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9292,
        }
    }
}

/// Storage backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory the filesystem backend writes objects under.
    pub filesystem_root: PathBuf,
    /// Scheme uploads go to when none is requested.
    pub default_scheme: String,
    /// Maximum permitted image size in bytes.
    pub image_size_cap: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            filesystem_root: PathBuf::from("./images"),
            default_scheme: "file".to_string(),
            // 1 TiB
            image_size_cap: 1 << 40,
        }
    }
}

/// Byte-removal policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeletionConfig {
    /// Defer byte removal to the background worker instead of deleting
    /// inline with the metadata delete.
    pub delayed_delete: bool,
}

/// Authorization settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Actions only administrators may perform.
    pub admin_only_actions: Vec<String>,
}

/// Metadata persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file. Unset means a file next to the config (or
    /// the working directory).
    pub path: Option<PathBuf>,
}
