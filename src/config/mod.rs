mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./config.toml",
        "./imagevault.toml",
        "~/.config/imagevault/config.toml",
        "/etc/imagevault/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.storage.image_size_cap == 0 {
        anyhow::bail!("image_size_cap cannot be 0");
    }

    if config.storage.default_scheme.is_empty() {
        anyhow::bail!("default_scheme cannot be empty");
    }

    if !config.storage.filesystem_root.exists() {
        tracing::warn!(
            "Filesystem storage root does not exist yet: {:?}",
            config.storage.filesystem_root
        );
    }

    Ok(())
}
