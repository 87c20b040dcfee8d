//! Configuration management

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tandem_core::TandemConfig;

pub struct ConfigManager;

impl ConfigManager {
    /// Get the tandem home directory (~/.tandem)
    pub fn tandem_home() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("TANDEM_HOME") {
            return Ok(PathBuf::from(path));
        }
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".tandem"))
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::tandem_home()?.join("config.toml"))
    }

    /// Load config: defaults, then the config file, then `TANDEM__*` variables
    pub fn load() -> Result<TandemConfig> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<TandemConfig> {
        TandemConfig::load(Some(path))
            .with_context(|| format!("Failed to load config from {:?}", path))
    }

    /// Save config to disk
    pub fn save(config: &TandemConfig) -> Result<PathBuf> {
        let path = Self::config_path()?;
        Self::save_to(config, &path)?;
        Ok(path)
    }

    pub fn save_to(config: &TandemConfig, path: &Path) -> Result<()> {
        // Ensure directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let content = toml::to_string_pretty(config).context("Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        // Set permissions on Unix (restrict to owner only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        Ok(())
    }
}
