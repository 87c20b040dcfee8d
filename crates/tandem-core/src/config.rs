//! Runtime configuration for the transport and outbox

use crate::transport::RetryPolicy;
use crate::{Result, TandemError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable prefix, e.g. `TANDEM__RETRY__MAX_ATTEMPTS=5`
pub const ENV_PREFIX: &str = "TANDEM";

/// Resends allowed per pending message before it is dropped
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub max_retries: u32,
    /// Location of the durable outbox snapshot. Defaults to
    /// `<home>/outbox.json` when left unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            state_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TandemConfig {
    pub log_level: String,
    pub retry: RetryPolicy,
    pub outbox: OutboxConfig,
}

impl Default for TandemConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            retry: RetryPolicy::default(),
            outbox: OutboxConfig::default(),
        }
    }
}

impl TandemConfig {
    /// Load configuration layered as defaults < TOML file < environment.
    ///
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!("Loading config from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let loaded: TandemConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        if self.outbox.max_retries == 0 {
            return Err(TandemError::Config(
                "outbox.max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Snapshot path, resolved against `home` when not configured.
    pub fn state_file(&self, home: &Path) -> PathBuf {
        self.outbox
            .state_file
            .clone()
            .unwrap_or_else(|| home.join("outbox.json"))
    }
}
