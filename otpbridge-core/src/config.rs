//! Application configuration.

use crate::platform;
use crate::{OtpBridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    /// Scheme of `<scheme>://addkey?data=` enrollment links.
    pub deep_link_scheme: String,
    pub log_level: String,
    /// Timeout for acknowledgement and registration calls.
    pub ack_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: platform::get_default_database_path(),
            deep_link_scheme: "epic2fa".to_string(),
            log_level: "info".to_string(),
            ack_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| OtpBridgeError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`AppConfig::load`], but a missing file means defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| OtpBridgeError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.deep_link_scheme.trim().is_empty() {
            return Err(OtpBridgeError::Config(
                "deep_link_scheme cannot be empty".to_string(),
            ));
        }
        if self.ack_timeout_secs == 0 {
            return Err(OtpBridgeError::Config(
                "ack_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
