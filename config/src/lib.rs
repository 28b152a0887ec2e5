//! Configuration for ctxbudget.
//!
//! Read from `~/.ctxbudget/config.toml` or an explicit path:
//!
//! ```toml
//! [estimator]
//! strategy = "heuristic"   # or "exact"
//! chars_per_token = 4.0
//!
//! [budget]
//! max_tokens = 8000
//! reserve_for_output = 1000
//! pin_first_n = 1
//!
//! [policy]
//! sliding_window_max_items = 10
//! summarize_threshold = 20
//! ```
//!
//! Every section and field is optional.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use ctxbudget_types::{Budget, EstimatorSettings, PolicySettings, SettingsError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config at {}: {source}", .path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: SettingsError,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::Invalid { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub estimator: EstimatorSettings,
    pub budget: Budget,
    pub policy: PolicySettings,
}

impl EngineConfig {
    /// Load from the default location.
    ///
    /// A missing file yields `None`. Unreadable or invalid files are logged
    /// and ignored.
    pub fn load() -> Option<Self> {
        let path = config_path()?;
        if !path.exists() {
            return None;
        }

        match Self::load_from(&path) {
            Ok(config) => Some(config),
            Err(err) => {
                tracing::warn!("{err}");
                None
            }
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate().map_err(|source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.estimator.validate()
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ctxbudget").join("config.toml"))
}
