//! ---
//! lw_section: "03-daemon"
//! lw_subsection: "binary"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "Daemon configuration loading."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use licwatch_core::{EngineConfig, LicenseConfig, LoggingConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

fn default_http_enabled() -> bool {
    true
}

fn default_http_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4646))
}

/// HTTP listener serving `/metrics` and the operator license API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_http_listen")]
    pub listen: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            listen: default_http_listen(),
        }
    }
}

/// Top level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub license: LicenseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Configuration together with the file it was read from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: DaemonConfig,
    pub source: Option<PathBuf>,
}

impl DaemonConfig {
    /// Environment variable naming the configuration file.
    pub const ENV_CONFIG_PATH: &'static str = "LICWATCH_CONFIG";

    /// Load from `LICWATCH_CONFIG`, else the first existing candidate.
    ///
    /// Falls back to defaults when no file exists so a license supplied
    /// purely through the environment still works.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        debug!("no configuration file found; using defaults");
        Ok(LoadedConfig {
            config: DaemonConfig::default(),
            source: None,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        toml::from_str::<DaemonConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}
