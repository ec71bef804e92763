//! ---
//! lw_section: "01-core-functionality"
//! lw_subsection: "module"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "License watcher state, entitlement queries, and monitoring."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use licwatch_licensing::certificates::{default_public_key, parse_public_key};
use licwatch_licensing::{Clock, EngineSettings};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::error::{Result, WatcherError};
use crate::logging::LogFormat;

/// Environment variable carrying an inline license blob.
pub const LICENSE_ENV: &str = "LICWATCH_LICENSE";
/// Environment variable carrying the path of a license file.
pub const LICENSE_PATH_ENV: &str = "LICWATCH_LICENSE_PATH";

fn default_product() -> String {
    "licwatch".to_owned()
}

fn default_check_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_warning_window() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

fn default_warning_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Where the license blob comes from and the build it is checked against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicenseConfig {
    /// License file on disk.
    #[serde(default)]
    pub license_path: Option<PathBuf>,
    /// Inline license blob.
    #[serde(default)]
    pub license: Option<String>,
    /// Reference build timestamp for expiration checks.
    #[serde(default)]
    pub build_date: Option<DateTime<Utc>>,
}

impl LicenseConfig {
    /// Resolve the license blob from the process environment and this config.
    ///
    /// Returns an empty string when no source is configured.
    pub fn license_string(&self) -> Result<String> {
        self.license_string_from(|key| std::env::var(key).ok())
    }

    /// Resolve the license blob using `env` for variable lookups.
    ///
    /// Precedence: `LICWATCH_LICENSE`, the inline `license` value,
    /// `LICWATCH_LICENSE_PATH`, then `license_path`.
    pub fn license_string_from<F>(&self, env: F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |value: &String| !value.trim().is_empty();

        if let Some(value) = env(LICENSE_ENV).filter(non_empty) {
            debug!(env = LICENSE_ENV, "loaded license from environment");
            return Ok(value);
        }
        if let Some(value) = self.license.clone().filter(non_empty) {
            debug!("loaded license from inline configuration");
            return Ok(value);
        }

        let path = env(LICENSE_PATH_ENV)
            .filter(non_empty)
            .map(PathBuf::from)
            .or_else(|| self.license_path.clone());
        let Some(path) = path else {
            return Ok(String::new());
        };

        debug!(license_path = %path.display(), "loading license file");
        let raw = fs::read_to_string(&path).map_err(|err| {
            WatcherError::Config(format!(
                "failed to read license file {}: {err}",
                path.display()
            ))
        })?;
        Ok(raw.trim().to_owned())
    }
}

/// Settings for the signed license engine.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Product licenses must be issued for.
    #[serde(default = "default_product")]
    pub product: String,
    /// Base64 Ed25519 public key; the embedded key is used when unset.
    #[serde(default)]
    pub public_key: Option<String>,
    /// Period between engine expiration checks.
    #[serde(default = "default_check_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub check_interval: Duration,
    /// Expiration warnings start this long before expiry.
    #[serde(default = "default_warning_window")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub warning_window: Duration,
    /// Minimum spacing between expiration warnings.
    #[serde(default = "default_warning_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub warning_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            product: default_product(),
            public_key: None,
            check_interval: default_check_interval(),
            warning_window: default_warning_window(),
            warning_interval: default_warning_interval(),
        }
    }
}

impl EngineConfig {
    /// Build engine settings bound to `clock`.
    pub fn settings(&self, clock: Arc<dyn Clock>) -> Result<EngineSettings> {
        if self.check_interval.is_zero() {
            return Err(WatcherError::Config(
                "engine.check_interval must be greater than zero".to_owned(),
            ));
        }
        let public_key = match &self.public_key {
            Some(encoded) => parse_public_key(encoded),
            None => default_public_key(),
        }
        .map_err(|err| WatcherError::Config(err.to_string()))?;

        Ok(EngineSettings::new(self.product.clone(), public_key)
            .with_clock(clock)
            .with_check_interval(self.check_interval)
            .with_warnings(self.warning_window, self.warning_interval))
    }
}

/// Tracing output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling log file.
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    /// Stdout format.
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Log file prefix; defaults to the service name.
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn nothing_configured_resolves_to_empty() {
        let blob = LicenseConfig::default()
            .license_string_from(env_of(&[]))
            .unwrap();
        assert!(blob.is_empty());
    }

    #[test]
    fn environment_blob_wins_over_config() {
        let config = LicenseConfig {
            license: Some("inline".to_owned()),
            ..Default::default()
        };
        let blob = config
            .license_string_from(env_of(&[(LICENSE_ENV, "from-env")]))
            .unwrap();
        assert_eq!(blob, "from-env");
        assert_eq!(config.license_string_from(env_of(&[])).unwrap(), "inline");
    }

    #[test]
    fn license_file_is_read_and_trimmed() {
        let dir = tempdir().unwrap();
        let configured = dir.path().join("configured.lic");
        let overridden = dir.path().join("override.lic");
        std::fs::write(&configured, "configured-blob\r\n").unwrap();
        std::fs::write(&overridden, "override-blob\n").unwrap();

        let config = LicenseConfig {
            license_path: Some(configured),
            ..Default::default()
        };
        assert_eq!(
            config.license_string_from(env_of(&[])).unwrap(),
            "configured-blob"
        );
        let path_env = overridden.display().to_string();
        assert_eq!(
            config
                .license_string_from(env_of(&[(LICENSE_PATH_ENV, path_env.as_str())]))
                .unwrap(),
            "override-blob"
        );
    }

    #[test]
    fn unreadable_license_file_is_a_config_error() {
        let dir = tempdir().unwrap();
        let config = LicenseConfig {
            license_path: Some(dir.path().join("missing.lic")),
            ..Default::default()
        };
        let err = config.license_string_from(env_of(&[])).unwrap_err();
        assert!(matches!(err, WatcherError::Config(_)));
    }

    #[test]
    fn engine_config_parses_from_toml() {
        let config: EngineConfig = toml::from_str(
            r#"
            product = "licwatch"
            check_interval = 5
            warning_window = 86400
            "#,
        )
        .unwrap();
        assert_eq!(config.check_interval, Duration::from_secs(5));
        assert_eq!(config.warning_window, Duration::from_secs(86_400));
        assert_eq!(config.warning_interval, default_warning_interval());
        assert!(config
            .settings(Arc::new(licwatch_licensing::SystemClock))
            .is_ok());
    }

    #[test]
    fn zero_check_interval_is_rejected() {
        let config: EngineConfig = toml::from_str("check_interval = 0").unwrap();
        assert!(config.check_interval.is_zero());
        let err = config
            .settings(Arc::new(licwatch_licensing::SystemClock))
            .unwrap_err();
        assert!(matches!(err, WatcherError::Config(_)));
    }
}
