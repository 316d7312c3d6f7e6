//! Installer configuration
//!
//! Every section has working defaults. Values can be overridden from a JSON
//! file or from `DEPOT_*` environment variables (a `.env` file is honored).

use crate::archive::ExtractConfig;
use crate::cdn::CdnConfig;
use crate::download::DownloadConfig;
use crate::pipeline::PipelineConfig;
use crate::validator::ValidatorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    pub database_url: Option<String>,
    pub cdn: CdnConfig,
    pub download: DownloadConfig,
    pub extract: ExtractConfig,
    pub validator: ValidatorConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

impl InstallerConfig {
    /// Load a JSON config file; missing sections fall back to defaults
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Defaults overridden by `DEPOT_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = std::env::var("DEPOT_DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Ok(url) = std::env::var("DEPOT_AUTH_URL") {
            self.cdn.auth_url = url;
        }
        if let Some(secs) = env_parse::<u64>("DEPOT_REQUEST_TIMEOUT_SECS")? {
            self.cdn.request_timeout = Duration::from_secs(secs);
        }
        if let Some(workers) = env_parse::<usize>("DEPOT_DOWNLOAD_WORKERS")? {
            self.download.max_concurrent_files = workers;
        }
        if let Some(limit) = env_parse::<u32>("DEPOT_MAX_BYTES_PER_SECOND")? {
            self.download.max_bytes_per_second = limit;
        }
        if let Some(attempts) = env_parse::<u32>("DEPOT_CHUNK_ATTEMPTS")? {
            self.download.retry.max_attempts = attempts;
        }
        if let Ok(libs) = std::env::var("DEPOT_REQUIRED_LIBRARIES") {
            self.validator.required_libraries = libs
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Serialize a `Duration` as integer milliseconds
pub(crate) mod serde_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = InstallerConfig::default();
        assert_eq!(config.download.retry.max_attempts, 5);
        assert_eq!(config.extract.progress_every, 5);
        assert_eq!(config.validator.state_flags.fully_installed, 4);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_partial_json_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("installer.json");
        std::fs::write(
            &path,
            r#"{
                "download": { "max_concurrent_files": 3 },
                "validator": { "state_flags": { "version": 2, "fully_installed": 1028 } }
            }"#,
        )
        .unwrap();

        let config = InstallerConfig::from_json_file(&path).unwrap();
        assert_eq!(config.download.max_concurrent_files, 3);
        assert_eq!(config.download.retry.max_attempts, 5);
        assert_eq!(config.validator.state_flags.version, 2);
        assert_eq!(config.validator.state_flags.fully_installed, 1028);
        assert_eq!(config.validator.state_flags.downloading, 2);
    }

    #[test]
    fn test_invalid_json_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = InstallerConfig::from_json_file(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
