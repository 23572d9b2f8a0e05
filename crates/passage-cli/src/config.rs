/*
[INPUT]:  YAML configuration file and PASSAGE_* environment variables
[OUTPUT]: Parsed CLI configuration and the derived client configuration
[POS]:    Configuration layer - CLI setup
[UPDATE]: When adding new configuration options
*/

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use config::{Config, Environment, File, FileFormat};
use passage_client::ClientConfig;
use serde::{Deserialize, Serialize};

/// Environment variable prefix for overrides, e.g. `PASSAGE_BASE_URL`
pub const ENV_PREFIX: &str = "PASSAGE";

/// Top-level configuration for the passage CLI
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CliConfig {
    /// Identity service base URL, including any path prefix
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Seconds before expiry at which the access token is refreshed
    #[serde(default = "default_refresh_buffer_secs")]
    pub refresh_buffer_secs: u64,
    /// Where the access token and pending registration are kept between runs
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            refresh_buffer_secs: default_refresh_buffer_secs(),
            storage_dir: None,
        }
    }
}

fn default_base_url() -> String {
    ClientConfig::default().base_url
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_refresh_buffer_secs() -> u64 {
    ClientConfig::default().refresh_buffer.as_secs()
}

impl CliConfig {
    /// Layer an optional YAML file under `PASSAGE_*` environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            let path_str = path.to_str().context("config path must be valid utf-8")?;
            builder = builder.add_source(File::new(path_str, FileFormat::Yaml).required(true));
        }
        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("read configuration")?;
        config.try_deserialize().context("parse configuration")
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            refresh_buffer: Duration::from_secs(self.refresh_buffer_secs),
            ..ClientConfig::default()
        }
    }

    /// Configured storage directory, else the platform data dir
    pub fn resolved_storage_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(dir) = self.storage_dir.as_ref() {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir().context("no platform data directory; set storage_dir")?;
        Ok(data_dir.join("passage"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("passage-cli-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let path = temp_file("base_url: https://id.example.com/api\nrefresh_buffer_secs: 120\n");
        let config = CliConfig::load(Some(&path)).unwrap();

        assert_eq!(config.base_url, "https://id.example.com/api");
        assert_eq!(config.client_config().refresh_buffer, Duration::from_secs(120));
        assert_eq!(config.timeout_secs, 30);
        assert!(config.storage_dir.is_none());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_reads_yaml_file() {
        let path = temp_file("timeout_secs: 5\nstorage_dir: /tmp/passage-test\n");
        let config = CliConfig::load(Some(&path)).unwrap();

        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.resolved_storage_dir().unwrap(), PathBuf::from("/tmp/passage-test"));
        assert_eq!(config.client_config().timeout, Duration::from_secs(5));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("missing-{}.yaml", uuid::Uuid::new_v4()));
        assert!(CliConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_yaml_round_trip_of_defaults() {
        let yaml = CliConfig::default().to_yaml().unwrap();
        let parsed: CliConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, CliConfig::default());
    }
}
