//! Client configuration.
//!
//! `ClientConfig` describes where the remote authority lives and how the sync
//! engine behaves. It can be deserialized from a config file or assembled from
//! `PROPSYNC_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::SyncOptions;
use crate::util::{is_http_url, normalize_text_option};

const ENV_API_BASE_URL: &str = "PROPSYNC_API_URL";
const ENV_RECORDS_PATH: &str = "PROPSYNC_RECORDS_PATH";
const ENV_HEALTH_PATH: &str = "PROPSYNC_HEALTH_PATH";
const ENV_DB_PATH: &str = "PROPSYNC_DB_PATH";
const ENV_PROBE_TIMEOUT_SECS: &str = "PROPSYNC_PROBE_TIMEOUT_SECS";
const ENV_PROBE_INTERVAL_SECS: &str = "PROPSYNC_PROBE_INTERVAL_SECS";
const ENV_MAX_ATTEMPTS: &str = "PROPSYNC_MAX_ATTEMPTS";
const ENV_START_ONLINE: &str = "PROPSYNC_START_ONLINE";

const DEFAULT_RECORDS_PATH: &str = "properties";
const DEFAULT_HEALTH_PATH: &str = "health";
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Runtime configuration for a sync client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ClientConfig {
    /// Base URL of the remote API (e.g. `https://api.example.com/v1`)
    pub api_base_url: Option<String>,
    /// Collection path under the base URL
    pub records_path: String,
    /// Liveness path under the base URL
    pub health_path: String,
    /// Local store location; callers pick a platform default when absent
    pub db_path: Option<PathBuf>,
    /// Bound on a connectivity probe
    pub probe_timeout_secs: u64,
    /// Failed delivery attempts before a queued operation is dropped
    pub max_attempts: u32,
    /// Periodic probe interval; no periodic probing when absent
    pub probe_interval_secs: Option<u64>,
    /// Connectivity assumed before the first signal or probe
    pub start_online: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            records_path: DEFAULT_RECORDS_PATH.to_string(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            db_path: None,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            probe_interval_secs: None,
            start_online: true,
        }
    }
}

impl ClientConfig {
    /// Load configuration from `PROPSYNC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unset or blank variables keep their defaults; malformed numbers are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let value = |key: &str| normalize_text_option(lookup(key));
        let mut config = Self {
            api_base_url: value(ENV_API_BASE_URL),
            db_path: value(ENV_DB_PATH).map(PathBuf::from),
            ..Self::default()
        };

        if let Some(path) = value(ENV_RECORDS_PATH) {
            config.records_path = path;
        }
        if let Some(path) = value(ENV_HEALTH_PATH) {
            config.health_path = path;
        }
        if let Some(raw) = value(ENV_PROBE_TIMEOUT_SECS) {
            config.probe_timeout_secs = parse_number(ENV_PROBE_TIMEOUT_SECS, &raw)?;
        }
        if let Some(raw) = value(ENV_PROBE_INTERVAL_SECS) {
            config.probe_interval_secs = Some(parse_number(ENV_PROBE_INTERVAL_SECS, &raw)?);
        }
        if let Some(raw) = value(ENV_MAX_ATTEMPTS) {
            config.max_attempts = parse_number(ENV_MAX_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = value(ENV_START_ONLINE) {
            config.start_online = matches!(
                raw.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and URL shape
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.api_base_url {
            if !is_http_url(url) {
                return Err(Error::Config(format!(
                    "{ENV_API_BASE_URL} must include http:// or https://"
                )));
            }
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if self.probe_timeout_secs == 0 {
            return Err(Error::Config(
                "probe_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.records_path.trim_matches('/').is_empty() {
            return Err(Error::Config("records_path must not be empty".to_string()));
        }
        Ok(())
    }

    /// The remote base URL, required for network access
    pub fn require_api_base_url(&self) -> Result<&str> {
        self.api_base_url
            .as_deref()
            .ok_or_else(|| Error::Config(format!("{ENV_API_BASE_URL} is not set")))
    }

    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn probe_interval(&self) -> Option<Duration> {
        self.probe_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Engine options derived from this configuration
    pub const fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            max_attempts: self.max_attempts,
            probe_timeout: self.probe_timeout(),
            start_online: self.start_online,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_attempts, 3);
        assert!(config.probe_interval().is_none());
    }

    #[test]
    fn environment_overrides_are_trimmed() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_API_BASE_URL, " https://api.example.com "),
            (ENV_RECORDS_PATH, "listings"),
            (ENV_MAX_ATTEMPTS, "5"),
            (ENV_PROBE_INTERVAL_SECS, "30"),
            (ENV_START_ONLINE, "no"),
        ]))
        .unwrap();

        assert_eq!(
            config.api_base_url.as_deref(),
            Some("https://api.example.com")
        );
        assert_eq!(config.records_path, "listings");
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.probe_interval(), Some(Duration::from_secs(30)));
        assert!(!config.start_online);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(ClientConfig::from_lookup(lookup(&[(ENV_API_BASE_URL, "api.example.com")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[(ENV_MAX_ATTEMPTS, "0")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[(ENV_PROBE_TIMEOUT_SECS, "soon")])).is_err());
    }

    #[test]
    fn deserialize_rejects_unknown_fields() {
        let error = serde_json::from_str::<ClientConfig>(r#"{"api_url": "https://x"}"#)
            .unwrap_err()
            .to_string();
        assert!(error.contains("unknown field"));

        let partial: ClientConfig =
            serde_json::from_str(r#"{"api_base_url": "https://api.example.com"}"#).unwrap();
        assert_eq!(partial.records_path, "properties");
    }

    #[test]
    fn missing_api_url_is_a_config_error() {
        let config = ClientConfig::default();
        assert!(matches!(
            config.require_api_base_url(),
            Err(Error::Config(_))
        ));
    }
}
