use std::collections::BTreeMap;

use config::{Config, ConfigError};
use serde::Deserialize;

use crate::assembler::{RunPolicy, DEFAULT_MAX_CONCURRENCY};
use crate::registry::providers::github_app::DEFAULT_GITHUB_API_URL;

/// Process configuration, read from environment variables
///
/// Variable names are the upper-case forms of the field names
/// (e.g. `CONFIGURATION_FILE_PATH`, `SECRET_NAME`).
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Path to the registry list
    #[serde(default = "default_configuration_file_path")]
    pub configuration_file_path: String,

    /// Kubernetes API server URL. When unset the client configuration is
    /// inferred (in-cluster environment or local kubeconfig).
    #[serde(default)]
    pub k8s_host: Option<String>,

    /// Service account token used as bearer credential with `k8s_host`
    #[serde(default = "default_sa_token_file")]
    pub sa_token_file: String,

    /// CA bundle used to verify the API server with `k8s_host`
    #[serde(default = "default_ca_cert_file")]
    pub ca_cert_file: String,

    pub namespace: String,
    pub secret_name: String,

    /// Secret labels as `key:value,key:value`
    #[serde(default)]
    pub labels: String,

    /// Secret annotations as `key:value,key:value`
    #[serde(default)]
    pub annotations: String,

    /// Log filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Upper bound on registries resolved at the same time
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub run_policy: RunPolicy,

    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
}

fn default_configuration_file_path() -> String {
    "config.yaml".to_string()
}

fn default_sa_token_file() -> String {
    "/var/run/secrets/kubernetes.io/serviceaccount/token".to_string()
}

fn default_ca_cert_file() -> String {
    "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_github_api_url() -> String {
    DEFAULT_GITHUB_API_URL.to_string()
}

impl Settings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(config::Environment::default())
    }

    fn from_source(source: config::Environment) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::Message("NAMESPACE must not be empty".to_string()));
        }
        if self.secret_name.trim().is_empty() {
            return Err(ConfigError::Message(
                "SECRET_NAME must not be empty".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Message(
                "MAX_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        // Surface malformed pairs at startup rather than at publish time
        self.secret_labels()?;
        self.secret_annotations()?;
        Ok(())
    }

    pub fn secret_labels(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        parse_key_value_pairs(&self.labels).map_err(|e| prefixed("LABELS", e))
    }

    pub fn secret_annotations(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        parse_key_value_pairs(&self.annotations).map_err(|e| prefixed("ANNOTATIONS", e))
    }

    /// Default `EnvFilter` directive derived from `LOG_LEVEL`
    pub fn log_filter(&self) -> String {
        let level = self.log_level.trim().to_lowercase();
        if level.is_empty() {
            default_log_level()
        } else {
            level
        }
    }
}

fn prefixed(variable: &str, err: ConfigError) -> ConfigError {
    ConfigError::Message(format!("Invalid {}: {}", variable, err))
}

/// Parse `key:value,key:value` into a map
///
/// Each pair is split on its first colon, so values may contain colons.
/// Empty items are ignored; later keys overwrite earlier ones.
pub fn parse_key_value_pairs(input: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut items = BTreeMap::new();

    for item in input.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        let (key, value) = item
            .split_once(':')
            .ok_or_else(|| ConfigError::Message(format!("'{}' is not a key:value pair", item)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::Message(format!("'{}' has an empty key", item)));
        }

        items.insert(key.to_string(), value.trim().to_string());
    }

    Ok(items)
}
