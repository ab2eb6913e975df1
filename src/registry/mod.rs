pub mod credentials;
pub mod models;
pub mod providers;

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

pub use credentials::{AuthConfiguration, CredentialSource, CredentialSpec};
pub use models::{Credentials, ResolvedCredentials, TrowConfiguration};

/// Kind of upstream registry, which selects the authentication protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistryType {
    /// Static username/password
    #[default]
    Docker,
    /// GitHub Container Registry with a GitHub App installation token
    Ghcr,
    /// Private ECR through STS web-identity federation
    Ecr,
    /// ECR Public through STS web-identity federation
    #[serde(alias = "ecr_public")]
    EcrPublic,
}

impl RegistryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryType::Docker => "docker",
            RegistryType::Ghcr => "ghcr",
            RegistryType::Ecr => "ecr",
            RegistryType::EcrPublic => "ecr-public",
        }
    }
}

impl fmt::Display for RegistryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the registry list
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RegistrySpec {
    pub alias: String,
    pub host: String,
    #[serde(default, alias = "registryType")]
    pub registry_type: RegistryType,
    #[serde(default, alias = "authConfiguration")]
    pub auth_configuration: AuthConfiguration,
}

/// The registry list document (top-level key `registries`)
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RegistryList {
    pub registries: Vec<RegistrySpec>,
}

impl RegistryList {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse registry list")
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read registry list {}", path.display()))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("Invalid registry list {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registry_list() {
        let list = RegistryList::from_yaml(
            r#"
registries:
  - alias: docker
    host: registry-1.docker.io
    auth_configuration:
      username:
        value: bot
      password:
        env: DOCKER_PASSWORD
  - alias: ecr
    host: 123456789012.dkr.ecr.eu-west-1.amazonaws.com
    registry_type: ecr
    auth_configuration:
      registry_id:
        value: 123456789012
  - alias: public
    host: public.ecr.aws
    registryType: ecr_public
"#,
        )
        .unwrap();

        assert_eq!(list.registries.len(), 3);
        assert_eq!(list.registries[0].registry_type, RegistryType::Docker);
        assert_eq!(
            list.registries[0]
                .auth_configuration
                .resolve("username")
                .unwrap(),
            "bot"
        );
        assert_eq!(list.registries[1].registry_type, RegistryType::Ecr);
        assert_eq!(
            list.registries[1]
                .auth_configuration
                .resolve("registry_id")
                .unwrap(),
            "123456789012"
        );
        assert_eq!(list.registries[2].registry_type, RegistryType::EcrPublic);
        assert!(!list.registries[2].auth_configuration.contains("role_arn"));
    }

    #[test]
    fn test_unknown_registry_type_is_rejected() {
        let result = RegistryList::from_yaml(
            r#"
registries:
  - alias: quay
    host: quay.io
    registry_type: quay
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_registries_key_is_rejected() {
        assert!(RegistryList::from_yaml("proxies: []").is_err());
    }

    #[test]
    fn test_from_path_reports_path() {
        let err = RegistryList::from_path("/nonexistent/registries.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/registries.yaml"));
    }
}
