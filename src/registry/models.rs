use serde::{Deserialize, Serialize};

/// Concrete credentials for one upstream registry, as Trow expects them
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ResolvedCredentials {
    /// Name under which Trow exposes the upstream (e.g. "docker" for `f/docker/...`)
    pub alias: String,
    /// Upstream registry host
    pub host: String,
    pub username: String,
    pub password: String,
}

/// A username/password pair produced by a registry provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Proxy section of the Trow configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RegistryProxies {
    pub registries: Vec<ResolvedCredentials>,
}

/// Admission policy section of the Trow configuration
///
/// The generator always emits the permissive default: every image is allowed
/// and both lists are empty.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ImageValidation {
    pub default: String,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl Default for ImageValidation {
    fn default() -> Self {
        Self {
            default: "Allow".to_string(),
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }
}

/// The document stored in the Trow configuration secret
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct TrowConfiguration {
    pub registry_proxies: RegistryProxies,
    pub image_validation: ImageValidation,
}

impl TrowConfiguration {
    pub fn new(registries: Vec<ResolvedCredentials>) -> Self {
        Self {
            registry_proxies: RegistryProxies { registries },
            image_validation: ImageValidation::default(),
        }
    }

    pub fn registries(&self) -> &[ResolvedCredentials] {
        &self.registry_proxies.registries
    }

    /// Serialize to the byte payload stored in the secret
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_shape_is_stable() {
        let doc = TrowConfiguration::new(vec![ResolvedCredentials {
            alias: "docker".to_string(),
            host: "registry-1.docker.io".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
        }]);

        let json = String::from_utf8(doc.to_json_bytes().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"registry_proxies":{"registries":[{"alias":"docker","host":"registry-1.docker.io","username":"u","password":"p"}]},"image_validation":{"default":"Allow","allow":[],"deny":[]}}"#
        );
    }

    #[test]
    fn test_empty_document() {
        let json = String::from_utf8(TrowConfiguration::default().to_json_bytes().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"registry_proxies":{"registries":[]},"image_validation":{"default":"Allow","allow":[],"deny":[]}}"#
        );
    }
}
