use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_yaml::Value;

use crate::error::ResolveError;

/// An indirect credential: exactly one of `value`, `file` or `env`
///
/// Kept as the raw mapping from the input document so that shape errors
/// (no source, several sources, unknown keys) surface at resolution time with
/// the name of the parameter that carried them.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct CredentialSpec(BTreeMap<String, Value>);

/// Where a credential's value comes from, once its shape has been validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Value(String),
    File(PathBuf),
    Env(String),
}

impl CredentialSpec {
    pub fn value(value: impl Into<String>) -> Self {
        Self::single("value", value.into())
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::single("file", path.into())
    }

    pub fn env(name: impl Into<String>) -> Self {
        Self::single("env", name.into())
    }

    fn single(key: &str, value: String) -> Self {
        let mut map = BTreeMap::new();
        map.insert(key.to_string(), Value::String(value));
        Self(map)
    }

    /// Validate the shape and return its single source
    pub fn source(&self, parameter: &str) -> Result<CredentialSource, ResolveError> {
        let mut entries = self.0.iter();
        let (key, value) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            (None, _) => {
                return Err(ResolveError::malformed(
                    parameter,
                    "expected exactly one of 'value', 'file' or 'env', found none",
                ))
            }
            (Some(_), Some(_)) => {
                let keys: Vec<&str> = self.0.keys().map(String::as_str).collect();
                return Err(ResolveError::malformed(
                    parameter,
                    format!(
                        "expected exactly one of 'value', 'file' or 'env', found {}",
                        keys.join(", ")
                    ),
                ));
            }
        };

        let text = scalar_to_string(value).ok_or_else(|| {
            ResolveError::malformed(parameter, format!("'{}' must be a scalar value", key))
        })?;

        match key.as_str() {
            "value" => Ok(CredentialSource::Value(text)),
            "file" => Ok(CredentialSource::File(PathBuf::from(text))),
            "env" => Ok(CredentialSource::Env(text)),
            other => Err(ResolveError::malformed(
                parameter,
                format!("unknown credential source '{}'", other),
            )),
        }
    }

    /// Resolve the credential to its concrete value
    ///
    /// File contents are trimmed; literal and environment values are returned
    /// exactly as found.
    pub fn resolve(&self, parameter: &str) -> Result<String, ResolveError> {
        match self.source(parameter)? {
            CredentialSource::Value(value) => Ok(value),
            CredentialSource::File(path) => std::fs::read_to_string(&path)
                .map(|contents| contents.trim().to_string())
                .map_err(|e| ResolveError::UnresolvableCredential {
                    source_kind: "file",
                    location: path.display().to_string(),
                    reason: e.to_string(),
                }),
            CredentialSource::Env(name) => {
                std::env::var(&name).map_err(|e| ResolveError::UnresolvableCredential {
                    source_kind: "env",
                    location: name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// The named credential parameters of one registry entry
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct AuthConfiguration(BTreeMap<String, CredentialSpec>);

impl AuthConfiguration {
    pub fn insert(&mut self, parameter: impl Into<String>, spec: CredentialSpec) {
        self.0.insert(parameter.into(), spec);
    }

    pub fn contains(&self, parameter: &str) -> bool {
        self.0.contains_key(parameter)
    }

    /// Resolve a required parameter
    pub fn resolve(&self, parameter: &str) -> Result<String, ResolveError> {
        self.0
            .get(parameter)
            .ok_or_else(|| ResolveError::malformed(parameter, "missing from auth_configuration"))?
            .resolve(parameter)
    }
}

impl<K: Into<String>> FromIterator<(K, CredentialSpec)> for AuthConfiguration {
    fn from_iter<I: IntoIterator<Item = (K, CredentialSpec)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn spec_from_yaml(yaml: &str) -> CredentialSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_resolve_literal_value_verbatim() {
        let spec = CredentialSpec::value("  padded secret \n");
        assert_eq!(spec.resolve("password").unwrap(), "  padded secret \n");
    }

    #[test]
    fn test_resolve_file_contents_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  s3cr3t  ").unwrap();

        let spec = CredentialSpec::file(file.path().to_str().unwrap());
        assert_eq!(spec.resolve("password").unwrap(), "s3cr3t");
    }

    #[test]
    fn test_resolve_env_verbatim() {
        std::env::set_var("TROW_CONFIG_TEST_RESOLVE_ENV", " token-with-spaces ");

        let spec = CredentialSpec::env("TROW_CONFIG_TEST_RESOLVE_ENV");
        assert_eq!(spec.resolve("password").unwrap(), " token-with-spaces ");
    }

    #[test]
    fn test_empty_spec_is_malformed() {
        let spec = spec_from_yaml("{}");
        let err = spec.resolve("username").unwrap_err();
        assert!(matches!(
            err,
            ResolveError::MalformedCredentialSpec { ref parameter, .. } if parameter == "username"
        ));
    }

    #[test]
    fn test_multiple_sources_are_malformed() {
        let spec = spec_from_yaml("value: a\nenv: B");
        let err = spec.resolve("username").unwrap_err();
        assert!(matches!(err, ResolveError::MalformedCredentialSpec { .. }));
        assert!(err.to_string().contains("env, value"));
    }

    #[test]
    fn test_unknown_source_is_malformed() {
        let spec = spec_from_yaml("vault: secret/path");
        assert!(matches!(
            spec.resolve("username"),
            Err(ResolveError::MalformedCredentialSpec { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_unresolvable() {
        let spec = CredentialSpec::file("/nonexistent/trow-config/secret");
        let err = spec.resolve("password").unwrap_err();
        assert!(matches!(
            err,
            ResolveError::UnresolvableCredential { source_kind: "file", .. }
        ));
    }

    #[test]
    fn test_missing_env_is_unresolvable() {
        let spec = CredentialSpec::env("TROW_CONFIG_TEST_DEFINITELY_UNSET");
        assert!(matches!(
            spec.resolve("password"),
            Err(ResolveError::UnresolvableCredential { source_kind: "env", .. })
        ));
    }

    #[test]
    fn test_numeric_value_is_stringified() {
        let spec = spec_from_yaml("value: 123456");
        assert_eq!(spec.resolve("app_id").unwrap(), "123456");
    }

    #[test]
    fn test_nested_value_is_malformed() {
        let spec = spec_from_yaml("value:\n  nested: true");
        assert!(matches!(
            spec.resolve("app_id"),
            Err(ResolveError::MalformedCredentialSpec { .. })
        ));
    }

    #[test]
    fn test_missing_parameter_is_malformed() {
        let auth: AuthConfiguration = [("username", CredentialSpec::value("u"))]
            .into_iter()
            .collect();

        let err = auth.resolve("password").unwrap_err();
        assert!(matches!(
            err,
            ResolveError::MalformedCredentialSpec { ref parameter, .. } if parameter == "password"
        ));
    }
}
