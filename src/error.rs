use std::fmt;

use thiserror::Error;

use crate::registry::RegistryType;

/// The stage of a registry's credential resolution that failed.
///
/// Reported as a structured `step` field in logs so operators can tell a bad
/// input document apart from an identity provider outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ResolveCredential,
    SignJwt,
    DiscoverInstallation,
    CreateAccessToken,
    AssumeRole,
    GetAuthorizationToken,
    DecodeToken,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::ResolveCredential => "resolve-credential",
            Step::SignJwt => "sign-jwt",
            Step::DiscoverInstallation => "discover-installation",
            Step::CreateAccessToken => "create-access-token",
            Step::AssumeRole => "assume-role",
            Step::GetAuthorizationToken => "get-authorization-token",
            Step::DecodeToken => "decode-token",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while resolving credentials for a single registry
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("malformed credential for '{parameter}': {reason}")]
    MalformedCredentialSpec { parameter: String, reason: String },

    #[error("cannot resolve credential from {source_kind} '{location}': {reason}")]
    UnresolvableCredential {
        source_kind: &'static str,
        location: String,
        reason: String,
    },

    #[error("no installation found for github app {app_id}")]
    InstallationNotFound { app_id: u64 },

    #[error("{step} failed: {message}")]
    ExternalCallFailure { step: Step, message: String },

    #[error("malformed registry auth token: {reason}")]
    MalformedAuthToken { reason: String },

    #[error("failed to sign github app jwt: {0}")]
    JwtSigning(#[source] jsonwebtoken::errors::Error),
}

impl ResolveError {
    pub fn malformed(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedCredentialSpec {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    pub fn external(step: Step, message: impl Into<String>) -> Self {
        Self::ExternalCallFailure {
            step,
            message: message.into(),
        }
    }

    /// The resolution step this error belongs to
    pub fn step(&self) -> Step {
        match self {
            ResolveError::MalformedCredentialSpec { .. }
            | ResolveError::UnresolvableCredential { .. } => Step::ResolveCredential,
            ResolveError::InstallationNotFound { .. } => Step::DiscoverInstallation,
            ResolveError::ExternalCallFailure { step, .. } => *step,
            ResolveError::MalformedAuthToken { .. } => Step::DecodeToken,
            ResolveError::JwtSigning(_) => Step::SignJwt,
        }
    }
}

/// A credential resolution failure tagged with the registry it belongs to
#[derive(Debug, Error)]
#[error("registry '{alias}' ({registry_type}) failed at {}: {source}", .source.step())]
pub struct RegistryError {
    pub alias: String,
    pub registry_type: RegistryType,
    #[source]
    pub source: ResolveError,
}

/// Errors that stop a configuration document from being assembled
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("registry alias '{0}' is defined more than once")]
    DuplicateAlias(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
