use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::error::{AssemblyError, RegistryError};
use crate::registry::providers::{
    docker, AwsFederatedProvider, AwsTokenService, GitHubAppApi, GitHubAppProvider,
};
use crate::registry::{RegistrySpec, RegistryType, ResolvedCredentials, TrowConfiguration};

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// What a run does when some registries cannot be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunPolicy {
    /// Any failure aborts the run and nothing is published
    #[default]
    FailFast,
    /// Failed registries are left out of the document with a warning
    BestEffort,
}

/// Builds the Trow configuration from a registry list
///
/// Registries resolve concurrently (bounded by `max_concurrency`); the
/// document always lists them in input order.
pub struct Assembler {
    github: GitHubAppProvider,
    aws: AwsFederatedProvider,
    max_concurrency: usize,
    policy: RunPolicy,
}

impl Assembler {
    pub fn new(github: Arc<dyn GitHubAppApi>, aws: Arc<dyn AwsTokenService>) -> Self {
        Self {
            github: GitHubAppProvider::new(github),
            aws: AwsFederatedProvider::new(aws),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            policy: RunPolicy::default(),
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve the credentials of a single registry
    pub async fn resolve(&self, spec: &RegistrySpec) -> Result<ResolvedCredentials, RegistryError> {
        info!(
            alias = %spec.alias,
            registry_type = %spec.registry_type,
            "Processing registry"
        );

        let auth = &spec.auth_configuration;
        let result = match spec.registry_type {
            RegistryType::Docker => docker::credentials(auth),
            RegistryType::Ghcr => self.github.credentials(auth).await,
            RegistryType::Ecr | RegistryType::EcrPublic => {
                self.aws.credentials(spec.registry_type, auth).await
            }
        };

        match result {
            Ok(credentials) => {
                info!(
                    alias = %spec.alias,
                    registry_type = %spec.registry_type,
                    "Resolved registry credentials"
                );
                Ok(ResolvedCredentials {
                    alias: spec.alias.clone(),
                    host: spec.host.clone(),
                    username: credentials.username,
                    password: credentials.password,
                })
            }
            Err(source) => Err(RegistryError {
                alias: spec.alias.clone(),
                registry_type: spec.registry_type,
                source,
            }),
        }
    }

    /// Resolve every registry and build the configuration document
    pub async fn assemble(
        &self,
        registries: &[RegistrySpec],
    ) -> Result<TrowConfiguration, AssemblyError> {
        check_unique_aliases(registries)?;
        info!(count = registries.len(), "Processing registries");

        // One slot per input position keeps the output order independent of
        // which registry finishes first.
        let mut slots: Vec<Option<Result<ResolvedCredentials, RegistryError>>> =
            (0..registries.len()).map(|_| None).collect();

        let mut results = stream::iter(registries.iter().enumerate())
            .map(|(index, spec)| async move { (index, self.resolve(spec).await) })
            .buffer_unordered(self.max_concurrency);

        while let Some((index, result)) = results.next().await {
            slots[index] = Some(result);
        }

        let mut resolved = Vec::with_capacity(registries.len());
        let mut first_failure = None;

        for result in slots.into_iter().flatten() {
            match result {
                Ok(credentials) => resolved.push(credentials),
                Err(err) => {
                    match self.policy {
                        RunPolicy::FailFast => error!(
                            alias = %err.alias,
                            registry_type = %err.registry_type,
                            step = %err.source.step(),
                            error = %err.source,
                            "Failed to resolve registry credentials"
                        ),
                        RunPolicy::BestEffort => warn!(
                            alias = %err.alias,
                            registry_type = %err.registry_type,
                            step = %err.source.step(),
                            error = %err.source,
                            "Skipping registry with unresolvable credentials"
                        ),
                    }
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
        }

        if let (RunPolicy::FailFast, Some(err)) = (self.policy, first_failure) {
            return Err(err.into());
        }

        info!(count = resolved.len(), "Generated configuration for registries");
        Ok(TrowConfiguration::new(resolved))
    }
}

fn check_unique_aliases(registries: &[RegistrySpec]) -> Result<(), AssemblyError> {
    let mut seen = HashSet::new();
    for spec in registries {
        if !seen.insert(spec.alias.as_str()) {
            return Err(AssemblyError::DuplicateAlias(spec.alias.clone()));
        }
    }
    Ok(())
}
