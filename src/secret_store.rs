use std::collections::BTreeMap;
use std::io::BufReader;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{debug, info};

use crate::registry::TrowConfiguration;

/// Key of the configuration document inside the secret
pub const CONFIG_KEY: &str = "config.yaml";

/// Annotation recording when the configuration was generated
pub const ANNOTATION_GENERATED_AT: &str = "trow-config/generated-at";

const LIST_PAGE_SIZE: u32 = 50;

/// Storage backend for the generated configuration secret
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Stored configuration document of a secret, `None` if the secret or key is missing
    async fn payload(&self, namespace: &str, name: &str) -> Result<Option<Vec<u8>>>;

    async fn create(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
        payload: Vec<u8>,
    ) -> Result<()>;

    async fn update(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
        payload: Vec<u8>,
    ) -> Result<()>;
}

/// Position in a paginated list call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListCursor {
    pub token: Option<String>,
    pub done: bool,
}

impl ListCursor {
    pub fn start() -> Self {
        Self::default()
    }

    /// Next cursor given the continue token returned with the current page
    pub fn advance(self, continue_token: Option<&str>) -> Self {
        match continue_token {
            Some(token) if !token.is_empty() => Self {
                token: Some(token.to_string()),
                done: false,
            },
            _ => Self {
                token: None,
                done: true,
            },
        }
    }
}

/// Where and how the configuration secret is stored
#[derive(Debug, Clone, Default)]
pub struct SecretTarget {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Created,
    Updated,
    /// Secret already held the same document; only labels and annotations were applied
    Unchanged,
}

/// Upsert the configuration secret: update it if present, otherwise create it
///
/// The generated-at annotation is only written when the stored document
/// changes, so re-running with the same credentials leaves the secret as is.
/// Not atomic; two concurrent runs may race between `exists` and `create`.
pub async fn publish(
    store: &dyn SecretStore,
    target: &SecretTarget,
    configuration: &TrowConfiguration,
) -> Result<PublishOutcome> {
    let payload = configuration
        .to_json_bytes()
        .context("Failed to serialize Trow configuration")?;

    let mut annotations = target.annotations.clone();

    let exists = store
        .exists(&target.namespace, &target.name)
        .await
        .with_context(|| {
            format!(
                "Failed to check for secret {}/{}",
                target.namespace, target.name
            )
        })?;

    if !exists {
        info!(namespace = %target.namespace, secret = %target.name, "Creating new secret");
        annotations.insert(ANNOTATION_GENERATED_AT.to_string(), Utc::now().to_rfc3339());
        store
            .create(
                &target.namespace,
                &target.name,
                &target.labels,
                &annotations,
                payload,
            )
            .await
            .with_context(|| {
                format!("Failed to create secret {}/{}", target.namespace, target.name)
            })?;
        return Ok(PublishOutcome::Created);
    }

    let current = store
        .payload(&target.namespace, &target.name)
        .await
        .with_context(|| format!("Failed to read secret {}/{}", target.namespace, target.name))?;
    let changed = current.as_deref() != Some(payload.as_slice());
    if changed {
        annotations.insert(ANNOTATION_GENERATED_AT.to_string(), Utc::now().to_rfc3339());
    }

    info!(
        namespace = %target.namespace,
        secret = %target.name,
        changed,
        "Updating existing secret"
    );
    store
        .update(
            &target.namespace,
            &target.name,
            &target.labels,
            &annotations,
            payload,
        )
        .await
        .with_context(|| format!("Failed to update secret {}/{}", target.namespace, target.name))?;

    Ok(if changed {
        PublishOutcome::Updated
    } else {
        PublishOutcome::Unchanged
    })
}

/// Build a kube client from an explicit API server URL, token file and CA bundle
pub async fn client_for_host(host: &str, token_file: &str, ca_cert_file: &str) -> Result<Client> {
    let cluster_url = host
        .parse()
        .with_context(|| format!("Invalid Kubernetes API URL: {}", host))?;
    let mut config = kube::Config::new(cluster_url);

    config.auth_info.token_file = Some(token_file.to_string());

    let ca_pem = std::fs::read(ca_cert_file)
        .with_context(|| format!("Failed to read CA certificate {}", ca_cert_file))?;
    let ca_certs = pem_certificates(&ca_pem)
        .with_context(|| format!("Invalid CA certificate {}", ca_cert_file))?;
    config.root_cert = Some(ca_certs);

    Client::try_from(config).context("Failed to create Kubernetes client")
}

/// DER encoding of every certificate in a PEM bundle
fn pem_certificates(pem: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut reader = BufReader::new(pem);
    let certs = rustls_pemfile::certs(&mut reader)
        .map(|cert| cert.map(|der| der.to_vec()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to parse PEM certificates")?;

    if certs.is_empty() {
        anyhow::bail!("No certificates found");
    }

    debug!(count = certs.len(), "Loaded CA certificates");
    Ok(certs)
}

/// `SecretStore` backed by the Kubernetes API
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn secret_data(payload: Vec<u8>) -> BTreeMap<String, ByteString> {
    let mut data = BTreeMap::new();
    data.insert(CONFIG_KEY.to_string(), ByteString(payload));
    data
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn exists(&self, namespace: &str, name: &str) -> Result<bool> {
        debug!(namespace, secret = name, "Checking if secret exists");
        let api = self.api(namespace);
        let mut cursor = ListCursor::start();

        while !cursor.done {
            let mut params = ListParams::default().limit(LIST_PAGE_SIZE);
            if let Some(token) = &cursor.token {
                params = params.continue_token(token);
            }

            let page = api.list(&params).await?;
            if page
                .items
                .iter()
                .any(|secret| secret.metadata.name.as_deref() == Some(name))
            {
                return Ok(true);
            }

            cursor = cursor.advance(page.metadata.continue_.as_deref());
        }

        Ok(false)
    }

    async fn payload(&self, namespace: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let secret = self.api(namespace).get_opt(name).await?;
        Ok(secret
            .and_then(|secret| secret.data)
            .and_then(|mut data| data.remove(CONFIG_KEY))
            .map(|bytes| bytes.0))
    }

    async fn create(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
        payload: Vec<u8>,
    ) -> Result<()> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels.clone()),
                annotations: Some(annotations.clone()),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(secret_data(payload)),
            ..Default::default()
        };

        self.api(namespace)
            .create(&PostParams::default(), &secret)
            .await?;
        Ok(())
    }

    async fn update(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
        payload: Vec<u8>,
    ) -> Result<()> {
        let patch = Secret {
            metadata: ObjectMeta {
                labels: Some(labels.clone()),
                annotations: Some(annotations.clone()),
                ..Default::default()
            },
            data: Some(secret_data(payload)),
            ..Default::default()
        };

        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
