use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trow_config::registry::providers::{AwsSdkTokenService, GitHubClient};
use trow_config::secret_store::{self, KubeSecretStore, PublishOutcome, SecretTarget};
use trow_config::settings::Settings;
use trow_config::{Assembler, RegistryList};

/// Generate the Trow registry-proxy configuration and store it as a Kubernetes secret
///
/// Process settings come from environment variables (NAMESPACE, SECRET_NAME,
/// CONFIGURATION_FILE_PATH, LABELS, ANNOTATIONS, K8S_HOST, ...).
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Registry list to read (overrides CONFIGURATION_FILE_PATH)
    #[arg(long)]
    config_file: Option<String>,

    /// Resolve credentials and log a summary without writing the secret
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env().context("Failed to load settings from environment")?;

    // RUST_LOG wins over LOG_LEVEL
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| settings.log_filter()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Trow config generator");

    let config_path = cli
        .config_file
        .clone()
        .unwrap_or_else(|| settings.configuration_file_path.clone());
    info!(path = %config_path, "Reading registry list");
    let registry_list = RegistryList::from_path(&config_path)?;
    info!(
        count = registry_list.registries.len(),
        "Loaded registry configurations"
    );

    let assembler = Assembler::new(
        Arc::new(GitHubClient::new(&settings.github_api_url)?),
        Arc::new(AwsSdkTokenService::new()),
    )
    .with_max_concurrency(settings.max_concurrency)
    .with_policy(settings.run_policy);

    let configuration = assembler.assemble(&registry_list.registries).await?;
    info!("Generated Trow configuration");

    if cli.dry_run {
        for registry in configuration.registries() {
            info!(alias = %registry.alias, host = %registry.host, "Resolved registry");
        }
        info!("Dry run, secret not written");
        return Ok(());
    }

    // Install default CryptoProvider for rustls (required for kube-rs HTTPS connections)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let kube_client = match &settings.k8s_host {
        Some(host) => {
            secret_store::client_for_host(host, &settings.sa_token_file, &settings.ca_cert_file)
                .await?
        }
        None => {
            let config = kube::Config::infer()
                .await
                .context("Failed to infer Kubernetes configuration")?;
            kube::Client::try_from(config)?
        }
    };
    let store = KubeSecretStore::new(kube_client);

    let target = SecretTarget {
        namespace: settings.namespace.clone(),
        name: settings.secret_name.clone(),
        labels: settings.secret_labels()?,
        annotations: settings.secret_annotations()?,
    };

    match secret_store::publish(&store, &target, &configuration).await? {
        PublishOutcome::Created => info!(secret = %target.name, "Created secret"),
        PublishOutcome::Updated => info!(secret = %target.name, "Updated secret"),
        PublishOutcome::Unchanged => {
            info!(secret = %target.name, "Secret already up to date")
        }
    }

    info!("Trow config generator completed successfully");
    Ok(())
}
