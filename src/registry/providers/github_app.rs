use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use crate::error::{ResolveError, Step};
use crate::registry::{AuthConfiguration, Credentials};

/// Lifetime of the app JWT; GitHub rejects anything above ten minutes
pub const JWT_EXPIRY_SECONDS: i64 = 600;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

const GITHUB_API_VERSION: &str = "2022-11-28";

/// Claims of a GitHub App JWT
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AppClaims {
    pub iat: i64,
    pub exp: i64,
    /// App ID, as a string
    pub iss: String,
}

/// Sign an RS256 app JWT issued at `issued_at` (unix seconds)
pub fn sign_app_jwt(
    private_key_pem: &str,
    app_id: u64,
    issued_at: i64,
) -> Result<String, ResolveError> {
    let key =
        EncodingKey::from_rsa_pem(private_key_pem.as_bytes()).map_err(ResolveError::JwtSigning)?;

    let claims = AppClaims {
        iat: issued_at,
        exp: issued_at + JWT_EXPIRY_SECONDS,
        iss: app_id.to_string(),
    };

    encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(ResolveError::JwtSigning)
}

/// An entry of `GET /app/installations`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Installation {
    pub id: u64,
    pub app_id: u64,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
}

/// The GitHub App endpoints needed to mint an installation token
#[async_trait]
pub trait GitHubAppApi: Send + Sync {
    /// List one page (1-based) of the app's installations
    async fn list_installations(
        &self,
        jwt: &str,
        page: u32,
    ) -> Result<Vec<Installation>, ResolveError>;

    /// Create an installation access token
    async fn create_installation_token(
        &self,
        jwt: &str,
        installation_id: u64,
    ) -> Result<String, ResolveError>;
}

/// GitHub REST client authenticated as the app itself
pub struct GitHubClient {
    http: Client,
    api_url: String,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("trow-config/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build GitHub HTTP client")?;

        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn authorized(&self, request: RequestBuilder, jwt: &str) -> RequestBuilder {
        request
            .bearer_auth(jwt)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }
}

async fn check_status(response: Response, step: Step) -> Result<Response, ResolveError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ResolveError::external(
        step,
        format!("github api returned {}: {}", status, body.trim()),
    ))
}

#[async_trait]
impl GitHubAppApi for GitHubClient {
    async fn list_installations(
        &self,
        jwt: &str,
        page: u32,
    ) -> Result<Vec<Installation>, ResolveError> {
        let url = format!("{}/app/installations", self.api_url);
        let response = self
            .authorized(self.http.get(&url), jwt)
            .query(&[("page", page)])
            .send()
            .await
            .map_err(|e| ResolveError::external(Step::DiscoverInstallation, e.to_string()))?;

        check_status(response, Step::DiscoverInstallation)
            .await?
            .json()
            .await
            .map_err(|e| ResolveError::external(Step::DiscoverInstallation, e.to_string()))
    }

    async fn create_installation_token(
        &self,
        jwt: &str,
        installation_id: u64,
    ) -> Result<String, ResolveError> {
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, installation_id
        );
        let response = self
            .authorized(self.http.post(&url), jwt)
            .send()
            .await
            .map_err(|e| ResolveError::external(Step::CreateAccessToken, e.to_string()))?;

        let body: AccessTokenResponse = check_status(response, Step::CreateAccessToken)
            .await?
            .json()
            .await
            .map_err(|e| ResolveError::external(Step::CreateAccessToken, e.to_string()))?;

        Ok(body.token)
    }
}

/// Page through the app's installations until one belongs to `app_id`
pub async fn find_installation_id(
    api: &dyn GitHubAppApi,
    jwt: &str,
    app_id: u64,
) -> Result<u64, ResolveError> {
    let mut page = 1;
    loop {
        let installations = api.list_installations(jwt, page).await?;
        if installations.is_empty() {
            return Err(ResolveError::InstallationNotFound { app_id });
        }

        if let Some(installation) = installations.iter().find(|i| i.app_id == app_id) {
            tracing::debug!(
                app_id,
                installation_id = installation.id,
                page,
                "Found github app installation"
            );
            return Ok(installation.id);
        }

        page += 1;
    }
}

/// Registry provider for ghcr.io-style registries fronted by a GitHub App
///
/// Auth parameters: `username`, `app_id`, `private_key`. The password is a
/// fresh installation access token.
pub struct GitHubAppProvider {
    api: Arc<dyn GitHubAppApi>,
}

impl GitHubAppProvider {
    pub fn new(api: Arc<dyn GitHubAppApi>) -> Self {
        Self { api }
    }

    pub async fn credentials(&self, auth: &AuthConfiguration) -> Result<Credentials, ResolveError> {
        let username = auth.resolve("username")?;
        let app_id_raw = auth.resolve("app_id")?;
        let app_id: u64 = app_id_raw.trim().parse().map_err(|_| {
            ResolveError::malformed("app_id", format!("'{}' is not a numeric app id", app_id_raw))
        })?;
        let private_key = auth.resolve("private_key")?;

        tracing::info!(app_id, "Generating github app installation access token");

        let jwt = sign_app_jwt(&private_key, app_id, chrono::Utc::now().timestamp())?;
        let installation_id = find_installation_id(self.api.as_ref(), &jwt, app_id).await?;
        let token = self
            .api
            .create_installation_token(&jwt, installation_id)
            .await?;

        Ok(Credentials::new(username, token))
    }
}
