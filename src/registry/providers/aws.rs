use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::{retry::RetryConfig, timeout::TimeoutConfig, BehaviorVersion, Region, SdkConfig};
use base64::Engine;

use crate::error::{ResolveError, Step};
use crate::registry::{AuthConfiguration, Credentials, RegistryType};

/// Parameters of an STS `AssumeRoleWithWebIdentity` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebIdentityRequest {
    pub role_arn: String,
    pub role_session_name: String,
    pub web_identity_token: String,
    pub region: String,
}

/// Temporary credentials for the assumed role
#[derive(Clone, PartialEq, Eq)]
pub struct TemporaryCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

impl std::fmt::Debug for TemporaryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporaryCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// Which registry flavour to request an authorization token from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcrTarget {
    /// ECR Public; tokens are not scoped to a registry
    Public,
    /// Private ECR registry identified by its account ID
    Private { registry_id: String },
}

/// STS and ECR operations used for federated registry logins
#[async_trait]
pub trait AwsTokenService: Send + Sync {
    async fn assume_role_with_web_identity(
        &self,
        request: &WebIdentityRequest,
    ) -> Result<TemporaryCredentials, ResolveError>;

    /// Returns the raw base64 `username:password` authorization token
    async fn authorization_token(
        &self,
        credentials: &TemporaryCredentials,
        region: &str,
        target: &EcrTarget,
    ) -> Result<String, ResolveError>;
}

/// Extract a clean error message from an AWS SDK error's Debug output
fn format_sdk_error<E: std::fmt::Debug>(err: &E) -> String {
    let debug_str = format!("{:?}", err);

    // Pattern: message: Some("actual error message")
    if let Some(start) = debug_str.find("message: Some(\"") {
        let start = start + 15;
        if let Some(end) = debug_str[start..].find("\")") {
            return debug_str[start..start + end].to_string();
        }
    }

    if debug_str.len() > 200 {
        let mut cut = 200;
        while !debug_str.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &debug_str[..cut])
    } else {
        debug_str
    }
}

/// `AwsTokenService` backed by the AWS SDK
///
/// Clients are built per call from the region and credentials of that call,
/// with a ten second operation timeout and retries disabled.
#[derive(Debug, Clone)]
pub struct AwsSdkTokenService {
    operation_timeout: Duration,
}

impl Default for AwsSdkTokenService {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(10),
        }
    }
}

impl AwsSdkTokenService {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sdk_config(
        &self,
        region: &str,
        credentials: Option<&TemporaryCredentials>,
    ) -> SdkConfig {
        let loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(self.operation_timeout)
                    .build(),
            );

        match credentials {
            Some(creds) => {
                let creds = aws_sdk_ecr::config::Credentials::new(
                    &creds.access_key_id,
                    &creds.secret_access_key,
                    Some(creds.session_token.clone()),
                    None,
                    "sts-web-identity",
                );
                loader.credentials_provider(creds).load().await
            }
            // AssumeRoleWithWebIdentity is an unsigned call
            None => loader.no_credentials().load().await,
        }
    }
}

#[async_trait]
impl AwsTokenService for AwsSdkTokenService {
    async fn assume_role_with_web_identity(
        &self,
        request: &WebIdentityRequest,
    ) -> Result<TemporaryCredentials, ResolveError> {
        let config = self.sdk_config(&request.region, None).await;
        let client = aws_sdk_sts::Client::new(&config);

        let response = client
            .assume_role_with_web_identity()
            .role_arn(&request.role_arn)
            .role_session_name(&request.role_session_name)
            .web_identity_token(&request.web_identity_token)
            .send()
            .await
            .map_err(|e| ResolveError::external(Step::AssumeRole, format_sdk_error(&e)))?;

        let creds = response.credentials().ok_or_else(|| {
            ResolveError::external(Step::AssumeRole, "STS returned no credentials")
        })?;

        Ok(TemporaryCredentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().to_string(),
        })
    }

    async fn authorization_token(
        &self,
        credentials: &TemporaryCredentials,
        region: &str,
        target: &EcrTarget,
    ) -> Result<String, ResolveError> {
        let config = self.sdk_config(region, Some(credentials)).await;
        let step = Step::GetAuthorizationToken;

        let token = match target {
            EcrTarget::Public => {
                let client = aws_sdk_ecrpublic::Client::new(&config);
                let response = client
                    .get_authorization_token()
                    .send()
                    .await
                    .map_err(|e| ResolveError::external(step, format_sdk_error(&e)))?;
                response
                    .authorization_data()
                    .and_then(|data| data.authorization_token())
                    .map(str::to_string)
            }
            EcrTarget::Private { registry_id } => {
                let client = aws_sdk_ecr::Client::new(&config);
                #[allow(deprecated)]
                let response = client
                    .get_authorization_token()
                    .registry_ids(registry_id)
                    .send()
                    .await
                    .map_err(|e| ResolveError::external(step, format_sdk_error(&e)))?;
                response
                    .authorization_data()
                    .first()
                    .and_then(|data| data.authorization_token())
                    .map(str::to_string)
            }
        };

        token.ok_or_else(|| ResolveError::external(step, "no authorization token in response"))
    }
}

/// Decode a base64 `username:password` registry token
///
/// Splits on the first colon; the password may itself contain colons.
pub fn decode_authorization_token(token: &str) -> Result<Credentials, ResolveError> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token.trim())
        .map_err(|e| ResolveError::MalformedAuthToken {
            reason: format!("invalid base64: {}", e),
        })?;

    let decoded = String::from_utf8(decoded).map_err(|_| ResolveError::MalformedAuthToken {
        reason: "token is not valid UTF-8".to_string(),
    })?;

    match decoded.split_once(':') {
        Some((username, password)) if !username.is_empty() => {
            Ok(Credentials::new(username, password))
        }
        _ => Err(ResolveError::MalformedAuthToken {
            reason: "expected 'username:password'".to_string(),
        }),
    }
}

/// Registry provider for ECR and ECR Public through web-identity federation
///
/// Auth parameters: `role_arn`, `role_session_name`, `web_identity_token_file`
/// (resolved to the token itself), `region`, and `registry_id` for private ECR.
pub struct AwsFederatedProvider {
    service: Arc<dyn AwsTokenService>,
}

impl AwsFederatedProvider {
    pub fn new(service: Arc<dyn AwsTokenService>) -> Self {
        Self { service }
    }

    pub async fn credentials(
        &self,
        registry_type: RegistryType,
        auth: &AuthConfiguration,
    ) -> Result<Credentials, ResolveError> {
        let target = match registry_type {
            RegistryType::EcrPublic => EcrTarget::Public,
            RegistryType::Ecr => {
                let registry_id = auth.resolve("registry_id")?;
                if registry_id.trim().is_empty() {
                    return Err(ResolveError::malformed("registry_id", "must not be empty"));
                }
                EcrTarget::Private { registry_id }
            }
            other => {
                return Err(ResolveError::malformed(
                    "registry_type",
                    format!("'{}' is not an AWS registry", other),
                ))
            }
        };

        let request = WebIdentityRequest {
            role_arn: auth.resolve("role_arn")?,
            role_session_name: auth.resolve("role_session_name")?,
            web_identity_token: auth.resolve("web_identity_token_file")?,
            region: auth.resolve("region")?,
        };

        tracing::debug!(role_arn = %request.role_arn, "Assuming AWS role with web identity");
        let temporary = self.service.assume_role_with_web_identity(&request).await?;

        let token = self
            .service
            .authorization_token(&temporary, &request.region, &target)
            .await?;

        decode_authorization_token(&token)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::registry::CredentialSpec;
    use std::sync::Mutex;

    /// Records calls and hands out a fixed token; roles containing "denied" fail
    pub(crate) struct FakeAws {
        pub token: String,
        pub delay: Duration,
        pub targets: Mutex<Vec<EcrTarget>>,
    }

    impl FakeAws {
        pub fn new(token: &str) -> Self {
            Self {
                token: token.to_string(),
                delay: Duration::ZERO,
                targets: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AwsTokenService for FakeAws {
        async fn assume_role_with_web_identity(
            &self,
            request: &WebIdentityRequest,
        ) -> Result<TemporaryCredentials, ResolveError> {
            if request.role_arn.contains("denied") {
                return Err(ResolveError::external(
                    Step::AssumeRole,
                    "Not authorized to perform sts:AssumeRoleWithWebIdentity",
                ));
            }
            // Role names ending in a number delay by that many milliseconds
            let extra: u64 = request
                .role_arn
                .rsplit('-')
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            tokio::time::sleep(self.delay + Duration::from_millis(extra)).await;

            Ok(TemporaryCredentials {
                access_key_id: "ASIA".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: request.web_identity_token.clone(),
            })
        }

        async fn authorization_token(
            &self,
            _credentials: &TemporaryCredentials,
            _region: &str,
            target: &EcrTarget,
        ) -> Result<String, ResolveError> {
            self.targets.lock().unwrap().push(target.clone());
            Ok(self.token.clone())
        }
    }

    pub(crate) fn aws_auth(role_arn: &str, registry_id: Option<&str>) -> AuthConfiguration {
        let mut auth: AuthConfiguration = [
            ("role_arn", CredentialSpec::value(role_arn)),
            ("role_session_name", CredentialSpec::value("trow-config")),
            ("web_identity_token_file", CredentialSpec::value("oidc-token")),
            ("region", CredentialSpec::value("eu-west-1")),
        ]
        .into_iter()
        .collect();
        if let Some(id) = registry_id {
            auth.insert("registry_id", CredentialSpec::value(id));
        }
        auth
    }

    #[test]
    fn test_decode_authorization_token() {
        let creds = decode_authorization_token("dXNlcjpwYXNz").unwrap();
        assert_eq!(creds, Credentials::new("user", "pass"));
    }

    #[test]
    fn test_decode_splits_on_first_colon() {
        // "AWS:pa:ss"
        let creds = decode_authorization_token("QVdTOnBhOnNz").unwrap();
        assert_eq!(creds, Credentials::new("AWS", "pa:ss"));
    }

    #[test]
    fn test_decode_rejects_token_without_colon() {
        // "userpass"
        let err = decode_authorization_token("dXNlcnBhc3M=").unwrap_err();
        assert!(matches!(err, ResolveError::MalformedAuthToken { .. }));
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        let err = decode_authorization_token("%%%").unwrap_err();
        assert_eq!(err.step(), Step::DecodeToken);
    }

    #[test]
    fn test_format_sdk_error_extracts_message() {
        let debug = r#"ServiceError { message: Some("Access denied"), code: 403 }"#;
        // Debug of a &str escapes quotes, so write the raw text instead
        struct Plain(&'static str);
        impl std::fmt::Debug for Plain {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.0)
            }
        }
        assert_eq!(format_sdk_error(&Plain(debug)), "Access denied");
    }

    #[tokio::test]
    async fn test_private_ecr_requires_registry_id() {
        let fake = Arc::new(FakeAws::new("dXNlcjpwYXNz"));
        let provider = AwsFederatedProvider::new(fake.clone());

        let err = provider
            .credentials(RegistryType::Ecr, &aws_auth("arn:aws:iam::1:role/pull", None))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ResolveError::MalformedCredentialSpec { ref parameter, .. } if parameter == "registry_id"
        ));
        assert!(fake.targets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_public_ecr_without_registry_id() {
        let fake = Arc::new(FakeAws::new("dXNlcjpwYXNz"));
        let provider = AwsFederatedProvider::new(fake.clone());

        let creds = provider
            .credentials(
                RegistryType::EcrPublic,
                &aws_auth("arn:aws:iam::1:role/pull", None),
            )
            .await
            .unwrap();

        assert_eq!(creds, Credentials::new("user", "pass"));
        assert_eq!(*fake.targets.lock().unwrap(), vec![EcrTarget::Public]);
    }

    #[tokio::test]
    async fn test_private_ecr_passes_registry_id() {
        let fake = Arc::new(FakeAws::new("QVdTOnRva2Vu"));
        let provider = AwsFederatedProvider::new(fake.clone());

        let creds = provider
            .credentials(
                RegistryType::Ecr,
                &aws_auth("arn:aws:iam::1:role/pull", Some("123456789012")),
            )
            .await
            .unwrap();

        assert_eq!(creds, Credentials::new("AWS", "token"));
        assert_eq!(
            *fake.targets.lock().unwrap(),
            vec![EcrTarget::Private {
                registry_id: "123456789012".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_denied_role_is_external_failure() {
        let provider = AwsFederatedProvider::new(Arc::new(FakeAws::new("dXNlcjpwYXNz")));

        let err = provider
            .credentials(
                RegistryType::EcrPublic,
                &aws_auth("arn:aws:iam::1:role/denied", None),
            )
            .await
            .unwrap_err();

        assert_eq!(err.step(), Step::AssumeRole);
    }

    #[test]
    fn test_temporary_credentials_debug_hides_secrets() {
        let creds = TemporaryCredentials {
            access_key_id: "ASIA".to_string(),
            secret_access_key: "very-secret".to_string(),
            session_token: "session".to_string(),
        };
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("session"));
    }
}
