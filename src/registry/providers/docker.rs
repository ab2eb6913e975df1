use crate::error::ResolveError;
use crate::registry::{AuthConfiguration, Credentials};

/// Static credentials for a plain registry (Docker Hub, Harbor, Quay, ...)
///
/// Both `username` and `password` are resolved as-is; no token exchange.
pub fn credentials(auth: &AuthConfiguration) -> Result<Credentials, ResolveError> {
    Ok(Credentials::new(
        auth.resolve("username")?,
        auth.resolve("password")?,
    ))
}
