pub mod aws;
pub mod docker;
pub mod github_app;

pub use aws::{AwsFederatedProvider, AwsSdkTokenService, AwsTokenService};
pub use github_app::{GitHubAppApi, GitHubAppProvider, GitHubClient};
