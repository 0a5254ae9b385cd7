use octocrab::Octocrab;
use octocrab::service::middleware::retry::RetryConfig;

/// Builds an authenticated client for `base_uri` (api.github.com when `None`).
///
/// octocrab retries 5xx responses three times by default. Retrying a
/// `workflow_dispatch` can start the same job more than once, so the client
/// never retries; callers decide from the error classification.
pub fn build_client(token: impl Into<String>, base_uri: Option<&str>) -> octocrab::Result<Octocrab> {
    let mut builder = Octocrab::builder()
        .personal_token(token.into())
        .add_retry_config(RetryConfig::None);
    if let Some(uri) = base_uri {
        builder = builder.base_uri(uri)?;
    }
    builder.build()
}
