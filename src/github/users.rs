//! Looking up the bot user behind a GitHub App.

use octocrab::Octocrab;
use serde::Deserialize;

use crate::git::BotCredentials;
use crate::git::credentials::bot_login;

use super::error::GitHubApiError;

#[derive(Debug, Deserialize)]
struct BotUser {
    id: u64,
}

/// Builds commit and push credentials for the app `app_slug`, using
/// `installation_token` to authenticate git.
///
/// The bot user's numeric id is needed for its noreply commit address.
pub async fn fetch_bot_credentials(
    client: &Octocrab,
    app_slug: &str,
    installation_token: impl Into<String>,
) -> Result<BotCredentials, GitHubApiError> {
    // `[` and `]` are not valid in a URI path.
    let route = format!("/users/{}", bot_login(app_slug).replace('[', "%5B").replace(']', "%5D"));
    let user: BotUser = client
        .get(&route, None::<&()>)
        .await
        .map_err(GitHubApiError::from_octocrab)?;
    Ok(BotCredentials::for_app(app_slug, user.id, installation_token))
}
