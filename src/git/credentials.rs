//! Short-lived bot credentials for pushing from a checkout.

use std::fmt;

use super::CommitIdentity;

/// Username/token pair plus the identity commits are made under.
///
/// Built per checkout from an installation token and dropped with it.
#[derive(Clone)]
pub struct BotCredentials {
    pub username: String,
    pub token: String,
    pub identity: CommitIdentity,
}

impl BotCredentials {
    pub fn new(username: impl Into<String>, token: impl Into<String>, identity: CommitIdentity) -> Self {
        BotCredentials {
            username: username.into(),
            token: token.into(),
            identity,
        }
    }

    /// Credentials for a GitHub App acting as its bot user.
    ///
    /// `bot_user_id` is the numeric id of the `<slug>[bot]` user; GitHub
    /// attributes commits to it through the noreply address.
    pub fn for_app(app_slug: &str, bot_user_id: u64, token: impl Into<String>) -> Self {
        let login = bot_login(app_slug);
        let identity = CommitIdentity::new(login.clone(), noreply_email(bot_user_id, &login));
        Self::new(login, token, identity)
    }
}

impl fmt::Debug for BotCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotCredentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .field("identity", &self.identity)
            .finish()
    }
}

/// Login of a GitHub App's bot user.
pub fn bot_login(app_slug: &str) -> String {
    format!("{app_slug}[bot]")
}

/// The noreply address GitHub associates with a user.
pub fn noreply_email(user_id: u64, login: &str) -> String {
    format!("{user_id}+{login}@users.noreply.github.com")
}
