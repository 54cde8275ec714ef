use crate::error::SyncError;

/// Environment variable holding the official account AppID
pub const APP_ID_VAR: &str = "WECHAT_APP_ID";

/// Environment variable holding the official account AppSecret
pub const APP_SECRET_VAR: &str = "WECHAT_APP_SECRET";

/// AppID/AppSecret pair used for the `client_credential` token exchange
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub app_id: String,
    pub app_secret: String,
}

// Keep the secret out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Read the credentials from the process environment
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the credentials through an arbitrary variable lookup
    ///
    /// Empty or whitespace-only values count as missing. Every missing name is
    /// reported, not just the first.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let app_id = read(APP_ID_VAR);
        let app_secret = read(APP_SECRET_VAR);

        match (app_id, app_secret) {
            (Some(app_id), Some(app_secret)) => Ok(Credentials { app_id, app_secret }),
            (app_id, app_secret) => {
                let mut missing = Vec::new();
                if app_id.is_none() {
                    missing.push(APP_ID_VAR);
                }
                if app_secret.is_none() {
                    missing.push(APP_SECRET_VAR);
                }
                Err(SyncError::MissingCredentials { missing })
            }
        }
    }
}
