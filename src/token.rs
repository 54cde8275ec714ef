use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::api::{MaterialApi, TokenResponse};
use crate::config::SyncConfig;
use crate::credentials::Credentials;
use crate::error::SyncError;

/// Seconds shaved off the provider TTL so a token never expires mid-run
pub const EXPIRY_MARGIN_SECS: f64 = 300.0;

/// Access token persisted in `access_token.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedToken {
    pub token: String,

    /// Unix timestamp (seconds, fractional) after which the token is stale
    pub expires_at: f64,
}

impl CachedToken {
    /// Build a cache entry from a fresh grant received at `now`
    pub fn from_grant(token: String, expires_in: u64, now: f64) -> Self {
        CachedToken {
            token,
            expires_at: now + expires_in as f64 - EXPIRY_MARGIN_SECS,
        }
    }

    pub fn is_valid_at(&self, now: f64) -> bool {
        now < self.expires_at
    }
}

/// File-backed token cache shared across runs
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TokenCache { path: path.into() }
    }

    pub fn for_config(config: &SyncConfig) -> Self {
        Self::new(config.token_cache_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached token, if any
    ///
    /// An unreadable or corrupt cache is logged and treated as a miss.
    pub fn load(&self) -> Option<CachedToken> {
        if !self.path.exists() {
            log::debug!("No token cache at {}", self.path.display());
            return None;
        }

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                log::warn!(
                    "Token cache {} unreadable, refreshing: {}",
                    self.path.display(),
                    e
                );
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(cached) => Some(cached),
            Err(e) => {
                log::warn!(
                    "Token cache {} is corrupt, refreshing: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    pub fn save(&self, token: &CachedToken) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string(token).context("Failed to serialize token cache")?;

        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write token cache: {}", self.path.display()))?;

        Ok(())
    }
}

/// Return a usable access token, refreshing it from the API when needed
pub fn get_access_token(
    config: &SyncConfig,
    credentials: &Credentials,
    api: &dyn MaterialApi,
) -> Result<String> {
    get_access_token_at(
        &TokenCache::for_config(config),
        credentials,
        api,
        crate::unix_now(),
    )
}

/// Same as [`get_access_token`] with an explicit cache and clock
pub fn get_access_token_at(
    cache: &TokenCache,
    credentials: &Credentials,
    api: &dyn MaterialApi,
    now: f64,
) -> Result<String> {
    if let Some(cached) = cache.load() {
        if cached.is_valid_at(now) {
            log::debug!("Using cached access token");
            return Ok(cached.token);
        }
        log::info!("Cached access token expired, refreshing");
    }

    let response = api.fetch_token(credentials).map_err(|e| SyncError::Auth {
        detail: format!("{:#}", e),
    })?;

    match response {
        TokenResponse::Granted {
            access_token,
            expires_in,
        } => {
            let cached = CachedToken::from_grant(access_token, expires_in, now);
            // The token is usable even if it cannot be cached.
            if let Err(e) = cache.save(&cached) {
                log::warn!("{:#}", e);
            }
            log::info!("Obtained new access token (valid for {}s)", expires_in);
            Ok(cached.token)
        }
        TokenResponse::Rejected { raw, .. } | TokenResponse::Unrecognized(raw) => {
            Err(SyncError::Auth {
                detail: raw.to_string(),
            }
            .into())
        }
    }
}
