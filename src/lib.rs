//! # wechat-material-sync
//!
//! Uploads local images to the permanent material library of a WeChat official
//! account and remembers what was uploaded, so repeated runs only send new or
//! changed files.
//!
//! ## Overview
//!
//! Each run receives a list of logical paths (for example repository-relative
//! paths such as `blog/2026/cover.jpg`). The matching local file is expected in
//! the source directory under its flattened name (`blog_2026_cover.jpg`). Its
//! MD5 digest is compared with the upload ledger: unchanged files are skipped,
//! new or changed ones are uploaded and recorded.
//!
//! ## Architecture
//!
//! - Run configuration and workspace layout ([`config`])
//! - AppID/AppSecret loading ([`credentials`])
//! - HTTP client and response decoding ([`api`])
//! - Access token caching ([`token`])
//! - Upload ledger and content hashing ([`history`])
//! - The sequential sync loop ([`sync`])
//! - Console and file logging ([`logger`])

/// Run configuration and workspace file layout.
///
/// A single [`config::SyncConfig`] is resolved at startup from built-in
/// defaults, an optional `config.toml` in the workspace and CLI overrides.
pub mod config;

/// Loading of the AppID/AppSecret pair from the environment.
pub mod credentials;

/// Fatal error taxonomy.
pub mod error;

/// WeChat material API client.
///
/// Defines the [`api::MaterialApi`] seam, the blocking reqwest implementation
/// and the tagged decoding of token and upload replies.
pub mod api;

/// Access token cache (`access_token.json`).
///
/// Tokens are reused until five minutes before the provider expiry and
/// refreshed through the API otherwise.
pub mod token;

/// Upload ledger (`sync_history.json`) keyed by logical path.
pub mod history;

/// Sequential synchronization of a list of logical paths.
pub mod sync;

/// Logging configuration and utilities.
///
/// Console logging via `env_logger` (controlled by `RUST_LOG`) plus an
/// append-only log file in the workspace with size-based rotation.
pub mod logger;

/// How much progress output a run prints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbosityLevel {
    /// Failures and the final summary only
    Quiet,
    /// One line per file
    Normal,
    /// Adds digests, ledger decisions and remote URLs
    Verbose,
}

/// Current time as fractional Unix seconds
pub(crate) fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
