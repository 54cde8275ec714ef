//! Client for the WeChat material API.
//!
//! The remote side is reached through the [`MaterialApi`] trait so the
//! synchronizer can run against any implementation. Responses are decoded
//! into tagged enums; whatever does not match a known shape is kept verbatim
//! for diagnostics.

use anyhow::{Context, Result};
use reqwest::blocking::{multipart, Client};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::config::SyncConfig;
use crate::credentials::Credentials;

/// Error code used for failures that never reached the remote API
pub const TRANSPORT_ERRCODE: i64 = -1;

/// Operations the synchronizer needs from the remote material store
pub trait MaterialApi {
    /// Exchange the AppID/AppSecret pair for an access token.
    ///
    /// Transport and decoding failures are returned as `Err`; a well-formed
    /// refusal from the provider is a [`TokenResponse::Rejected`].
    fn fetch_token(&self, credentials: &Credentials) -> Result<TokenResponse>;

    /// Upload one local file under `remote_name`.
    ///
    /// Never fails: transport errors come back as a rejected outcome with
    /// errcode [`TRANSPORT_ERRCODE`].
    fn upload(&self, token: &str, local_file: &Path, remote_name: &str) -> UploadOutcome;
}

#[derive(Debug, Deserialize)]
struct GrantedBody {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct MediaBody {
    media_id: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// Decoded reply of the token endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum TokenResponse {
    Granted { access_token: String, expires_in: u64 },
    Rejected { errcode: i64, errmsg: String, raw: Value },
    Unrecognized(Value),
}

impl TokenResponse {
    pub fn from_value(value: Value) -> Self {
        if let Ok(body) = serde_json::from_value::<GrantedBody>(value.clone()) {
            return TokenResponse::Granted {
                access_token: body.access_token,
                expires_in: body.expires_in,
            };
        }
        match serde_json::from_value::<ErrorBody>(value.clone()) {
            Ok(body) if body.errcode != 0 => TokenResponse::Rejected {
                errcode: body.errcode,
                errmsg: body.errmsg,
                raw: value,
            },
            _ => TokenResponse::Unrecognized(value),
        }
    }
}

/// Decoded reply of the `add_material` endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Uploaded { media_id: String, url: Option<String> },
    Rejected { errcode: i64, errmsg: String, raw: Value },
    Unrecognized(Value),
}

impl UploadOutcome {
    pub fn from_value(value: Value) -> Self {
        if let Ok(body) = serde_json::from_value::<MediaBody>(value.clone()) {
            return UploadOutcome::Uploaded {
                media_id: body.media_id,
                url: body.url,
            };
        }
        match serde_json::from_value::<ErrorBody>(value.clone()) {
            Ok(body) if body.errcode != 0 => UploadOutcome::Rejected {
                errcode: body.errcode,
                errmsg: body.errmsg,
                raw: value,
            },
            _ => UploadOutcome::Unrecognized(value),
        }
    }

    /// Outcome for a request that failed before a response was decoded
    pub fn transport_failure(message: impl fmt::Display) -> Self {
        let errmsg = message.to_string();
        UploadOutcome::Rejected {
            errcode: TRANSPORT_ERRCODE,
            raw: json!({ "errcode": TRANSPORT_ERRCODE, "errmsg": errmsg }),
            errmsg,
        }
    }

    pub fn media_id(&self) -> Option<&str> {
        match self {
            UploadOutcome::Uploaded { media_id, .. } => Some(media_id),
            _ => None,
        }
    }
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadOutcome::Uploaded { media_id, .. } => write!(f, "MediaID={}", media_id),
            UploadOutcome::Rejected { raw, .. } | UploadOutcome::Unrecognized(raw) => {
                write!(f, "{}", raw)
            }
        }
    }
}

/// Map a logical path to the single-segment name used locally and remotely
///
/// `blog/2026/img.jpg` becomes `blog_2026_img.jpg`.
pub fn flatten_path(logical_path: &str) -> String {
    logical_path.replace(['/', '\\'], "_")
}

/// Blocking HTTP client for `api.weixin.qq.com`
pub struct WeChatClient {
    client: Client,
    api_base: String,
    token_timeout: Duration,
    upload_timeout: Duration,
    material_type: String,
}

impl WeChatClient {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("wechat-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(WeChatClient {
            client,
            api_base: config.api_base.clone(),
            token_timeout: config.token_timeout,
            upload_timeout: config.upload_timeout,
            material_type: config.material_type.clone(),
        })
    }

    fn try_upload(&self, token: &str, local_file: &Path, remote_name: &str) -> Result<Value> {
        let url = format!("{}/cgi-bin/material/add_material", self.api_base);

        let part = multipart::Part::file(local_file)
            .with_context(|| format!("Failed to open {}", local_file.display()))?
            .file_name(remote_name.to_string());
        let form = multipart::Form::new().part("media", part);

        let res = self
            .client
            .post(&url)
            .query(&[("access_token", token), ("type", self.material_type.as_str())])
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .map_err(reqwest::Error::without_url)
            .context("Failed to send upload request")?;

        decode_body(res)
    }
}

// Request URLs carry the AppSecret or the access token in their query string,
// so errors are stripped of the URL before they reach logs or the terminal.
fn decode_body(res: reqwest::blocking::Response) -> Result<Value> {
    let status = res.status();
    let body = res
        .text()
        .map_err(reqwest::Error::without_url)
        .context("Failed to read response body")?;
    serde_json::from_str(&body)
        .with_context(|| format!("Unexpected response ({}): {}", status, body))
}

impl MaterialApi for WeChatClient {
    fn fetch_token(&self, credentials: &Credentials) -> Result<TokenResponse> {
        let url = format!("{}/cgi-bin/token", self.api_base);

        let res = self
            .client
            .get(&url)
            .query(&[
                ("grant_type", "client_credential"),
                ("appid", credentials.app_id.as_str()),
                ("secret", credentials.app_secret.as_str()),
            ])
            .timeout(self.token_timeout)
            .send()
            .map_err(reqwest::Error::without_url)
            .context("Failed to send token request")?;

        Ok(TokenResponse::from_value(decode_body(res)?))
    }

    fn upload(&self, token: &str, local_file: &Path, remote_name: &str) -> UploadOutcome {
        match self.try_upload(token, local_file, remote_name) {
            Ok(value) => UploadOutcome::from_value(value),
            Err(e) => UploadOutcome::transport_failure(format!("{:#}", e)),
        }
    }
}
