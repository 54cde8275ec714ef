use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Base URL of the WeChat official account API
pub const DEFAULT_API_BASE: &str = "https://api.weixin.qq.com";

const WORKSPACE_DIR_NAME: &str = "blog-sync";
const TOKEN_CACHE_FILE: &str = "access_token.json";
const HISTORY_FILE: &str = "sync_history.json";
const SETTINGS_FILE: &str = "config.toml";
const LOG_FILE: &str = "wechat-sync.log";

/// Tunables read from `<workspace>/config.toml`
///
/// Every key is optional; missing keys fall back to the built-in defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSettings {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Pause between two upload requests, in milliseconds
    #[serde(default = "default_upload_delay_ms")]
    pub upload_delay_ms: u64,

    #[serde(default = "default_token_timeout_secs")]
    pub token_timeout_secs: u64,

    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,

    /// Material type sent to `add_material` (`image`, `voice`, `video`, `thumb`)
    #[serde(default = "default_material_type")]
    pub material_type: String,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_upload_delay_ms() -> u64 {
    1000
}

fn default_token_timeout_secs() -> u64 {
    10
}

fn default_upload_timeout_secs() -> u64 {
    30
}

fn default_material_type() -> String {
    "image".to_string()
}

impl Default for FileSettings {
    fn default() -> Self {
        FileSettings {
            api_base: default_api_base(),
            upload_delay_ms: default_upload_delay_ms(),
            token_timeout_secs: default_token_timeout_secs(),
            upload_timeout_secs: default_upload_timeout_secs(),
            material_type: default_material_type(),
        }
    }
}

impl FileSettings {
    /// Load settings from a TOML file, or defaults if the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: FileSettings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(settings)
    }
}

/// Values given on the command line; they win over `config.toml`
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub workspace_dir: Option<PathBuf>,
    pub source_dir: Option<PathBuf>,
    pub api_base: Option<String>,
    pub upload_delay_ms: Option<u64>,
}

/// Run configuration, built once at startup and handed to every component
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory holding the token cache, the upload ledger and the log file
    pub workspace_dir: PathBuf,

    /// Directory where the flattened input files are expected
    pub source_dir: PathBuf,

    pub api_base: String,
    pub upload_delay: Duration,
    pub token_timeout: Duration,
    pub upload_timeout: Duration,
    pub material_type: String,
}

impl SyncConfig {
    /// Build a configuration with default tunables
    pub fn new(workspace_dir: impl Into<PathBuf>, source_dir: impl Into<PathBuf>) -> Self {
        Self::from_settings(workspace_dir.into(), source_dir.into(), FileSettings::default())
    }

    /// Resolve the configuration from defaults, `config.toml` and CLI overrides
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let workspace_dir = match &overrides.workspace_dir {
            Some(dir) => dir.clone(),
            None => Self::default_workspace_dir()?,
        };

        let source_dir = match &overrides.source_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Failed to get current directory")?,
        };

        let mut settings = FileSettings::load(&workspace_dir.join(SETTINGS_FILE))?;
        if let Some(api_base) = &overrides.api_base {
            settings.api_base = api_base.clone();
        }
        if let Some(delay) = overrides.upload_delay_ms {
            settings.upload_delay_ms = delay;
        }

        Ok(Self::from_settings(workspace_dir, source_dir, settings))
    }

    fn from_settings(workspace_dir: PathBuf, source_dir: PathBuf, settings: FileSettings) -> Self {
        SyncConfig {
            workspace_dir,
            source_dir,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            upload_delay: Duration::from_millis(settings.upload_delay_ms),
            token_timeout: Duration::from_secs(settings.token_timeout_secs),
            upload_timeout: Duration::from_secs(settings.upload_timeout_secs),
            material_type: settings.material_type,
        }
    }

    /// Default workspace: `~/blog-sync`
    pub fn default_workspace_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(WORKSPACE_DIR_NAME))
    }

    /// Get the token cache path (access_token.json)
    pub fn token_cache_path(&self) -> PathBuf {
        self.workspace_dir.join(TOKEN_CACHE_FILE)
    }

    /// Get the upload ledger path (sync_history.json)
    pub fn history_path(&self) -> PathBuf {
        self.workspace_dir.join(HISTORY_FILE)
    }

    /// Get the log file path
    pub fn log_file_path(&self) -> PathBuf {
        self.workspace_dir.join(LOG_FILE)
    }

    /// Ensure the workspace directory exists
    pub fn ensure_workspace_dir(&self) -> Result<&Path> {
        fs::create_dir_all(&self.workspace_dir).with_context(|| {
            format!(
                "Failed to create workspace directory: {}",
                self.workspace_dir.display()
            )
        })?;
        Ok(&self.workspace_dir)
    }
}
