use anyhow::{Context, Result};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::SyncConfig;
use crate::VerbosityLevel;

const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024; // 10MB

/// Console level implied by the CLI verbosity flags
pub fn level_for(verbosity: VerbosityLevel) -> LevelFilter {
    match verbosity {
        VerbosityLevel::Quiet => LevelFilter::Warn,
        VerbosityLevel::Normal => LevelFilter::Info,
        VerbosityLevel::Verbose => LevelFilter::Debug,
    }
}

/// Install the console logger on stderr
///
/// `RUST_LOG` wins when set; otherwise `-q` lowers the level to warnings and
/// `-v` raises it to debug (token cache hits, ledger decisions).
pub fn init_logger(verbosity: VerbosityLevel) {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or_else(|| level_for(verbosity));

    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:5}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(level)
        .target(env_logger::Target::Stderr)
        .try_init()
        .ok();
}

/// Append-only run journal kept in the workspace (`wechat-sync.log`)
///
/// Writing to it never fails a run: problems are reported as warnings and the
/// sync carries on.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    /// Open the journal for this run, rotating it to `.log.old` past 10MB
    pub fn open(config: &SyncConfig) -> Self {
        let log = RunLog {
            path: config.log_file_path(),
        };
        if let Err(e) = rotate_if_larger_than(&log.path, MAX_LOG_SIZE) {
            log::warn!("Could not rotate {}: {:#}", log.path.display(), e);
        }
        log
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, message: &str) {
        if let Err(e) = self.try_append(message) {
            log::warn!("{:#}", e);
        }
    }

    fn try_append(&self, message: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open log file: {}", self.path.display()))?;

        writeln!(
            file,
            "[{}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            message
        )
        .with_context(|| format!("Failed to write log file: {}", self.path.display()))?;

        Ok(())
    }
}

fn rotate_if_larger_than(log_path: &Path, max_size: u64) -> Result<()> {
    if !log_path.exists() {
        return Ok(());
    }

    if std::fs::metadata(log_path)?.len() > max_size {
        let old_log_path = log_path.with_extension("log.old");
        if old_log_path.exists() {
            std::fs::remove_file(&old_log_path)?;
        }
        std::fs::rename(log_path, &old_log_path)?;
        log::info!("Log file rotated to {}", old_log_path.display());
    }

    Ok(())
}
