use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

use crate::api::{flatten_path, MaterialApi, UploadOutcome};
use crate::config::SyncConfig;
use crate::history::{file_md5, LedgerEntry, SyncHistory};
use crate::VerbosityLevel;

/// What the ledger says about a local file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Same content already uploaded
    Skip,
    /// Known path whose content changed
    Update,
    /// Path never uploaded
    New,
}

impl Decision {
    pub fn classify(history: &SyncHistory, logical_path: &str, md5: &str) -> Self {
        match history.lookup(logical_path) {
            Some(entry) if entry.md5 == md5 => Decision::Skip,
            Some(_) => Decision::Update,
            None => Decision::New,
        }
    }
}

/// Result of syncing a single logical path
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    /// Content unchanged since the last upload; no request made
    Skipped,
    /// Upload accepted; `replaced` is true when an older entry was overwritten
    Uploaded { media_id: String, replaced: bool },
    /// Upload attempted (or file unreadable) and not accepted
    Failed { detail: String },
    /// Flattened local file not found
    Missing,
    /// Dry run: would have been uploaded
    Pending { replaced: bool },
}

/// Exit status of `--strict` runs with at least one failed upload
pub const STRICT_FAILURE_EXIT: i32 = 2;

/// Counters for a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Successful uploads, updates included
    pub uploaded: usize,
    /// Successful uploads that replaced an existing entry
    pub replaced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub missing: usize,
    /// Dry run only
    pub pending: usize,
}

impl SyncReport {
    pub fn tally(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Uploaded { replaced, .. } => {
                self.uploaded += 1;
                if *replaced {
                    self.replaced += 1;
                }
            }
            FileOutcome::Failed { .. } => self.failed += 1,
            FileOutcome::Missing => self.missing += 1,
            FileOutcome::Pending { .. } => self.pending += 1,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Process exit status for a completed run
    ///
    /// Per-file failures leave the status at 0 unless `strict` is set, in
    /// which case any failed upload yields [`STRICT_FAILURE_EXIT`].
    pub fn exit_code(&self, strict: bool) -> i32 {
        if strict && self.has_failures() {
            STRICT_FAILURE_EXIT
        } else {
            0
        }
    }

    fn success_label(&self) -> String {
        if self.replaced > 0 {
            format!("{} ({} updated)", self.uploaded, self.replaced)
        } else {
            self.uploaded.to_string()
        }
    }

    /// One-line summary, also written to the log file
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "success: {}, skipped: {}, failed: {}, missing: {}",
            self.success_label(),
            self.skipped,
            self.failed,
            self.missing
        );
        if self.pending > 0 {
            line.push_str(&format!(", pending: {}", self.pending));
        }
        line
    }

    pub fn print(&self, verbosity: VerbosityLevel) {
        if verbosity != VerbosityLevel::Quiet {
            println!();
        }
        println!(
            ">>> [Sync summary] success: {}, skipped: {}, failed: {}, missing: {}",
            self.success_label().green(),
            self.skipped.to_string().cyan(),
            if self.failed > 0 {
                self.failed.to_string().red()
            } else {
                self.failed.to_string().normal()
            },
            if self.missing > 0 {
                self.missing.to_string().yellow()
            } else {
                self.missing.to_string().normal()
            },
        );
        if self.pending > 0 {
            println!(
                "    {} file(s) would be uploaded (dry run)",
                self.pending.to_string().yellow()
            );
        }
    }
}

/// Sequential uploader driving the ledger
///
/// Files are processed in input order. Each accepted upload is written to the
/// ledger on disk before the next file is looked at, and consecutive upload
/// requests are separated by `config.upload_delay`.
pub struct Synchronizer<'a> {
    config: &'a SyncConfig,
    api: &'a dyn MaterialApi,
    history: SyncHistory,
    verbosity: VerbosityLevel,
    requests_sent: usize,
}

impl<'a> Synchronizer<'a> {
    pub fn new(config: &'a SyncConfig, api: &'a dyn MaterialApi, history: SyncHistory) -> Self {
        Synchronizer {
            config,
            api,
            history,
            verbosity: VerbosityLevel::Normal,
            requests_sent: 0,
        }
    }

    pub fn with_verbosity(mut self, verbosity: VerbosityLevel) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn history(&self) -> &SyncHistory {
        &self.history
    }

    /// Sync every logical path and return the counters
    ///
    /// Per-file problems never abort the run; only a failure to persist the
    /// ledger does.
    pub fn run(&mut self, token: &str, logical_paths: &[String]) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for logical_path in logical_paths {
            let outcome = self.sync_file(token, logical_path)?;
            report.tally(&outcome);
        }
        Ok(report)
    }

    /// Report what `run` would do, without touching the network or the ledger
    pub fn plan(&self, logical_paths: &[String]) -> SyncReport {
        let mut report = SyncReport::default();
        for logical_path in logical_paths {
            report.tally(&self.plan_file(logical_path));
        }
        report
    }

    fn local_file(&self, logical_path: &str) -> (String, PathBuf) {
        let flat_name = flatten_path(logical_path);
        let local = self.config.source_dir.join(&flat_name);
        (flat_name, local)
    }

    fn inspect(&self, logical_path: &str) -> std::result::Result<(Decision, String), FileOutcome> {
        let (flat_name, local) = self.local_file(logical_path);

        if !local.is_file() {
            log::warn!("Local file missing: {}", local.display());
            if self.verbosity != VerbosityLevel::Quiet {
                println!("  {} Local file missing: {}", "⚠".yellow(), flat_name);
            }
            return Err(FileOutcome::Missing);
        }

        let md5 = match file_md5(&local) {
            Ok(md5) => md5,
            Err(e) => {
                let detail = format!("cannot read {}: {}", local.display(), e);
                log::warn!("{}", detail);
                println!("  {} {}: {}", "✗".red(), "Failed".red(), detail);
                return Err(FileOutcome::Failed { detail });
            }
        };

        let decision = Decision::classify(&self.history, logical_path, &md5);
        if self.verbosity == VerbosityLevel::Verbose {
            println!("    {} md5={} -> {:?}", logical_path.dimmed(), md5, decision);
        }
        Ok((decision, md5))
    }

    /// Dry-run counterpart of [`Synchronizer::sync_file`]
    pub fn plan_file(&self, logical_path: &str) -> FileOutcome {
        let decision = match self.inspect(logical_path) {
            Ok((decision, _)) => decision,
            Err(outcome) => return outcome,
        };

        match decision {
            Decision::Skip => {
                self.announce_skip(logical_path);
                FileOutcome::Skipped
            }
            Decision::Update | Decision::New => {
                let replaced = decision == Decision::Update;
                if self.verbosity != VerbosityLevel::Quiet {
                    println!(
                        "  {} [{}] {}",
                        "…".yellow(),
                        if replaced { "would update" } else { "would upload" },
                        logical_path
                    );
                }
                FileOutcome::Pending { replaced }
            }
        }
    }

    /// Sync one logical path
    pub fn sync_file(&mut self, token: &str, logical_path: &str) -> Result<FileOutcome> {
        let (decision, md5) = match self.inspect(logical_path) {
            Ok(inspected) => inspected,
            Err(outcome) => return Ok(outcome),
        };

        let replaced = match decision {
            Decision::Skip => {
                self.announce_skip(logical_path);
                return Ok(FileOutcome::Skipped);
            }
            Decision::Update => {
                if self.verbosity != VerbosityLevel::Quiet {
                    println!(
                        "  {} [update] content changed: {}",
                        "🔄".cyan(),
                        logical_path
                    );
                }
                true
            }
            Decision::New => false,
        };

        let (flat_name, local) = self.local_file(logical_path);
        if self.verbosity != VerbosityLevel::Quiet {
            println!("  {} [upload] {} -> {}", "🚀".cyan(), logical_path, flat_name);
        }

        self.pace();
        let outcome = self.api.upload(token, &local, &flat_name);
        self.requests_sent += 1;

        match outcome {
            UploadOutcome::Uploaded { media_id, url } => {
                if self.verbosity != VerbosityLevel::Quiet {
                    println!("  {} Synced: MediaID={}", "✓".green(), media_id);
                }
                if self.verbosity == VerbosityLevel::Verbose {
                    if let Some(url) = &url {
                        println!("    url: {}", url);
                    }
                }
                log::info!("Uploaded {} as {}", logical_path, media_id);

                self.history
                    .record(logical_path, LedgerEntry::new(media_id.clone(), url, md5));
                self.history.save()?;

                Ok(FileOutcome::Uploaded { media_id, replaced })
            }
            failure => {
                let detail = failure.to_string();
                println!("  {} {}: {} ({})", "✗".red(), "Failed".red(), logical_path, detail);
                log::warn!("Upload of {} failed: {}", logical_path, detail);
                Ok(FileOutcome::Failed { detail })
            }
        }
    }

    fn announce_skip(&self, logical_path: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            println!("  {} [skip] unchanged: {}", "⏩".dimmed(), logical_path);
        }
    }

    // Fixed delay between consecutive upload requests.
    fn pace(&self) {
        if self.requests_sent > 0 && !self.config.upload_delay.is_zero() {
            std::thread::sleep(self.config.upload_delay);
        }
    }
}
