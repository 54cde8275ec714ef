use anyhow::Result;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::config::SyncConfig;
use crate::error::SyncError;

/// Upload record for one logical path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Permanent material id returned by the API
    #[serde(default)]
    pub media_id: String,

    /// Public URL of the material, when the API returned one
    #[serde(default)]
    pub url: Option<String>,

    /// MD5 hex digest of the content that was uploaded; empty when unknown,
    /// which never matches a real digest
    #[serde(default)]
    pub md5: String,

    /// Unix timestamp of the upload
    #[serde(default)]
    pub time: f64,
}

impl LedgerEntry {
    pub fn new(media_id: String, url: Option<String>, md5: String) -> Self {
        LedgerEntry {
            media_id,
            url,
            md5,
            time: crate::unix_now(),
        }
    }
}

/// The persisted upload ledger (`sync_history.json`), keyed by logical path
#[derive(Debug, Clone)]
pub struct SyncHistory {
    path: PathBuf,
    entries: BTreeMap<String, LedgerEntry>,
    recovered: bool,
}

impl SyncHistory {
    /// Create an empty ledger that will be saved to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SyncHistory {
            path: path.into(),
            entries: BTreeMap::new(),
            recovered: false,
        }
    }

    pub fn for_config(config: &SyncConfig) -> Self {
        Self::load(config.history_path())
    }

    /// Load the ledger from disk
    ///
    /// A missing file yields an empty ledger. So does an unreadable file or one
    /// that is not a JSON object, but that case is logged as a warning and
    /// flagged through [`SyncHistory::was_recovered`]: every file will be
    /// uploaded again.
    ///
    /// Entries are decoded one by one. An entry that does not decode is kept
    /// with an empty digest, so its path is re-uploaded as an update while
    /// every other entry survives the next save.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let mut history = Self::new(path);

        if !history.path.exists() {
            log::debug!(
                "No sync history at {}, starting fresh",
                history.path.display()
            );
            return history;
        }

        let parsed = fs::read_to_string(&history.path)
            .map_err(anyhow::Error::from)
            .and_then(|content| {
                serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&content)
                    .map_err(anyhow::Error::from)
            });

        match parsed {
            Ok(raw_entries) => {
                history.entries = raw_entries
                    .into_iter()
                    .map(|(logical_path, raw)| {
                        let entry = decode_entry(&logical_path, raw);
                        (logical_path, entry)
                    })
                    .collect();
                log::debug!("Loaded {} sync history entries", history.entries.len());
            }
            Err(e) => {
                log::warn!(
                    "Sync history {} is unusable ({}); continuing with an empty history, all files will be re-uploaded",
                    history.path.display(),
                    e
                );
                history.recovered = true;
            }
        }

        history
    }

    /// Write the whole ledger to disk
    ///
    /// The content goes to a sibling temp file first and is then renamed over
    /// the ledger, so an interrupted write leaves the previous version intact.
    pub fn save(&self) -> Result<()> {
        let persistence = |source: io::Error| SyncError::Persistence {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(persistence)?;
        }

        let content = serde_json::to_string_pretty(&self.entries)?;
        let tmp_path = self.path.with_extension("json.tmp");

        fs::write(&tmp_path, content).map_err(persistence)?;
        fs::rename(&tmp_path, &self.path).map_err(persistence)?;

        Ok(())
    }

    pub fn lookup(&self, logical_path: &str) -> Option<&LedgerEntry> {
        self.entries.get(logical_path)
    }

    /// Insert or overwrite the entry for `logical_path`, returning the old one
    pub fn record(&mut self, logical_path: &str, entry: LedgerEntry) -> Option<LedgerEntry> {
        self.entries.insert(logical_path.to_string(), entry)
    }

    pub fn entries(&self) -> &BTreeMap<String, LedgerEntry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a corrupt ledger file was discarded on load
    pub fn was_recovered(&self) -> bool {
        self.recovered
    }
}

fn decode_entry(logical_path: &str, raw: serde_json::Value) -> LedgerEntry {
    match serde_json::from_value::<LedgerEntry>(raw) {
        Ok(entry) => {
            if entry.md5.is_empty() {
                log::warn!("Sync history entry {} has no md5, will re-upload", logical_path);
            }
            entry
        }
        Err(e) => {
            log::warn!(
                "Sync history entry {} is malformed ({}), will re-upload",
                logical_path,
                e
            );
            LedgerEntry::default()
        }
    }
}

/// MD5 hex digest of a file's content, read in a streaming fashion
pub fn file_md5(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(media_id: &str, md5: &str) -> LedgerEntry {
        LedgerEntry {
            media_id: media_id.to_string(),
            url: None,
            md5: md5.to_string(),
            time: 1700000000.5,
        }
    }

    #[test]
    fn test_missing_file_is_empty_not_recovered() {
        let temp = TempDir::new().unwrap();
        let history = SyncHistory::load(temp.path().join("sync_history.json"));

        assert!(history.is_empty());
        assert!(!history.was_recovered());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("sync_history.json");

        let mut history = SyncHistory::new(&path);
        history.record("a/b.jpg", entry("M1", "aaa"));
        history.record(
            "c/d.png",
            LedgerEntry {
                url: Some("http://mmbiz.qpic.cn/x".to_string()),
                ..entry("M2", "bbb")
            },
        );
        history.save().unwrap();

        let loaded = SyncHistory::load(&path);
        assert_eq!(loaded.entries(), history.entries());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_record_overwrites_in_place() {
        let temp = TempDir::new().unwrap();
        let mut history = SyncHistory::new(temp.path().join("sync_history.json"));

        assert!(history.record("a/b.jpg", entry("M1", "aaa")).is_none());
        let previous = history.record("a/b.jpg", entry("M2", "bbb"));

        assert_eq!(previous.unwrap().media_id, "M1");
        assert_eq!(history.len(), 1);
        assert_eq!(history.lookup("a/b.jpg").unwrap().md5, "bbb");
    }

    #[test]
    fn test_corrupt_file_recovers_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sync_history.json");
        fs::write(&path, "{\"a/b.jpg\": {\"md5\": ").unwrap();

        let history = SyncHistory::load(&path);
        assert!(history.is_empty());
        assert!(history.was_recovered());
    }

    #[test]
    fn test_reads_legacy_entries() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sync_history.json");
        fs::write(
            &path,
            r#"{
  "blog/2024/a.jpg": {"media_id": "M1", "url": null, "md5": "abc", "time": 1704067200.25},
  "blog/2024/b.jpg": {"md5": "def"}
}"#,
        )
        .unwrap();

        let history = SyncHistory::load(&path);
        assert_eq!(history.len(), 2);
        assert_eq!(history.lookup("blog/2024/a.jpg").unwrap().media_id, "M1");
        assert_eq!(history.lookup("blog/2024/b.jpg").unwrap().md5, "def");
        assert!(history.lookup("blog/2024/c.jpg").is_none());
    }

    #[test]
    fn test_incomplete_entry_does_not_discard_others() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sync_history.json");
        fs::write(
            &path,
            r#"{
  "keep.jpg": {"media_id": "K", "url": null, "md5": "abc", "time": 1.0},
  "odd.jpg": {"media_id": "O"},
  "bad.jpg": {"md5": 42},
  "worse.jpg": "not an object"
}"#,
        )
        .unwrap();

        let mut history = SyncHistory::load(&path);
        assert!(!history.was_recovered());
        assert_eq!(history.len(), 4);
        assert_eq!(history.lookup("keep.jpg").unwrap().md5, "abc");
        assert_eq!(history.lookup("odd.jpg").unwrap().media_id, "O");
        assert!(history.lookup("odd.jpg").unwrap().md5.is_empty());
        assert!(history.lookup("bad.jpg").unwrap().md5.is_empty());

        history.record("c.jpg", entry("M3", "ccc"));
        history.save().unwrap();

        let reloaded = SyncHistory::load(&path);
        assert_eq!(reloaded.lookup("keep.jpg").unwrap().media_id, "K");
        assert_eq!(reloaded.lookup("c.jpg").unwrap().md5, "ccc");
        assert!(reloaded.lookup("odd.jpg").is_some());
    }

    #[test]
    fn test_non_object_file_recovers_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sync_history.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        let history = SyncHistory::load(&path);
        assert!(history.is_empty());
        assert!(history.was_recovered());
    }

    #[test]
    fn test_saved_json_shape() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sync_history.json");
        let mut history = SyncHistory::new(&path);
        history.record("a/b.jpg", entry("M1", "aaa"));
        history.save().unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["a/b.jpg"]["media_id"], "M1");
        assert!(value["a/b.jpg"]["url"].is_null());
        assert_eq!(value["a/b.jpg"]["md5"], "aaa");
        assert_eq!(value["a/b.jpg"]["time"], 1700000000.5);
    }

    #[test]
    fn test_file_md5_known_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hello.txt");
        fs::write(&path, b"hello world").unwrap();

        assert_eq!(
            file_md5(&path).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn test_file_md5_empty_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty");
        fs::write(&path, b"").unwrap();

        assert_eq!(
            file_md5(&path).unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }
}
