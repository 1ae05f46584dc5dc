//! Backups of original text, taken before the first committed edit.
//!
//! A run never commits a pass unless the original text of the document is
//! safely stored first. Retention is explicit: old records are only removed
//! by [`BackupStore::purge_older_than`].

use crate::diff::{DiffReport, RuleStats};
use crate::edit::atomic_write;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("backup I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup record {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("backup store is unavailable: {0}")]
    Unavailable(String),
}

/// Snapshot of a document's text before psfix touched it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub document_id: String,
    pub original_text: String,
    pub timestamp: DateTime<Utc>,
    /// xxh3 of `original_text`
    pub content_hash: u64,
}

impl BackupRecord {
    pub fn new(document_id: impl Into<String>, original_text: impl Into<String>) -> Self {
        let original_text = original_text.into();
        Self {
            document_id: document_id.into(),
            content_hash: xxh3_64(original_text.as_bytes()),
            original_text,
            timestamp: Utc::now(),
        }
    }

    /// Whether the stored text still matches its hash.
    pub fn is_intact(&self) -> bool {
        xxh3_64(self.original_text.as_bytes()) == self.content_hash
    }
}

/// Persistent home for backup records.
pub trait BackupStore: Send + Sync {
    fn save(&self, record: &BackupRecord) -> Result<(), BackupError>;

    /// Most recent record for `document_id`.
    fn latest(&self, document_id: &str) -> Result<Option<BackupRecord>, BackupError>;

    /// Every record, oldest first.
    fn list(&self) -> Result<Vec<BackupRecord>, BackupError>;

    /// Remove records older than `age`; returns how many were removed.
    fn purge_older_than(&self, age: chrono::Duration) -> Result<usize, BackupError>;
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBackupStore {
    records: Mutex<Vec<BackupRecord>>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, Vec<BackupRecord>>, BackupError> {
        self.records
            .lock()
            .map_err(|_| BackupError::Unavailable("memory store lock poisoned".to_string()))
    }

    pub fn len(&self) -> usize {
        self.records().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BackupStore for MemoryBackupStore {
    fn save(&self, record: &BackupRecord) -> Result<(), BackupError> {
        self.records()?.push(record.clone());
        Ok(())
    }

    fn latest(&self, document_id: &str) -> Result<Option<BackupRecord>, BackupError> {
        Ok(self
            .records()?
            .iter()
            .filter(|r| r.document_id == document_id)
            .max_by_key(|r| r.timestamp)
            .cloned())
    }

    fn list(&self) -> Result<Vec<BackupRecord>, BackupError> {
        let mut records = self.records()?.clone();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    fn purge_older_than(&self, age: chrono::Duration) -> Result<usize, BackupError> {
        // A cutoff before the earliest representable time keeps everything.
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return Ok(0);
        };
        let mut records = self.records()?;
        let before = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        Ok(before - records.len())
    }
}

/// One JSON file per record in a directory.
#[derive(Debug, Clone)]
pub struct FileBackupStore {
    dir: PathBuf,
}

impl FileBackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> BackupError + '_ {
        move |source| BackupError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// `{stem}-{id hash}-{timestamp}.json`, with a counter on collision.
    fn file_name_for(&self, record: &BackupRecord) -> PathBuf {
        let stem: String = Path::new(&record.document_id)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let base = format!(
            "{}-{:016x}-{}",
            if stem.is_empty() { "document" } else { stem.as_str() },
            xxh3_64(record.document_id.as_bytes()),
            record.timestamp.format("%Y%m%dT%H%M%S%.6fZ"),
        );
        let mut candidate = self.dir.join(format!("{base}.json"));
        let mut counter = 1;
        while candidate.exists() {
            candidate = self.dir.join(format!("{base}-{counter}.json"));
            counter += 1;
        }
        candidate
    }

    fn entries(&self) -> Result<Vec<(PathBuf, BackupRecord)>, BackupError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(Self::io_error(&self.dir))? {
            let path = entry.map_err(Self::io_error(&self.dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).map_err(Self::io_error(&path))?;
            match serde_json::from_str::<BackupRecord>(&content) {
                Ok(record) => entries.push((path, record)),
                Err(error) => {
                    warn!(path = %path.display(), %error, "ignoring unreadable backup record");
                }
            }
        }
        entries.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then_with(|| a.0.cmp(&b.0)));
        Ok(entries)
    }
}

impl BackupStore for FileBackupStore {
    fn save(&self, record: &BackupRecord) -> Result<(), BackupError> {
        fs::create_dir_all(&self.dir).map_err(Self::io_error(&self.dir))?;
        let path = self.file_name_for(record);
        let json = serde_json::to_vec_pretty(record).map_err(|source| BackupError::Json {
            path: path.clone(),
            source,
        })?;
        atomic_write(&path, &json).map_err(Self::io_error(&path))?;
        debug!(document = %record.document_id, path = %path.display(), "backup written");
        Ok(())
    }

    fn latest(&self, document_id: &str) -> Result<Option<BackupRecord>, BackupError> {
        Ok(self
            .entries()?
            .into_iter()
            .rev()
            .map(|(_, record)| record)
            .find(|r| r.document_id == document_id))
    }

    fn list(&self) -> Result<Vec<BackupRecord>, BackupError> {
        Ok(self.entries()?.into_iter().map(|(_, r)| r).collect())
    }

    fn purge_older_than(&self, age: chrono::Duration) -> Result<usize, BackupError> {
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return Ok(0);
        };
        let mut removed = 0;
        for (path, record) in self.entries()? {
            if record.timestamp < cutoff {
                fs::remove_file(&path).map_err(Self::io_error(&path))?;
                removed += 1;
            }
        }
        info!(dir = %self.dir.display(), removed, "purged old backups");
        Ok(removed)
    }
}

/// Takes at most one backup per run and builds the final report.
pub struct BackupManager<'s> {
    store: &'s dyn BackupStore,
    document_id: String,
    original_text: String,
    dry_run: bool,
    taken: bool,
}

impl<'s> BackupManager<'s> {
    pub fn new(
        store: &'s dyn BackupStore,
        document_id: impl Into<String>,
        original_text: impl Into<String>,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            document_id: document_id.into(),
            original_text: original_text.into(),
            dry_run,
            taken: false,
        }
    }

    /// Snapshot the original text unless already done. Dry runs never write.
    pub fn before_first_edit(&mut self) -> Result<(), BackupError> {
        if self.taken || self.dry_run {
            return Ok(());
        }
        let record = BackupRecord::new(self.document_id.as_str(), self.original_text.as_str());
        self.store.save(&record)?;
        self.taken = true;
        Ok(())
    }

    /// Whether this run stored a backup.
    pub fn backup_written(&self) -> bool {
        self.taken
    }

    pub fn original_text(&self) -> &str {
        &self.original_text
    }

    pub fn finalize(&self, final_text: &str, stats: BTreeMap<String, RuleStats>) -> DiffReport {
        DiffReport::new(&self.document_id, &self.original_text, final_text, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_backs_up_once() {
        let store = MemoryBackupStore::new();
        let mut manager = BackupManager::new(&store, "a.ps1", "gci\n", false);
        manager.before_first_edit().unwrap();
        manager.before_first_edit().unwrap();
        assert!(manager.backup_written());
        assert_eq!(store.len(), 1);
        let record = store.latest("a.ps1").unwrap().unwrap();
        assert_eq!(record.original_text, "gci\n");
        assert!(record.is_intact());
    }

    #[test]
    fn dry_run_never_writes() {
        let store = MemoryBackupStore::new();
        let mut manager = BackupManager::new(&store, "a.ps1", "gci\n", true);
        manager.before_first_edit().unwrap();
        assert!(!manager.backup_written());
        assert!(store.is_empty());
    }

    #[test]
    fn finalize_reports_the_change() {
        let store = MemoryBackupStore::new();
        let manager = BackupManager::new(&store, "a.ps1", "gci\n", false);
        let report = manager.finalize("Get-ChildItem\n", BTreeMap::new());
        assert!(report.changed);
        assert_eq!(report.document_id, "a.ps1");
    }

    #[test]
    fn file_store_round_trips_and_picks_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackupStore::new(dir.path().join("backups"));
        assert!(store.list().unwrap().is_empty());

        let mut first = BackupRecord::new("/src/a.ps1", "one");
        first.timestamp -= chrono::Duration::seconds(5);
        store.save(&first).unwrap();
        store.save(&BackupRecord::new("/src/a.ps1", "two")).unwrap();
        store.save(&BackupRecord::new("/src/b.ps1", "other")).unwrap();

        assert_eq!(store.list().unwrap().len(), 3);
        let latest = store.latest("/src/a.ps1").unwrap().unwrap();
        assert_eq!(latest.original_text, "two");
        assert!(store.latest("/src/c.ps1").unwrap().is_none());
    }

    #[test]
    fn purge_removes_only_old_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackupStore::new(dir.path());
        let mut old = BackupRecord::new("a.ps1", "old");
        old.timestamp -= chrono::Duration::days(40);
        store.save(&old).unwrap();
        store.save(&BackupRecord::new("a.ps1", "new")).unwrap();

        assert_eq!(store.purge_older_than(chrono::Duration::days(30)).unwrap(), 1);
        let remaining = store.list().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].original_text, "new");

        let memory = MemoryBackupStore::new();
        memory.save(&old).unwrap();
        assert_eq!(memory.purge_older_than(chrono::Duration::days(30)).unwrap(), 1);
        assert!(memory.is_empty());
    }

    #[test]
    fn purge_with_out_of_range_age_keeps_everything() {
        let age = chrono::Duration::days(i64::from(u32::MAX));
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackupStore::new(dir.path());
        store.save(&BackupRecord::new("a.ps1", "x")).unwrap();
        assert_eq!(store.purge_older_than(age).unwrap(), 0);
        assert_eq!(store.list().unwrap().len(), 1);

        let memory = MemoryBackupStore::new();
        memory.save(&BackupRecord::new("a.ps1", "x")).unwrap();
        assert_eq!(memory.purge_older_than(age).unwrap(), 0);
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn unreadable_records_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("junk.json"), "{not json").unwrap();
        let store = FileBackupStore::new(dir.path());
        store.save(&BackupRecord::new("a.ps1", "x")).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
