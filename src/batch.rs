//! Fixing many scripts at once on a worker pool.
//!
//! Each worker owns one document at a time and runs the convergence loop on
//! it; documents never share mutable state. Output is written atomically and
//! only for documents with at least one committed pass.

use crate::analyzer::Analyzer;
use crate::backup::BackupStore;
use crate::edit::atomic_write;
use crate::fixer::{CancellationToken, FixOutcome, Fixer};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Serialize, Serializer};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extensions treated as PowerShell sources.
pub const SCRIPT_EXTENSIONS: &[&str] = &["ps1", "psm1", "psd1"];

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reading {path} timed out after {timeout:?}")]
    ReadTimeout { path: PathBuf, timeout: Duration },

    #[error("{path} is not valid UTF-8")]
    NotUtf8 { path: PathBuf },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build worker pool: {0}")]
    Pool(String),

    #[error("failed to walk {path}: {message}")]
    Walk { path: PathBuf, message: String },
}

/// Result for one file of a batch.
#[derive(Debug, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub outcome: Option<FixOutcome>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<BatchError>,
    /// Whether the fixed text was written back
    pub written: bool,
}

fn serialize_error<S: Serializer>(error: &Option<BatchError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => s.serialize_some(&error.to_string()),
        None => s.serialize_none(),
    }
}

fn is_script(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SCRIPT_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(ext)))
}

/// Expand directories into the scripts below them.
///
/// Files named explicitly are kept whatever their extension. The result is
/// sorted and free of duplicates.
pub fn discover_scripts(paths: &[PathBuf]) -> Result<Vec<PathBuf>, BatchError> {
    let mut scripts = Vec::new();
    for path in paths {
        if !path.is_dir() {
            scripts.push(path.clone());
            continue;
        }
        for entry in WalkDir::new(path).follow_links(false) {
            let entry = entry.map_err(|e| BatchError::Walk {
                path: path.clone(),
                message: e.to_string(),
            })?;
            if entry.file_type().is_file() && is_script(entry.path()) {
                scripts.push(entry.into_path());
            }
        }
    }
    scripts.sort();
    scripts.dedup();
    Ok(scripts)
}

/// Stable identifier for a script: its canonical path when it has one.
pub fn document_id(path: &Path) -> String {
    fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Read a file on a helper thread, giving up after `timeout`.
///
/// A stalled read (network share, FIFO) leaves the helper thread behind but
/// frees the worker.
pub fn read_with_timeout(path: &Path, timeout: Duration) -> Result<String, BatchError> {
    let (tx, rx) = mpsc::channel();
    let owned = path.to_path_buf();
    thread::spawn(move || {
        let _ = tx.send(fs::read(&owned));
    });
    let bytes = match rx.recv_timeout(timeout) {
        Ok(result) => result.map_err(|source| BatchError::Read {
            path: path.to_path_buf(),
            source,
        })?,
        Err(_) => {
            warn!(path = %path.display(), ?timeout, "file read timed out");
            return Err(BatchError::ReadTimeout {
                path: path.to_path_buf(),
                timeout,
            });
        }
    };
    String::from_utf8(bytes).map_err(|_| BatchError::NotUtf8 {
        path: path.to_path_buf(),
    })
}

fn process(
    fixer: &Fixer,
    path: &Path,
    analyzer: &dyn Analyzer,
    backups: &dyn BackupStore,
    cancel: &CancellationToken,
) -> FileReport {
    let mut report = FileReport {
        path: path.to_path_buf(),
        outcome: None,
        error: None,
        written: false,
    };
    let timeout = Duration::from_secs(fixer.config().io_timeout_secs);
    let text = match read_with_timeout(path, timeout) {
        Ok(text) => text,
        Err(error) => {
            report.error = Some(error);
            return report;
        }
    };

    let outcome = fixer.run(&document_id(path), &text, analyzer, backups, cancel);
    if !fixer.config().dry_run && outcome.committed_passes > 0 && outcome.changed() {
        match atomic_write(path, outcome.final_text.as_bytes()) {
            Ok(()) => {
                debug!(path = %path.display(), "fixed text written");
                report.written = true;
            }
            Err(source) => {
                report.error = Some(BatchError::Write {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }
    report.outcome = Some(outcome);
    report
}

/// Fix every path on a pool of `config.workers` threads (default: one per CPU).
///
/// Reports come back in the order of `paths`.
pub fn run_batch(
    fixer: &Fixer,
    paths: &[PathBuf],
    analyzer: &dyn Analyzer,
    backups: &dyn BackupStore,
    cancel: &CancellationToken,
) -> Result<Vec<FileReport>, BatchError> {
    let workers = fixer.config().workers.unwrap_or_else(num_cpus::get).max(1);
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("psfix-worker-{i}"))
        .build()
        .map_err(|e| BatchError::Pool(e.to_string()))?;

    info!(files = paths.len(), workers, "starting batch");
    let reports: Vec<FileReport> = pool.install(|| {
        paths
            .par_iter()
            .map(|path| process(fixer, path, analyzer, backups, cancel))
            .collect()
    });
    let written = reports.iter().filter(|r| r.written).count();
    info!(files = reports.len(), written, "batch finished");
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::RuleAnalyzer;
    use crate::backup::MemoryBackupStore;
    use crate::config::{FixerConfig, RuleFilter};
    use crate::fixer::FixStatus;
    use crate::rules::RuleRegistry;
    use std::sync::Arc;

    fn setup(dry_run: bool) -> (Fixer, RuleAnalyzer) {
        let registry = Arc::new(RuleRegistry::builtin());
        let config = FixerConfig {
            dry_run,
            workers: Some(2),
            ..FixerConfig::default()
        };
        (
            Fixer::new(registry.clone(), config),
            RuleAnalyzer::new(registry, RuleFilter::default()),
        )
    }

    #[test]
    fn discovers_scripts_in_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("a.ps1"), "").unwrap();
        fs::write(dir.path().join("nested").join("b.PSM1"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        let explicit = dir.path().join("notes.txt");

        let found = discover_scripts(&[dir.path().to_path_buf(), explicit.clone()]).unwrap();
        assert_eq!(found.len(), 3);
        assert!(found.contains(&explicit));
        assert!(found.iter().any(|p| p.ends_with("nested/b.PSM1")));
    }

    #[test]
    fn batch_writes_fixed_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let fixable = dir.path().join("fixable.ps1");
        let clean = dir.path().join("clean.ps1");
        let broken = dir.path().join("broken.ps1");
        fs::write(&fixable, "gci\n").unwrap();
        fs::write(&clean, "Get-Date\n").unwrap();
        fs::write(&broken, "if ($x) {\n").unwrap();

        let (fixer, analyzer) = setup(false);
        let store = MemoryBackupStore::new();
        let paths = vec![fixable.clone(), clean.clone(), broken.clone()];
        let reports =
            run_batch(&fixer, &paths, &analyzer, &store, &CancellationToken::new()).unwrap();

        assert_eq!(reports.len(), 3);
        assert!(reports[0].written);
        assert!(!reports[1].written);
        assert!(!reports[2].written);
        assert!(matches!(
            reports[2].outcome.as_ref().unwrap().status,
            FixStatus::ParseFailure { .. }
        ));
        assert_eq!(fs::read_to_string(&fixable).unwrap(), "Get-ChildItem\n");
        assert_eq!(fs::read_to_string(&broken).unwrap(), "if ($x) {\n");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn dry_run_leaves_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ps1");
        fs::write(&path, "gci\n").unwrap();
        let (fixer, analyzer) = setup(true);
        let store = MemoryBackupStore::new();
        let reports = run_batch(
            &fixer,
            std::slice::from_ref(&path),
            &analyzer,
            &store,
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(!reports[0].written);
        assert!(reports[0].outcome.as_ref().unwrap().changed());
        assert_eq!(fs::read_to_string(&path).unwrap(), "gci\n");
        assert!(store.is_empty());
    }

    #[test]
    fn unreadable_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.ps1");
        let binary = dir.path().join("binary.ps1");
        fs::write(&binary, [0xffu8, 0xfe, 0x00]).unwrap();
        assert!(matches!(
            read_with_timeout(&missing, Duration::from_secs(5)),
            Err(BatchError::Read { .. })
        ));
        assert!(matches!(
            read_with_timeout(&binary, Duration::from_secs(5)),
            Err(BatchError::NotUtf8 { .. })
        ));
    }

    #[test]
    fn reports_serialize_errors_as_text() {
        let report = FileReport {
            path: PathBuf::from("x.ps1"),
            outcome: None,
            error: Some(BatchError::NotUtf8 {
                path: PathBuf::from("x.ps1"),
            }),
            written: false,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["error"], "x.ps1 is not valid UTF-8");
    }
}
