//! Analyzers produce the diagnostics that drive each fix pass.
//!
//! Three sources are supported:
//!
//! 1. [`RuleAnalyzer`] runs every enabled rule's detector over the tree
//! 2. [`CommandAnalyzer`] runs an external tool (for example
//!    `Invoke-ScriptAnalyzer`) and parses its JSON output
//! 3. [`DiagnosticsFileAnalyzer`] replays a saved diagnostic list once, then
//!    defers to another analyzer for later passes
//!
//! # Example
//!
//! ```no_run
//! use psfix::analyzer::{Analyzer, CommandAnalyzer};
//! use psfix::document::SourceDocument;
//! use std::time::Duration;
//!
//! let analyzer = CommandAnalyzer::new(
//!     "pwsh -NoProfile -Command \"Invoke-ScriptAnalyzer -Path {path} | ConvertTo-Json\"",
//!     Duration::from_secs(30),
//! );
//! let document = SourceDocument::parse("build.ps1", "gci\n").unwrap();
//! for diag in analyzer.analyze(&document).unwrap() {
//!     println!("{}: {}", diag.rule_id, diag.message);
//! }
//! ```

pub mod diagnostic;

pub use diagnostic::{parse_diagnostics, Diagnostic, Location, Severity};

use crate::config::RuleFilter;
use crate::document::SourceDocument;
use crate::rules::RuleRegistry;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("analyzer `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("failed to spawn analyzer `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("analyzer `{command}` exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("analyzer output is not valid diagnostic JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of diagnostics for one document.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, document: &SourceDocument) -> Result<Vec<Diagnostic>, AnalyzerError>;
}

/// Built-in analyzer: the detectors of the enabled rules.
pub struct RuleAnalyzer {
    registry: Arc<RuleRegistry>,
    filter: RuleFilter,
}

impl RuleAnalyzer {
    pub fn new(registry: Arc<RuleRegistry>, filter: RuleFilter) -> Self {
        Self { registry, filter }
    }
}

impl Analyzer for RuleAnalyzer {
    fn analyze(&self, document: &SourceDocument) -> Result<Vec<Diagnostic>, AnalyzerError> {
        let diagnostics: Vec<Diagnostic> = self
            .registry
            .enabled(&self.filter)
            .flat_map(|rule| rule.detect(document))
            .collect();
        debug!(document = %document.path, count = diagnostics.len(), "built-in detection");
        Ok(diagnostics)
    }
}

/// Runs an external analyzer command against a temporary copy of the text.
///
/// `{path}` in the command line is replaced with the temporary file's path.
/// The command's stdout must be diagnostic JSON.
#[derive(Debug, Clone)]
pub struct CommandAnalyzer {
    command: String,
    timeout: Duration,
}

impl CommandAnalyzer {
    const POLL_INTERVAL: Duration = Duration::from_millis(10);

    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    fn shell(command_line: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command_line]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command_line]);
            cmd
        }
    }

    fn run(&self, script: &Path) -> Result<String, AnalyzerError> {
        let command_line = self.command.replace("{path}", &script.display().to_string());
        debug!(command = %command_line, "running analyzer");

        let mut child = Self::shell(&command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| AnalyzerError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        // Drain both pipes on threads so a chatty child cannot block on a full pipe.
        let stdout = child.stdout.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut out = String::new();
                pipe.read_to_string(&mut out).map(|_| out)
            })
        });
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut out = String::new();
                let _ = pipe.read_to_string(&mut out);
                out
            })
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                warn!(command = %self.command, timeout = ?self.timeout, "analyzer timed out");
                let _ = child.kill();
                let _ = child.wait();
                return Err(AnalyzerError::Timeout {
                    command: self.command.clone(),
                    timeout: self.timeout,
                });
            }
            thread::sleep(Self::POLL_INTERVAL);
        };

        let stdout = match stdout {
            Some(handle) => handle
                .join()
                .map_err(|_| std::io::Error::other("stdout reader panicked"))??,
            None => String::new(),
        };
        let stderr = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(AnalyzerError::Exit {
                command: self.command.clone(),
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(stdout)
    }
}

impl Analyzer for CommandAnalyzer {
    fn analyze(&self, document: &SourceDocument) -> Result<Vec<Diagnostic>, AnalyzerError> {
        let mut script = tempfile::Builder::new()
            .prefix("psfix-")
            .suffix(".ps1")
            .tempfile()?;
        script.write_all(document.text.as_bytes())?;
        script.flush()?;

        let output = self.run(script.path())?;
        let diagnostics = parse_diagnostics(&output)?;
        debug!(document = %document.path, count = diagnostics.len(), "external detection");
        Ok(diagnostics)
    }
}

/// Replays a fixed diagnostic list on the first call, then delegates.
///
/// Saved diagnostics describe the original text only; after the first patch
/// their positions are stale, so later passes ask `fallback`.
pub struct DiagnosticsFileAnalyzer {
    pending: Mutex<Option<Vec<Diagnostic>>>,
    fallback: Box<dyn Analyzer>,
}

impl DiagnosticsFileAnalyzer {
    pub fn new(diagnostics: Vec<Diagnostic>, fallback: Box<dyn Analyzer>) -> Self {
        Self {
            pending: Mutex::new(Some(diagnostics)),
            fallback,
        }
    }

    /// Load diagnostic JSON from `path`.
    pub fn from_path(path: &Path, fallback: Box<dyn Analyzer>) -> Result<Self, AnalyzerError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::new(parse_diagnostics(&content)?, fallback))
    }
}

impl Analyzer for DiagnosticsFileAnalyzer {
    fn analyze(&self, document: &SourceDocument) -> Result<Vec<Diagnostic>, AnalyzerError> {
        let replay = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match replay {
            Some(diagnostics) => Ok(diagnostics),
            None => self.fallback.analyze(document),
        }
    }
}
