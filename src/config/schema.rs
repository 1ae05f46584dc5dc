use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Settings for one fixer run.
///
/// Every field has a default, so an empty TOML document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FixerConfig {
    /// Upper bound on detect/patch passes per document
    pub max_iterations: usize,
    pub rules: RuleFilter,
    /// Run the whole pipeline but write neither backups nor output
    pub dry_run: bool,
    pub analyzer_timeout_secs: u64,
    pub io_timeout_secs: u64,
    /// Worker threads for batch runs; `None` uses every CPU
    pub workers: Option<usize>,
    pub backup_dir: Option<PathBuf>,
    /// External analyzer command line; `{path}` is replaced with the script path
    pub analyzer_command: Option<String>,
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            rules: RuleFilter::default(),
            dry_run: false,
            analyzer_timeout_secs: 10,
            io_timeout_secs: 10,
            workers: None,
            backup_dir: None,
            analyzer_command: None,
        }
    }
}

impl FixerConfig {
    /// Check the config against the ids of the registered rules.
    pub fn validate(&self, known_rules: &[&str]) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.max_iterations == 0 {
            issues.push(ValidationIssue::OutOfRange {
                field: "max_iterations",
                message: "must be at least 1".to_string(),
            });
        }
        if self.analyzer_timeout_secs == 0 {
            issues.push(ValidationIssue::OutOfRange {
                field: "analyzer_timeout_secs",
                message: "must be at least 1".to_string(),
            });
        }
        if self.io_timeout_secs == 0 {
            issues.push(ValidationIssue::OutOfRange {
                field: "io_timeout_secs",
                message: "must be at least 1".to_string(),
            });
        }
        if self.workers == Some(0) {
            issues.push(ValidationIssue::OutOfRange {
                field: "workers",
                message: "must be at least 1 when set".to_string(),
            });
        }
        if let Some(command) = &self.analyzer_command {
            if command.trim().is_empty() {
                issues.push(ValidationIssue::OutOfRange {
                    field: "analyzer_command",
                    message: "must not be empty when set".to_string(),
                });
            }
        }

        for (field, ids) in [
            ("rules.include", &self.rules.include),
            ("rules.exclude", &self.rules.exclude),
        ] {
            for id in ids {
                if !known_rules.iter().any(|known| known.eq_ignore_ascii_case(id)) {
                    issues.push(ValidationIssue::UnknownRule {
                        field,
                        id: id.clone(),
                        suggestion: suggest(id, known_rules),
                    });
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

/// Closest registered rule id, if any is reasonably close.
fn suggest(id: &str, known_rules: &[&str]) -> Option<String> {
    let lower = id.to_ascii_lowercase();
    known_rules
        .iter()
        .map(|known| {
            let score = strsim::jaro_winkler(&lower, &known.to_ascii_lowercase());
            (score, *known)
        })
        .filter(|(score, _)| *score >= 0.85)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, known)| known.to_string())
}

/// Which rules may run. An empty include list allows every rule; exclude wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl RuleFilter {
    pub fn allows(&self, rule_id: &str) -> bool {
        let listed = |ids: &[String]| ids.iter().any(|id| id.eq_ignore_ascii_case(rule_id));
        if listed(&self.exclude) {
            return false;
        }
        self.include.is_empty() || listed(&self.include)
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    OutOfRange {
        field: &'static str,
        message: String,
    },
    UnknownRule {
        field: &'static str,
        id: String,
        suggestion: Option<String>,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::OutOfRange { field, message } => write!(f, "'{field}' {message}"),
            ValidationIssue::UnknownRule {
                field,
                id,
                suggestion,
            } => match suggestion {
                Some(s) => write!(f, "'{field}' names unknown rule '{id}' (did you mean '{s}'?)"),
                None => write!(f, "'{field}' names unknown rule '{id}'"),
            },
        }
    }
}
