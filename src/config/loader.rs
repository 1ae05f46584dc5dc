use crate::config::schema::{FixerConfig, ValidationError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Io { .. } => self,
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(
                    f,
                    "failed to read fixer config from {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse fixer config TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse fixer config TOML: {}", source),
            },
            ConfigError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid fixer config ({}): {}", path.display(), source),
                None => write!(f, "invalid fixer config: {}", source),
            },
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
        }
    }
}

/// Parse and validate a config. Rule ids are checked against `known_rules`.
pub fn load_from_str(input: &str, known_rules: &[&str]) -> Result<FixerConfig, ConfigError> {
    let config: FixerConfig = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    config
        .validate(known_rules)
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(config)
}

pub fn load_from_path(
    path: impl AsRef<Path>,
    known_rules: &[&str],
) -> Result<FixerConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents, known_rules).map_err(|error| error.with_path(path))
}

/// `~/.psfix/backups`, or `.psfix/backups` when there is no home directory.
pub fn default_backup_dir() -> PathBuf {
    home::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".psfix")
        .join("backups")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationIssue;

    const KNOWN: &[&str] = &["PSAvoidUsingCmdletAliases", "PSAvoidGlobalVars"];

    #[test]
    fn empty_document_is_default_config() {
        let config = load_from_str("", KNOWN).unwrap();
        assert_eq!(config, FixerConfig::default());
        assert_eq!(config.max_iterations, 10);
    }

    #[test]
    fn reads_every_section() {
        let config = load_from_str(
            r#"
max_iterations = 4
dry_run = true
workers = 2
analyzer_command = "pwsh -File analyze.ps1 {path}"

[rules]
exclude = ["psavoidglobalvars"]
"#,
            KNOWN,
        )
        .unwrap();
        assert_eq!(config.max_iterations, 4);
        assert!(config.dry_run);
        assert_eq!(config.workers, Some(2));
        assert!(!config.rules.allows("PSAvoidGlobalVars"));
        assert!(config.rules.allows("PSAvoidUsingCmdletAliases"));
    }

    #[test]
    fn unknown_keys_are_toml_errors() {
        let err = load_from_str("max_iteration = 3\n", KNOWN).unwrap_err();
        assert!(matches!(err, ConfigError::Toml { path: None, .. }));
    }

    #[test]
    fn validation_collects_every_issue() {
        let err = load_from_str(
            "max_iterations = 0\n[rules]\ninclude = [\"PSAvoidGlobalVar\", \"Nope\"]\n",
            KNOWN,
        )
        .unwrap_err();
        let ConfigError::Validation { source, .. } = err else {
            panic!("expected validation error");
        };
        assert_eq!(source.issues.len(), 3);
        assert_eq!(
            source.issues[1],
            ValidationIssue::UnknownRule {
                field: "rules.include",
                id: "PSAvoidGlobalVar".to_string(),
                suggestion: Some("PSAvoidGlobalVars".to_string()),
            }
        );
        assert!(source.to_string().contains("did you mean 'PSAvoidGlobalVars'"));
        assert!(matches!(
            &source.issues[2],
            ValidationIssue::UnknownRule { suggestion: None, .. }
        ));
    }

    #[test]
    fn path_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("psfix.toml");
        fs::write(&path, "max_iterations = \"many\"\n").unwrap();
        let err = load_from_path(&path, KNOWN).unwrap_err();
        assert!(err.to_string().contains("psfix.toml"));

        let missing = load_from_path(dir.path().join("absent.toml"), KNOWN).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }

    #[test]
    fn filter_exclude_wins_over_include() {
        let filter = crate::config::RuleFilter {
            include: vec!["PSAvoidGlobalVars".into()],
            exclude: vec!["PSAVOIDGLOBALVARS".into()],
        };
        assert!(!filter.allows("PSAvoidGlobalVars"));
        assert!(!filter.allows("PSAvoidUsingCmdletAliases"));
    }
}
