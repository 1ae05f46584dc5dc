pub mod loader;
pub mod schema;

pub use loader::{default_backup_dir, load_from_path, load_from_str, ConfigError};
pub use schema::{FixerConfig, RuleFilter, ValidationError, ValidationIssue};
