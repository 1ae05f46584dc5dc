use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use psfix::analyzer::{Analyzer, CommandAnalyzer, DiagnosticsFileAnalyzer, RuleAnalyzer};
use psfix::backup::{BackupStore, FileBackupStore};
use psfix::batch::{discover_scripts, document_id, run_batch, FileReport};
use psfix::config::{default_backup_dir, load_from_path, FixerConfig};
use psfix::edit::atomic_write;
use psfix::{CancellationToken, FixStatus, Fixer, RollbackReason, RuleRegistry};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "psfix.toml";

#[derive(Parser)]
#[command(name = "psfix")]
#[command(about = "Rule-driven auto-fixer for PowerShell scripts", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fix scripts in place
    Fix {
        #[command(flatten)]
        run: RunArgs,

        /// Dry run - report what would change without writing anything
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Exit non-zero if any script would be changed
    Check {
        #[command(flatten)]
        run: RunArgs,
    },

    /// List the registered rules
    Rules {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Write the most recent backup of a file back to it
    Restore {
        file: PathBuf,

        #[arg(long)]
        backup_dir: Option<PathBuf>,
    },

    /// Delete backups older than the given age
    PruneBackups {
        #[arg(long)]
        older_than_days: u32,

        #[arg(long)]
        backup_dir: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Script files or directories to search for .ps1/.psm1/.psd1 files
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Show unified diff of changes
    #[arg(short, long)]
    diff: bool,

    /// Only run these rules (repeatable)
    #[arg(long = "rule", value_name = "ID")]
    rules: Vec<String>,

    /// Never run these rules (repeatable)
    #[arg(long = "exclude", value_name = "ID")]
    excludes: Vec<String>,

    #[arg(long)]
    max_iterations: Option<usize>,

    /// TOML config file (default: ./psfix.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON diagnostics to use for the first pass of a single file
    #[arg(long)]
    diagnostics: Option<PathBuf>,

    /// External analyzer command; {path} is replaced with the script path
    #[arg(long)]
    analyzer_cmd: Option<String>,

    #[arg(long)]
    backup_dir: Option<PathBuf>,

    /// Worker threads (default: one per CPU)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Print a JSON report instead of text
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Fix { run, dry_run } => cmd_fix(run, dry_run, false),
        Commands::Check { run } => cmd_fix(run, true, true),
        Commands::Rules { json } => cmd_rules(json),
        Commands::Restore { file, backup_dir } => cmd_restore(&file, backup_dir),
        Commands::PruneBackups {
            older_than_days,
            backup_dir,
        } => cmd_prune(older_than_days, backup_dir),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Config file, then command-line overrides, validated as a whole.
fn resolve_config(args: &RunArgs, dry_run: bool, registry: &RuleRegistry) -> Result<FixerConfig> {
    let known = registry.ids();
    let mut config = match &args.config {
        Some(path) => load_from_path(path, &known)?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            load_from_path(DEFAULT_CONFIG_FILE, &known)?
        }
        None => FixerConfig::default(),
    };

    config.dry_run |= dry_run;
    if !args.rules.is_empty() {
        config.rules.include = args.rules.clone();
    }
    config.rules.exclude.extend(args.excludes.iter().cloned());
    if let Some(max) = args.max_iterations {
        config.max_iterations = max;
    }
    if let Some(jobs) = args.jobs {
        config.workers = Some(jobs);
    }
    if let Some(dir) = &args.backup_dir {
        config.backup_dir = Some(dir.clone());
    }
    if let Some(command) = &args.analyzer_cmd {
        config.analyzer_command = Some(command.clone());
    }

    config
        .validate(&known)
        .map_err(|e| anyhow::anyhow!("invalid options: {e}"))?;
    Ok(config)
}

fn build_analyzer(
    args: &RunArgs,
    config: &FixerConfig,
    registry: &Arc<RuleRegistry>,
    files: &[PathBuf],
) -> Result<Box<dyn Analyzer>> {
    let base: Box<dyn Analyzer> = match &config.analyzer_command {
        Some(command) => Box::new(CommandAnalyzer::new(
            command.as_str(),
            Duration::from_secs(config.analyzer_timeout_secs),
        )),
        None => Box::new(RuleAnalyzer::new(registry.clone(), config.rules.clone())),
    };

    match &args.diagnostics {
        Some(path) => {
            if files.len() != 1 {
                bail!(
                    "--diagnostics applies to exactly one script, but {} were given",
                    files.len()
                );
            }
            let analyzer = DiagnosticsFileAnalyzer::from_path(path, base)
                .with_context(|| format!("failed to load diagnostics from {}", path.display()))?;
            Ok(Box::new(analyzer))
        }
        None => Ok(base),
    }
}

fn backup_store(dir: Option<PathBuf>) -> FileBackupStore {
    FileBackupStore::new(dir.unwrap_or_else(default_backup_dir))
}

fn cmd_fix(args: RunArgs, dry_run: bool, check: bool) -> Result<()> {
    let registry = Arc::new(RuleRegistry::builtin());
    let config = resolve_config(&args, dry_run, &registry)?;

    let files = discover_scripts(&args.paths)?;
    if files.is_empty() {
        bail!("no PowerShell scripts found");
    }

    let analyzer = build_analyzer(&args, &config, &registry, &files)?;
    let store = backup_store(config.backup_dir.clone());
    let dry_run = config.dry_run;
    let fixer = Fixer::new(registry, config);
    let reports = run_batch(
        &fixer,
        &files,
        analyzer.as_ref(),
        &store,
        &CancellationToken::new(),
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report, dry_run, args.diff);
        }
    }

    let summary = Summary::of(&reports);
    if !args.json {
        summary.print(dry_run);
    }

    if summary.failed > 0 || (check && summary.changed > 0) {
        std::process::exit(1);
    }
    Ok(())
}

#[derive(Default)]
struct Summary {
    changed: usize,
    clean: usize,
    failed: usize,
}

impl Summary {
    fn of(reports: &[FileReport]) -> Self {
        let mut summary = Summary::default();
        for report in reports {
            match &report.outcome {
                Some(outcome) if report.error.is_none() && outcome.status.is_success() => {
                    if outcome.changed() {
                        summary.changed += 1;
                    } else {
                        summary.clean += 1;
                    }
                }
                _ => summary.failed += 1,
            }
        }
        summary
    }

    fn print(&self, dry_run: bool) {
        println!();
        println!("{}", "Summary:".bold());
        let verb = if dry_run { "would be fixed" } else { "fixed" };
        println!("  {} {}", format!("{}", self.changed).green(), verb);
        println!("  {} clean", format!("{}", self.clean).cyan());
        println!("  {} failed", format!("{}", self.failed).red());
    }
}

fn print_report(report: &FileReport, dry_run: bool, show_diff: bool) {
    let path = report.path.display();
    if let Some(error) = &report.error {
        eprintln!("{} {}: {}", "✗".red(), path, error);
    }
    let Some(outcome) = &report.outcome else {
        return;
    };

    let applied = outcome.report.total_applied();
    match &outcome.status {
        FixStatus::Converged if outcome.changed() => {
            let verb = if dry_run { "would apply" } else { "applied" };
            println!(
                "{} {}: {} {} fix(es) in {} pass(es)",
                "✓".green(),
                path,
                verb,
                applied,
                outcome.committed_passes
            );
        }
        FixStatus::Converged => println!("{} {}: clean", "⊙".cyan(), path),
        FixStatus::MaxIterationsExceeded => println!(
            "{} {}: stopped after {} passes without converging",
            "⊘".yellow(),
            path,
            outcome.iterations
        ),
        FixStatus::ValidationStopped { iteration, rules } => println!(
            "{} {}: pass {} broke the script (rules: {}); kept earlier fixes",
            "⊘".yellow(),
            path,
            iteration,
            rules.join(", ")
        ),
        FixStatus::RolledBack { reason } => {
            eprintln!("{} {}: rolled back - {}", "✗".red(), path, describe(reason));
        }
        FixStatus::ParseFailure { error } => {
            eprintln!("{} {}: cannot parse - {}", "✗".red(), path, error);
        }
        FixStatus::Cancelled { committed_passes } => println!(
            "{} {}: cancelled after {} committed pass(es)",
            "⊘".yellow(),
            path,
            committed_passes
        ),
    }

    for failure in &outcome.failures {
        eprintln!(
            "  {} {} (pass {}): {}",
            "rule failed:".yellow(),
            failure.rule_id,
            failure.iteration,
            failure.message
        );
    }
    if show_diff && outcome.report.changed {
        display_diff(&outcome.report.unified_diff);
    }
}

fn describe(reason: &RollbackReason) -> String {
    match reason {
        RollbackReason::Validation {
            rules,
            message,
            location,
        } => format!(
            "{} (rules: {}; near `{}`)",
            message,
            rules.join(", "),
            location.context
        ),
        RollbackReason::AnalyzerTimeout { message }
        | RollbackReason::Analyzer { message }
        | RollbackReason::Patch { message }
        | RollbackReason::Backup { message } => message.clone(),
    }
}

fn display_diff(diff: &str) {
    println!();
    for line in diff.lines() {
        let styled = if line.starts_with("+++") || line.starts_with("---") {
            line.dimmed()
        } else if line.starts_with("@@") {
            line.cyan()
        } else if line.starts_with('+') {
            line.green()
        } else if line.starts_with('-') {
            line.red()
        } else {
            line.normal()
        };
        println!("{styled}");
    }
}

#[derive(Serialize)]
struct RuleListing {
    id: &'static str,
    category: String,
    priority: i32,
    description: &'static str,
}

fn cmd_rules(json: bool) -> Result<()> {
    let registry = RuleRegistry::builtin();
    let listings: Vec<RuleListing> = registry
        .iter()
        .map(|rule| RuleListing {
            id: rule.id(),
            category: rule.category().to_string(),
            priority: rule.priority(),
            description: rule.description(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    println!("{}", "Registered rules:".bold());
    for listing in &listings {
        println!(
            "  {:<48} {:<14} {}",
            listing.id.green(),
            listing.category,
            listing.description.dimmed()
        );
    }
    Ok(())
}

fn cmd_restore(file: &Path, backup_dir: Option<PathBuf>) -> Result<()> {
    let store = backup_store(backup_dir);
    let id = document_id(file);
    let Some(record) = store.latest(&id)? else {
        bail!("no backup of {} in {}", file.display(), store.dir().display());
    };
    if !record.is_intact() {
        bail!(
            "backup of {} from {} is corrupt (content hash mismatch)",
            file.display(),
            record.timestamp
        );
    }
    atomic_write(file, record.original_text.as_bytes())
        .with_context(|| format!("failed to write {}", file.display()))?;
    println!(
        "{} {}: restored backup from {}",
        "✓".green(),
        file.display(),
        record.timestamp
    );
    Ok(())
}

fn cmd_prune(older_than_days: u32, backup_dir: Option<PathBuf>) -> Result<()> {
    let store = backup_store(backup_dir);
    let removed = store.purge_older_than(chrono::Duration::days(i64::from(older_than_days)))?;
    println!(
        "Removed {} backup(s) from {}",
        format!("{removed}").green(),
        store.dir().display()
    );
    Ok(())
}
