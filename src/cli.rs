//! Command-line interface for dirsort.
//!
//! This module handles:
//! - Argument parsing (`clap` derive)
//! - Loading configuration and applying command-line overrides
//! - Running bulk organization, dry runs and the folder watcher
//! - The `config` maintenance subcommands

use crate::config::{ConfigError, LOCAL_CONFIG_FILE, OrganizerConfig, SettingsStore};
use crate::file_organizer::{BatchSummary, FileOrganizer, MessageSink, OrganizeError};
use crate::output::{ConsoleSink, OutputFormatter};
use crate::watcher::{FolderWatcher, WatchError};
use clap::{Args, Parser, Subcommand};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(name = "dirsort", version, about = "Sort files into category folders")]
pub struct Cli {
    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log engine decisions to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Organize the files directly inside a directory
    Organize {
        dir: PathBuf,

        /// Show where files would go without moving anything
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        overrides: PolicyOverrides,
    },
    /// Keep organizing files as they appear
    Watch {
        /// Folders to watch; defaults to `watched_folders` from the configuration
        dirs: Vec<PathBuf>,

        /// Organize files already present before watching
        #[arg(long)]
        organize_existing: bool,

        /// Milliseconds to wait after a file appears before moving it
        #[arg(long)]
        settle_ms: Option<u64>,

        #[command(flatten)]
        overrides: PolicyOverrides,
    },
    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration
    Init {
        /// Target file; defaults to the user configuration path
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Check that the configuration loads and compiles
    Validate,
}

/// Policy switches that override the configuration file for one run.
#[derive(Debug, Clone, Default, Args)]
pub struct PolicyOverrides {
    /// Put files into date folders by modification time
    #[arg(long)]
    pub by_date: bool,

    /// strftime format for date folders (e.g. %Y-%m-%d)
    #[arg(long)]
    pub date_format: Option<String>,

    /// Organize hidden files too
    #[arg(long)]
    pub include_hidden: bool,

    /// Create category folders under this directory instead of in place
    #[arg(long)]
    pub dest: Option<PathBuf>,
}

impl PolicyOverrides {
    pub fn apply(&self, config: &mut OrganizerConfig) {
        if self.by_date {
            config.organize_by_date = true;
        }
        if let Some(format) = &self.date_format {
            config.date_format = format.clone();
        }
        if self.include_hidden {
            config.ignore_hidden = false;
        }
        if let Some(dest) = &self.dest {
            config.destination_root = Some(dest.clone());
        }
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Organize(#[from] OrganizeError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{count} file(s) could not be organized")]
    Incomplete { count: usize },
    #[error("{}", .0)]
    Usage(String),
}

/// Runs the parsed command line.
///
/// ```no_run
/// use clap::Parser;
/// use dirsort::cli::{Cli, run_cli};
///
/// let cli = Cli::parse_from(["dirsort", "organize", "/tmp/downloads", "--dry-run"]);
/// if let Err(e) = run_cli(&cli) {
///     eprintln!("Error: {}", e);
/// }
/// ```
pub fn run_cli(cli: &Cli) -> Result<(), CliError> {
    let config_path = cli.config.as_deref();
    match &cli.command {
        Command::Organize {
            dir,
            dry_run,
            overrides,
        } => {
            let config = load_with_overrides(config_path, overrides)?;
            if *dry_run {
                organize_dry_run(dir, &config)
            } else {
                organize(dir, &config)
            }
        }
        Command::Watch {
            dirs,
            organize_existing,
            settle_ms,
            overrides,
        } => {
            let mut config = load_with_overrides(config_path, overrides)?;
            if let Some(ms) = settle_ms {
                config.settle_delay_ms = *ms;
            }
            let roots = if dirs.is_empty() {
                config.watched_folders.clone()
            } else {
                dirs.clone()
            };
            watch(roots, config, config_path, overrides, *organize_existing)
        }
        Command::Config { action } => run_config_action(action, config_path),
    }
}

fn load_with_overrides(
    config_path: Option<&Path>,
    overrides: &PolicyOverrides,
) -> Result<OrganizerConfig, ConfigError> {
    let mut config = OrganizerConfig::load(config_path)?;
    overrides.apply(&mut config);
    Ok(config)
}

/// Organizes `dir` with the console sink and fails if any file failed.
pub fn organize(dir: &Path, config: &OrganizerConfig) -> Result<(), CliError> {
    let organizer = FileOrganizer::new(Arc::new(config.compile()?));
    let sink = ConsoleSink::new();
    let summary = organizer.organize_directory(dir, Some(&sink), None)?;

    if summary.errors > 0 {
        return Err(CliError::Incomplete {
            count: summary.errors,
        });
    }
    Ok(())
}

/// Prints where each file would go without moving anything.
pub fn organize_dry_run(dir: &Path, config: &OrganizerConfig) -> Result<(), CliError> {
    let organizer = FileOrganizer::new(Arc::new(config.compile()?));
    OutputFormatter::dry_run_notice(&format!("Analyzing contents of: {}", dir.display()));

    let plans = organizer.plan_directory(dir)?;
    if plans.is_empty() {
        OutputFormatter::plain("No files found to organize.");
        return Ok(());
    }

    let mut counts = std::collections::BTreeMap::new();
    let mut planned = 0;
    for (file, plan) in &plans {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match plan {
            Ok(plan) => {
                OutputFormatter::plain(&format!(" - {} → {}", name, plan.relative.display()));
                *counts.entry(plan.category.clone()).or_insert(0) += 1;
                planned += 1;
            }
            Err(e) if e.is_skip() => OutputFormatter::plain(&format!(" - {}", e)),
            Err(e) => OutputFormatter::error(&e.to_string()),
        }
    }

    OutputFormatter::summary_table(&counts, planned);
    OutputFormatter::dry_run_notice("No files were modified.");
    Ok(())
}

/// Bulk-organizes each root before watching it.
///
/// Per-file failures are reported and counted but do not stop the watcher
/// from starting; only a missing or unreadable root is fatal.
pub fn organize_existing_files(
    roots: &[PathBuf],
    config: &OrganizerConfig,
) -> Result<Vec<BatchSummary>, CliError> {
    let organizer = FileOrganizer::new(Arc::new(config.compile()?));
    let sink = ConsoleSink::new();
    let mut summaries = Vec::with_capacity(roots.len());
    for root in roots {
        let summary = organizer.organize_directory(root, Some(&sink), None)?;
        if summary.errors > 0 {
            tracing::warn!(
                root = %root.display(),
                errors = summary.errors,
                "some existing files could not be organized"
            );
        }
        summaries.push(summary);
    }
    Ok(summaries)
}

fn watch(
    roots: Vec<PathBuf>,
    config: OrganizerConfig,
    config_path: Option<&Path>,
    overrides: &PolicyOverrides,
    organize_existing: bool,
) -> Result<(), CliError> {
    if roots.is_empty() {
        return Err(CliError::Usage(
            "no folders given and no watched_folders configured".to_string(),
        ));
    }

    if organize_existing {
        organize_existing_files(&roots, &config)?;
    }

    let store = Arc::new(SettingsStore::new(config.compile()?));
    let sink: Arc<dyn MessageSink> = Arc::new(ConsoleSink::new());
    let watcher = FolderWatcher::start(roots, Arc::clone(&store), Some(sink))?;

    for root in watcher.roots() {
        OutputFormatter::info(&format!("Watching: {}", root.display()));
    }
    OutputFormatter::plain(
        "Press Enter to stop, or type 'r' and Enter to reload the configuration.",
    );

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            // No terminal attached: keep watching until the process is killed.
            loop {
                std::thread::park();
            }
        }
        match line.trim() {
            "r" | "reload" => {
                let reloaded = load_with_overrides(config_path, overrides)
                    .and_then(|config| store.reconfigure(&config));
                match reloaded {
                    Ok(_) => OutputFormatter::success("Configuration reloaded"),
                    Err(e) => {
                        OutputFormatter::error(&format!("Keeping previous configuration: {}", e))
                    }
                }
            }
            _ => break,
        }
    }

    OutputFormatter::info("Stopping watcher, finishing queued files...");
    watcher.stop();
    Ok(())
}

fn run_config_action(action: &ConfigAction, config_path: Option<&Path>) -> Result<(), CliError> {
    match action {
        ConfigAction::Show => {
            let config = OrganizerConfig::load(config_path)?;
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| ConfigError::ConfigInvalid(e.to_string()))?;
            OutputFormatter::plain(&rendered);
            Ok(())
        }
        ConfigAction::Init { path, force } => {
            let target = path
                .clone()
                .or_else(OrganizerConfig::user_config_path)
                .unwrap_or_else(|| PathBuf::from(LOCAL_CONFIG_FILE));
            if target.exists() && !force {
                return Err(CliError::Usage(format!(
                    "{} already exists (use --force to overwrite)",
                    target.display()
                )));
            }
            OrganizerConfig::default().save(&target)?;
            OutputFormatter::success(&format!("Wrote {}", target.display()));
            Ok(())
        }
        ConfigAction::Validate => {
            let settings = OrganizerConfig::load(config_path)?.compile()?;
            OutputFormatter::success(&format!(
                "Configuration is valid ({} rules)",
                settings.rules.rules().len()
            ));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_organize_with_overrides() {
        let cli = Cli::parse_from([
            "dirsort",
            "organize",
            "/tmp/in",
            "--dry-run",
            "--by-date",
            "--date-format",
            "%Y",
            "--dest",
            "/tmp/out",
        ]);
        match cli.command {
            Command::Organize {
                dir,
                dry_run,
                overrides,
            } => {
                assert_eq!(dir, PathBuf::from("/tmp/in"));
                assert!(dry_run);
                let mut config = OrganizerConfig::default();
                overrides.apply(&mut config);
                assert!(config.organize_by_date);
                assert_eq!(config.date_format, "%Y");
                assert!(config.ignore_hidden);
                assert_eq!(config.destination_root, Some(PathBuf::from("/tmp/out")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_watch_defaults_to_configured_folders() {
        let cli = Cli::parse_from(["dirsort", "-c", "cfg.toml", "watch", "--settle-ms", "250"]);
        assert_eq!(cli.config, Some(PathBuf::from("cfg.toml")));
        match cli.command {
            Command::Watch {
                dirs, settle_ms, ..
            } => {
                assert!(dirs.is_empty());
                assert_eq!(settle_ms, Some(250));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_empty_overrides_leave_config_alone() {
        let mut config = OrganizerConfig::default();
        PolicyOverrides::default().apply(&mut config);
        assert_eq!(config, OrganizerConfig::default());
    }

    #[test]
    fn test_organize_existing_keeps_going_past_failed_files() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let inbox = temp_dir.path().join("inbox");
        let out = temp_dir.path().join("out");
        std::fs::create_dir_all(&inbox).unwrap();
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(inbox.join("a.pdf"), "pdf").unwrap();
        std::fs::write(inbox.join("b.png"), "png").unwrap();
        // A plain file where the documents folder should go.
        std::fs::write(out.join("documents"), "blocker").unwrap();

        let config = OrganizerConfig {
            destination_root: Some(out.clone()),
            ..OrganizerConfig::default()
        };
        let summaries = organize_existing_files(&[inbox.clone()], &config).unwrap();

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].organized, 1);
        assert_eq!(summaries[0].errors, 1);
        assert!(out.join("images/b.png").exists());
        assert!(inbox.join("a.pdf").exists());
    }

    #[test]
    fn test_organize_existing_fails_on_missing_root() {
        let result = organize_existing_files(
            &[PathBuf::from("/non/existent/inbox")],
            &OrganizerConfig::default(),
        );
        assert!(matches!(
            result,
            Err(CliError::Organize(OrganizeError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
