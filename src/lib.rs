//! dirsort - sort files into category folders
//!
//! This library classifies files by extension using an ordered rule table,
//! moves them into category folders (optionally partitioned by modification
//! date) with numbered-suffix conflict resolution, and can keep folders
//! organized by watching them for new files.

pub mod cli;
pub mod config;
pub mod file_category;
pub mod file_organizer;
pub mod output;
pub mod watcher;

pub use config::{ConfigError, OrganizerConfig, Policy, Settings, SettingsStore};
pub use file_category::{Rule, RuleTable};
pub use file_organizer::{
    BatchSummary, CancellationToken, FileOrganizer, MessageSink, OrganizeError, OrganizeReport,
    SinkMessage,
};
pub use watcher::FolderWatcher;

pub use cli::{Cli, run_cli};
