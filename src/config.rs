//! Organizer configuration.
//!
//! The on-disk document is merged over built-in defaults: every key is
//! optional, keys present in the document override the default, and unknown
//! keys are ignored. A document is validated and compiled into an immutable
//! [`Settings`] snapshot before anything uses it, so a malformed rule table
//! or policy is reported as [`ConfigError::ConfigInvalid`] at load time and
//! never halfway through a run.
//!
//! # Configuration File Format
//!
//! TOML is the default. Files ending in `.json` are read and written as JSON.
//!
//! ```toml
//! organize_by_date = true
//! date_format = "%Y-%m"
//! ignore_hidden = true
//! exclude_patterns = ["*.part", "*.crdownload"]
//! watched_folders = ["/home/me/Downloads"]
//! settle_delay_ms = 1000
//!
//! [[rules]]
//! category = "images"
//! folder = "images"
//! extensions = [".jpg", ".png"]
//!
//! [[rules]]
//! category = "documents"
//! folder = "documents"
//! extensions = [".pdf", ".txt"]
//! ```

use crate::file_category::{Rule, RuleTable, normalize_extension};
use crate::file_organizer::date_folder;
use chrono::Local;
use chrono::format::{Item, StrftimeItems};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = ".dirsortrc.toml";

/// Errors raised while loading, validating or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// The document does not parse, or parses into invalid rules or policy.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// An exclude pattern is not a valid glob.
    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidGlobPattern { pattern: String, reason: String },
    /// The date format contains an unknown strftime specifier.
    #[error("Invalid date format '{0}'")]
    InvalidDateFormat(String),
    /// IO error while reading or writing a configuration file.
    #[error("IO error on configuration file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One rule as written in the configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub category: String,
    pub folder: String,
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl From<&Rule> for RuleConfig {
    fn from(rule: &Rule) -> Self {
        Self {
            category: rule.category().to_string(),
            folder: rule.folder().to_string(),
            extensions: rule.extensions().iter().cloned().collect(),
        }
    }
}

/// The configuration document, with every field defaulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizerConfig {
    /// Partition the destination by the file's modification date.
    pub organize_by_date: bool,
    /// strftime format for the date folder.
    pub date_format: String,
    /// Leave dot-files where they are.
    pub ignore_hidden: bool,
    /// Where category folders are created. `None` organizes in place.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_root: Option<PathBuf>,
    /// Glob patterns matched against file names; matching files are skipped.
    pub exclude_patterns: Vec<String>,
    /// Folders the `watch` command observes when none is given on the command line.
    pub watched_folders: Vec<PathBuf>,
    /// Wait after a creation event before touching the new file.
    pub settle_delay_ms: u64,
    /// Capacity of the watch event queue.
    pub queue_capacity: usize,
    /// Ordered category rules.
    pub rules: Vec<RuleConfig>,
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        Self {
            organize_by_date: false,
            date_format: "%Y-%m".to_string(),
            ignore_hidden: true,
            destination_root: None,
            exclude_patterns: vec![
                "*.part".to_string(),
                "*.crdownload".to_string(),
                "*.tmp".to_string(),
            ],
            watched_folders: Vec::new(),
            settle_delay_ms: 1000,
            queue_capacity: 256,
            rules: RuleTable::builtin().rules().iter().map(RuleConfig::from).collect(),
        }
    }
}

impl OrganizerConfig {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.dirsortrc.toml` in the current directory
    /// 3. Look for `dirsort/config.toml` in the platform config directory
    /// 4. Fall back to default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but
    /// cannot be read, or if any file found does not parse.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.is_file() {
            return Self::load_from_file(&local_config);
        }

        if let Some(user_config) = Self::user_config_path()
            && user_config.is_file()
        {
            return Self::load_from_file(&user_config);
        }

        Ok(Self::default())
    }

    /// `<config_dir>/dirsort/config.toml`, if the platform has a config directory.
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dirsort").join("config.toml"))
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigNotFound` if file does not exist.
    /// Returns `ConfigError::ConfigInvalid` if parsing fails.
    /// Returns `ConfigError::Io` if file cannot be read.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if is_json(path) {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Write the whole document to `path`, replacing whatever was there.
    ///
    /// Parent directories are created as needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| ConfigError::ConfigInvalid(e.to_string()))?
        } else {
            toml::to_string_pretty(self).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))?
        };

        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, content).map_err(io_err)
    }

    /// Validate the document and compile it into an immutable snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if any rule, the date format or a glob pattern is invalid.
    pub fn compile(&self) -> Result<Settings, ConfigError> {
        let rules = compile_rules(&self.rules)?;
        for (ext, winner) in rules.overlapping_extensions() {
            tracing::warn!(
                extension = %ext,
                category = %winner,
                "extension appears in several rules; first rule wins"
            );
        }

        validate_date_format(&self.date_format)?;

        let exclude_patterns = self
            .exclude_patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|e| ConfigError::InvalidGlobPattern {
                    pattern: pattern.clone(),
                    reason: e.msg.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if self.queue_capacity == 0 {
            return Err(ConfigError::ConfigInvalid(
                "queue_capacity must be at least 1".to_string(),
            ));
        }

        Ok(Settings {
            rules,
            policy: Policy {
                organize_by_date: self.organize_by_date,
                date_format: self.date_format.clone(),
                ignore_hidden: self.ignore_hidden,
                destination_root: self.destination_root.clone(),
                exclude_patterns,
            },
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            queue_capacity: self.queue_capacity,
        })
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn compile_rules(rules: &[RuleConfig]) -> Result<RuleTable, ConfigError> {
    let mut categories = HashSet::new();
    let mut compiled = Vec::with_capacity(rules.len());

    for rule in rules {
        let category = rule.category.trim();
        if category.is_empty() {
            return Err(ConfigError::ConfigInvalid(
                "rule with empty category name".to_string(),
            ));
        }
        if !categories.insert(category.to_string()) {
            return Err(ConfigError::ConfigInvalid(format!(
                "duplicate category '{}'",
                category
            )));
        }
        validate_folder_label(category, &rule.folder)?;

        let extensions: Vec<String> = rule
            .extensions
            .iter()
            .filter_map(|ext| normalize_extension(ext))
            .collect();
        if extensions.is_empty() {
            return Err(ConfigError::ConfigInvalid(format!(
                "category '{}' has no extensions",
                category
            )));
        }

        compiled.push(Rule::new(category, rule.folder.trim(), extensions));
    }

    Ok(RuleTable::new(compiled))
}

/// A folder label must be exactly one normal path component.
fn validate_folder_label(category: &str, folder: &str) -> Result<(), ConfigError> {
    let folder = folder.trim();
    let mut components = Path::new(folder).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ConfigError::ConfigInvalid(format!(
            "category '{}' has invalid folder '{}': expected a single folder name",
            category, folder
        ))),
    }
}

/// A date format must be valid strftime and render to a path below the destination root.
fn validate_date_format(format: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidDateFormat(format.to_string());
    if format.trim().is_empty() || StrftimeItems::new(format).any(|item| item == Item::Error) {
        return Err(invalid());
    }

    let sample = date_folder(Local::now(), format).map_err(|_| invalid())?;
    let escapes = Path::new(&sample).components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(invalid());
    }
    Ok(())
}

/// Organizing options in effect for one run.
#[derive(Debug, Clone)]
pub struct Policy {
    pub organize_by_date: bool,
    pub date_format: String,
    pub ignore_hidden: bool,
    pub destination_root: Option<PathBuf>,
    pub exclude_patterns: Vec<Pattern>,
}

impl Policy {
    /// The glob pattern excluding `file_name`, if any.
    pub fn excluded_by(&self, file_name: &str) -> Option<&Pattern> {
        self.exclude_patterns
            .iter()
            .find(|pattern| pattern.matches(file_name))
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            organize_by_date: false,
            date_format: "%Y-%m".to_string(),
            ignore_hidden: true,
            destination_root: None,
            exclude_patterns: Vec::new(),
        }
    }
}

/// A validated, immutable rule table and policy.
///
/// Reconfiguration never mutates a `Settings`; it builds a new one.
#[derive(Debug, Clone)]
pub struct Settings {
    pub rules: RuleTable,
    pub policy: Policy,
    pub settle_delay: Duration,
    pub queue_capacity: usize,
}

impl Settings {
    /// Convenience for callers that build rules and policy in code.
    pub fn new(rules: RuleTable, policy: Policy) -> Self {
        Self {
            rules,
            policy,
            settle_delay: Duration::from_millis(1000),
            queue_capacity: 256,
        }
    }
}

impl Default for Settings {
    /// The builtin rule table with the default policy and watch timings.
    fn default() -> Self {
        Self::new(RuleTable::builtin(), Policy::default())
    }
}

/// Holds the active [`Settings`] snapshot and swaps it on reconfiguration.
///
/// Readers take an `Arc` and keep using it for the whole run, so a
/// reconfiguration never changes rules under an in-flight batch.
#[derive(Debug)]
pub struct SettingsStore {
    current: RwLock<Arc<Settings>>,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
        }
    }

    /// The snapshot active right now.
    pub fn snapshot(&self) -> Arc<Settings> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Validate `config` and make it the active snapshot.
    ///
    /// On error the previous snapshot stays active.
    pub fn reconfigure(&self, config: &OrganizerConfig) -> Result<Arc<Settings>, ConfigError> {
        let next = Arc::new(config.compile()?);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::clone(&next);
        tracing::info!(rules = next.rules.rules().len(), "configuration reloaded");
        Ok(next)
    }
}
