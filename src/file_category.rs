//! Extension-based file classification.
//!
//! A [`RuleTable`] is an ordered list of categories, each owning a set of
//! extensions and the folder label files of that category are moved into.
//! Classification scans the table in order and returns the first rule whose
//! extension set contains the file's extension.
//!
//! # Examples
//!
//! ```
//! use dirsort::file_category::{Rule, RuleTable};
//!
//! let table = RuleTable::new(vec![Rule::new("documents", "docs", [".pdf"])]);
//! assert_eq!(table.classify("report.PDF").folder, "docs");
//! assert_eq!(table.classify("song.mp3").folder, "uncategorized");
//! ```

use std::collections::BTreeSet;
use std::path::Path;

/// Category name used when no rule matches.
pub const FALLBACK_CATEGORY: &str = "uncategorized";

/// Folder label used when no rule matches.
pub const FALLBACK_FOLDER: &str = "uncategorized";

/// One category of files and where they go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    category: String,
    folder: String,
    extensions: BTreeSet<String>,
}

impl Rule {
    /// Creates a rule, normalizing every extension to lowercase with a leading dot.
    pub fn new<I, S>(category: impl Into<String>, folder: impl Into<String>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            category: category.into(),
            folder: folder.into(),
            extensions: extensions
                .into_iter()
                .filter_map(|ext| normalize_extension(ext.as_ref()))
                .collect(),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn extensions(&self) -> &BTreeSet<String> {
        &self.extensions
    }

    /// Returns true if `extension` (already normalized) belongs to this rule.
    pub fn matches(&self, extension: &str) -> bool {
        self.extensions.contains(extension)
    }
}

/// The outcome of classifying a single file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification<'a> {
    pub category: &'a str,
    pub folder: &'a str,
}

impl Classification<'_> {
    /// True when no rule matched and the fallback was used.
    pub fn is_fallback(&self) -> bool {
        self.category == FALLBACK_CATEGORY && self.folder == FALLBACK_FOLDER
    }
}

/// Ordered category rules. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// The table shipped with the tool, used when the configuration has no `rules` key.
    pub fn builtin() -> Self {
        Self::new(vec![
            Rule::new(
                "images",
                "images",
                [".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff", ".svg", ".webp"],
            ),
            Rule::new(
                "documents",
                "documents",
                [
                    ".pdf", ".doc", ".docx", ".txt", ".rtf", ".odt", ".xls", ".xlsx", ".ppt",
                    ".pptx",
                ],
            ),
            Rule::new(
                "audio",
                "audio",
                [".mp3", ".wav", ".flac", ".aac", ".m4a", ".ogg", ".wma"],
            ),
            Rule::new(
                "video",
                "videos",
                [".mp4", ".avi", ".mkv", ".mov", ".wmv", ".flv", ".webm", ".m4v"],
            ),
            Rule::new(
                "code",
                "code",
                [
                    ".py", ".js", ".html", ".css", ".cpp", ".c", ".java", ".php", ".rb", ".go",
                    ".rs",
                ],
            ),
            Rule::new(
                "archives",
                "archives",
                [".zip", ".rar", ".7z", ".tar", ".gz", ".bz2"],
            ),
            Rule::new(
                "executables",
                "executables",
                [".exe", ".msi", ".deb", ".rpm", ".dmg", ".app"],
            ),
        ])
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Classifies a file by the extension of `file_name`.
    ///
    /// Only the last extension counts (`backup.tar.gz` is `.gz`), and a name
    /// that is only a dot-prefixed stem (`.bashrc`) has no extension.
    pub fn classify(&self, file_name: impl AsRef<Path>) -> Classification<'_> {
        extension_of(file_name.as_ref())
            .and_then(|ext| self.rules.iter().find(|rule| rule.matches(&ext)))
            .map(|rule| Classification {
                category: &rule.category,
                folder: &rule.folder,
            })
            .unwrap_or(Classification {
                category: FALLBACK_CATEGORY,
                folder: FALLBACK_FOLDER,
            })
    }

    /// Extensions claimed by more than one rule, with the rule that wins.
    pub fn overlapping_extensions(&self) -> Vec<(String, String)> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut overlaps = Vec::new();
        for rule in &self.rules {
            for ext in &rule.extensions {
                if !seen.insert(ext.as_str()) {
                    let winner = self
                        .rules
                        .iter()
                        .find(|r| r.matches(ext))
                        .map(|r| r.category.clone())
                        .unwrap_or_default();
                    overlaps.push((ext.clone(), winner));
                }
            }
        }
        overlaps
    }
}

/// Lowercases a rule extension and makes sure it carries a leading dot.
///
/// Surrounding whitespace is trimmed. Returns `None` for empty input.
pub fn normalize_extension(ext: &str) -> Option<String> {
    let trimmed = ext.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!(".{}", trimmed.to_lowercase()))
}

/// The case-folded, dot-prefixed extension of a path, if it has one.
///
/// The name is taken as-is: `report.pdf ` has the extension `.pdf `.
pub fn extension_of(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_string_lossy();
    if ext.is_empty() {
        return None;
    }
    Some(format!(".{}", ext.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs_table() -> RuleTable {
        RuleTable::new(vec![Rule::new("documents", "docs", [".pdf", ".txt"])])
    }

    #[test]
    fn test_empty_table_falls_back() {
        let table = RuleTable::default();
        let class = table.classify("report.pdf");
        assert_eq!(class.category, FALLBACK_CATEGORY);
        assert_eq!(class.folder, FALLBACK_FOLDER);
        assert!(class.is_fallback());
    }

    #[test]
    fn test_matching_rule_wins_over_fallback() {
        let table = docs_table();
        let class = table.classify("report.pdf");
        assert_eq!(class.category, "documents");
        assert_eq!(class.folder, "docs");
        assert!(!class.is_fallback());
    }

    #[test]
    fn test_classify_is_case_insensitive() {
        let table = docs_table();
        assert_eq!(table.classify("REPORT.PDF").folder, "docs");
        assert_eq!(table.classify("notes.Txt").folder, "docs");
    }

    #[test]
    fn test_rule_extensions_are_normalized() {
        let rule = Rule::new("images", "images", ["PNG", ".JpG", "", "  .gif "]);
        let exts: Vec<_> = rule.extensions().iter().cloned().collect();
        assert_eq!(exts, vec![".gif", ".jpg", ".png"]);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let table = RuleTable::new(vec![
            Rule::new("first", "one", [".dat"]),
            Rule::new("second", "two", [".dat", ".bin"]),
        ]);
        assert_eq!(table.classify("x.dat").category, "first");
        assert_eq!(table.classify("x.bin").category, "second");
        assert_eq!(
            table.overlapping_extensions(),
            vec![(".dat".to_string(), "first".to_string())]
        );
    }

    #[test]
    fn test_files_without_extension_fall_back() {
        let table = docs_table();
        assert!(table.classify("Makefile").is_fallback());
        assert!(table.classify(".bashrc").is_fallback());
        assert!(table.classify("trailing.").is_fallback());
    }

    #[test]
    fn test_file_name_whitespace_is_not_trimmed() {
        let table = docs_table();
        assert!(table.classify("report.pdf ").is_fallback());
        assert!(table.classify("report. pdf").is_fallback());
        assert_eq!(extension_of(Path::new("report.pdf ")), Some(".pdf ".to_string()));
    }

    #[test]
    fn test_only_last_extension_counts() {
        let table = RuleTable::builtin();
        assert_eq!(table.classify("backup.tar.gz").category, "archives");
        assert_eq!(table.classify("photo.png.txt").category, "documents");
    }

    #[test]
    fn test_builtin_table() {
        let table = RuleTable::builtin();
        assert_eq!(table.rules().len(), 7);
        assert!(table.overlapping_extensions().is_empty());
        assert_eq!(table.classify("clip.MKV").folder, "videos");
        assert_eq!(table.classify("main.rs").category, "code");
        assert_eq!(table.classify("setup.exe").category, "executables");
        assert!(table.classify("data.xyz").is_fallback());
    }

    #[test]
    fn test_classify_accepts_full_paths() {
        let table = docs_table();
        assert_eq!(table.classify(Path::new("/tmp/in/a.pdf")).folder, "docs");
    }
}
