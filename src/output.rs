//! Console output: colored status lines, a progress bar for bulk runs and
//! the per-category summary table.

use crate::file_organizer::{BatchSummary, MessageSink, OrganizeReport, SinkMessage};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Stateless helpers for styled terminal output.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints an info message in cyan.
    ///
    /// ```no_run
    /// use dirsort::output::OutputFormatter;
    /// OutputFormatter::info("Organizing directory: /home/user/Downloads");
    /// ```
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Creates a progress bar for `total` files.
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map(|style| style.progress_chars("█▓░"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    }

    /// Renders a single file outcome with the color matching its status.
    pub fn report_line(report: &OrganizeReport) -> String {
        let line = report.to_string();
        if report.is_success() {
            line.green().to_string()
        } else if report.is_skipped() {
            line.dimmed().to_string()
        } else {
            line.red().to_string()
        }
    }

    /// Prints a summary table with file counts by category.
    ///
    /// ```no_run
    /// use dirsort::output::OutputFormatter;
    /// use std::collections::BTreeMap;
    ///
    /// let mut counts = BTreeMap::new();
    /// counts.insert("documents".to_string(), 15);
    /// counts.insert("images".to_string(), 8);
    /// OutputFormatter::summary_table(&counts, 23);
    /// ```
    pub fn summary_table(category_counts: &BTreeMap<String, usize>, total_files: usize) {
        Self::header("SUMMARY");

        let width = category_counts
            .keys()
            .map(String::len)
            .max()
            .unwrap_or(0)
            .max(8); // At least "Category" width

        println!(
            "{:<width$} | {}",
            "Category".bold(),
            "Files".bold(),
            width = width
        );
        println!("{}", "-".repeat(width + 10));

        for (category, count) in category_counts {
            println!(
                "{:<width$} | {} {}",
                category,
                count.to_string().green(),
                plural(*count),
                width = width
            );
        }

        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total_files.to_string().green().bold(),
            plural(total_files),
            width = width
        );
    }

    /// Prints the totals line of a bulk run, plus the category table if anything moved.
    pub fn batch_summary(summary: &BatchSummary) {
        if !summary.by_category.is_empty() {
            Self::summary_table(&summary.by_category, summary.organized);
        }
        let line = summary.to_string();
        if summary.errors > 0 || summary.cancelled {
            Self::warning(&line);
        } else {
            Self::success(&line);
        }
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}

/// Sink that prints each outcome to the terminal.
///
/// Bulk runs get a progress bar; outcome lines are printed above it.
#[derive(Default)]
pub struct ConsoleSink {
    progress: Mutex<Option<ProgressBar>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageSink for ConsoleSink {
    fn message(&self, message: &SinkMessage<'_>) {
        let mut progress = match self.progress.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match message {
            SinkMessage::Started { total, .. } => {
                OutputFormatter::info(&message.to_string());
                *progress = Some(OutputFormatter::create_progress_bar(*total as u64));
            }
            SinkMessage::File(report) => {
                let line = OutputFormatter::report_line(report);
                match progress.as_ref() {
                    Some(pb) => {
                        pb.println(line);
                        pb.inc(1);
                    }
                    None => OutputFormatter::plain(&line),
                }
            }
            SinkMessage::Finished(summary) => {
                if let Some(pb) = progress.take() {
                    pb.finish_and_clear();
                }
                OutputFormatter::batch_summary(summary);
            }
        }
    }
}
