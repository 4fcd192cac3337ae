//! Run summary and per-file reporting

use std::time::Duration;

use crate::cli::VerbosityLevel;
use crate::processor::{BatchResults, FileReport, FileStatus};

/// Simple output formatter for human-readable results
pub struct Output {
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    /// Formatter that never emits color codes
    pub fn plain(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            show_colors: false,
        }
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_results(&self, results: &BatchResults) -> String {
        let mut output = String::new();

        match self.verbosity {
            VerbosityLevel::Quiet => {
                if results.has_failures() {
                    output.push_str(&format!(
                        "Load failures: {} Validation failures: {} Write failures: {} Log failures: {}\n",
                        results.load_failures + results.error_files,
                        results.validation_failures,
                        results.write_failures,
                        results.log_failures
                    ));
                }
            }
            VerbosityLevel::Normal | VerbosityLevel::Verbose | VerbosityLevel::Debug => {
                output.push_str(&self.format_summary(results));

                let show_all = self.verbosity >= VerbosityLevel::Verbose;
                let listed: Vec<&FileReport> = results
                    .file_results
                    .iter()
                    .filter(|r| show_all || r.status.is_failure() || r.log_error.is_some())
                    .collect();
                if !listed.is_empty() {
                    output.push('\n');
                    for file_result in listed {
                        output.push_str(&self.format_file_result(file_result));
                        output.push('\n');
                    }
                }
            }
        }

        output
    }

    pub fn format_file_result(&self, result: &FileReport) -> String {
        let path_display = result.path.display();
        let duration_str = format_duration(result.duration);

        let mut output = match &result.status {
            FileStatus::Written { output } => format!(
                "{}  {} ({}) -> {}",
                self.colorize("✓ WRITTEN", "32"),
                path_display,
                duration_str,
                output.display()
            ),
            FileStatus::Unchanged => format!(
                "{}  {} ({})",
                self.colorize("= UNCHANGED", "32"),
                path_display,
                duration_str
            ),
            FileStatus::ValidationFailed { error_count } => {
                let mut output = format!(
                    "{}  {} ({}) - {} error{}",
                    self.colorize("✗ INVALID", "31"),
                    path_display,
                    duration_str,
                    error_count,
                    if *error_count == 1 { "" } else { "s" }
                );
                if self.verbosity >= VerbosityLevel::Verbose {
                    for error_detail in &result.error_details {
                        output.push_str(&format!("\n    {}", error_detail));
                    }
                }
                output
            }
            FileStatus::LoadFailed { message }
            | FileStatus::WriteFailed { message }
            | FileStatus::Error { message } => format!(
                "{}  {} ({}) - {}",
                self.colorize("⚠ ERROR", "33"),
                path_display,
                duration_str,
                message
            ),
            FileStatus::Skipped { reason } => format!(
                "{}  {} - {}",
                self.colorize("- SKIPPED", "36"),
                path_display,
                reason
            ),
        };

        if let Some(log_error) = &result.log_error {
            output.push_str(&format!(
                "\n    {} {}",
                self.colorize("log not written:", "33"),
                log_error
            ));
        }

        if self.verbosity == VerbosityLevel::Debug {
            let o = &result.outcomes;
            output.push_str(&format!(
                "\n    rules: {} mutated, {} already correct, {} mismatched, {} not found, {} unresolvable",
                o.mutated, o.already_correct, o.mismatched, o.not_found, o.unresolvable
            ));
        }

        output
    }

    fn format_summary(&self, results: &BatchResults) -> String {
        let mut output = String::new();
        output.push_str("Rewrite Summary:\n");
        output.push_str(&format!("  Total files: {}\n", results.total_files));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Written:", "32"),
            results.written_files
        ));
        output.push_str(&format!("  Unchanged: {}\n", results.unchanged_files));

        let failures = [
            ("Validation failures:", results.validation_failures, "31"),
            ("Load failures:", results.load_failures, "33"),
            ("Write failures:", results.write_failures, "33"),
            ("Errors:", results.error_files, "33"),
            ("Log failures:", results.log_failures, "33"),
            ("Skipped:", results.skipped_files, "36"),
        ];
        for (label, count, color) in failures {
            if count > 0 {
                output.push_str(&format!("  {} {}\n", self.colorize(label, color), count));
            }
        }

        let o = &results.outcomes;
        output.push_str(&format!(
            "  Rules: {} mutated, {} already correct, {} mismatched, {} not found, {} unresolvable\n",
            o.mutated, o.already_correct, o.mismatched, o.not_found, o.unresolvable
        ));
        output.push_str(&format!(
            "  Duration: {}\n",
            format_duration(results.total_duration)
        ));

        output
    }
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{:.0}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::OutcomeCounts;
    use std::path::PathBuf;

    fn report(name: &str, status: FileStatus) -> FileReport {
        FileReport {
            path: PathBuf::from(name),
            status,
            outcomes: OutcomeCounts {
                mutated: 1,
                ..Default::default()
            },
            log_path: None,
            log_error: None,
            error_details: vec!["element b: not an integer".to_string()],
            duration: Duration::from_millis(5),
        }
    }

    fn create_test_results() -> BatchResults {
        BatchResults::aggregate(
            vec![
                report(
                    "a.xml",
                    FileStatus::Written {
                        output: PathBuf::from("out/a.xml"),
                    },
                ),
                report("b.xml", FileStatus::ValidationFailed { error_count: 1 }),
            ],
            Duration::from_millis(100),
        )
    }

    #[test]
    fn test_output_summary() {
        let output = Output::plain(VerbosityLevel::Normal);
        let formatted = output.format_results(&create_test_results());

        assert!(formatted.contains("Rewrite Summary:"));
        assert!(formatted.contains("Total files: 2"));
        assert!(formatted.contains("Written: 1"));
        assert!(formatted.contains("Validation failures: 1"));
        assert!(formatted.contains("Rules: 2 mutated"));
        assert!(formatted.contains("✗ INVALID  b.xml"));
        assert!(!formatted.contains("a.xml"));
    }

    #[test]
    fn test_verbose_lists_every_file_with_details() {
        let output = Output::plain(VerbosityLevel::Verbose);
        let formatted = output.format_results(&create_test_results());

        assert!(formatted.contains("✓ WRITTEN  a.xml"));
        assert!(formatted.contains("element b: not an integer"));
    }

    #[test]
    fn test_quiet_only_reports_failures() {
        let output = Output::plain(VerbosityLevel::Quiet);
        let formatted = output.format_results(&create_test_results());
        assert!(formatted.starts_with("Load failures: 0 Validation failures: 1"));

        let clean = BatchResults::aggregate(vec![], Duration::ZERO);
        assert!(output.format_results(&clean).is_empty());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30.0s");
    }
}
