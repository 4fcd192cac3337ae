//! Per-file audit trail
//!
//! Every processed input gets exactly one log, written after the document has
//! been handled, listing the rule outcomes in evaluation order followed by what
//! became of the output file.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::ValidationFailure;
use crate::mutation::{LogEntry, single_line};
use crate::writer::write_atomically;

/// Something that happened to a file as a whole
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// The parser repaired malformed markup
    Recovered { diagnostic: String },
    LoadFailed { error: String },
    SchemaValid { schema: PathBuf },
    SchemaInvalid { failure: ValidationFailure },
    Saved { output: PathBuf },
    NoChanges,
    WriteFailed { error: String },
}

impl fmt::Display for FileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileEvent::Recovered { diagnostic } => {
                write!(f, "Recovered from malformed markup: {}", diagnostic)
            }
            FileEvent::LoadFailed { error } => write!(f, "Error processing file: {}", error),
            FileEvent::SchemaValid { schema } => {
                write!(f, "XML validation passed against {}", schema.display())
            }
            FileEvent::SchemaInvalid { failure } => {
                write!(f, "{}. Skipping save due to validation failure", failure)
            }
            FileEvent::Saved { output } => write!(f, "Saved modified XML to {}", output.display()),
            FileEvent::NoChanges => write!(f, "No changes made to the file"),
            FileEvent::WriteFailed { error } => write!(f, "Error saving file: {}", error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Record {
    Rule(LogEntry),
    Event(FileEvent),
}

/// Buffered log for one input file
#[derive(Debug, Clone)]
pub struct AuditLog {
    source: String,
    started: DateTime<Utc>,
    records: Vec<Record>,
}

impl AuditLog {
    pub fn new(source: impl Into<String>, started: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            started,
            records: Vec::new(),
        }
    }

    pub fn record_rules(&mut self, entries: impl IntoIterator<Item = LogEntry>) {
        self.records.extend(entries.into_iter().map(Record::Rule));
    }

    pub fn record(&mut self, event: FileEvent) {
        self.records.push(Record::Event(event));
    }

    /// Rule outcomes in the order they were recorded
    pub fn rule_entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.records.iter().filter_map(|record| match record {
            Record::Rule(entry) => Some(entry),
            Record::Event(_) => None,
        })
    }

    pub fn events(&self) -> impl Iterator<Item = &FileEvent> {
        self.records.iter().filter_map(|record| match record {
            Record::Event(event) => Some(event),
            Record::Rule(_) => None,
        })
    }

    /// The log as text, one line per record after the header
    pub fn render(&self) -> String {
        let mut out = format!(
            "Processing file: {} ({})\n",
            self.source,
            self.started.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        for record in &self.records {
            match record {
                Record::Rule(entry) => out.push_str(&entry.to_string()),
                Record::Event(event) => out.push_str(&single_line(&event.to_string())),
            }
            out.push('\n');
        }
        out
    }

    /// Write the rendered log to `path`, replacing any previous log
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        write_atomically(path, self.render().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::Outcome;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
    }

    fn entry(path: &str, outcome: Outcome) -> LogEntry {
        LogEntry {
            rule_path: path.to_string(),
            target: None,
            outcome,
        }
    }

    #[test]
    fn test_render_order_and_header() {
        let mut log = AuditLog::new("a.xml", started());
        log.record_rules(vec![
            entry(
                "/a/b",
                Outcome::Mutated {
                    old: "X".to_string(),
                    new: "Y".to_string(),
                },
            ),
            entry("/a/c", Outcome::NotFound),
        ]);
        log.record(FileEvent::Saved {
            output: PathBuf::from("out/a.xml"),
        });

        let text = log.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Processing file: a.xml (2024-05-01T12:30:00Z)");
        assert_eq!(lines[1], "Updated /a/b from 'X' to 'Y'");
        assert_eq!(lines[2], "Path not found: /a/c");
        assert_eq!(lines[3], "Saved modified XML to out/a.xml");
        assert_eq!(lines.len(), 4);

        assert_eq!(log.rule_entries().count(), 2);
        assert_eq!(log.events().count(), 1);
    }

    #[test]
    fn test_validation_failure_is_one_line() {
        let mut log = AuditLog::new("a.xml", started());
        log.record(FileEvent::SchemaInvalid {
            failure: ValidationFailure {
                schema: PathBuf::from("s.xsd"),
                errors: vec!["e1".to_string(), "e2".to_string()],
            },
        });

        let text = log.render();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("e1; e2"));
        assert!(text.contains("Skipping save"));
    }

    #[test]
    fn test_multiline_diagnostic_is_one_line() {
        let mut log = AuditLog::new("a.xml", started());
        log.record(FileEvent::Recovered {
            diagnostic: "line 1: premature end of data\n".to_string(),
        });

        let text = log.render();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("premature end of data\\n"));
    }

    #[test]
    fn test_write_to_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("a.log");

        let mut log = AuditLog::new("a.xml", started());
        log.record(FileEvent::NoChanges);
        log.write_to(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.ends_with("No changes made to the file\n"));
    }
}
