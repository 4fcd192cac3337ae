//! Concurrent Rewrite Engine
//!
//! Files are processed by semaphore-bounded tokio tasks. Each task hands its
//! file to a blocking thread that runs the whole per-file pipeline:
//! load, apply rules in order, validate, write, log.
//!
//! Every task owns its document and its audit log; the only shared state is
//! read-only (configuration, compiled schema) plus the cancellation flag.

use futures::future::try_join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::audit::{AuditLog, FileEvent};
use crate::config::{Config, ConfigManager};
use crate::document::DocumentLoader;
use crate::error::{ConfigResult, Result, RewriteError};
use crate::file_discovery::{DiscoveredFile, FileDiscovery};
use crate::libxml2::LibXml2Wrapper;
use crate::mutation::{LogEntry, MutationEngine, Outcome};
use crate::resolver::NodeResolver;
use crate::schema::SchemaValidator;
use crate::writer::DocumentWriter;

/// What became of a single input file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FileStatus {
    /// At least one rule changed the document and it was written
    Written { output: PathBuf },
    /// No rule changed the document; nothing was written
    Unchanged,
    /// The rewritten tree failed schema validation; nothing was written
    ValidationFailed { error_count: usize },
    /// The file could not be read or parsed
    LoadFailed { message: String },
    /// The rewritten document could not be saved
    WriteFailed { message: String },
    /// The file was never started
    Skipped { reason: String },
    /// Processing aborted unexpectedly
    Error { message: String },
}

impl FileStatus {
    /// Check if the file counts against a clean run
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FileStatus::ValidationFailed { .. }
                | FileStatus::LoadFailed { .. }
                | FileStatus::WriteFailed { .. }
                | FileStatus::Error { .. }
        )
    }

    pub fn is_written(&self) -> bool {
        matches!(self, FileStatus::Written { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, FileStatus::Skipped { .. })
    }
}

/// Rule outcome tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub mutated: usize,
    pub already_correct: usize,
    pub mismatched: usize,
    pub not_found: usize,
    pub unresolvable: usize,
}

impl OutcomeCounts {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LogEntry>) -> Self {
        let mut counts = Self::default();
        for entry in entries {
            match entry.outcome {
                Outcome::Mutated { .. } => counts.mutated += 1,
                Outcome::AlreadyCorrect { .. } => counts.already_correct += 1,
                Outcome::Mismatch { .. } => counts.mismatched += 1,
                Outcome::NotFound => counts.not_found += 1,
                Outcome::Unresolvable { .. } => counts.unresolvable += 1,
            }
        }
        counts
    }

    fn add(&mut self, other: &OutcomeCounts) {
        self.mutated += other.mutated;
        self.already_correct += other.already_correct;
        self.mismatched += other.mismatched;
        self.not_found += other.not_found;
        self.unresolvable += other.unresolvable;
    }
}

/// Result of processing a single file
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    /// Path relative to the input directory
    pub path: PathBuf,
    pub status: FileStatus,
    pub outcomes: OutcomeCounts,
    /// Where the audit log went, if it was written
    pub log_path: Option<PathBuf>,
    /// Why the audit log could not be written
    pub log_error: Option<String>,
    /// Validator messages or error text behind a failure
    pub error_details: Vec<String>,
    pub duration: Duration,
}

impl FileReport {
    fn skipped(path: PathBuf, reason: &str) -> Self {
        Self {
            path,
            status: FileStatus::Skipped {
                reason: reason.to_string(),
            },
            outcomes: OutcomeCounts::default(),
            log_path: None,
            log_error: None,
            error_details: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    fn error(path: PathBuf, message: String, duration: Duration) -> Self {
        Self {
            path,
            status: FileStatus::Error {
                message: message.clone(),
            },
            outcomes: OutcomeCounts::default(),
            log_path: None,
            log_error: None,
            error_details: vec![message],
            duration,
        }
    }
}

/// Aggregated results of a run
#[derive(Debug, Clone, Serialize)]
pub struct BatchResults {
    pub total_files: usize,
    pub written_files: usize,
    pub unchanged_files: usize,
    pub validation_failures: usize,
    pub load_failures: usize,
    pub write_failures: usize,
    pub error_files: usize,
    pub skipped_files: usize,
    /// Files whose audit log could not be written
    pub log_failures: usize,
    pub outcomes: OutcomeCounts,
    pub total_duration: Duration,
    pub file_results: Vec<FileReport>,
}

impl BatchResults {
    /// Aggregate individual file reports into a summary
    pub fn aggregate(file_results: Vec<FileReport>, total_duration: Duration) -> Self {
        let mut results = Self {
            total_files: file_results.len(),
            written_files: 0,
            unchanged_files: 0,
            validation_failures: 0,
            load_failures: 0,
            write_failures: 0,
            error_files: 0,
            skipped_files: 0,
            log_failures: 0,
            outcomes: OutcomeCounts::default(),
            total_duration,
            file_results: Vec::new(),
        };

        for report in &file_results {
            match report.status {
                FileStatus::Written { .. } => results.written_files += 1,
                FileStatus::Unchanged => results.unchanged_files += 1,
                FileStatus::ValidationFailed { .. } => results.validation_failures += 1,
                FileStatus::LoadFailed { .. } => results.load_failures += 1,
                FileStatus::WriteFailed { .. } => results.write_failures += 1,
                FileStatus::Error { .. } => results.error_files += 1,
                FileStatus::Skipped { .. } => results.skipped_files += 1,
            }
            if report.log_error.is_some() {
                results.log_failures += 1;
            }
            results.outcomes.add(&report.outcomes);
        }

        results.file_results = file_results;
        results
    }

    /// Check if any file had a load, validation, write or log failure
    pub fn has_failures(&self) -> bool {
        self.file_results.iter().any(|r| r.status.is_failure()) || self.log_failures > 0
    }

    /// Check if the run was interrupted before every file was started
    pub fn was_cancelled(&self) -> bool {
        self.skipped_files > 0
    }
}

/// Everything a worker needs to take one file from input to output
#[derive(Debug, Clone)]
pub struct FileProcessor {
    config: Arc<Config>,
    loader: DocumentLoader,
    mutation: MutationEngine,
    validator: Option<SchemaValidator>,
    writer: DocumentWriter,
}

impl FileProcessor {
    /// Build the pipeline; compiles the schema when validation is enabled
    pub fn new(config: Arc<Config>) -> ConfigResult<Self> {
        let libxml2 = Arc::new(LibXml2Wrapper::new());

        let validator = match &config.schema_validation {
            Some(schema) => Some(SchemaValidator::load(
                Arc::clone(&libxml2),
                &schema.schema_path,
            )?),
            None => None,
        };

        Ok(Self {
            loader: DocumentLoader::new(Arc::clone(&libxml2), config.handle_cdata),
            mutation: MutationEngine::new(NodeResolver::new(
                Arc::clone(&libxml2),
                config.namespace_bindings().clone(),
            )),
            validator,
            writer: DocumentWriter::new(
                libxml2,
                config.output_encoding.clone(),
                config.pretty_print,
            ),
            config,
        })
    }

    /// Mirrored output location of an input file
    pub fn output_path(&self, file: &DiscoveredFile) -> PathBuf {
        self.config.output_directory.join(&file.relative)
    }

    /// Location of the audit log for an input file
    pub fn log_path(&self, file: &DiscoveredFile) -> PathBuf {
        self.output_path(file)
            .with_extension(&self.config.processing.log_extension)
    }

    /// Run the full pipeline for one file. Blocking.
    pub fn process(&self, file: &DiscoveredFile) -> FileReport {
        let start = Instant::now();
        let mut audit = AuditLog::new(file.relative.display().to_string(), Utc::now());
        let mut outcomes = OutcomeCounts::default();
        let mut error_details = Vec::new();

        let status = match self.loader.load(&file.path) {
            Err(e) => {
                warn!(error = %e, "cannot load document");
                audit.record(FileEvent::LoadFailed {
                    error: e.to_string(),
                });
                error_details.push(e.to_string());
                FileStatus::LoadFailed {
                    message: e.to_string(),
                }
            }
            Ok(mut document) => {
                for diagnostic in document.recovery_warnings() {
                    audit.record(FileEvent::Recovered {
                        diagnostic: diagnostic.clone(),
                    });
                }

                let entries = self.mutation.apply_all(&mut document, &self.config.rules);
                outcomes = OutcomeCounts::from_entries(&entries);
                audit.record_rules(entries);

                let gate = self
                    .validator
                    .as_ref()
                    .map(|validator| validator.validate(&document));

                match gate {
                    Some(Err(failure)) => {
                        warn!(errors = failure.errors.len(), "schema validation failed");
                        let error_count = failure.errors.len();
                        error_details = failure.errors.clone();
                        audit.record(FileEvent::SchemaInvalid { failure });
                        FileStatus::ValidationFailed { error_count }
                    }
                    gate => {
                        if let (Some(Ok(())), Some(validator)) = (gate, &self.validator) {
                            audit.record(FileEvent::SchemaValid {
                                schema: validator.schema_path().to_path_buf(),
                            });
                        }

                        if document.is_modified() {
                            let output = self.output_path(file);
                            match self.writer.write(&document, &output) {
                                Ok(()) => {
                                    audit.record(FileEvent::Saved {
                                        output: output.clone(),
                                    });
                                    FileStatus::Written { output }
                                }
                                Err(e) => {
                                    warn!(error = %e, "cannot write document");
                                    audit.record(FileEvent::WriteFailed {
                                        error: e.to_string(),
                                    });
                                    error_details.push(e.to_string());
                                    FileStatus::WriteFailed {
                                        message: e.to_string(),
                                    }
                                }
                            }
                        } else {
                            audit.record(FileEvent::NoChanges);
                            FileStatus::Unchanged
                        }
                    }
                }
            }
        };

        let log_path = self.log_path(file);
        let (log_path, log_error) = match audit.write_to(&log_path) {
            Ok(()) => (Some(log_path), None),
            Err(e) => {
                error!(log = %log_path.display(), error = %e, "cannot write audit log");
                (None, Some(e.to_string()))
            }
        };

        let duration = start.elapsed();
        info!(
            status = ?status,
            mutated = outcomes.mutated,
            elapsed_ms = duration.as_millis() as u64,
            "processed file"
        );

        FileReport {
            path: file.relative.clone(),
            status,
            outcomes,
            log_path,
            log_error,
            error_details,
            duration,
        }
    }
}

/// Runs the rewrite over a whole input directory
pub struct RewriteEngine {
    config: Arc<Config>,
    processor: Arc<FileProcessor>,
    max_concurrent_files: usize,
    cancelled: Arc<AtomicBool>,
}

impl RewriteEngine {
    /// Create an engine for a configuration.
    ///
    /// Fails before any file is touched when the configuration is invalid or
    /// the schema cannot be loaded.
    pub fn new(config: Config) -> ConfigResult<Self> {
        ConfigManager::validate_config(&config)?;
        let max_concurrent_files = config.thread_count();
        let config = Arc::new(config);
        let processor = Arc::new(FileProcessor::new(Arc::clone(&config))?);

        Ok(Self {
            config,
            processor,
            max_concurrent_files,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag that stops the run between files once set
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Discover and process every input file
    pub async fn run(&self) -> Result<BatchResults> {
        let start = Instant::now();

        tokio::fs::create_dir_all(&self.config.output_directory).await?;

        let discovery = FileDiscovery::from_options(&self.config.processing)?
            .with_skip_dir(Some(self.config.output_directory.clone()));
        let files = discovery
            .discover_files(&self.config.input_directory)
            .await?;

        info!(
            files = files.len(),
            workers = self.max_concurrent_files,
            input = %self.config.input_directory.display(),
            "starting rewrite"
        );

        let reports = self.process_files(files).await?;
        let results = BatchResults::aggregate(reports, start.elapsed());

        info!(
            written = results.written_files,
            unchanged = results.unchanged_files,
            skipped = results.skipped_files,
            "rewrite finished"
        );
        Ok(results)
    }

    /// Process a list of files using concurrent tasks
    pub async fn process_files(&self, files: Vec<DiscoveredFile>) -> Result<Vec<FileReport>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        // Create a semaphore to limit concurrent files
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.max_concurrent_files));

        let tasks: Vec<_> = files
            .into_iter()
            .map(|file| {
                let processor = Arc::clone(&self.processor);
                let semaphore = Arc::clone(&semaphore);
                let cancelled = Arc::clone(&self.cancelled);
                let span = info_span!("file", path = %file.relative.display());

                tokio::spawn(
                    async move {
                        let _permit =
                            semaphore
                                .acquire()
                                .await
                                .map_err(|_| RewriteError::Concurrency {
                                    details: "Failed to acquire worker semaphore".to_string(),
                                })?;

                        if cancelled.load(Ordering::SeqCst) {
                            debug!("skipping file after cancellation");
                            return Ok(FileReport::skipped(file.relative, "run cancelled"));
                        }

                        let start = Instant::now();
                        let relative = file.relative.clone();
                        let span = tracing::Span::current();
                        let report = tokio::task::spawn_blocking(move || {
                            span.in_scope(|| processor.process(&file))
                        })
                        .await
                        .unwrap_or_else(|e| {
                            error!(error = %e, "worker failed");
                            FileReport::error(
                                relative,
                                format!("Join error: {}", e),
                                start.elapsed(),
                            )
                        });

                        Ok::<FileReport, RewriteError>(report)
                    }
                    .instrument(span),
                )
            })
            .collect();

        // Collect all results
        let task_results = try_join_all(tasks)
            .await
            .map_err(|e| RewriteError::Concurrency {
                details: format!("Task join error: {}", e),
            })?;

        task_results.into_iter().collect()
    }

    /// Process a single file on the current thread
    pub fn process_file(&self, file: &DiscoveredFile) -> FileReport {
        self.processor.process(file)
    }

    /// Paths an input file maps to: rewritten document and audit log
    pub fn output_paths(&self, file: &DiscoveredFile) -> (PathBuf, PathBuf) {
        (self.processor.output_path(file), self.processor.log_path(file))
    }
}
