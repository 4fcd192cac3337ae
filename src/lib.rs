//! # rewrite-xml Library
//!
//! Applies ordered, conditional XPath rewrite rules to every XML file in a
//! directory, optionally gating each rewritten document on an XSD schema, and
//! leaves a per-file audit log of every decision.

pub mod audit;
pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod file_discovery;
pub mod libxml2;
pub mod logging;
pub mod mutation;
pub mod output;
pub mod processor;
pub mod resolver;
pub mod schema;
pub mod writer;

pub use audit::{AuditLog, FileEvent};
pub use cli::{Cli, VerbosityLevel};
pub use config::{
    Config, ConfigFile, ConfigManager, EnvProvider, ProcessingOptions, Rule, SchemaValidation,
    SystemEnvProvider,
};
pub use document::{Document, DocumentLoader};
pub use error::{ConfigError, LibXml2Error, LoadError, RewriteError, ValidationFailure, WriteError};
pub use file_discovery::{DiscoveredFile, FileDiscovery};
pub use libxml2::{LibXml2Wrapper, ValidationResult, XmlSchemaPtr};
pub use mutation::{AlreadyCorrectReason, LogEntry, MutationEngine, Outcome};
pub use output::Output;
pub use processor::{
    BatchResults, FileProcessor, FileReport, FileStatus, OutcomeCounts, RewriteEngine,
};
pub use resolver::{MatchedTarget, NodeResolver, Resolution, TargetKind};
pub use schema::SchemaValidator;
pub use writer::{DocumentWriter, write_atomically};
