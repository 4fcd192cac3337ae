use std::path::PathBuf;

use thiserror::Error;

/// Main application error type that encompasses all possible failure modes
#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Document load error: {0}")]
    Load(#[from] LoadError),

    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    #[error("LibXML2 internal error: {details}")]
    LibXml2Internal { details: String },

    #[error("File system traversal error: {path} - {reason}")]
    FileSystemTraversal { path: PathBuf, reason: String },

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },
}

/// Configuration errors. Any of these aborts the run before a file is touched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("No configuration file found (tried {searched})")]
    NotFound { searched: String },

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),

    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Invalid configuration value: {field} = {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration must contain at least one rule")]
    EmptyRules,

    #[error("Invalid path expression in rule {index}: '{path}' - {details}")]
    InvalidPath {
        index: usize,
        path: String,
        details: String,
    },

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Schema could not be loaded: {path} - {details}")]
    Schema { path: PathBuf, details: String },
}

/// Per-file failure to produce a tree from an input document
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unparseable XML in {path}: {details}")]
    Unparseable { path: PathBuf, details: String },
}

/// Per-file failure of the schema gate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("XML validation failed against {schema}: {}", errors.join("; "))]
pub struct ValidationFailure {
    pub schema: PathBuf,
    pub errors: Vec<String>,
}

/// Per-file failure to emit output
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Cannot serialize {path}: {details}")]
    Serialize { path: PathBuf, details: String },

    #[error("Cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// LibXML2-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LibXml2Error {
    #[error("Schema parsing failed: {details}")]
    SchemaParseFailed { details: String },

    #[error("Validation context creation failed")]
    ValidationContextCreationFailed,

    #[error("Document validation failed with internal code {code}")]
    ValidationFailed { code: i32 },

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,

    #[error("Document parsing failed: {details}")]
    DocumentParseFailed { details: String },

    #[error("XPath context creation failed")]
    XPathContextCreationFailed,

    #[error("Cannot register namespace prefix '{prefix}'")]
    NamespaceRegistrationFailed { prefix: String },

    #[error("XPath expression '{expression}' does not compile: {details}")]
    XPathCompileFailed { expression: String, details: String },

    #[error("XPath expression '{expression}' failed: {details}")]
    XPathEvaluationFailed { expression: String, details: String },

    #[error("Serialization to encoding '{encoding}' failed")]
    SerializationFailed { encoding: String },

    #[error("Cannot assign a value to a {kind}")]
    UnsupportedNode { kind: String },

    #[error("String contains an interior NUL byte: {details}")]
    InvalidString { details: String },
}

impl From<LibXml2Error> for RewriteError {
    fn from(err: LibXml2Error) -> Self {
        RewriteError::LibXml2Internal {
            details: err.to_string(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, RewriteError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;
