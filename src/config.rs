use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::error::{ConfigError, ConfigResult};
use crate::file_discovery::FileDiscovery;
use crate::libxml2::LibXml2Wrapper;

/// Encoding used when the configuration names none
pub const DEFAULT_ENCODING: &str = "UTF-8";

/// Configuration file names searched when `--config` is not given
pub const CONFIG_FILE_NAMES: [&str; 3] = ["rewrite-xml.toml", "rewrite-xml.json", "config.json"];

static NO_NAMESPACES: BTreeMap<String, String> = BTreeMap::new();

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Configuration as written on disk. Every field is optional here; required
/// fields are enforced when converting into [`Config`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigFile {
    pub input_directory: Option<PathBuf>,
    pub output_directory: Option<PathBuf>,
    #[serde(alias = "mappings")]
    pub rules: Option<Vec<RuleEntry>>,
    pub namespaces: Option<BTreeMap<String, String>>,
    pub handle_cdata: Option<bool>,
    pub pretty_print: Option<bool>,
    pub output_encoding: Option<String>,
    /// Legacy location of the output encoding
    pub output_format: Option<OutputFormatSection>,
    pub schema_validation: Option<SchemaValidationSection>,
    pub processing: Option<ProcessingSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleEntry {
    #[serde(alias = "xpath")]
    pub path: Option<String>,
    #[serde(alias = "current_value")]
    pub expected_value: Option<String>,
    pub new_value: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputFormatSection {
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaValidationSection {
    #[serde(default)]
    pub enabled: bool,
    pub schema_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessingSection {
    pub threads: Option<usize>,
    pub extensions: Option<Vec<String>>,
    pub recursive: Option<bool>,
    pub follow_symlinks: Option<bool>,
    pub exclude_patterns: Option<Vec<String>>,
    pub log_extension: Option<String>,
}

/// One conditional rewrite: "if the node at `path` holds `expected_value`,
/// set it to `new_value`".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub path: String,
    pub expected_value: String,
    new_value: Option<String>,
}

impl Rule {
    pub fn new(
        path: impl Into<String>,
        expected_value: impl Into<String>,
        new_value: Option<String>,
    ) -> Self {
        Self {
            path: path.into(),
            expected_value: expected_value.into(),
            new_value,
        }
    }

    /// The value to write; defaults to the expected value
    pub fn new_value(&self) -> &str {
        self.new_value.as_deref().unwrap_or(&self.expected_value)
    }
}

/// Optional schema gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaValidation {
    pub schema_path: PathBuf,
}

/// How input files are found and where logs go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingOptions {
    /// Worker count; `None` means one per CPU
    pub threads: Option<usize>,
    pub extensions: Vec<String>,
    pub recursive: bool,
    /// Descend into linked directories and read linked files
    pub follow_symlinks: bool,
    pub exclude_patterns: Vec<String>,
    pub log_extension: String,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            threads: None,
            extensions: vec!["xml".to_string()],
            recursive: false,
            follow_symlinks: false,
            exclude_patterns: Vec::new(),
            log_extension: "log".to_string(),
        }
    }
}

/// Validated run configuration. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub input_directory: PathBuf,
    pub output_directory: PathBuf,
    pub rules: Vec<Rule>,
    pub namespaces: Option<BTreeMap<String, String>>,
    pub handle_cdata: bool,
    pub pretty_print: bool,
    pub output_encoding: String,
    pub schema_validation: Option<SchemaValidation>,
    pub processing: ProcessingOptions,
}

impl Config {
    /// Minimal configuration with defaults for every optional setting
    pub fn new(
        input_directory: impl Into<PathBuf>,
        output_directory: impl Into<PathBuf>,
        rules: Vec<Rule>,
    ) -> Self {
        Self {
            input_directory: input_directory.into(),
            output_directory: output_directory.into(),
            rules,
            namespaces: None,
            handle_cdata: false,
            pretty_print: false,
            output_encoding: DEFAULT_ENCODING.to_string(),
            schema_validation: None,
            processing: ProcessingOptions::default(),
        }
    }

    /// Prefix bindings for path evaluation (empty when none are configured)
    pub fn namespace_bindings(&self) -> &BTreeMap<String, String> {
        self.namespaces.as_ref().unwrap_or(&NO_NAMESPACES)
    }

    /// Effective worker count
    pub fn thread_count(&self) -> usize {
        self.processing.threads.unwrap_or_else(num_cpus::get).max(1)
    }
}

impl TryFrom<ConfigFile> for Config {
    type Error = ConfigError;

    fn try_from(file: ConfigFile) -> ConfigResult<Self> {
        let input_directory = file.input_directory.ok_or_else(|| missing("input_directory"))?;
        let output_directory = file
            .output_directory
            .ok_or_else(|| missing("output_directory"))?;

        let entries = file.rules.ok_or_else(|| missing("rules"))?;
        if entries.is_empty() {
            return Err(ConfigError::EmptyRules);
        }
        let rules = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                let path = entry
                    .path
                    .ok_or_else(|| missing(&format!("rules[{}].path", index)))?;
                if path.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: format!("rules[{}].path", index),
                        value: path,
                        reason: "path expression must not be empty".to_string(),
                    });
                }
                let expected_value = entry
                    .expected_value
                    .ok_or_else(|| missing(&format!("rules[{}].expected_value", index)))?;
                Ok(Rule::new(path, expected_value, entry.new_value))
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        let schema_validation = match file.schema_validation {
            Some(section) if section.enabled => Some(SchemaValidation {
                schema_path: section
                    .schema_path
                    .ok_or_else(|| missing("schema_validation.schema_path"))?,
            }),
            _ => None,
        };

        let output_encoding = file
            .output_encoding
            .or_else(|| file.output_format.and_then(|section| section.encoding))
            .unwrap_or_else(|| DEFAULT_ENCODING.to_string());

        let defaults = ProcessingOptions::default();
        let processing = match file.processing {
            Some(section) => ProcessingOptions {
                threads: section.threads,
                extensions: section.extensions.unwrap_or(defaults.extensions),
                recursive: section.recursive.unwrap_or(defaults.recursive),
                follow_symlinks: section
                    .follow_symlinks
                    .unwrap_or(defaults.follow_symlinks),
                exclude_patterns: section
                    .exclude_patterns
                    .unwrap_or(defaults.exclude_patterns),
                log_extension: section.log_extension.unwrap_or(defaults.log_extension),
            },
            None => defaults,
        };

        Ok(Config {
            input_directory,
            output_directory,
            rules,
            namespaces: file.namespaces.filter(|map| !map.is_empty()),
            handle_cdata: file.handle_cdata.unwrap_or(false),
            pretty_print: file.pretty_print.unwrap_or(false),
            output_encoding,
            schema_validation,
            processing,
        })
    }
}

fn missing(field: &str) -> ConfigError {
    ConfigError::MissingField {
        field: field.to_string(),
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> ConfigResult<Config> {
        let file = match &cli.config {
            Some(path) => Self::load_from_file(path).await?,
            None => match Self::find_config_file() {
                Some(path) => Self::load_from_file(&path).await?,
                None => {
                    return Err(ConfigError::NotFound {
                        searched: CONFIG_FILE_NAMES.join(", "),
                    });
                }
            },
        };

        let file = Self::apply_environment_overrides(file)?;
        let file = Self::merge_with_cli(file, cli);
        let config = Config::try_from(file)?;

        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> ConfigResult<ConfigFile> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<ConfigFile>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find a configuration file in the working directory, then the user config directory
    pub fn find_config_file() -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = CONFIG_FILE_NAMES.iter().map(PathBuf::from).collect();

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("rewrite-xml");
            candidates.extend(CONFIG_FILE_NAMES.iter().map(|name| app_config_dir.join(name)));
        }

        candidates.into_iter().find(|path| path.is_file())
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(file: ConfigFile) -> ConfigResult<ConfigFile> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, file)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut file: ConfigFile,
    ) -> ConfigResult<ConfigFile> {
        if let Some(input) = env.get("REWRITE_XML_INPUT_DIR") {
            file.input_directory = Some(PathBuf::from(input));
        }

        if let Some(output) = env.get("REWRITE_XML_OUTPUT_DIR") {
            file.output_directory = Some(PathBuf::from(output));
        }

        if let Some(threads) = env.get("REWRITE_XML_THREADS") {
            let threads = threads.parse().map_err(|_| {
                ConfigError::Environment(format!("Invalid REWRITE_XML_THREADS value: {}", threads))
            })?;
            file.processing.get_or_insert_with(Default::default).threads = Some(threads);
        }

        if let Some(pretty_print) = env.get("REWRITE_XML_PRETTY_PRINT") {
            file.pretty_print = Some(pretty_print.parse().map_err(|_| {
                ConfigError::Environment(format!(
                    "Invalid REWRITE_XML_PRETTY_PRINT value: {}",
                    pretty_print
                ))
            })?);
        }

        if let Some(encoding) = env.get("REWRITE_XML_ENCODING") {
            file.output_encoding = Some(encoding);
        }

        Ok(file)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut file: ConfigFile, cli: &Cli) -> ConfigFile {
        if let Some(input) = &cli.input {
            file.input_directory = Some(input.clone());
        }
        if let Some(output) = &cli.output {
            file.output_directory = Some(output.clone());
        }
        if cli.threads.is_some() {
            file.processing.get_or_insert_with(Default::default).threads = cli.threads;
        }
        if cli.pretty_print {
            file.pretty_print = Some(true);
        }
        file
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> ConfigResult<()> {
        if config.rules.is_empty() {
            return Err(ConfigError::EmptyRules);
        }

        if !config.input_directory.is_dir() {
            return Err(ConfigError::InvalidValue {
                field: "input_directory".to_string(),
                value: config.input_directory.display().to_string(),
                reason: "not an existing directory".to_string(),
            });
        }

        if config.output_directory.is_file() {
            return Err(ConfigError::InvalidValue {
                field: "output_directory".to_string(),
                value: config.output_directory.display().to_string(),
                reason: "is a file".to_string(),
            });
        }

        let same_directory = config.output_directory == config.input_directory
            || matches!(
                (
                    config.output_directory.canonicalize(),
                    config.input_directory.canonicalize()
                ),
                (Ok(a), Ok(b)) if a == b
            );
        if same_directory {
            return Err(ConfigError::InvalidValue {
                field: "output_directory".to_string(),
                value: config.output_directory.display().to_string(),
                reason: "must differ from input_directory so inputs are never overwritten"
                    .to_string(),
            });
        }

        let libxml2 = LibXml2Wrapper::new();
        for (index, rule) in config.rules.iter().enumerate() {
            if rule.path.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("rules[{}].path", index),
                    value: rule.path.clone(),
                    reason: "path expression must not be empty".to_string(),
                });
            }
            libxml2
                .compile_xpath(&rule.path)
                .map_err(|e| ConfigError::InvalidPath {
                    index,
                    path: rule.path.clone(),
                    details: e.to_string(),
                })?;
        }

        for (prefix, uri) in config.namespace_bindings() {
            if prefix.is_empty() || prefix.contains(':') {
                return Err(ConfigError::InvalidValue {
                    field: "namespaces".to_string(),
                    value: prefix.clone(),
                    reason: "namespace prefix must be a non-empty NCName".to_string(),
                });
            }
            if uri.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("namespaces.{}", prefix),
                    value: uri.clone(),
                    reason: "namespace URI must not be empty".to_string(),
                });
            }
        }

        if !libxml2.supports_encoding(&config.output_encoding) {
            return Err(ConfigError::InvalidValue {
                field: "output_encoding".to_string(),
                value: config.output_encoding.clone(),
                reason: "encoding is not supported".to_string(),
            });
        }

        if let Some(threads) = config.processing.threads {
            if threads == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "processing.threads".to_string(),
                    value: threads.to_string(),
                    reason: "must be greater than 0".to_string(),
                });
            }
            if threads > 1000 {
                return Err(ConfigError::InvalidValue {
                    field: "processing.threads".to_string(),
                    value: threads.to_string(),
                    reason: "cannot exceed 1000".to_string(),
                });
            }
        }

        if config.processing.extensions.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "processing.extensions".to_string(),
                value: "[]".to_string(),
                reason: "at least one file extension must be specified".to_string(),
            });
        }

        for ext in config
            .processing
            .extensions
            .iter()
            .chain(std::iter::once(&config.processing.log_extension))
        {
            if ext.is_empty() || ext.contains('/') || ext.contains('\\') || ext.contains('.') {
                return Err(ConfigError::InvalidValue {
                    field: "processing".to_string(),
                    value: ext.clone(),
                    reason: "invalid file extension".to_string(),
                });
            }
        }

        if config
            .processing
            .extensions
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(&config.processing.log_extension))
        {
            return Err(ConfigError::InvalidValue {
                field: "processing.log_extension".to_string(),
                value: config.processing.log_extension.clone(),
                reason: "log files would overwrite rewritten documents".to_string(),
            });
        }

        FileDiscovery::from_options(&config.processing)?;

        Ok(())
    }
}
