use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::document::Document;
use crate::error::{ConfigError, ConfigResult, ValidationFailure};
use crate::libxml2::{LibXml2Wrapper, ValidationResult, XmlSchemaPtr};

/// A compiled XSD, shared by every worker for the whole run
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    libxml2: Arc<LibXml2Wrapper>,
    schema: XmlSchemaPtr,
    schema_path: PathBuf,
}

impl SchemaValidator {
    /// Read and compile the schema at `path`
    pub fn load(libxml2: Arc<LibXml2Wrapper>, path: &Path) -> ConfigResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| ConfigError::Schema {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
        Self::from_bytes(libxml2, path, &bytes)
    }

    /// Compile schema content that was read from `path`
    pub fn from_bytes(
        libxml2: Arc<LibXml2Wrapper>,
        path: &Path,
        bytes: &[u8],
    ) -> ConfigResult<Self> {
        let schema = libxml2
            .parse_schema_from_memory(bytes)
            .map_err(|e| ConfigError::Schema {
                path: path.to_path_buf(),
                details: e.to_string(),
            })?;

        info!(schema = %path.display(), "compiled schema");
        Ok(Self {
            libxml2,
            schema,
            schema_path: path.to_path_buf(),
        })
    }

    pub fn schema_path(&self) -> &Path {
        &self.schema_path
    }

    /// Validate the in-memory tree, collecting every validator message
    pub fn validate(&self, document: &Document) -> Result<(), ValidationFailure> {
        let failure = |errors: Vec<String>| ValidationFailure {
            schema: self.schema_path.clone(),
            errors,
        };

        match self.libxml2.validate_document(&self.schema, document.tree()) {
            Ok(ValidationResult::Valid) => {
                debug!(path = %document.path().display(), "document is schema-valid");
                Ok(())
            }
            Ok(ValidationResult::Invalid {
                error_count,
                errors,
            }) => {
                if errors.is_empty() {
                    Err(failure(vec![format!("{} validation error(s)", error_count)]))
                } else {
                    Err(failure(errors))
                }
            }
            Ok(ValidationResult::InternalError { code }) => Err(failure(vec![format!(
                "validator reported internal error {}",
                code
            )])),
            Err(e) => Err(failure(vec![e.to_string()])),
        }
    }
}
