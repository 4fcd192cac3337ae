use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::LoadError;
use crate::libxml2::{LibXml2Wrapper, ParseOptions, XmlDocument};

/// A loaded input document and everything the engine learns about it
#[derive(Debug)]
pub struct Document {
    path: PathBuf,
    tree: XmlDocument,
    recovery_warnings: Vec<String>,
    modified: bool,
}

impl Document {
    /// Source path the document was read from
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tree(&self) -> &XmlDocument {
        &self.tree
    }

    /// Diagnostics from markup the parser had to repair
    pub fn recovery_warnings(&self) -> &[String] {
        &self.recovery_warnings
    }

    pub fn was_recovered(&self) -> bool {
        !self.recovery_warnings.is_empty()
    }

    /// True once at least one rule changed a value
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub(crate) fn mark_modified(&mut self) {
        self.modified = true;
    }
}

/// Reads files into trees with the recovering parser
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    libxml2: Arc<LibXml2Wrapper>,
    options: ParseOptions,
}

impl DocumentLoader {
    pub fn new(libxml2: Arc<LibXml2Wrapper>, handle_cdata: bool) -> Self {
        Self {
            libxml2,
            options: ParseOptions {
                recover: true,
                keep_cdata: handle_cdata,
            },
        }
    }

    /// Read and parse the file at `path`
    pub fn load(&self, path: &Path) -> Result<Document, LoadError> {
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_from_bytes(path, &bytes)
    }

    /// Parse `bytes` as the content of `path`
    pub fn load_from_bytes(&self, path: &Path, bytes: &[u8]) -> Result<Document, LoadError> {
        let url = path.to_string_lossy();
        let parsed = self
            .libxml2
            .parse_document(bytes, &url, self.options)
            .map_err(|e| LoadError::Unparseable {
                path: path.to_path_buf(),
                details: e.to_string(),
            })?;

        if parsed.warnings.is_empty() {
            debug!(path = %path.display(), "parsed document");
        } else {
            warn!(
                path = %path.display(),
                diagnostics = parsed.warnings.len(),
                "recovered from malformed markup"
            );
        }

        Ok(Document {
            path: path.to_path_buf(),
            tree: parsed.document,
            recovery_warnings: parsed.warnings,
            modified: false,
        })
    }
}
