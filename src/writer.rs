use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::document::Document;
use crate::error::WriteError;
use crate::libxml2::LibXml2Wrapper;

/// Replace `path` with `bytes` so readers never observe a partial file.
///
/// Parent directories are created as needed. The temporary file lives next to
/// the destination so the final rename stays on one filesystem.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    let result = write_file(&tmp, bytes).and_then(|()| fs::rename(&tmp, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

/// Serializes modified documents into the output directory
#[derive(Debug, Clone)]
pub struct DocumentWriter {
    libxml2: Arc<LibXml2Wrapper>,
    encoding: String,
    pretty_print: bool,
}

impl DocumentWriter {
    pub fn new(libxml2: Arc<LibXml2Wrapper>, encoding: impl Into<String>, pretty_print: bool) -> Self {
        Self {
            libxml2,
            encoding: encoding.into(),
            pretty_print,
        }
    }

    /// Serialized form of the document, XML declaration included
    pub fn serialize(&self, document: &Document) -> Result<Vec<u8>, WriteError> {
        self.libxml2
            .serialize_document(document.tree(), &self.encoding, self.pretty_print)
            .map_err(|e| WriteError::Serialize {
                path: document.path().to_path_buf(),
                details: e.to_string(),
            })
    }

    /// Serialize the document and atomically write it to `destination`
    pub fn write(&self, document: &Document, destination: &Path) -> Result<(), WriteError> {
        let bytes = self.serialize(document)?;
        write_atomically(destination, &bytes).map_err(|source| WriteError::Io {
            path: destination.to_path_buf(),
            source,
        })?;
        debug!(
            output = %destination.display(),
            bytes = bytes.len(),
            "wrote document"
        );
        Ok(())
    }
}
