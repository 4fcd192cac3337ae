use crate::config::ProcessingOptions;
use crate::error::{ConfigError, ConfigResult, Result, RewriteError};
use globset::{GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// An input file and its location relative to the input directory
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiscoveredFile {
    pub relative: PathBuf,
    pub path: PathBuf,
}

/// Async discovery of the input files under a directory
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    /// File extensions to include (e.g., ["xml", "cmdi"]), lowercase
    extensions: Vec<String>,
    /// Exclude patterns, matched against the path relative to the input directory
    exclude_set: Option<GlobSet>,
    /// Descend into subdirectories
    recursive: bool,
    /// Follow symbolic links
    follow_symlinks: bool,
    /// Directory never entered, typically an output directory nested in the input
    skip_dir: Option<PathBuf>,
}

impl FileDiscovery {
    /// Create a new FileDiscovery instance
    pub fn new() -> Self {
        Self {
            extensions: vec!["xml".to_string()],
            exclude_set: None,
            recursive: false,
            follow_symlinks: false,
            skip_dir: None,
        }
    }

    /// Discovery as described by the processing options
    pub fn from_options(options: &ProcessingOptions) -> ConfigResult<Self> {
        Ok(Self::new()
            .with_extensions(options.extensions.clone())
            .with_recursive(options.recursive)
            .with_follow_symlinks(options.follow_symlinks)
            .with_exclude_patterns(options.exclude_patterns.clone())?)
    }

    /// Set file extensions to discover
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions.into_iter().map(|e| e.to_lowercase()).collect();
        self
    }

    /// Add exclude patterns
    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> ConfigResult<Self> {
        if patterns.is_empty() {
            self.exclude_set = None;
            return Ok(self);
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = globset::GlobBuilder::new(&pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| ConfigError::InvalidValue {
                    field: "processing.exclude_patterns".to_string(),
                    value: pattern.clone(),
                    reason: e.to_string(),
                })?;
            builder.add(glob);
        }

        self.exclude_set = Some(builder.build().map_err(|e| ConfigError::InvalidValue {
            field: "processing.exclude_patterns".to_string(),
            value: String::new(),
            reason: format!("Failed to build exclude glob set: {}", e),
        })?);
        Ok(self)
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Set whether to follow symbolic links
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Never descend into `dir`
    pub fn with_skip_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.skip_dir = dir;
        self
    }

    /// Discover input files under `root`, sorted by relative path
    pub async fn discover_files(&self, root: &Path) -> Result<Vec<DiscoveredFile>> {
        let metadata = fs::metadata(root)
            .await
            .map_err(|e| RewriteError::FileSystemTraversal {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;
        if !metadata.is_dir() {
            return Err(RewriteError::FileSystemTraversal {
                path: root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        // Canonical directories already listed; linked directories may form cycles
        let mut visited = HashSet::new();

        while let Some(dir) = pending.pop() {
            if self.follow_symlinks {
                let canonical = fs::canonicalize(&dir).await.unwrap_or_else(|_| dir.clone());
                if !visited.insert(canonical) {
                    debug!(path = %dir.display(), "directory already listed");
                    continue;
                }
            }

            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(read_dir) => read_dir,
                Err(e) if dir == root => {
                    return Err(RewriteError::FileSystemTraversal {
                        path: dir,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    // Log error but continue with the other directories
                    warn!(path = %dir.display(), error = %e, "cannot read directory");
                    continue;
                }
            };

            loop {
                let entry = match read_dir.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(path = %dir.display(), error = %e, "error while listing directory");
                        break;
                    }
                };
                let entry_path = entry.path();

                // Handle symlinks
                if entry_path.is_symlink() && !self.follow_symlinks {
                    continue;
                }

                let metadata = match fs::metadata(&entry_path).await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        warn!(path = %entry_path.display(), error = %e, "cannot stat entry");
                        continue;
                    }
                };

                if metadata.is_dir() {
                    if self.recursive && !self.is_skipped_dir(&entry_path) {
                        pending.push(entry_path);
                    }
                } else if metadata.is_file() {
                    let Ok(relative) = entry_path.strip_prefix(root) else {
                        continue;
                    };
                    if self.should_process(relative) {
                        files.push(DiscoveredFile {
                            relative: relative.to_path_buf(),
                            path: entry_path.clone(),
                        });
                    }
                }
            }
        }

        files.sort();
        debug!(root = %root.display(), count = files.len(), "discovered input files");
        Ok(files)
    }

    fn is_skipped_dir(&self, dir: &Path) -> bool {
        match &self.skip_dir {
            Some(skip) => {
                dir == skip
                    || match (dir.canonicalize(), skip.canonicalize()) {
                        (Ok(a), Ok(b)) => a == b,
                        _ => false,
                    }
            }
            None => false,
        }
    }

    /// Check if a file should be processed based on extensions and patterns
    pub fn should_process(&self, relative: &Path) -> bool {
        // Check extension
        let Some(extension) = relative.extension().and_then(|ext| ext.to_str()) else {
            return false;
        };
        if !self.extensions.contains(&extension.to_lowercase()) {
            return false;
        }

        if let Some(exclude_set) = &self.exclude_set
            && exclude_set.is_match(relative)
        {
            return false;
        }

        true
    }
}

impl Default for FileDiscovery {
    fn default() -> Self {
        Self::new()
    }
}
