use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::{CONFIG_FILENAME, Config};
use crate::fs_utils;
use crate::source::{SandboxStatus, SourceClient};
use crate::stream::FileMode;

/// Paths that never take part in export or comparison
#[derive(Debug, Clone)]
pub struct Exclusions {
    metadata_extension: String,
    state_dir: String,
    patterns: Vec<glob::Pattern>,
    executable_name: Option<String>,
}

impl Exclusions {
    pub fn new(config: &Config) -> Result<Self> {
        let patterns = config
            .exclude
            .iter()
            .map(|p| glob::Pattern::new(p).with_context(|| format!("Invalid exclude pattern '{}'", p)))
            .collect::<Result<Vec<_>>>()?;

        let executable_name = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.file_name().map(|n| n.to_string_lossy().to_string()));

        Ok(Self {
            metadata_extension: config.metadata_extension.to_lowercase(),
            state_dir: config.state_dir.clone(),
            patterns,
            executable_name,
        })
    }

    #[cfg(test)]
    pub fn with_executable_name(mut self, name: Option<&str>) -> Self {
        self.executable_name = name.map(String::from);
        self
    }

    /// Whether `relative_path` is one of the project's own metadata files
    pub fn is_metadata(&self, relative_path: &Path) -> bool {
        relative_path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase() == self.metadata_extension)
            .unwrap_or(false)
    }

    /// Check if a path relative to the tree root should be skipped
    pub fn is_excluded(&self, relative_path: &Path) -> bool {
        if let Some(Component::Normal(first)) = relative_path.components().next() {
            let first = first.to_string_lossy();
            if first.starts_with(".git") || first == self.state_dir.as_str() || first == CONFIG_FILENAME {
                return true;
            }
        }

        if self.is_metadata(relative_path) {
            return true;
        }

        if let Some(ref exe) = self.executable_name {
            if relative_path.file_name().map(|n| n.to_string_lossy() == exe.as_str()).unwrap_or(false) {
                return true;
            }
        }

        let path_str = relative_path_string(relative_path);
        for pattern in &self.patterns {
            if pattern.matches(&path_str) {
                return true;
            }
            for component in relative_path.components() {
                if let Component::Normal(c) = component {
                    if pattern.matches(&c.to_string_lossy()) {
                        return true;
                    }
                }
            }
        }

        false
    }
}

/// `/` separated form of a relative path
pub fn relative_path_string(relative_path: &Path) -> String {
    relative_path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// One file of a checked out tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeFile {
    pub relative: String,
    pub absolute: PathBuf,
    pub mode: FileMode,
}

impl TreeFile {
    /// Content as written to the import stream; a symlink's content is its target
    pub fn read(&self) -> Result<Vec<u8>> {
        match self.mode {
            FileMode::Symlink => {
                let target = fs::read_link(&self.absolute)
                    .with_context(|| format!("Failed to read symlink: {}", self.absolute.display()))?;
                Ok(target.to_string_lossy().as_bytes().to_vec())
            }
            _ => fs::read(&self.absolute)
                .with_context(|| format!("Failed to read file: {}", self.absolute.display())),
        }
    }
}

/// All files below `root` that survive the exclusions, sorted by path
pub fn collect_files(root: &Path, exclusions: &Exclusions) -> Result<Vec<TreeFile>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .map(|rel| !exclusions.is_excluded(rel))
                .unwrap_or(true)
        });

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk directory: {}", root.display()))?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("Path outside of tree: {}", entry.path().display()))?;

        let mode = if file_type.is_symlink() {
            FileMode::Symlink
        }
        else {
            let metadata = entry
                .metadata()
                .with_context(|| format!("Failed to stat: {}", entry.path().display()))?;
            if fs_utils::is_executable(&metadata) {
                FileMode::Executable
            }
            else {
                FileMode::Normal
            }
        };

        files.push(TreeFile {
            relative: relative_path_string(relative),
            absolute: entry.path().to_path_buf(),
            mode,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// A populated checkout of one checkpoint
#[derive(Debug)]
pub struct Sandbox {
    dir: PathBuf,
    status: SandboxStatus,
}

impl Sandbox {
    pub fn create(source: &SourceClient, dir: PathBuf, revision: &str) -> Result<Self> {
        let status = source.create_sandbox(revision, &dir)?;
        debug!(revision, dir = %dir.display(), ?status, "Created sandbox");
        Ok(Self { dir, status })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_broken(&self) -> bool {
        matches!(self.status, SandboxStatus::Broken { .. })
    }

    pub fn files(&self, exclusions: &Exclusions) -> Result<Vec<TreeFile>> {
        collect_files(&self.dir, exclusions)
    }

    pub fn teardown(self, source: &SourceClient) -> Result<()> {
        source.drop_sandbox(&self.dir)
    }
}
