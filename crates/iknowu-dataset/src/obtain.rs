//! Dataset obtainer: imports pictures into the dataset tree.
//!
//! Layout: `<destination>/<purpose>/<normalized name>/<file>`.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObtainError {
    #[error("directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("failed to create directory: {path}")]
    DirectoryCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to copy {from} to {to}")]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot list directory: {path}")]
    ListFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("obtainer used before configure()")]
    NotConfigured,
    #[error("unknown purpose '{0}' (expected 'training' or 'evaluate')")]
    UnknownPurpose(String),
}

/// Dataset split a picture is imported for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Training,
    Evaluate,
}

impl Purpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Purpose::Training => "training",
            Purpose::Evaluate => "evaluate",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = ObtainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "training" => Ok(Purpose::Training),
            "evaluate" => Ok(Purpose::Evaluate),
            other => Err(ObtainError::UnknownPurpose(other.to_string())),
        }
    }
}

/// Turn a personal name into a directory / label name.
///
/// Lowercases and replaces spaces with underscores: `"Jane Doe"` → `"jane_doe"`.
pub fn normalize(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

/// Path and plain entry count of one side of an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryInfo {
    pub path: PathBuf,
    pub files: usize,
}

/// Snapshot reported before an import runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObtainInfo {
    pub source: DirectoryInfo,
    pub destination: DirectoryInfo,
}

/// Copies pictures of one person from a source directory into the dataset.
#[derive(Debug, Default)]
pub struct Obtainer {
    source: Option<PathBuf>,
    destination: Option<PathBuf>,
}

impl Obtainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the source and make sure the full destination path exists.
    ///
    /// Missing directories along `destination/purpose/normalize(name)` are
    /// created one level at a time. Calling this again with the same
    /// arguments is a no-op.
    pub fn configure(
        &mut self,
        source: &Path,
        destination: &Path,
        purpose: Purpose,
        name: &str,
    ) -> Result<(), ObtainError> {
        if !source.is_dir() {
            return Err(ObtainError::DirectoryNotFound(source.to_path_buf()));
        }

        let purpose_dir = destination.join(purpose.as_str());
        let person_dir = purpose_dir.join(normalize(name));
        for dir in [destination, purpose_dir.as_path(), person_dir.as_path()] {
            ensure_directory(dir)?;
        }

        tracing::debug!(
            source = %source.display(),
            destination = %person_dir.display(),
            "obtainer configured"
        );

        self.source = Some(source.to_path_buf());
        self.destination = Some(person_dir);
        Ok(())
    }

    /// Fully resolved destination directory, once configured.
    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    /// Entry counts of the source and the resolved destination directory.
    pub fn info(&self) -> Result<ObtainInfo, ObtainError> {
        let (source, destination) = self.paths()?;
        Ok(ObtainInfo {
            source: DirectoryInfo {
                path: source.to_path_buf(),
                files: count_entries(source)?,
            },
            destination: DirectoryInfo {
                path: destination.to_path_buf(),
                files: count_entries(destination)?,
            },
        })
    }

    /// Copy every regular file (not subdirectories) from source to destination.
    ///
    /// Files already present under the same name are overwritten.
    /// Returns the number of files copied.
    pub fn run(&self) -> Result<usize, ObtainError> {
        let (source, destination) = self.paths()?;
        let entries = std::fs::read_dir(source).map_err(|e| ObtainError::ListFailed {
            path: source.to_path_buf(),
            source: e,
        })?;

        let mut copied = 0;
        for entry in entries {
            let entry = entry.map_err(|e| ObtainError::ListFailed {
                path: source.to_path_buf(),
                source: e,
            })?;
            let from = entry.path();
            if !from.is_file() {
                continue;
            }
            let to = destination.join(entry.file_name());
            std::fs::copy(&from, &to).map_err(|e| ObtainError::CopyFailed {
                from: from.clone(),
                to: to.clone(),
                source: e,
            })?;
            tracing::trace!(from = %from.display(), to = %to.display(), "copied");
            copied += 1;
        }

        tracing::info!(copied, destination = %destination.display(), "obtain finished");
        Ok(copied)
    }

    fn paths(&self) -> Result<(&Path, &Path), ObtainError> {
        match (&self.source, &self.destination) {
            (Some(s), Some(d)) => Ok((s.as_path(), d.as_path())),
            _ => Err(ObtainError::NotConfigured),
        }
    }
}

fn ensure_directory(dir: &Path) -> Result<(), ObtainError> {
    if dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|e| ObtainError::DirectoryCreateFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;
    tracing::info!(path = %dir.display(), "created directory");
    Ok(())
}

fn count_entries(dir: &Path) -> Result<usize, ObtainError> {
    std::fs::read_dir(dir)
        .map(|entries| entries.count())
        .map_err(|e| ObtainError::ListFailed {
            path: dir.to_path_buf(),
            source: e,
        })
}
