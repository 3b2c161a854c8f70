//! Model card: metadata persisted next to a trained artifact.
//!
//! Records the class order the model was trained with, so inference maps
//! output indices to names without re-deriving them from configuration.

use crate::classifier::ModelError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};

pub const CARD_FILE: &str = "model.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCard {
    /// Class names in output-index order.
    pub classes: Vec<String>,
    pub image_size: u32,
    pub epochs: usize,
    pub created_at: DateTime<Utc>,
    /// Artifact file name, relative to the card's directory.
    pub artifact: String,
    /// Hex SHA-256 of the artifact.
    pub checksum: String,
}

impl ModelCard {
    /// Build a card for an artifact that already exists on disk.
    pub fn describe(
        artifact: &Path,
        classes: Vec<String>,
        image_size: u32,
        epochs: usize,
    ) -> Result<Self, ModelError> {
        let name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ModelError::NotFound(artifact.to_path_buf()))?;
        Ok(Self {
            classes,
            image_size,
            epochs,
            created_at: Utc::now(),
            artifact: name,
            checksum: checksum(artifact)?,
        })
    }

    pub fn path(directory: &Path) -> PathBuf {
        directory.join(CARD_FILE)
    }

    /// Read the card under `directory`; `Ok(None)` when there is none.
    pub fn load(directory: &Path) -> Result<Option<Self>, ModelError> {
        let path = Self::path(directory);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|e| ModelError::Io {
            path: path.clone(),
            source: e,
        })?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| ModelError::Card { path, source: e })
    }

    pub fn save(&self, directory: &Path) -> Result<PathBuf, ModelError> {
        let path = Self::path(directory);
        let json = serde_json::to_string_pretty(self).map_err(|e| ModelError::Card {
            path: path.clone(),
            source: e,
        })?;
        std::fs::write(&path, json).map_err(|e| ModelError::Io {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }

    /// Whether the artifact under `directory` still matches the recorded checksum.
    pub fn verify(&self, directory: &Path) -> Result<bool, ModelError> {
        Ok(checksum(&directory.join(&self.artifact))? == self.checksum)
    }
}

/// Hex-encoded SHA-256 of a file.
pub fn checksum(path: &Path) -> Result<String, ModelError> {
    let io_err = |e| ModelError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(io_err)?;
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}
