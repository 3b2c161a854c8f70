//! Capability interface the pipeline needs from an ML backend.

use crate::picture::{Picture, PictureError};
use crate::types::History;
use iknowu_dataset::ImageFolder;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model artifact not found: {0}")]
    NotFound(PathBuf),
    #[error("cannot build a classifier without classes")]
    NoClasses,
    #[error("no pictures found under {0}")]
    EmptyDataset(PathBuf),
    #[error("invalid model settings: {0}")]
    InvalidSettings(String),
    #[error(transparent)]
    Picture(#[from] PictureError),
    #[error("model record: {0}")]
    Record(String),
    #[error("model card {path}: {source}")]
    Card {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[cfg(feature = "onnx")]
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Something that turns a picture into a class score vector.
pub trait Predictor {
    /// Score vector with one entry per class.
    fn predict(&mut self, picture: &Picture) -> Result<Vec<f32>, ModelError>;

    /// Class names in output-index order, when the artifact records them.
    fn classes(&self) -> Option<&[String]>;

    /// Side length the model expects its input resized to.
    fn image_size(&self) -> u32;
}

/// A predictor that can also be trained and persisted.
pub trait Classifier: Predictor {
    /// Train on `training`, validating on `evaluate` after every epoch.
    fn fit(
        &mut self,
        training: &ImageFolder,
        evaluate: &ImageFolder,
        epochs: usize,
    ) -> Result<History, ModelError>;

    /// Persist the model under `directory`, returning the artifact path.
    fn save(&self, directory: &Path) -> Result<PathBuf, ModelError>;
}
