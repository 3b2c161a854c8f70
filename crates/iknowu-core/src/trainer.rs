//! Training pipeline: dataset tree → fitted classifier → persisted artifact.

use crate::classifier::{Classifier, ModelError};
use crate::types::History;
use iknowu_dataset::{FolderError, ImageFolder, Purpose};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_EPOCHS: usize = 25;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    #[error(transparent)]
    Folder(#[from] FolderError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("no trained model to save; run training first")]
    NotTrained,
}

/// Trains a classifier over `<directory>/training`, validating on `<directory>/evaluate`.
pub struct Trainer<C> {
    directory: PathBuf,
    training: PathBuf,
    evaluate: PathBuf,
    classifier: Option<C>,
}

impl<C: Classifier> Trainer<C> {
    /// Check that both dataset splits exist under `directory`.
    pub fn configure(directory: &Path) -> Result<Self, TrainError> {
        let training = directory.join(Purpose::Training.as_str());
        let evaluate = directory.join(Purpose::Evaluate.as_str());
        for dir in [&training, &evaluate] {
            if !dir.is_dir() {
                return Err(TrainError::DirectoryNotFound(dir.clone()));
            }
        }

        Ok(Self {
            directory: directory.to_path_buf(),
            training,
            evaluate,
            classifier: None,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Scan both splits, build a classifier over the training classes and fit it.
    ///
    /// `build` receives the training class names in label order.
    pub fn run<F>(&mut self, epochs: usize, build: F) -> Result<History, TrainError>
    where
        F: FnOnce(Vec<String>) -> Result<C, ModelError>,
    {
        let training = ImageFolder::scan(&self.training)?;
        let evaluate = ImageFolder::scan(&self.evaluate)?;

        tracing::info!(
            classes = ?training.classes(),
            per_class = ?training.class_counts(),
            training = training.len(),
            evaluate = evaluate.len(),
            "dataset scanned"
        );

        let (evaluate, dropped) = evaluate.align_to(training.classes());
        if !dropped.is_empty() {
            tracing::warn!(
                ?dropped,
                "evaluation pictures of people absent from training are skipped"
            );
        }
        let unvalidated: Vec<&String> = training
            .classes()
            .iter()
            .zip(evaluate.class_counts())
            .filter(|(_, count)| *count == 0)
            .map(|(name, _)| name)
            .collect();
        if !unvalidated.is_empty() {
            tracing::warn!(classes = ?unvalidated, "no evaluation pictures for these people");
        }

        let mut classifier = build(training.classes().to_vec())?;
        let history = classifier.fit(&training, &evaluate, epochs)?;
        self.classifier = Some(classifier);
        Ok(history)
    }

    /// Persist the trained model under the base directory.
    pub fn save(&self) -> Result<PathBuf, TrainError> {
        let classifier = self.classifier.as_ref().ok_or(TrainError::NotTrained)?;
        Ok(classifier.save(&self.directory)?)
    }

    pub fn classifier(&self) -> Option<&C> {
        self.classifier.as_ref()
    }
}
