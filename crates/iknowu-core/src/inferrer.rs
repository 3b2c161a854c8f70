//! Inference pipeline: one picture in, one person's nick out.

use crate::classifier::{ModelError, Predictor};
use crate::picture::{Picture, PictureError};
use crate::types::{best_index, Prediction};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferError {
    #[error("directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error(transparent)]
    Picture(#[from] PictureError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("model returned no usable scores")]
    EmptyPrediction,
    #[error("model predicted class {index} but only {known} people are known")]
    UnknownClass { index: usize, known: usize },
}

/// Classifies a single picture against the known people.
#[derive(Debug)]
pub struct Inferrer {
    directory: PathBuf,
    picture: PathBuf,
    people: Vec<String>,
}

impl Inferrer {
    /// Validate inputs and build the sorted list of known nicks.
    pub fn configure<I, S>(directory: &Path, picture: &Path, people: I) -> Result<Self, InferError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !directory.is_dir() {
            return Err(InferError::DirectoryNotFound(directory.to_path_buf()));
        }
        if !picture.is_file() {
            return Err(InferError::FileNotFound(picture.to_path_buf()));
        }

        let mut people: Vec<String> = people.into_iter().map(Into::into).collect();
        people.sort();

        Ok(Self {
            directory: directory.to_path_buf(),
            picture: picture.to_path_buf(),
            people,
        })
    }

    /// Dataset root holding the model artifact.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Known nicks, sorted.
    pub fn people(&self) -> &[String] {
        &self.people
    }

    /// Predict the person in the configured picture.
    pub fn run<P: Predictor + ?Sized>(&self, predictor: &mut P) -> Result<Prediction, InferError> {
        let picture = Picture::load(&self.picture, predictor.image_size())?;
        let scores = predictor.predict(&picture)?;
        let index = best_index(&scores).ok_or(InferError::EmptyPrediction)?;

        let labels = labels_for(predictor.classes(), &self.people);
        let person = labels
            .get(index)
            .cloned()
            .ok_or(InferError::UnknownClass {
                index,
                known: labels.len(),
            })?;

        tracing::debug!(person = %person, index, ?scores, "prediction");
        Ok(Prediction {
            person,
            index,
            scores,
        })
    }
}

/// Label list used to name output indices.
///
/// The class order recorded with the model wins; the sorted people list is
/// the fallback for artifacts that carry none.
fn labels_for<'a>(recorded: Option<&'a [String]>, people: &'a [String]) -> &'a [String] {
    match recorded {
        Some(classes) => {
            if classes != people {
                tracing::warn!(
                    model = ?classes,
                    config = ?people,
                    "people in configuration differ from the classes the model was trained on; using the model's"
                );
            }
            classes
        }
        None => people,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Returns a canned score vector.
    struct Fixed {
        scores: Vec<f32>,
        classes: Option<Vec<String>>,
        seen_size: Option<usize>,
    }

    impl Fixed {
        fn new(scores: &[f32]) -> Self {
            Self {
                scores: scores.to_vec(),
                classes: None,
                seen_size: None,
            }
        }
    }

    impl Predictor for Fixed {
        fn predict(&mut self, picture: &Picture) -> Result<Vec<f32>, ModelError> {
            self.seen_size = Some(picture.size());
            Ok(self.scores.clone())
        }

        fn classes(&self) -> Option<&[String]> {
            self.classes.as_deref()
        }

        fn image_size(&self) -> u32 {
            150
        }
    }

    fn setup() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let picture = tmp.path().join("who.png");
        RgbImage::from_pixel(32, 24, Rgb([90, 120, 200]))
            .save(&picture)
            .unwrap();
        (tmp, picture)
    }

    #[test]
    fn test_configure_sorts_people() {
        let (tmp, picture) = setup();
        let inferrer = Inferrer::configure(tmp.path(), &picture, ["bob", "amy"]).unwrap();
        assert_eq!(inferrer.people(), ["amy", "bob"]);
    }

    #[test]
    fn test_configure_missing_directory() {
        let (tmp, picture) = setup();
        let err = Inferrer::configure(&tmp.path().join("data"), &picture, ["amy"]).unwrap_err();
        assert!(matches!(err, InferError::DirectoryNotFound(_)));
    }

    #[test]
    fn test_configure_missing_picture() {
        let (tmp, _) = setup();
        let err =
            Inferrer::configure(tmp.path(), &tmp.path().join("nobody.jpg"), ["amy"]).unwrap_err();
        assert!(matches!(err, InferError::FileNotFound(p) if p.ends_with("nobody.jpg")));
    }

    #[test]
    fn test_run_maps_max_index_to_sorted_people() {
        let (tmp, picture) = setup();
        let inferrer = Inferrer::configure(tmp.path(), &picture, ["bob", "amy"]).unwrap();
        let mut model = Fixed::new(&[0.1, 0.9]);

        let prediction = inferrer.run(&mut model).unwrap();
        assert_eq!(prediction.person, "bob");
        assert_eq!(prediction.index, 1);
        assert_eq!(prediction.scores, vec![0.1, 0.9]);
        assert_eq!(model.seen_size, Some(150));
    }

    #[test]
    fn test_run_tie_picks_first() {
        let (tmp, picture) = setup();
        let inferrer = Inferrer::configure(tmp.path(), &picture, ["carl", "amy", "bob"]).unwrap();
        let prediction = inferrer.run(&mut Fixed::new(&[0.2, 0.4, 0.4])).unwrap();
        assert_eq!(prediction.person, "bob");
    }

    #[test]
    fn test_run_prefers_recorded_classes() {
        let (tmp, picture) = setup();
        let inferrer = Inferrer::configure(tmp.path(), &picture, ["amy", "bob"]).unwrap();
        let mut model = Fixed::new(&[0.9, 0.1]);
        model.classes = Some(vec!["zed".into(), "amy".into()]);
        assert_eq!(inferrer.run(&mut model).unwrap().person, "zed");
    }

    #[test]
    fn test_run_index_out_of_range() {
        let (tmp, picture) = setup();
        let inferrer = Inferrer::configure(tmp.path(), &picture, ["amy"]).unwrap();
        let err = inferrer.run(&mut Fixed::new(&[0.1, 0.2, 0.7])).unwrap_err();
        assert!(matches!(err, InferError::UnknownClass { index: 2, known: 1 }));
    }

    #[test]
    fn test_run_empty_scores() {
        let (tmp, picture) = setup();
        let inferrer = Inferrer::configure(tmp.path(), &picture, ["amy"]).unwrap();
        let err = inferrer.run(&mut Fixed::new(&[])).unwrap_err();
        assert!(matches!(err, InferError::EmptyPrediction));
    }
}
