//! Prediction through an externally exported ONNX model.
//!
//! Expects `<dir>/model.onnx` taking one NHWC float input `[1, size, size, 3]`
//! scaled to `[0, 1]` and returning one score per class.

use crate::card::ModelCard;
use crate::classifier::{ModelError, Predictor};
use crate::picture::Picture;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};

pub const ONNX_FILE: &str = "model.onnx";

pub struct OnnxPredictor {
    session: Session,
    classes: Option<Vec<String>>,
    image_size: u32,
}

impl OnnxPredictor {
    /// Load `<directory>/model.onnx`.
    ///
    /// A model card in the same directory, when present, supplies the class
    /// order and input size; otherwise `image_size` is used.
    pub fn load(directory: &Path, image_size: u32) -> Result<Self, ModelError> {
        let path = Self::artifact_path(directory);
        if !path.is_file() {
            return Err(ModelError::NotFound(path));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(&path)?;

        let card = ModelCard::load(directory)?;
        let image_size = card.as_ref().map(|c| c.image_size).unwrap_or(image_size);

        tracing::info!(
            path = %path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            image_size,
            "loaded ONNX model"
        );

        Ok(Self {
            session,
            classes: card.map(|c| c.classes),
            image_size,
        })
    }

    pub fn artifact_path(directory: &Path) -> PathBuf {
        directory.join(ONNX_FILE)
    }
}

impl Predictor for OnnxPredictor {
    fn predict(&mut self, picture: &Picture) -> Result<Vec<f32>, ModelError> {
        let input = picture.to_nhwc();
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("score extraction: {e}")))?;

        Ok(scores.to_vec())
    }

    fn classes(&self) -> Option<&[String]> {
        self.classes.as_deref()
    }

    fn image_size(&self) -> u32 {
        self.image_size
    }
}
