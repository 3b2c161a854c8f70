//! Convolutional person classifier on the Burn framework.
//!
//! Four conv/pool stages followed by a dense head, trained on the CPU
//! `ndarray` backend. The architecture is a default, not a contract: the
//! pipeline only relies on the [`Classifier`] capability.

use crate::card::ModelCard;
use crate::classifier::{Classifier, ModelError, Predictor};
use crate::picture::{self, Augmenter, Picture, IMAGE_SIZE};
use crate::types::{EpochStats, History};
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::module::{AutodiffModule, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::CompactRecorder;
use burn::tensor::activation::{relu, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor, TensorData};
use iknowu_dataset::{ImageFolder, Sample};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Backend used for prediction.
pub type InferBackend = NdArray;
/// Backend used for training.
pub type TrainBackend = Autodiff<InferBackend>;

/// Artifact file stem; the recorder appends `.mpk`.
const ARTIFACT_STEM: &str = "model";
const ARTIFACT_FILE: &str = "model.mpk";

const FILTERS: [usize; 4] = [64, 64, 128, 128];
const KERNEL: usize = 3;
const HIDDEN_UNITS: usize = 512;
const DROPOUT: f64 = 0.5;

/// Smallest input side that survives the four valid-conv/pool stages.
pub const MIN_IMAGE_SIZE: u32 = 46;

/// Training hyper-parameters, read from the `model` configuration section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CnnSettings {
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
    pub image_size: u32,
    pub augment: bool,
}

impl Default for CnnSettings {
    fn default() -> Self {
        Self {
            batch_size: 32,
            learning_rate: 1e-3,
            seed: 42,
            image_size: IMAGE_SIZE,
            augment: true,
        }
    }
}

impl CnnSettings {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.batch_size == 0 {
            return Err(ModelError::InvalidSettings("batch_size must be positive".into()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(ModelError::InvalidSettings(
                "learning_rate must be positive".into(),
            ));
        }
        if self.image_size < MIN_IMAGE_SIZE {
            return Err(ModelError::InvalidSettings(format!(
                "image_size must be at least {MIN_IMAGE_SIZE}, got {}",
                self.image_size
            )));
        }
        Ok(())
    }
}

/// Feature count entering the dense head for a given input side.
pub fn flattened_size(image_size: usize) -> usize {
    let side = FILTERS
        .iter()
        .fold(image_size, |side, _| side.saturating_sub(KERNEL - 1) / 2);
    side * side * FILTERS[FILTERS.len() - 1]
}

#[derive(Module, Debug)]
pub struct FaceNet<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    conv4: Conv2d<B>,
    pool: MaxPool2d,
    dropout: Dropout,
    hidden: Linear<B>,
    output: Linear<B>,
}

impl<B: Backend> FaceNet<B> {
    pub fn new(num_classes: usize, image_size: usize, device: &B::Device) -> Self {
        let conv = |in_channels: usize, out_channels: usize| -> Conv2d<B> {
            Conv2dConfig::new([in_channels, out_channels], [KERNEL, KERNEL]).init(device)
        };

        Self {
            conv1: conv(3, FILTERS[0]),
            conv2: conv(FILTERS[0], FILTERS[1]),
            conv3: conv(FILTERS[1], FILTERS[2]),
            conv4: conv(FILTERS[2], FILTERS[3]),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout: DropoutConfig::new(DROPOUT).init(),
            hidden: LinearConfig::new(flattened_size(image_size), HIDDEN_UNITS).init(device),
            output: LinearConfig::new(HIDDEN_UNITS, num_classes).init(device),
        }
    }

    /// Logits of shape `[batch, classes]` for input `[batch, 3, size, size]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(relu(self.conv1.forward(x)));
        let x = self.pool.forward(relu(self.conv2.forward(x)));
        let x = self.pool.forward(relu(self.conv3.forward(x)));
        let x = self.pool.forward(relu(self.conv4.forward(x)));

        let [batch, channels, height, width] = x.dims();
        let x = x.reshape([batch, channels * height * width]);

        let x = self.dropout.forward(x);
        let x = relu(self.hidden.forward(x));
        self.output.forward(x)
    }
}

/// Stack pictures into a `[batch, 3, size, size]` tensor.
fn to_tensor<B: Backend>(pictures: &[Picture], device: &B::Device) -> Tensor<B, 4> {
    let side = pictures.first().map(Picture::size).unwrap_or(0);
    let data: Vec<f32> = pictures
        .iter()
        .flat_map(|p| p.pixels().iter().copied())
        .collect();
    Tensor::from_floats(TensorData::new(data, [pictures.len(), 3, side, side]), device)
}

fn to_targets<B: Backend>(labels: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let data: Vec<i64> = labels.iter().map(|&l| l as i64).collect();
    Tensor::from_data(TensorData::new(data, [labels.len()]), device)
}

fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch] = targets.dims();
    let predicted = logits.argmax(1).reshape([batch]);
    let correct: i64 = predicted.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

/// CNN classifier backed by [`FaceNet`].
pub struct CnnClassifier {
    model: FaceNet<TrainBackend>,
    classes: Vec<String>,
    settings: CnnSettings,
    device: NdArrayDevice,
    epochs: usize,
}

impl CnnClassifier {
    /// Fresh, untrained classifier over `classes` (in output-index order).
    pub fn new(classes: Vec<String>, settings: CnnSettings) -> Result<Self, ModelError> {
        if classes.is_empty() {
            return Err(ModelError::NoClasses);
        }
        settings.validate()?;

        let device = NdArrayDevice::default();
        let model = FaceNet::new(classes.len(), settings.image_size as usize, &device);
        tracing::debug!(
            classes = classes.len(),
            image_size = settings.image_size,
            features = flattened_size(settings.image_size as usize),
            "built FaceNet"
        );

        Ok(Self {
            model,
            classes,
            settings,
            device,
            epochs: 0,
        })
    }

    /// Load a trained classifier saved under `directory`.
    ///
    /// The model card supplies the class list and input size; the training
    /// hyper-parameters in `settings` are kept for further fitting.
    pub fn load(directory: &Path, settings: CnnSettings) -> Result<Self, ModelError> {
        let artifact = Self::artifact_path(directory);
        if !artifact.is_file() {
            return Err(ModelError::NotFound(artifact));
        }
        let card =
            ModelCard::load(directory)?.ok_or_else(|| ModelError::NotFound(ModelCard::path(directory)))?;
        if !card.verify(directory)? {
            tracing::warn!(
                artifact = %artifact.display(),
                "model artifact does not match its card checksum; it was replaced after training"
            );
        }

        let settings = CnnSettings {
            image_size: card.image_size,
            ..settings
        };
        let mut classifier = Self::new(card.classes, settings)?;
        classifier.model = classifier
            .model
            .load_file(directory.join(ARTIFACT_STEM), &CompactRecorder::new(), &classifier.device)
            .map_err(|e| ModelError::Record(format!("{e:?}")))?;
        classifier.epochs = card.epochs;

        tracing::info!(
            path = %artifact.display(),
            classes = ?classifier.classes,
            epochs = classifier.epochs,
            "loaded CNN model"
        );
        Ok(classifier)
    }

    pub fn artifact_path(directory: &Path) -> PathBuf {
        directory.join(ARTIFACT_FILE)
    }

    pub fn settings(&self) -> &CnnSettings {
        &self.settings
    }

    /// Epochs this model has been trained for.
    pub fn epochs(&self) -> usize {
        self.epochs
    }

    /// `folder` with labels indexed by this classifier's classes.
    fn aligned(&self, folder: &ImageFolder) -> ImageFolder {
        let (aligned, dropped) = folder.align_to(&self.classes);
        if !dropped.is_empty() {
            tracing::warn!(
                root = %folder.root().display(),
                ?dropped,
                "skipping pictures of people the model has no class for"
            );
        }
        aligned
    }

    fn load_plain(&self, samples: &[Sample]) -> Result<Vec<(Picture, usize)>, ModelError> {
        samples
            .iter()
            .map(|s| Ok((Picture::load(&s.path, self.settings.image_size)?, s.label)))
            .collect()
    }

    /// Mean loss and accuracy on pre-loaded pictures, without gradients.
    fn evaluate(&self, set: &[(Picture, usize)]) -> (f64, f64) {
        if set.is_empty() {
            return (0.0, 0.0);
        }
        let model = self.model.valid();
        let loss_fn = CrossEntropyLossConfig::new().init::<InferBackend>(&self.device);

        let mut total_loss = 0.0;
        let mut correct = 0usize;
        for chunk in set.chunks(self.settings.batch_size) {
            let pictures: Vec<Picture> = chunk.iter().map(|(p, _)| p.clone()).collect();
            let labels: Vec<usize> = chunk.iter().map(|(_, l)| *l).collect();
            let logits = model.forward(to_tensor::<InferBackend>(&pictures, &self.device));
            let targets = to_targets::<InferBackend>(&labels, &self.device);

            let loss: f64 = loss_fn
                .forward(logits.clone(), targets.clone())
                .into_scalar()
                .elem();
            total_loss += loss * chunk.len() as f64;
            correct += count_correct(logits, targets);
        }

        let n = set.len() as f64;
        (total_loss / n, correct as f64 / n)
    }
}

impl Predictor for CnnClassifier {
    fn predict(&mut self, picture: &Picture) -> Result<Vec<f32>, ModelError> {
        if picture.size() != self.settings.image_size as usize {
            return Err(ModelError::Inference(format!(
                "picture is {}px, model expects {}px",
                picture.size(),
                self.settings.image_size
            )));
        }
        let model = self.model.valid();
        let input = to_tensor::<InferBackend>(std::slice::from_ref(picture), &self.device);
        let scores = softmax(model.forward(input), 1);
        scores
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ModelError::Inference(format!("{e:?}")))
    }

    fn classes(&self) -> Option<&[String]> {
        Some(&self.classes)
    }

    fn image_size(&self) -> u32 {
        self.settings.image_size
    }
}

impl Classifier for CnnClassifier {
    fn fit(
        &mut self,
        training: &ImageFolder,
        evaluate: &ImageFolder,
        epochs: usize,
    ) -> Result<History, ModelError> {
        let training = self.aligned(training);
        let evaluate = self.aligned(evaluate);
        if training.is_empty() {
            return Err(ModelError::EmptyDataset(training.root().to_path_buf()));
        }
        if evaluate.is_empty() {
            return Err(ModelError::EmptyDataset(evaluate.root().to_path_buf()));
        }

        let size = self.settings.image_size;
        let batch_size = self.settings.batch_size;
        let evaluation = self.load_plain(evaluate.samples())?;
        let loss_fn = CrossEntropyLossConfig::new().init::<TrainBackend>(&self.device);
        let mut optimizer = AdamConfig::new().init::<TrainBackend, FaceNet<TrainBackend>>();
        let mut rng = StdRng::seed_from_u64(self.settings.seed);
        let mut augmenter = Augmenter::new(self.settings.seed);

        tracing::info!(
            training = training.len(),
            evaluate = evaluation.len(),
            epochs,
            batch_size,
            "training started"
        );

        let mut history = History::default();
        let mut order: Vec<usize> = (0..training.len()).collect();
        for epoch in 0..epochs {
            order.shuffle(&mut rng);

            let mut total_loss = 0.0;
            let mut correct = 0usize;
            let batches = order.len().div_ceil(batch_size);
            for (batch_idx, chunk) in order.chunks(batch_size).enumerate() {
                let mut pictures = Vec::with_capacity(chunk.len());
                let mut labels = Vec::with_capacity(chunk.len());
                for &i in chunk {
                    let sample = &training.samples()[i];
                    let image = picture::open(&sample.path)?;
                    let image = if self.settings.augment {
                        augmenter.apply(image)
                    } else {
                        image
                    };
                    pictures.push(Picture::from_image(&image, size));
                    labels.push(sample.label);
                }

                let logits = self.model.forward(to_tensor(&pictures, &self.device));
                let targets = to_targets(&labels, &self.device);
                let loss = loss_fn.forward(logits.clone(), targets.clone());

                let batch_loss: f64 = loss.clone().into_scalar().elem();
                total_loss += batch_loss * chunk.len() as f64;
                correct += count_correct(logits, targets);

                let grads = GradientsParams::from_grads(loss.backward(), &self.model);
                self.model = optimizer.step(self.settings.learning_rate, self.model.clone(), grads);

                tracing::debug!(
                    epoch = epoch + 1,
                    batch = batch_idx + 1,
                    batches,
                    loss = batch_loss,
                    "batch done"
                );
            }

            let n = order.len() as f64;
            let (val_loss, val_accuracy) = self.evaluate(&evaluation);
            let stats = EpochStats {
                loss: total_loss / n,
                accuracy: correct as f64 / n,
                val_loss,
                val_accuracy,
            };
            self.epochs += 1;
            tracing::info!(
                epoch = epoch + 1,
                epochs,
                loss = stats.loss,
                accuracy = stats.accuracy,
                val_loss = stats.val_loss,
                val_accuracy = stats.val_accuracy,
                "epoch done"
            );
            history.push(stats);
        }

        Ok(history)
    }

    fn save(&self, directory: &Path) -> Result<PathBuf, ModelError> {
        self.model
            .clone()
            .save_file(directory.join(ARTIFACT_STEM), &CompactRecorder::new())
            .map_err(|e| ModelError::Record(format!("{e:?}")))?;

        let artifact = Self::artifact_path(directory);
        let card = ModelCard::describe(
            &artifact,
            self.classes.clone(),
            self.settings.image_size,
            self.epochs,
        )?;
        card.save(directory)?;

        tracing::info!(path = %artifact.display(), checksum = %card.checksum, "model saved");
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn small_settings() -> CnnSettings {
        CnnSettings {
            batch_size: 2,
            image_size: MIN_IMAGE_SIZE,
            augment: false,
            ..CnnSettings::default()
        }
    }

    fn write_dataset(root: &Path) {
        for (split, count) in [("training", 2), ("evaluate", 1)] {
            for (class, color) in [("amy", [230, 20, 20]), ("bob", [20, 20, 230])] {
                let dir = root.join(split).join(class);
                std::fs::create_dir_all(&dir).unwrap();
                for i in 0..count {
                    RgbImage::from_pixel(60, 60, Rgb(color))
                        .save(dir.join(format!("{i}.png")))
                        .unwrap();
                }
            }
        }
    }

    #[test]
    fn test_flattened_size() {
        // 150 -> 148/74 -> 72/36 -> 34/17 -> 15/7
        assert_eq!(flattened_size(150), 7 * 7 * 128);
        assert_eq!(flattened_size(MIN_IMAGE_SIZE as usize), 128);
    }

    #[test]
    fn test_settings_validation() {
        assert!(CnnSettings::default().validate().is_ok());
        let tiny = CnnSettings {
            image_size: 20,
            ..CnnSettings::default()
        };
        assert!(matches!(tiny.validate(), Err(ModelError::InvalidSettings(_))));
        let no_batch = CnnSettings {
            batch_size: 0,
            ..CnnSettings::default()
        };
        assert!(no_batch.validate().is_err());
    }

    #[test]
    fn test_forward_output_shape() {
        let device = NdArrayDevice::default();
        let model = FaceNet::<InferBackend>::new(3, MIN_IMAGE_SIZE as usize, &device);
        let side = MIN_IMAGE_SIZE as usize;
        let input = Tensor::<InferBackend, 4>::zeros([2, 3, side, side], &device);
        assert_eq!(model.forward(input).dims(), [2, 3]);
    }

    #[test]
    fn test_new_requires_classes() {
        assert!(matches!(
            CnnClassifier::new(Vec::new(), small_settings()),
            Err(ModelError::NoClasses)
        ));
    }

    #[test]
    fn test_predict_rejects_wrong_size() {
        let mut classifier =
            CnnClassifier::new(vec!["amy".into(), "bob".into()], small_settings()).unwrap();
        let picture = Picture::from_image(
            &image::DynamicImage::ImageRgb8(RgbImage::new(10, 10)),
            MIN_IMAGE_SIZE + 4,
        );
        assert!(matches!(
            classifier.predict(&picture),
            Err(ModelError::Inference(_))
        ));
    }

    #[test]
    fn test_fit_save_load_predict() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path());
        let training = ImageFolder::scan(&tmp.path().join("training")).unwrap();
        let evaluate = ImageFolder::scan(&tmp.path().join("evaluate")).unwrap();

        let mut classifier =
            CnnClassifier::new(training.classes().to_vec(), small_settings()).unwrap();
        let history = classifier.fit(&training, &evaluate, 2).unwrap();
        assert_eq!(history.epochs(), 2);
        assert!(history.loss.iter().all(|l| l.is_finite()));
        assert!(history.val_accuracy.iter().all(|a| (0.0..=1.0).contains(a)));

        let artifact = classifier.save(tmp.path()).unwrap();
        assert!(artifact.is_file());
        assert!(ModelCard::path(tmp.path()).is_file());

        let mut loaded = CnnClassifier::load(tmp.path(), CnnSettings::default()).unwrap();
        assert_eq!(loaded.classes().unwrap(), ["amy", "bob"]);
        assert_eq!(loaded.image_size(), MIN_IMAGE_SIZE);
        assert_eq!(loaded.epochs(), 2);

        let picture =
            Picture::load(&tmp.path().join("evaluate/bob/0.png"), loaded.image_size()).unwrap();
        let scores = loaded.predict(&picture).unwrap();
        assert_eq!(scores.len(), 2);
        assert!((scores.iter().sum::<f32>() - 1.0).abs() < 1e-3);
    }

    fn write_picture(dir: &Path, color: [u8; 3]) {
        std::fs::create_dir_all(dir).unwrap();
        RgbImage::from_pixel(60, 60, Rgb(color))
            .save(dir.join("0.png"))
            .unwrap();
    }

    #[test]
    fn test_fit_skips_evaluate_class_unknown_to_model() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path());
        write_picture(&tmp.path().join("evaluate/carl"), [20, 230, 20]);
        let training = ImageFolder::scan(&tmp.path().join("training")).unwrap();
        let evaluate = ImageFolder::scan(&tmp.path().join("evaluate")).unwrap();
        assert_eq!(evaluate.classes(), ["amy", "bob", "carl"]);

        let mut classifier =
            CnnClassifier::new(training.classes().to_vec(), small_settings()).unwrap();
        let history = classifier.fit(&training, &evaluate, 1).unwrap();
        assert!(history.val_loss.iter().all(|l| l.is_finite()));
        assert!(history.val_accuracy.iter().all(|a| (0.0..=1.0).contains(a)));
    }

    #[test]
    fn test_fit_evaluate_missing_middle_class() {
        let tmp = tempfile::tempdir().unwrap();
        let classes = [("amy", [230, 20, 20]), ("bob", [20, 20, 230]), ("carl", [20, 230, 20])];
        for (class, color) in classes {
            write_picture(&tmp.path().join("training").join(class), color);
            if class != "bob" {
                write_picture(&tmp.path().join("evaluate").join(class), color);
            }
        }
        let training = ImageFolder::scan(&tmp.path().join("training")).unwrap();
        let evaluate = ImageFolder::scan(&tmp.path().join("evaluate")).unwrap();

        let mut classifier =
            CnnClassifier::new(training.classes().to_vec(), small_settings()).unwrap();
        let history = classifier.fit(&training, &evaluate, 1).unwrap();
        assert_eq!(history.epochs(), 1);
        assert!(history.val_loss.iter().all(|l| l.is_finite()));
    }

    #[test]
    fn test_fit_rejects_empty_evaluate() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path());
        let empty = tmp.path().join("empty");
        std::fs::create_dir_all(empty.join("amy")).unwrap();
        let training = ImageFolder::scan(&tmp.path().join("training")).unwrap();
        let evaluate = ImageFolder::scan(&empty).unwrap();

        let mut classifier =
            CnnClassifier::new(training.classes().to_vec(), small_settings()).unwrap();
        match classifier.fit(&training, &evaluate, 1) {
            Err(ModelError::EmptyDataset(path)) => assert_eq!(path, empty),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_load_without_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            CnnClassifier::load(tmp.path(), CnnSettings::default()),
            Err(ModelError::NotFound(_))
        ));
    }
}
