//! iknowu-core — Person classification engine.
//!
//! Trains a small convolutional network (burn, CPU backend) on a curated
//! `training`/`evaluate` picture tree and names the person in a single
//! picture. An exported ONNX model can stand in for inference behind the
//! `onnx` feature.

pub mod card;
pub mod classifier;
pub mod cnn;
pub mod inferrer;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod picture;
pub mod report;
pub mod trainer;
pub mod types;

pub use card::ModelCard;
pub use classifier::{Classifier, ModelError, Predictor};
pub use cnn::{CnnClassifier, CnnSettings};
pub use inferrer::{InferError, Inferrer};
#[cfg(feature = "onnx")]
pub use onnx::OnnxPredictor;
pub use picture::{Picture, PictureError, IMAGE_SIZE};
pub use report::{Report, ReportError};
pub use trainer::{TrainError, Trainer, DEFAULT_EPOCHS};
pub use types::{best_index, EpochStats, History, Prediction};
