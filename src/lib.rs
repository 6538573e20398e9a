//! A LeNet-style convolutional image classifier trained with Adam, mini-batches and
//! validation-driven early stopping.

#[macro_use]
extern crate derive_new;

/// The caller-facing classifier.
pub mod classifier;

/// Training hyper-parameters.
pub mod config;

/// Images, splits, batching and mini-batch order.
pub mod data;

/// Error type shared by the crate.
pub mod error;

/// Convolution, pooling, flatten and dense layers.
pub mod layers;

/// Cross-entropy, accuracy and predictions.
pub mod loss;

/// The fixed network.
pub mod model;

/// Adam.
pub mod optim;

/// Epoch loop, early stopping and metric history.
pub mod training;

pub use classifier::{Classifier, Splits, TrainingReport};
pub use config::TrainingConfig;
pub use data::{Image, ImageDataset, ImageItem};
pub use error::{Error, Result};
pub use model::{LeNet, LeNetConfig};
pub use optim::AdamConfig;
pub use training::{EpochRecord, MetricHistory, Metrics, StopReason};

/// Backend for test cases
#[cfg(test)]
pub type TestBackend = burn::backend::NdArray<f32>;

/// Backend for autodiff test cases
#[cfg(test)]
pub type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;
