use std::sync::Arc;

use burn::{
    data::dataset::Dataset,
    module::{AutodiffModule, Module},
    tensor::backend::AutodiffBackend,
};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;

use crate::{
    data::{sequential_loader, shuffled_loader, Image, ImageBatcher, ImageDataset},
    loss::predictions,
    model::{LeNet, LeNetConfig},
    training::{evaluate_split, fit, Learner, MetricHistory, Metrics, StopReason},
    Error, Result, TrainingConfig,
};

/// Train, validation and test splits.
#[derive(Clone, Debug)]
pub struct Splits {
    pub train: ImageDataset,
    pub valid: ImageDataset,
    pub test: ImageDataset,
}

/// Everything a call to [Classifier::train] produced.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrainingReport {
    pub history: MetricHistory,
    pub stop_reason: StopReason,
    /// Test split metrics of the final parameters.
    pub test: Metrics,
}

/// A LeNet classifier bound to its data splits.
///
/// The number of classes is the count of distinct training labels and the input shape
/// is the shape of the first training image. Every image of every split must have that
/// shape.
pub struct Classifier<B: AutodiffBackend> {
    model: LeNet<B>,
    model_config: LeNetConfig,
    config: TrainingConfig,
    train: Arc<ImageDataset>,
    valid: Arc<ImageDataset>,
    test: Arc<ImageDataset>,
    device: B::Device,
}

impl<B: AutodiffBackend> Classifier<B> {
    pub fn new(splits: Splits, config: TrainingConfig, device: B::Device) -> Result<Self> {
        config.validate()?;

        let named = [
            ("train", &splits.train),
            ("valid", &splits.valid),
            ("test", &splits.test),
        ];
        for (name, split) in named {
            if split.is_empty() {
                return Err(Error::EmptySplit(name));
            }
        }

        let num_classes = splits.train.num_classes();
        let input_shape = splits
            .train
            .image_shape()
            .ok_or(Error::EmptySplit("train"))?;
        for (_, split) in named {
            split.check_shapes(input_shape)?;
            split.check_labels(num_classes)?;
        }

        let model_config = LeNetConfig::new(num_classes, input_shape);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let model = model_config.init(&device, &mut rng)?;
        log::info!(
            "LeNet with {} parameters for {} classes of {:?} images",
            model.num_params(),
            num_classes,
            input_shape
        );

        Ok(Self {
            model,
            model_config,
            config,
            train: Arc::new(splits.train),
            valid: Arc::new(splits.valid),
            test: Arc::new(splits.test),
            device,
        })
    }

    /// Trains from freshly initialized parameters for at most `epochs` epochs, then
    /// evaluates the final parameters on the test split.
    pub fn train(&mut self, epochs: usize) -> Result<TrainingReport> {
        println!("training start");
        B::seed(self.config.seed);
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let model = self.model_config.init(&self.device, &mut rng)?;

        let dataloader_train = shuffled_loader(
            self.batcher(),
            self.train.clone(),
            self.config.batch_size,
            self.config.seed,
        );
        let dataloader_valid = sequential_loader(
            self.inner_batcher(),
            self.valid.clone(),
            self.config.eval_batch_size,
        );

        let mut learner = Learner::new(model, &self.config, dataloader_train, dataloader_valid);
        let outcome = fit(&mut learner, epochs, self.config.patience)?;
        self.model = learner.into_model();
        println!("training complete");

        let test = self.metrics(self.test.clone());
        println!("test accuracy = {:.4}", test.accuracy);

        Ok(TrainingReport {
            history: outcome.history,
            stop_reason: outcome.stop_reason,
            test,
        })
    }

    /// Loss and accuracy of the current parameters over a labeled split.
    pub fn evaluate(&self, dataset: &ImageDataset) -> Result<Metrics> {
        dataset.check_shapes(self.input_shape())?;
        dataset.check_labels(self.num_classes())?;

        Ok(self.metrics(Arc::new(dataset.clone())))
    }

    /// Class indices for `images`, in input order.
    pub fn predict(&self, images: &[Image]) -> Result<Vec<usize>> {
        let batcher = self.inner_batcher();
        let model = self.model.valid();
        let chunk_size = self.config.eval_batch_size.unwrap_or(images.len()).max(1);
        let mut classes = Vec::with_capacity(images.len());

        for chunk in images.chunks(chunk_size) {
            let batch = batcher.images(chunk)?;
            classes.extend(predictions(model.forward(batch)));
        }

        Ok(classes)
    }

    pub fn model(&self) -> &LeNet<B> {
        &self.model
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn num_classes(&self) -> usize {
        self.model_config.num_classes
    }

    pub fn input_shape(&self) -> [usize; 3] {
        self.model_config.input_shape
    }

    fn metrics(&self, dataset: Arc<ImageDataset>) -> Metrics {
        let loader = sequential_loader(self.inner_batcher(), dataset, self.config.eval_batch_size);
        evaluate_split(&self.model.valid(), &loader)
    }

    fn batcher(&self) -> ImageBatcher<B> {
        ImageBatcher::new(self.device.clone(), self.input_shape(), self.num_classes())
    }

    fn inner_batcher(&self) -> ImageBatcher<B::InnerBackend> {
        ImageBatcher::new(self.device.clone(), self.input_shape(), self.num_classes())
    }
}
