use std::sync::Arc;

use burn::{
    data::dataloader::DataLoader,
    module::AutodiffModule,
    optim::{adaptor::OptimizerAdaptor, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
    LearningRate,
};
use serde::Serialize;

use crate::{
    data::ImageBatch,
    loss::{accuracy, cross_entropy},
    model::LeNet,
    optim::Adam,
    Result, TrainingConfig,
};

/// Loss and accuracy over a batch or a whole split.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Metrics {
    pub loss: f64,
    pub accuracy: f64,
}

impl Metrics {
    pub fn is_finite(&self) -> bool {
        self.loss.is_finite() && self.accuracy.is_finite()
    }
}

/// Running mean of batch metrics, weighted by batch size.
#[derive(Clone, Debug, Default)]
pub struct MetricAccumulator {
    loss: f64,
    accuracy: f64,
    items: usize,
}

impl MetricAccumulator {
    pub fn update(&mut self, metrics: Metrics, batch_size: usize) {
        self.loss += metrics.loss * batch_size as f64;
        self.accuracy += metrics.accuracy * batch_size as f64;
        self.items += batch_size;
    }

    pub fn value(&self) -> Metrics {
        let items = self.items.max(1) as f64;
        Metrics {
            loss: self.loss / items,
            accuracy: self.accuracy / items,
        }
    }
}

/// Metrics recorded at the end of one epoch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EpochRecord {
    /// 1-based epoch number.
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_loss: f64,
    pub valid_accuracy: f64,
}

impl EpochRecord {
    pub fn new(epoch: usize, train: Metrics, valid: Metrics) -> Self {
        Self {
            epoch,
            train_loss: train.loss,
            train_accuracy: train.accuracy,
            valid_loss: valid.loss,
            valid_accuracy: valid.accuracy,
        }
    }

    fn is_finite(&self) -> bool {
        [
            self.train_loss,
            self.train_accuracy,
            self.valid_loss,
            self.valid_accuracy,
        ]
        .iter()
        .all(|value| value.is_finite())
    }
}

/// The four per-epoch metric sequences, in epoch order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricColumns {
    pub train_loss: Vec<f64>,
    pub train_accuracy: Vec<f64>,
    pub valid_loss: Vec<f64>,
    pub valid_accuracy: Vec<f64>,
}

/// Append-only record of every completed epoch.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MetricHistory {
    records: Vec<EpochRecord>,
}

impl MetricHistory {
    pub fn push(&mut self, record: EpochRecord) {
        if !record.is_finite() {
            log::warn!("Non-finite metrics at epoch {}: {:?}", record.epoch, record);
        }
        self.records.push(record);
    }

    pub fn records(&self) -> &[EpochRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.records.last()
    }

    pub fn columns(&self) -> MetricColumns {
        let mut columns = MetricColumns::default();
        for record in &self.records {
            columns.train_loss.push(record.train_loss);
            columns.train_accuracy.push(record.train_accuracy);
            columns.valid_loss.push(record.valid_loss);
            columns.valid_accuracy.push(record.valid_accuracy);
        }
        columns
    }

    /// Epochs where any metric is NaN or infinite.
    pub fn non_finite_epochs(&self) -> Vec<usize> {
        self.records
            .iter()
            .filter(|record| !record.is_finite())
            .map(|record| record.epoch)
            .collect()
    }
}

/// Stops training once validation accuracy has not strictly improved for `patience` epochs.
#[derive(Clone, Debug, PartialEq)]
pub struct EarlyStopping {
    patience: usize,
    best_accuracy: f64,
    epochs_since_improvement: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best_accuracy: 0.0,
            epochs_since_improvement: 0,
        }
    }

    /// Records a validation accuracy and returns whether it improved on the best one.
    /// NaN never improves.
    pub fn update(&mut self, accuracy: f64) -> bool {
        if accuracy > self.best_accuracy {
            self.best_accuracy = accuracy;
            self.epochs_since_improvement = 0;
            true
        } else {
            self.epochs_since_improvement += 1;
            false
        }
    }

    pub fn should_stop(&self) -> bool {
        self.epochs_since_improvement >= self.patience
    }

    pub fn best_accuracy(&self) -> f64 {
        self.best_accuracy
    }

    pub fn epochs_since_improvement(&self) -> usize {
        self.epochs_since_improvement
    }
}

/// Why the epoch loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StopReason {
    EarlyStopped { epoch: usize },
    Exhausted,
}

/// Result of [fit].
#[derive(Clone, Debug, PartialEq)]
pub struct FitOutcome {
    pub history: MetricHistory,
    pub stop_reason: StopReason,
}

/// One training epoch and one validation pass.
pub trait EpochRunner {
    fn train_epoch(&mut self, epoch: usize) -> Result<Metrics>;
    fn validate(&mut self, epoch: usize) -> Result<Metrics>;
}

enum Phase {
    EpochRunning(usize),
    ValidationCheck { epoch: usize, train: Metrics },
    Finished(StopReason),
}

/// Runs up to `num_epochs` epochs, validating after each and stopping early on a
/// validation accuracy plateau.
pub fn fit<R: EpochRunner>(runner: &mut R, num_epochs: usize, patience: usize) -> Result<FitOutcome> {
    let mut history = MetricHistory::default();
    let mut stopping = EarlyStopping::new(patience);
    let mut phase = match num_epochs {
        0 => Phase::Finished(StopReason::Exhausted),
        _ => Phase::EpochRunning(1),
    };

    loop {
        phase = match phase {
            Phase::EpochRunning(epoch) => {
                log::info!("Executing training step for epoch {}", epoch);
                let train = runner.train_epoch(epoch)?;
                Phase::ValidationCheck { epoch, train }
            }
            Phase::ValidationCheck { epoch, train } => {
                log::info!("Executing validation step for epoch {}", epoch);
                let valid = runner.validate(epoch)?;
                history.push(EpochRecord::new(epoch, train, valid));
                println!(
                    "epoch {}: train loss = {:.4}, train acc = {:.4}, valid loss = {:.4}, valid acc = {:.4}",
                    epoch, train.loss, train.accuracy, valid.loss, valid.accuracy
                );

                if stopping.update(valid.accuracy) {
                    log::info!("Validation accuracy improved to {:.4}", valid.accuracy);
                }

                if stopping.should_stop() {
                    println!("early stopping");
                    Phase::Finished(StopReason::EarlyStopped { epoch })
                } else if epoch >= num_epochs {
                    Phase::Finished(StopReason::Exhausted)
                } else {
                    Phase::EpochRunning(epoch + 1)
                }
            }
            Phase::Finished(stop_reason) => {
                return Ok(FitOutcome {
                    history,
                    stop_reason,
                })
            }
        };
    }
}

/// Forward pass and metrics for one batch.
pub fn evaluate_batch<B: Backend>(model: &LeNet<B>, batch: ImageBatch<B>) -> Metrics {
    let logits = model.forward(batch.images);
    let loss = cross_entropy(logits.clone(), batch.one_hot);

    Metrics {
        loss: loss.into_scalar().elem::<f64>(),
        accuracy: accuracy(logits, batch.targets),
    }
}

/// Size-weighted metrics over every batch of `loader`.
pub fn evaluate_split<B: Backend>(
    model: &LeNet<B>,
    loader: &Arc<dyn DataLoader<ImageBatch<B>>>,
) -> Metrics {
    let mut accumulator = MetricAccumulator::default();

    for batch in loader.iter() {
        let batch_size = batch.len();
        accumulator.update(evaluate_batch(model, batch), batch_size);
    }

    accumulator.value()
}

/// Owns the model and optimizer for one run and performs one Adam step per mini-batch.
pub struct Learner<B: AutodiffBackend> {
    model: LeNet<B>,
    optim: OptimizerAdaptor<Adam, LeNet<B>, B>,
    learning_rate: LearningRate,
    train: Arc<dyn DataLoader<ImageBatch<B>>>,
    valid: Arc<dyn DataLoader<ImageBatch<B::InnerBackend>>>,
}

impl<B: AutodiffBackend> Learner<B> {
    /// Starts a run from a freshly initialized model and a new optimizer.
    pub fn new(
        model: LeNet<B>,
        config: &TrainingConfig,
        train: Arc<dyn DataLoader<ImageBatch<B>>>,
        valid: Arc<dyn DataLoader<ImageBatch<B::InnerBackend>>>,
    ) -> Self {
        Self {
            model,
            optim: config.optimizer.init(),
            learning_rate: config.learning_rate,
            train,
            valid,
        }
    }

    pub fn into_model(self) -> LeNet<B> {
        self.model
    }
}

impl<B: AutodiffBackend> EpochRunner for Learner<B> {
    fn train_epoch(&mut self, epoch: usize) -> Result<Metrics> {
        let mut accumulator = MetricAccumulator::default();

        for (iteration, batch) in self.train.iter().enumerate() {
            let batch_size = batch.len();
            let model = self.model.clone();

            let logits = model.forward(batch.images.clone());
            let loss = cross_entropy(logits, batch.one_hot.clone());

            // Gradients for the current backward pass
            let grads = loss.backward();
            // Gradients linked to each parameter of the model.
            let grads = GradientsParams::from_grads(grads, &model);
            self.model = self.optim.step(self.learning_rate, model, grads);

            // Metrics of the batch are taken with the updated parameters.
            let metrics = evaluate_batch(&self.model.valid(), batch.inner());
            log::debug!(
                "Epoch {} iteration {}: loss = {:.4}, accuracy = {:.4}",
                epoch,
                iteration + 1,
                metrics.loss,
                metrics.accuracy
            );
            accumulator.update(metrics, batch_size);
        }

        Ok(accumulator.value())
    }

    fn validate(&mut self, _epoch: usize) -> Result<Metrics> {
        Ok(evaluate_split(&self.model.valid(), &self.valid))
    }
}
