use burn::config::Config;

use crate::{optim::AdamConfig, Error};

/// Hyper-parameters of a training run.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub optimizer: AdamConfig,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 128)]
    pub batch_size: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    /// Epochs without a strict validation accuracy improvement before stopping.
    #[config(default = 8)]
    pub patience: usize,
    #[config(default = 42)]
    pub seed: u64,
    /// Chunk size for validation, test and prediction passes. `None` evaluates a
    /// whole split in one forward pass.
    pub eval_batch_size: Option<usize>,
}

impl TrainingConfig {
    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.eval_batch_size == Some(0) {
            return Err(Error::Config(
                "eval_batch_size must be at least 1".to_string(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}
