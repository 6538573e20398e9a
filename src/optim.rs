use burn::{
    config::Config,
    module::AutodiffModule,
    optim::{adaptor::OptimizerAdaptor, SimpleOptimizer},
    record::Record,
    tensor::{
        backend::{AutodiffBackend, Backend},
        Tensor,
    },
    LearningRate,
};

/// Adam configuration.
#[derive(Config, Debug)]
pub struct AdamConfig {
    /// Decay rate of the first moment estimate.
    #[config(default = 0.9)]
    pub beta_1: f32,
    /// Decay rate of the second moment estimate.
    #[config(default = 0.999)]
    pub beta_2: f32,
    /// A value required for numerical stability.
    #[config(default = 1e-8)]
    pub epsilon: f32,
}

/// Adam optimizer as described in the paper [Adam: A Method for Stochastic Optimization](https://arxiv.org/pdf/1412.6980.pdf).
///
/// Moments are created on the first update of a parameter and kept by the adaptor,
/// keyed by parameter id, for as long as the optimizer lives.
#[derive(Clone, Debug)]
pub struct Adam {
    beta_1: f32,
    beta_2: f32,
    epsilon: f32,
}

/// Per-parameter Adam state.
#[derive(Record, Clone, new)]
pub struct AdamState<B: Backend, const D: usize> {
    /// Number of updates applied so far, starting at 1.
    pub time: usize,
    /// The first order moment.
    pub moment_1: Tensor<B, D>,
    /// The second order moment.
    pub moment_2: Tensor<B, D>,
}

impl AdamConfig {
    /// Initialize Adam optimizer for the given module type.
    pub fn init<B: AutodiffBackend, M: AutodiffModule<B>>(&self) -> OptimizerAdaptor<Adam, M, B> {
        OptimizerAdaptor::from(Adam {
            beta_1: self.beta_1,
            beta_2: self.beta_2,
            epsilon: self.epsilon,
        })
    }
}

impl Adam {
    fn moments<B: Backend, const D: usize>(
        &self,
        grad: Tensor<B, D>,
        state: Option<AdamState<B, D>>,
    ) -> AdamState<B, D> {
        match state {
            Some(mut state) => {
                state.moment_1 = state
                    .moment_1
                    .mul_scalar(self.beta_1)
                    .add(grad.clone().mul_scalar(1.0 - self.beta_1));
                state.moment_2 = state
                    .moment_2
                    .mul_scalar(self.beta_2)
                    .add(grad.powf_scalar(2.0).mul_scalar(1.0 - self.beta_2));
                state.time += 1;
                state
            }
            None => {
                let moment_1 = grad.clone().mul_scalar(1.0 - self.beta_1);
                let moment_2 = grad.powf_scalar(2.0).mul_scalar(1.0 - self.beta_2);
                AdamState::new(1, moment_1, moment_2)
            }
        }
    }
}

impl<B: Backend> SimpleOptimizer<B> for Adam {
    type State<const D: usize> = AdamState<B, D>;

    fn step<const D: usize>(
        &self,
        lr: LearningRate,
        tensor: Tensor<B, D>,
        grad: Tensor<B, D>,
        state: Option<Self::State<D>>,
    ) -> (Tensor<B, D>, Option<Self::State<D>>) {
        let state = self.moments(grad, state);

        let time = state.time as i32;
        let moment_1_corrected = state
            .moment_1
            .clone()
            .div_scalar(1.0 - self.beta_1.powi(time));
        let moment_2_corrected = state
            .moment_2
            .clone()
            .div_scalar(1.0 - self.beta_2.powi(time));

        let delta = moment_1_corrected
            .div(moment_2_corrected.sqrt().add_scalar(self.epsilon))
            .mul_scalar(lr);

        (tensor - delta, Some(state))
    }

    fn to_device<const D: usize>(mut state: Self::State<D>, device: &B::Device) -> Self::State<D> {
        state.moment_1 = state.moment_1.to_device(device);
        state.moment_2 = state.moment_2.to_device(device);
        state
    }
}
