use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};
use rand::Rng;

use crate::{
    layers::{
        flatten, flatten_size, Conv2d, Conv2dConfig, Dense, DenseConfig, MaxPool2d,
        MaxPool2dConfig,
    },
    Error,
};

/// Features entering the first dense layer.
pub const FLAT_FEATURES: usize = 400;

/// Configuration of the [LeNet](LeNet) classifier.
#[derive(Config, Debug)]
pub struct LeNetConfig {
    pub num_classes: usize,
    /// `[height, width, channels]` of every input image.
    pub input_shape: [usize; 3],
}

/// LeNet-style network:
///
/// conv 5x5 (3 -> 6) / pool 2x2 / conv 5x5 (6 -> 16) / pool 2x2 / flatten /
/// dense 400 -> 120 / dense 120 -> 84 / dense 84 -> num_classes (logits).
#[derive(Module, Debug)]
pub struct LeNet<B: Backend> {
    conv1: Conv2d<B>,
    pool1: MaxPool2d,
    conv2: Conv2d<B>,
    pool2: MaxPool2d,
    fc1: Dense<B>,
    fc2: Dense<B>,
    logits: Dense<B>,
    input_shape: [usize; 3],
    num_classes: usize,
}

impl LeNetConfig {
    /// Builds the network and checks that every layer accepts the output of the previous one.
    pub fn init<B: Backend, R: Rng>(
        &self,
        device: &B::Device,
        rng: &mut R,
    ) -> crate::Result<LeNet<B>> {
        if self.num_classes == 0 {
            return Err(Error::Config("num_classes must be at least 1".to_string()));
        }

        let model = LeNet {
            conv1: Conv2dConfig::new([3, 6], 5).init(device, rng),
            pool1: MaxPool2dConfig::new(2).init(),
            conv2: Conv2dConfig::new([6, 16], 5).init(device, rng),
            pool2: MaxPool2dConfig::new(2).init(),
            fc1: DenseConfig::new(FLAT_FEATURES, 120).init(device, rng),
            fc2: DenseConfig::new(120, 84).init(device, rng),
            logits: DenseConfig::new(84, self.num_classes)
                .with_activate(false)
                .init(device, rng),
            input_shape: self.input_shape,
            num_classes: self.num_classes,
        };

        model.check_shapes()?;
        Ok(model)
    }
}

impl<B: Backend> LeNet<B> {
    fn check_shapes(&self) -> crate::Result<()> {
        let shape = self
            .conv1
            .output_shape(self.input_shape)
            .map_err(|err| err.in_layer("conv1"))?;
        let shape = self
            .pool1
            .output_shape(shape)
            .map_err(|err| err.in_layer("pool1"))?;
        let shape = self
            .conv2
            .output_shape(shape)
            .map_err(|err| err.in_layer("conv2"))?;
        let shape = self
            .pool2
            .output_shape(shape)
            .map_err(|err| err.in_layer("pool2"))?;

        let features = self
            .fc1
            .output_features(flatten_size(shape))
            .map_err(|err| err.in_layer("fc1"))?;
        let features = self
            .fc2
            .output_features(features)
            .map_err(|err| err.in_layer("fc2"))?;
        self.logits
            .output_features(features)
            .map_err(|err| err.in_layer("logits"))?;

        Ok(())
    }

    pub fn input_shape(&self) -> [usize; 3] {
        self.input_shape
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// # Shapes
    ///
    /// - images: `[batch_size, height, width, channels]`
    /// - output: `[batch_size, num_classes]` logits
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(images);
        let x = self.pool1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.pool2.forward(x);

        let x = flatten(x, FLAT_FEATURES);
        let x = self.fc1.forward(x);
        let x = self.fc2.forward(x);

        self.logits.forward(x)
    }
}
