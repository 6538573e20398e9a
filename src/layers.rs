use burn::{
    config::Config,
    module::{Ignored, Module, Param},
    tensor::{
        activation::relu,
        backend::Backend,
        module::{conv2d, max_pool2d},
        ops::ConvOptions,
        ElementConversion, Tensor, TensorData,
    },
};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::Error;

/// Standard deviation of the truncated normal used for every weight.
pub const INIT_STD: f32 = 0.1;

/// Samples `count` values from a normal distribution with mean 0 and the given
/// standard deviation, re-drawing any sample further than two deviations away.
pub fn truncated_normal<R: Rng>(rng: &mut R, count: usize, std: f32) -> Vec<f32> {
    (0..count)
        .map(|_| loop {
            let z: f32 = rng.sample(StandardNormal);
            if z.abs() <= 2.0 {
                break z * std;
            }
        })
        .collect()
}

fn init_weight<B: Backend, const D: usize, R: Rng>(
    shape: [usize; D],
    device: &B::Device,
    rng: &mut R,
) -> Param<Tensor<B, D>> {
    let values = truncated_normal(rng, shape.iter().product(), INIT_STD);
    let data = TensorData::new(values, shape).convert::<B::FloatElem>();
    Param::from_tensor(Tensor::from_data(data, device))
}

/// Calculate asymmetric padding for "same" convolution as (start, end).
/// An odd total puts the extra row or column at the end.
fn calculate_same_padding(kernel_size: usize, stride: usize, size_in: usize) -> (usize, usize) {
    let size_out = size_in.div_ceil(stride);
    let total_padding = if size_out > 0 {
        let needed = (size_out - 1) * stride + kernel_size;
        needed.saturating_sub(size_in)
    } else {
        0
    };
    let pad_start = total_padding / 2;
    (pad_start, total_padding - pad_start)
}

/// Padding policy of a convolution.
#[derive(Config, Debug, PartialEq)]
pub enum Padding {
    /// Output size is `ceil(in / stride)`.
    Same,
    /// No padding. Output size is `(in - kernel) / stride + 1`.
    Valid,
}

/// Configuration to create a [convolution](Conv2d) layer.
#[derive(Config, Debug)]
pub struct Conv2dConfig {
    /// Input and output channels.
    pub channels: [usize; 2],
    /// Side of the square kernel.
    pub kernel_size: usize,
    #[config(default = 1)]
    pub stride: usize,
    #[config(default = "Padding::Valid")]
    pub padding: Padding,
}

/// 2D convolution over channels-last images followed by ReLU.
///
/// # Params
///
/// - weight: `[kernel_size, kernel_size, channels_in, channels_out]`
/// - bias: `[channels_out]`, zero initialized
#[derive(Module, Debug)]
pub struct Conv2d<B: Backend> {
    pub weight: Param<Tensor<B, 4>>,
    pub bias: Param<Tensor<B, 1>>,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: Ignored<Padding>,
}

impl Conv2dConfig {
    /// Initialize a new [convolution](Conv2d) layer.
    pub fn init<B: Backend, R: Rng>(&self, device: &B::Device, rng: &mut R) -> Conv2d<B> {
        let [channels_in, channels_out] = self.channels;
        Conv2d {
            weight: init_weight(
                [self.kernel_size, self.kernel_size, channels_in, channels_out],
                device,
                rng,
            ),
            bias: Param::from_tensor(Tensor::zeros([channels_out], device)),
            kernel_size: self.kernel_size,
            stride: self.stride,
            padding: Ignored(self.padding.clone()),
        }
    }
}

impl<B: Backend> Conv2d<B> {
    /// Output `[height, width, channels]` for an input of the given shape.
    pub fn output_shape(
        &self,
        [height, width, channels]: [usize; 3],
    ) -> crate::Result<[usize; 3]> {
        let [_, _, channels_in, channels_out] = self.weight.dims();
        if channels != channels_in {
            return Err(Error::ChannelMismatch {
                layer: "conv2d",
                expected: channels_in,
                found: channels,
            });
        }
        if self.stride == 0 || self.kernel_size == 0 {
            return Err(Error::Config(
                "conv2d kernel size and stride must be at least 1".to_string(),
            ));
        }

        match self.padding.0 {
            Padding::Same => Ok([
                height.div_ceil(self.stride),
                width.div_ceil(self.stride),
                channels_out,
            ]),
            Padding::Valid => {
                if self.kernel_size > height || self.kernel_size > width {
                    return Err(Error::KernelTooLarge {
                        layer: "conv2d",
                        window: self.kernel_size,
                        height,
                        width,
                    });
                }
                Ok([
                    (height - self.kernel_size) / self.stride + 1,
                    (width - self.kernel_size) / self.stride + 1,
                    channels_out,
                ])
            }
        }
    }

    /// Applies the convolution, the bias and ReLU.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, height_in, width_in, channels_in]`
    /// - output: `[batch_size, height_out, width_out, channels_out]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, height, width, _] = input.dims();
        let input = input.permute([0, 3, 1, 2]);

        let input = match self.padding.0 {
            Padding::Valid => input,
            Padding::Same => {
                let (top, bottom) = calculate_same_padding(self.kernel_size, self.stride, height);
                let (left, right) = calculate_same_padding(self.kernel_size, self.stride, width);
                if top + bottom + left + right == 0 {
                    input
                } else {
                    // pad takes (left, right, top, bottom) for the last two dimensions
                    input.pad((left, right, top, bottom), 0.0.elem::<B::FloatElem>())
                }
            }
        };

        let output = conv2d(
            input,
            self.weight.val().permute([3, 2, 0, 1]),
            Some(self.bias.val()),
            ConvOptions::new([self.stride, self.stride], [0, 0], [1, 1], 1),
        );

        relu(output.permute([0, 2, 3, 1]))
    }
}

/// Configuration to create a [max pooling](MaxPool2d) layer.
#[derive(Config, Debug)]
pub struct MaxPool2dConfig {
    /// Side of the square pooling window.
    pub window: usize,
    #[config(default = "window")]
    pub stride: usize,
}

/// Max pooling over channels-last images, without padding.
#[derive(Module, Clone, Debug)]
pub struct MaxPool2d {
    pub window: usize,
    pub stride: usize,
}

impl MaxPool2dConfig {
    pub fn init(&self) -> MaxPool2d {
        MaxPool2d {
            window: self.window,
            stride: self.stride,
        }
    }
}

impl MaxPool2d {
    pub fn output_shape(
        &self,
        [height, width, channels]: [usize; 3],
    ) -> crate::Result<[usize; 3]> {
        if self.stride == 0 || self.window == 0 {
            return Err(Error::Config(
                "max_pool2d window and stride must be at least 1".to_string(),
            ));
        }
        if self.window > height || self.window > width {
            return Err(Error::KernelTooLarge {
                layer: "max_pool2d",
                window: self.window,
                height,
                width,
            });
        }
        Ok([
            (height - self.window) / self.stride + 1,
            (width - self.window) / self.stride + 1,
            channels,
        ])
    }

    /// # Shapes
    ///
    /// - input: `[batch_size, height_in, width_in, channels]`
    /// - output: `[batch_size, height_out, width_out, channels]`
    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = max_pool2d(
            input.permute([0, 3, 1, 2]),
            [self.window, self.window],
            [self.stride, self.stride],
            [0, 0],
            [1, 1],
        );
        output.permute([0, 2, 3, 1])
    }
}

/// Number of features produced by flattening an image of the given shape.
pub fn flatten_size(shape: [usize; 3]) -> usize {
    shape.iter().product()
}

/// Flattens `[batch_size, height, width, channels]` into `[batch_size, features]`,
/// keeping the row-major order of each example.
pub fn flatten<B: Backend>(input: Tensor<B, 4>, features: usize) -> Tensor<B, 2> {
    let [batch_size, ..] = input.dims();
    input.reshape([batch_size, features])
}

/// Configuration to create a [dense](Dense) layer.
#[derive(Config, Debug)]
pub struct DenseConfig {
    pub d_input: usize,
    pub d_output: usize,
    /// Apply ReLU to the output. Disabled for the logits layer.
    #[config(default = true)]
    pub activate: bool,
}

/// Fully connected layer: `input · weight + bias`.
///
/// # Params
///
/// - weight: `[d_input, d_output]`
/// - bias: `[d_output]`, zero initialized
#[derive(Module, Debug)]
pub struct Dense<B: Backend> {
    pub weight: Param<Tensor<B, 2>>,
    pub bias: Param<Tensor<B, 1>>,
    pub activate: bool,
}

impl DenseConfig {
    pub fn init<B: Backend, R: Rng>(&self, device: &B::Device, rng: &mut R) -> Dense<B> {
        Dense {
            weight: init_weight([self.d_input, self.d_output], device, rng),
            bias: Param::from_tensor(Tensor::zeros([self.d_output], device)),
            activate: self.activate,
        }
    }
}

impl<B: Backend> Dense<B> {
    pub fn output_features(&self, features: usize) -> crate::Result<usize> {
        let [d_input, d_output] = self.weight.dims();
        if features != d_input {
            return Err(Error::FeatureMismatch {
                layer: "dense",
                expected: d_input,
                found: features,
            });
        }
        Ok(d_output)
    }

    /// # Shapes
    ///
    /// - input: `[batch_size, d_input]`
    /// - output: `[batch_size, d_output]`
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let output = input.matmul(self.weight.val()) + self.bias.val().unsqueeze();
        if self.activate {
            relu(output)
        } else {
            output
        }
    }
}
