/// Errors raised while assembling or training a classifier.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("{layer}: expected {expected} input features, found {found}")]
    FeatureMismatch {
        layer: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{layer}: expected {expected} input channels, found {found}")]
    ChannelMismatch {
        layer: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{layer}: window of {window} does not fit an input of {height}x{width}")]
    KernelTooLarge {
        layer: &'static str,
        window: usize,
        height: usize,
        width: usize,
    },

    #[error("image shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        found: [usize; 3],
    },

    #[error("image of shape {shape:?} needs {expected} pixels, found {found}")]
    PixelCount {
        shape: [usize; 3],
        expected: usize,
        found: usize,
    },

    #[error("{images} images but {labels} labels")]
    LengthMismatch { images: usize, labels: usize },

    #[error("the {0} split is empty")]
    EmptySplit(&'static str),

    #[error("label {label} is outside [0, {num_classes})")]
    LabelOutOfRange { label: usize, num_classes: usize },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Attributes a shape error to a named layer of a model.
    pub(crate) fn in_layer(self, name: &'static str) -> Self {
        match self {
            Error::FeatureMismatch {
                expected, found, ..
            } => Error::FeatureMismatch {
                layer: name,
                expected,
                found,
            },
            Error::ChannelMismatch {
                expected, found, ..
            } => Error::ChannelMismatch {
                layer: name,
                expected,
                found,
            },
            Error::KernelTooLarge {
                window,
                height,
                width,
                ..
            } => Error::KernelTooLarge {
                layer: name,
                window,
                height,
                width,
            },
            other => other,
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
