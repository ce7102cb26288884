use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::relu,
};

use super::{
    channels_first, conv_output, flatten_channels_last, glorot_uniform, pool_output,
    DigitClassifier, ModelError, POOL_SIZE,
};
use crate::{
    data::{CHANNELS, HEIGHT},
    export::{Activation, ExportError, ExportLayer, LayersModel},
};

/// Keras default moving-average momentum of batch normalization.
pub const BATCH_NORM_MOMENTUM: f64 = 0.99;
/// Keras default batch normalization epsilon.
pub const BATCH_NORM_EPSILON: f64 = 1e-3;

/// Three convolutions with batch normalization and dropout, then a wide dense layer.
///
/// conv(32) → batch norm → conv(64) → pool → dropout → conv(128) → batch norm → pool →
/// dropout → dense(256) → dropout → dense(10)
#[derive(Module, Debug)]
pub struct RegularizedNet<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    pool1: MaxPool2d,
    dropout1: Dropout,
    conv3: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    pool2: MaxPool2d,
    dropout2: Dropout,
    hidden: Linear<B>,
    dropout3: Dropout,
    output: Linear<B>,
}

#[derive(Config, Debug)]
pub struct RegularizedNetConfig {
    #[config(default = 10)]
    pub num_classes: usize,
    #[config(default = "[32, 64, 128]")]
    pub filters: [usize; 3],
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = 256)]
    pub hidden_size: usize,
    #[config(default = 0.25)]
    pub conv_dropout: f64,
    #[config(default = 0.5)]
    pub dense_dropout: f64,
}

impl RegularizedNetConfig {
    /// Size of the flattened feature maps fed to the hidden layer.
    pub fn flattened_size(&self) -> Result<usize, ModelError> {
        let side = conv_output(HEIGHT, self.kernel_size)
            .and_then(|side| conv_output(side, self.kernel_size))
            .and_then(pool_output)
            .and_then(|side| conv_output(side, self.kernel_size))
            .and_then(pool_output)
            .ok_or(ModelError::FeatureMapTooSmall {
                kernel_size: self.kernel_size,
                side: HEIGHT,
            })?;

        Ok(side * side * self.filters[2])
    }

    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<RegularizedNet<B>, ModelError> {
        let flattened_size = self.flattened_size()?;
        let [filters1, filters2, filters3] = self.filters;
        let kernel = [self.kernel_size, self.kernel_size];
        let conv = |channels: [usize; 2]| {
            Conv2dConfig::new(channels, kernel)
                .with_initializer(glorot_uniform())
                .init::<B>(device)
        };
        // burn weighs the new batch statistics by `momentum`, Keras weighs the old average.
        let norm = |features: usize| {
            BatchNormConfig::new(features)
                .with_momentum(1.0 - BATCH_NORM_MOMENTUM)
                .with_epsilon(BATCH_NORM_EPSILON)
                .init::<B, 2>(device)
        };
        let pool = || {
            MaxPool2dConfig::new([POOL_SIZE, POOL_SIZE])
                .with_strides([POOL_SIZE, POOL_SIZE])
                .init()
        };

        Ok(RegularizedNet {
            conv1: conv([CHANNELS, filters1]),
            norm1: norm(filters1),
            conv2: conv([filters1, filters2]),
            pool1: pool(),
            dropout1: DropoutConfig::new(self.conv_dropout).init(),
            conv3: conv([filters2, filters3]),
            norm2: norm(filters3),
            pool2: pool(),
            dropout2: DropoutConfig::new(self.conv_dropout).init(),
            hidden: LinearConfig::new(flattened_size, self.hidden_size)
                .with_initializer(glorot_uniform())
                .init(device),
            dropout3: DropoutConfig::new(self.dense_dropout).init(),
            output: LinearConfig::new(self.hidden_size, self.num_classes)
                .with_initializer(glorot_uniform())
                .init(device),
        })
    }
}

impl<B: Backend> RegularizedNet<B> {
    /// # Shapes
    ///   - Images [batch_size, height, width, channels]
    ///   - Output [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = channels_first(images);

        let x = self.norm1.forward(relu(self.conv1.forward(x)));
        let x = self.pool1.forward(relu(self.conv2.forward(x)));
        let x = self.dropout1.forward(x);

        let x = self.norm2.forward(relu(self.conv3.forward(x)));
        let x = self.dropout2.forward(self.pool2.forward(x));

        let x = flatten_channels_last(x);
        let x = self.dropout3.forward(relu(self.hidden.forward(x)));

        self.output.forward(x)
    }
}

impl<B: Backend> DigitClassifier<B> for RegularizedNet<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}

impl<B: Backend> LayersModel for RegularizedNet<B> {
    fn layers(&self) -> Result<Vec<ExportLayer>, ExportError> {
        Ok(vec![
            ExportLayer::conv2d(&self.conv1, Activation::Relu)?,
            ExportLayer::batch_norm(&self.norm1, BATCH_NORM_MOMENTUM, BATCH_NORM_EPSILON)?,
            ExportLayer::conv2d(&self.conv2, Activation::Relu)?,
            ExportLayer::max_pool2d(POOL_SIZE),
            ExportLayer::dropout(self.dropout1.prob),
            ExportLayer::conv2d(&self.conv3, Activation::Relu)?,
            ExportLayer::batch_norm(&self.norm2, BATCH_NORM_MOMENTUM, BATCH_NORM_EPSILON)?,
            ExportLayer::max_pool2d(POOL_SIZE),
            ExportLayer::dropout(self.dropout2.prob),
            ExportLayer::flatten(),
            ExportLayer::dense(&self.hidden, Activation::Relu)?,
            ExportLayer::dropout(self.dropout3.prob),
            ExportLayer::dense(&self.output, Activation::Softmax)?,
        ])
    }
}
