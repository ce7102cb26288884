use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig,
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

/// Two convolution and pooling stages followed by a single hidden dense layer.
#[derive(Module, Debug)]
pub struct CompactNet<B: Backend> {
    conv1: Conv2d<B>,
    pool1: MaxPool2d,
    conv2: Conv2d<B>,
    pool2: MaxPool2d,
    hidden: Linear<B>,
    output: Linear<B>,
}

#[derive(Config, Debug)]
pub struct CompactNetConfig {
    #[config(default = 10)]
    pub num_classes: usize,
    #[config(default = 32)]
    pub conv1_filters: usize,
    #[config(default = 64)]
    pub conv2_filters: usize,
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = 128)]
    pub hidden_size: usize,
}

impl CompactNetConfig {
    /// Size of the flattened feature maps fed to the hidden layer.
    pub fn flattened_size(&self) -> Result<usize, ModelError> {
        let side = conv_output(HEIGHT, self.kernel_size)
            .and_then(pool_output)
            .and_then(|side| conv_output(side, self.kernel_size))
            .and_then(pool_output)
            .ok_or(ModelError::FeatureMapTooSmall {
                kernel_size: self.kernel_size,
                side: HEIGHT,
            })?;

        Ok(side * side * self.conv2_filters)
    }

    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<CompactNet<B>, ModelError> {
        let flattened_size = self.flattened_size()?;
        let kernel = [self.kernel_size, self.kernel_size];
        let pool = || {
            MaxPool2dConfig::new([POOL_SIZE, POOL_SIZE])
                .with_strides([POOL_SIZE, POOL_SIZE])
                .init()
        };

        Ok(CompactNet {
            conv1: Conv2dConfig::new([CHANNELS, self.conv1_filters], kernel)
                .with_initializer(glorot_uniform())
                .init(device),
            pool1: pool(),
            conv2: Conv2dConfig::new([self.conv1_filters, self.conv2_filters], kernel)
                .with_initializer(glorot_uniform())
                .init(device),
            pool2: pool(),
            hidden: LinearConfig::new(flattened_size, self.hidden_size)
                .with_initializer(glorot_uniform())
                .init(device),
            output: LinearConfig::new(self.hidden_size, self.num_classes)
                .with_initializer(glorot_uniform())
                .init(device),
        })
    }
}

impl<B: Backend> CompactNet<B> {
    /// # Shapes
    ///   - Images [batch_size, height, width, channels]
    ///   - Output [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = channels_first(images);

        let x = self.pool1.forward(relu(self.conv1.forward(x)));
        let x = self.pool2.forward(relu(self.conv2.forward(x)));

        let x = flatten_channels_last(x);
        let x = relu(self.hidden.forward(x));

        self.output.forward(x)
    }
}

impl<B: Backend> DigitClassifier<B> for CompactNet<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}

impl<B: Backend> LayersModel for CompactNet<B> {
    fn layers(&self) -> Result<Vec<ExportLayer>, ExportError> {
        Ok(vec![
            ExportLayer::conv2d(&self.conv1, Activation::Relu)?,
            ExportLayer::max_pool2d(POOL_SIZE),
            ExportLayer::conv2d(&self.conv2, Activation::Relu)?,
            ExportLayer::max_pool2d(POOL_SIZE),
            ExportLayer::flatten(),
            ExportLayer::dense(&self.hidden, Activation::Relu)?,
            ExportLayer::dense(&self.output, Activation::Softmax)?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{DigitBatch, WIDTH},
        export::LayerKind,
    };
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn flattened_size_matches_keras() {
        // 28 -> 26 -> 13 -> 11 -> 5, times 64 filters.
        assert_eq!(CompactNetConfig::new().flattened_size(), Ok(1600));
    }

    #[test]
    fn oversized_kernel_is_rejected() {
        let device = Default::default();
        let config = CompactNetConfig::new().with_kernel_size(12);

        let result = config.init::<TestBackend>(&device);

        assert_eq!(
            result.err(),
            Some(ModelError::FeatureMapTooSmall {
                kernel_size: 12,
                side: HEIGHT,
            })
        );
    }

    #[test]
    fn probabilities_sum_to_one() {
        let device = Default::default();
        let model = CompactNetConfig::new().init::<TestBackend>(&device).unwrap();
        let images = Tensor::<TestBackend, 4>::random(
            [4, HEIGHT, WIDTH, CHANNELS],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );

        let probabilities = model.probabilities(images);

        assert_eq!(probabilities.dims(), [4, 10]);
        let sums = probabilities.sum_dim(1).into_data().to_vec::<f32>().unwrap();
        sums.iter().for_each(|sum| assert!((sum - 1.0).abs() < 1e-5));
    }

    #[test]
    fn logits_accept_a_batch() {
        let device = Default::default();
        let model = CompactNetConfig::new().init::<TestBackend>(&device).unwrap();
        let batch = DigitBatch::<TestBackend> {
            images: Tensor::zeros([2, HEIGHT, WIDTH, CHANNELS], &device),
            targets: Tensor::zeros([2], &device),
        };

        assert_eq!(model.logits(batch.images).dims(), [2, 10]);
    }

    #[test]
    fn export_describes_the_stack() {
        let device = Default::default();
        let model = CompactNetConfig::new().init::<TestBackend>(&device).unwrap();

        let layers = model.layers().unwrap();

        assert_eq!(layers.len(), 7);
        assert_eq!(
            layers.last().unwrap().kind,
            LayerKind::Dense {
                units: 10,
                activation: Activation::Softmax,
                use_bias: true,
            }
        );
        assert_eq!(layers[5].weights[0].shape, vec![1600, 128]);
        assert_eq!(layers[2].weights[0].shape, vec![3, 3, 32, 64]);
    }
}
