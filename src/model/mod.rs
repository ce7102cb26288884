//! Convolutional digit classifiers.

mod compact;
mod regularized;

pub use compact::*;
pub use regularized::*;

use burn::{
    nn::Initializer,
    prelude::*,
    tensor::activation::softmax,
};
use thiserror::Error;

/// Error type for the model configs.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ModelError {
    /// A convolution or pooling stage has no output left.
    #[error("kernel size {kernel_size} shrinks the {side}x{side} input to nothing")]
    FeatureMapTooSmall { kernel_size: usize, side: usize },
}

/// A model mapping channels-last digit images to class scores.
pub trait DigitClassifier<B: Backend> {
    /// Unnormalized class scores `[batch, 10]` for images `[batch, 28, 28, 1]`.
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Class probabilities, i.e. the softmax of the [logits](DigitClassifier::logits).
    fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.logits(images), 1)
    }
}

/// Pooling window and stride of every max-pooling layer.
pub(crate) const POOL_SIZE: usize = 2;

/// Spatial size after a valid (unpadded) convolution with unit stride.
pub(crate) fn conv_output(size: usize, kernel_size: usize) -> Option<usize> {
    match kernel_size {
        0 => None,
        _ => size.checked_sub(kernel_size).map(|rest| rest + 1),
    }
}

/// Spatial size after a valid pooling whose stride equals its window.
pub(crate) fn pool_output(size: usize) -> Option<usize> {
    (size >= POOL_SIZE).then_some(size / POOL_SIZE)
}

/// Glorot uniform, the Keras default kernel initializer.
pub(crate) fn glorot_uniform() -> Initializer {
    Initializer::XavierUniform { gain: 1.0 }
}

/// `[batch, height, width, channels]` to `[batch, channels, height, width]`.
pub(crate) fn channels_first<B: Backend>(images: Tensor<B, 4>) -> Tensor<B, 4> {
    images.permute([0, 3, 1, 2])
}

/// Flattens feature maps in channels-last order so dense kernels line up with the exported
/// layout.
pub(crate) fn flatten_channels_last<B: Backend>(features: Tensor<B, 4>) -> Tensor<B, 2> {
    features.permute([0, 2, 3, 1]).flatten(1, 3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::TensorData};

    type TestBackend = NdArray<f32>;

    #[test]
    fn output_sizes() {
        assert_eq!(conv_output(28, 3), Some(26));
        assert_eq!(conv_output(3, 3), Some(1));
        assert_eq!(pool_output(26), Some(13));
        assert_eq!(pool_output(11), Some(5));
    }

    #[test]
    fn stages_without_output_are_none() {
        assert_eq!(conv_output(2, 3), None);
        assert_eq!(conv_output(28, 0), None);
        assert_eq!(pool_output(1), None);
    }

    #[test]
    fn flatten_is_channels_last() {
        let device = Default::default();
        // One sample, 2 channels of 1x2 pixels: channel 0 = [0, 1], channel 1 = [10, 11].
        let features = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.0f32, 1.0, 10.0, 11.0], [1, 2, 1, 2]),
            &device,
        );

        let flat = flatten_channels_last(features);

        let values = flat.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![0.0, 10.0, 1.0, 11.0]);
    }

    #[test]
    fn channels_first_moves_the_channel_axis() {
        let device = Default::default();
        let images = Tensor::<TestBackend, 4>::zeros([3, 28, 28, 1], &device);

        assert_eq!(channels_first(images).dims(), [3, 1, 28, 28]);
    }
}
