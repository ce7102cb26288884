use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
};
use serde::{Deserialize, Serialize};

/// Image width in pixels.
pub const WIDTH: usize = 28;
/// Image height in pixels.
pub const HEIGHT: usize = 28;
/// Grayscale images carry a single channel.
pub const CHANNELS: usize = 1;
/// Digits 0 to 9.
pub const NUM_CLASSES: usize = 10;

/// A single grayscale digit.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DigitItem {
    /// Pixel intensities, row major, normalized to `[0, 1]`.
    pub image: [[f32; WIDTH]; HEIGHT],

    /// Digit shown in the image.
    pub label: u8,
}

/// Images in channels-last layout `[batch, height, width, channels]` with their labels.
#[derive(Clone, Debug)]
pub struct DigitBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug, Default)]
pub struct DigitBatcher;

impl<B: Backend> Batcher<B, DigitItem, DigitBatch<B>> for DigitBatcher {
    fn batch(&self, items: Vec<DigitItem>, device: &B::Device) -> DigitBatch<B> {
        let batch_size = items.len();
        let mut pixels = Vec::with_capacity(batch_size * HEIGHT * WIDTH * CHANNELS);
        let mut labels = Vec::with_capacity(batch_size);

        for item in items.iter() {
            pixels.extend(item.image.iter().flatten().copied());
            labels.push(item.label as i64);
        }

        let images = TensorData::new(pixels, [batch_size, HEIGHT, WIDTH, CHANNELS]);
        let images = Tensor::<B, 4>::from_data(images.convert::<B::FloatElem>(), device);

        let targets = TensorData::new(labels, [batch_size]);
        let targets = Tensor::<B, 1, Int>::from_data(targets.convert::<B::IntElem>(), device);

        DigitBatch { images, targets }
    }
}

/// Materializes a whole dataset as a single batch.
///
/// The image tensor has shape `[N, 28, 28, 1]` and the label tensor `[N]`, where `N` is the
/// dataset length.
pub fn to_tensors<B: Backend, D: Dataset<DigitItem>>(
    dataset: &D,
    device: &B::Device,
) -> DigitBatch<B> {
    let items: Vec<DigitItem> = dataset.iter().collect();
    Batcher::<B, DigitItem, DigitBatch<B>>::batch(&DigitBatcher, items, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, data::dataset::InMemDataset};

    type TestBackend = NdArray<f32>;

    fn item(label: u8, fill: f32) -> DigitItem {
        let mut image = [[0.0; WIDTH]; HEIGHT];
        image[3][7] = fill;
        DigitItem { image, label }
    }

    #[test]
    fn batch_is_channels_last() {
        let device = Default::default();
        let batch: DigitBatch<TestBackend> =
            DigitBatcher.batch(vec![item(3, 0.5), item(9, 1.0)], &device);

        assert_eq!(batch.images.dims(), [2, HEIGHT, WIDTH, CHANNELS]);
        assert_eq!(batch.targets.dims(), [2]);

        let pixel = batch
            .images
            .clone()
            .slice([1..2, 3..4, 7..8, 0..1])
            .into_scalar();
        assert_eq!(pixel, 1.0);

        let labels = batch.targets.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(labels, vec![3, 9]);
    }

    #[test]
    fn to_tensors_keeps_dataset_cardinality() {
        let device = Default::default();
        let dataset = InMemDataset::new((0..7).map(|i| item(i % 10, 0.25)).collect());

        let batch = to_tensors::<TestBackend, _>(&dataset, &device);

        assert_eq!(batch.images.dims(), [7, HEIGHT, WIDTH, CHANNELS]);
        assert_eq!(batch.targets.dims(), [7]);
    }
}
