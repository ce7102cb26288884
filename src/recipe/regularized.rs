//! Synthetic digits, batch normalization and dropout, weighted classes, single-file export.

use std::path::Path;

use burn::{config::Config, data::dataset::Dataset, tensor::backend::AutodiffBackend};

use super::{fit_and_export, RecipeReport};
use crate::{
    data::DigitItem,
    dataset::SyntheticDigits,
    export::{ExportConfig, WeightsLayout},
    model::RegularizedNetConfig,
    training::{ClassWeights, Trainer, TrainingConfig},
    Error,
};

/// Default export directory.
pub const OUTPUT_DIR: &str = "./mnist_model_tfjs";
/// Loss name recorded in the exported training config.
pub const LOSS: &str = "categoricalCrossentropy";
/// Digits the classifier confuses most often.
pub const EMPHASIZED_DIGITS: [u8; 4] = [3, 5, 7, 9];
pub const EMPHASIS: f32 = 1.3;

#[derive(Config, Debug)]
pub struct RegularizedRecipeConfig {
    #[config(default = "RegularizedNetConfig::new()")]
    pub model: RegularizedNetConfig,
    #[config(default = "default_training()")]
    pub training: TrainingConfig,
    #[config(default = 60_000)]
    pub train_size: usize,
    #[config(default = 10_000)]
    pub test_size: usize,
    /// Seed of the synthetic digit generator.
    #[config(default = 7)]
    pub seed: u64,
    #[config(default = "ExportConfig::new().with_weights_layout(WeightsLayout::Single)")]
    pub export: ExportConfig,
}

fn default_training() -> TrainingConfig {
    TrainingConfig::new()
        .with_num_epochs(20)
        .with_batch_size(64)
        .with_shuffle(true)
        .with_class_weights(Some(
            ClassWeights::uniform().emphasize(&EMPHASIZED_DIGITS, EMPHASIS),
        ))
}

/// Generates the synthetic splits, then trains and exports into `output_dir`.
pub fn run<B: AutodiffBackend>(
    config: &RegularizedRecipeConfig,
    output_dir: impl AsRef<Path>,
    device: B::Device,
) -> Result<RecipeReport, Error> {
    let (train, test) = SyntheticDigits::splits(config.train_size, config.test_size, config.seed);
    log::info!(
        "Generating {} training and {} test digits with seed {}",
        train.len(),
        test.len(),
        config.seed
    );

    train_and_export::<B, _, _>(config, train, test, output_dir, device)
}

/// Trains a fresh [RegularizedNet](crate::model::RegularizedNet) on `train`, validating on
/// `test` after every epoch, and exports it.
pub fn train_and_export<B, D, V>(
    config: &RegularizedRecipeConfig,
    train: D,
    test: V,
    output_dir: impl AsRef<Path>,
    device: B::Device,
) -> Result<RecipeReport, Error>
where
    B: AutodiffBackend,
    D: Dataset<DigitItem> + 'static,
    V: Dataset<DigitItem> + 'static,
{
    let model = config.model.init::<B>(&device)?;
    let trainer = Trainer::<B>::new(config.training.clone(), device).with_validation(test);

    fit_and_export(
        model,
        trainer,
        train,
        &config.export,
        LOSS,
        output_dir.as_ref(),
    )
}
