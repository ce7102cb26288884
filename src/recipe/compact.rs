//! MNIST, two convolutions, one epoch, sharded export.

use std::path::Path;

use burn::{config::Config, data::dataset::Dataset, tensor::backend::AutodiffBackend};

use super::{fit_and_export, RecipeReport};
use crate::{
    data::DigitItem,
    dataset::MnistDataset,
    export::ExportConfig,
    model::CompactNetConfig,
    training::{Trainer, TrainingConfig},
    Error,
};

/// Default export directory.
pub const OUTPUT_DIR: &str = "./mnist_model";
/// Loss name recorded in the exported training config.
pub const LOSS: &str = "sparse_categorical_crossentropy";

#[derive(Config, Debug)]
pub struct CompactRecipeConfig {
    #[config(default = "CompactNetConfig::new()")]
    pub model: CompactNetConfig,
    #[config(default = "TrainingConfig::new()")]
    pub training: TrainingConfig,
    #[config(default = "ExportConfig::new()")]
    pub export: ExportConfig,
}

/// Downloads the MNIST training split, then trains and exports into `output_dir`.
pub fn run<B: AutodiffBackend>(
    config: &CompactRecipeConfig,
    output_dir: impl AsRef<Path>,
    device: B::Device,
) -> Result<RecipeReport, Error> {
    log::info!("Loading the MNIST training split");
    let train = MnistDataset::train()?;

    train_and_export::<B, _>(config, train, output_dir, device)
}

/// Trains a fresh [CompactNet](crate::model::CompactNet) on `train` and exports it.
pub fn train_and_export<B: AutodiffBackend, D: Dataset<DigitItem> + 'static>(
    config: &CompactRecipeConfig,
    train: D,
    output_dir: impl AsRef<Path>,
    device: B::Device,
) -> Result<RecipeReport, Error> {
    let model = config.model.init::<B>(&device)?;
    let trainer = Trainer::<B>::new(config.training.clone(), device);

    fit_and_export(
        model,
        trainer,
        train,
        &config.export,
        LOSS,
        output_dir.as_ref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dataset::SyntheticDigits, export::WeightsLayout};
    use burn::backend::{Autodiff, NdArray};

    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn defaults_follow_the_script() {
        let config = CompactRecipeConfig::new();

        assert_eq!(config.training.num_epochs, 1);
        assert_eq!(config.training.batch_size, 128);
        assert!(config.training.class_weights.is_none());
        assert!(matches!(
            config.export.weights_layout,
            WeightsLayout::Sharded { .. }
        ));
    }

    #[test]
    fn exports_a_sharded_model() {
        let dir = tempfile::tempdir().unwrap();
        let config = CompactRecipeConfig::new()
            .with_model(
                CompactNetConfig::new()
                    .with_conv1_filters(2)
                    .with_conv2_filters(4)
                    .with_hidden_size(8),
            )
            .with_training(
                TrainingConfig::new()
                    .with_batch_size(4)
                    .with_num_workers(0)
                    .with_beta_1(0.5),
            );

        let report = train_and_export::<TestAutodiffBackend, _>(
            &config,
            SyntheticDigits::new(8, 3),
            dir.path(),
            Default::default(),
        )
        .unwrap();

        assert_eq!(report.history.epochs.len(), 1);
        assert_eq!(report.export.model_file, dir.path().join("model.json"));
        assert_eq!(
            report.export.weight_files,
            vec![dir.path().join("group1-shard1of1.bin")]
        );

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("model.json")).unwrap())
                .unwrap();
        assert_eq!(json["trainingConfig"]["loss"], LOSS);
        assert_eq!(
            json["trainingConfig"]["optimizer_config"]["config"]["beta1"],
            0.5
        );
        assert_eq!(
            json["modelTopology"]["config"]["layers"]
                .as_array()
                .unwrap()
                .len(),
            7
        );
    }
}
