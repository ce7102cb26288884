//! End-to-end recipes: acquire data, build a model, train it and export it.

pub mod compact;
pub mod regularized;

use std::path::Path;

use burn::{data::dataset::Dataset, module::AutodiffModule, tensor::backend::AutodiffBackend};

use crate::{
    data::DigitItem,
    export::{ExportConfig, ExportSummary, LayersModel, ModelExporter, TrainingSpec},
    model::DigitClassifier,
    training::{History, Trainer, TrainingConfig},
    Error,
};

/// Outcome of a recipe run.
#[derive(Clone, Debug)]
pub struct RecipeReport {
    pub history: History,
    pub export: ExportSummary,
}

/// Trains `model` and exports its inference form into `output_dir`.
///
/// The exported `trainingConfig` lists `loss` with the optimizer settings of `training`.
fn fit_and_export<B, M, D>(
    model: M,
    trainer: Trainer<B>,
    train: D,
    export: &ExportConfig,
    loss: &str,
    output_dir: &Path,
) -> Result<RecipeReport, Error>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + DigitClassifier<B>,
    M::InnerModule: DigitClassifier<B::InnerBackend> + LayersModel,
    D: Dataset<DigitItem> + 'static,
{
    let training_spec = compiled_with(loss, trainer.config());
    let (model, history) = trainer.fit(model, train)?;

    let exporter = ModelExporter::new(export.clone().with_training(Some(training_spec)));
    let export = exporter.export(&model.valid(), output_dir)?;
    log::info!("Exported TF.js model to {}", output_dir.display());

    Ok(RecipeReport { history, export })
}

fn compiled_with(loss: &str, training: &TrainingConfig) -> TrainingSpec {
    TrainingSpec::adam(
        loss,
        training.learning_rate,
        training.beta_1,
        training.beta_2,
        training.epsilon,
    )
}
