use anyhow::Context;
use mnist_tfjs::{
    backend::RecipeAutodiffBackend,
    recipe::regularized::{self, RegularizedRecipeConfig, OUTPUT_DIR},
};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RegularizedRecipeConfig::new();
    log::info!("Regularized recipe configuration: {config}");

    let report =
        regularized::run::<RecipeAutodiffBackend>(&config, OUTPUT_DIR, Default::default())
            .with_context(|| format!("regularized recipe failed to produce {OUTPUT_DIR}"))?;

    if let Some(last) = report.history.last() {
        log::info!(
            "Final validation accuracy {:.4}",
            last.val_accuracy.unwrap_or_default()
        );
    }
    log::info!("Model saved as {}", report.export.model_file.display());

    Ok(())
}
