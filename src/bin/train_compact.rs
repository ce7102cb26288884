use anyhow::Context;
use mnist_tfjs::{
    backend::RecipeAutodiffBackend,
    recipe::compact::{self, CompactRecipeConfig, OUTPUT_DIR},
};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = CompactRecipeConfig::new();
    log::info!("Compact recipe configuration: {config}");

    let report = compact::run::<RecipeAutodiffBackend>(&config, OUTPUT_DIR, Default::default())
        .with_context(|| format!("compact recipe failed to produce {OUTPUT_DIR}"))?;

    if let Some(last) = report.history.last() {
        log::info!("Final training accuracy {:.4}", last.accuracy);
    }

    Ok(())
}
