use std::fs;

use burn::{
    backend::{Autodiff, NdArray},
    data::dataset::Dataset,
    module::AutodiffModule,
};
use mnist_tfjs::{
    data::to_tensors,
    dataset::SyntheticDigits,
    export::{ExportConfig, ExportError, ModelExporter, WeightsLayout},
    model::{CompactNetConfig, DigitClassifier, RegularizedNetConfig},
    recipe::compact::{self, CompactRecipeConfig},
    training::{Trainer, TrainingConfig},
    Error,
};

type TestBackend = NdArray<f32>;
type TestAutodiffBackend = Autodiff<TestBackend>;

fn tiny_training() -> TrainingConfig {
    TrainingConfig::new()
        .with_batch_size(4)
        .with_num_workers(0)
}

#[test]
fn trained_model_exports_deterministically() {
    let device = Default::default();
    let dir = tempfile::tempdir().unwrap();
    let (train, test) = SyntheticDigits::splits(12, 6, 21);
    let model = RegularizedNetConfig::new()
        .with_filters([2, 4, 4])
        .with_hidden_size(8)
        .init::<TestAutodiffBackend>(&device)
        .unwrap();

    let trainer = Trainer::<TestAutodiffBackend>::new(tiny_training(), device);
    let (model, history) = trainer.fit(model, train).unwrap();
    let model = model.valid();

    assert_eq!(history.epochs.len(), 1);

    let batch = to_tensors::<TestBackend, _>(&test, &device);
    assert_eq!(batch.images.dims(), [test.len(), 28, 28, 1]);
    assert_eq!(model.probabilities(batch.images).dims(), [test.len(), 10]);

    let exporter = ModelExporter::new(ExportConfig::new());
    let first = exporter.export(&model, dir.path().join("first")).unwrap();
    let second = exporter.export(&model, dir.path().join("second")).unwrap();

    assert!(first.model_file.is_file());
    assert!(!first.weight_files.is_empty());
    assert_eq!(
        fs::read(&first.model_file).unwrap(),
        fs::read(&second.model_file).unwrap()
    );
    for (a, b) in first.weight_files.iter().zip(second.weight_files.iter()) {
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }

    let bytes: usize = first
        .weight_files
        .iter()
        .map(|path| fs::metadata(path).unwrap().len() as usize)
        .sum();
    assert_eq!(bytes, first.weight_bytes);
}

#[test]
fn small_shards_split_the_weights() {
    let device = Default::default();
    let dir = tempfile::tempdir().unwrap();
    let model = CompactNetConfig::new()
        .with_conv1_filters(2)
        .with_conv2_filters(4)
        .with_hidden_size(8)
        .init::<TestBackend>(&device)
        .unwrap();
    let config =
        ExportConfig::new().with_weights_layout(WeightsLayout::Sharded { shard_bytes: 1024 });

    let summary = ModelExporter::new(config).export(&model, dir.path()).unwrap();

    let count = summary.weight_files.len();
    assert!(count > 1);
    for (index, path) in summary.weight_files.iter().enumerate() {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, format!("group1-shard{}of{}.bin", index + 1, count));
        assert!(fs::metadata(path).unwrap().len() <= 1024);
    }
}

#[test]
fn recipe_reports_unwritable_output() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-directory");
    fs::write(&blocker, b"occupied").unwrap();

    let config = CompactRecipeConfig::new()
        .with_model(
            CompactNetConfig::new()
                .with_conv1_filters(2)
                .with_conv2_filters(2)
                .with_hidden_size(4),
        )
        .with_training(tiny_training());

    let result = compact::train_and_export::<TestAutodiffBackend, _>(
        &config,
        SyntheticDigits::new(4, 2),
        blocker.join("mnist_model"),
        Default::default(),
    );

    assert!(matches!(result, Err(Error::Export(ExportError::Io { .. }))));
}
