//! Export of trained models as TensorFlow.js layers models.
//!
//! An export directory holds `model.json`, which describes the architecture as a Keras
//! `Sequential` topology and lists every weight tensor, and one or more binary files with the
//! little-endian `float32` weight values concatenated in manifest order.

mod layers;
mod topology;

pub use layers::*;
pub use topology::*;

use burn::config::Config;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::data::{CHANNELS, HEIGHT, WIDTH};

/// File name of the model descriptor.
pub const MODEL_FILE: &str = "model.json";
/// File name used by [WeightsLayout::Single].
pub const SINGLE_WEIGHTS_FILE: &str = "weights.bin";
/// Shard size used by the TensorFlow.js converter.
pub const DEFAULT_SHARD_BYTES: usize = 4 * 1024 * 1024;

const FORMAT: &str = "layers-model";
const DTYPE: &str = "float32";

/// Error type for [ModelExporter].
#[derive(Error, Debug)]
pub enum ExportError {
    /// I/O operation error.
    #[error("I/O error on `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The model descriptor could not be serialized.
    #[error("failed to serialize the model descriptor: {0}")]
    Json(#[from] serde_json::Error),

    /// A weight tensor could not be read back as `f32` values.
    #[error("failed to read tensor data: {0}")]
    TensorData(String),

    /// The export settings are unusable.
    #[error("invalid export configuration: {0}")]
    InvalidConfig(String),
}

/// How weight values are split into binary files.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightsLayout {
    /// `group1-shard{i}of{n}.bin` files of at most `shard_bytes` bytes each.
    Sharded { shard_bytes: usize },
    /// A single `weights.bin` file.
    Single,
}

#[derive(Config, Debug)]
pub struct ExportConfig {
    #[config(default = "WeightsLayout::Sharded { shard_bytes: DEFAULT_SHARD_BYTES }")]
    pub weights_layout: WeightsLayout,
    #[config(default = "String::from(\"sequential\")")]
    pub model_name: String,
    #[config(default = "format!(\"mnist-tfjs v{}\", env!(\"CARGO_PKG_VERSION\"))")]
    pub generated_by: String,
    #[config(default = "None")]
    pub converted_by: Option<String>,
    #[config(default = "None")]
    pub training: Option<TrainingSpec>,
}

/// Files written by an export.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportSummary {
    pub model_file: PathBuf,
    pub weight_files: Vec<PathBuf>,
    pub weight_bytes: usize,
}

/// Model descriptor and weight files of an export, before they are written to disk.
#[derive(Clone, Debug, PartialEq)]
pub struct Artifact {
    pub model: ModelJson,
    pub weight_files: Vec<(String, Vec<u8>)>,
}

impl Artifact {
    /// The pretty-printed `model.json` content.
    pub fn model_bytes(&self) -> Result<Vec<u8>, ExportError> {
        Ok(serde_json::to_vec_pretty(&self.model)?)
    }
}

pub struct ModelExporter {
    config: ExportConfig,
}

impl ModelExporter {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    /// Writes `model` into `dir`, creating the directory when it does not exist.
    ///
    /// Existing files with the same names are overwritten.
    pub fn export<M: LayersModel, P: AsRef<Path>>(
        &self,
        model: &M,
        dir: P,
    ) -> Result<ExportSummary, ExportError> {
        let dir = dir.as_ref();
        let artifact = self.artifact(model)?;
        let model_bytes = artifact.model_bytes()?;

        fs::create_dir_all(dir).map_err(|source| ExportError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut weight_files = Vec::with_capacity(artifact.weight_files.len());
        let mut weight_bytes = 0;
        for (name, bytes) in artifact.weight_files.iter() {
            let path = dir.join(name);
            write(&path, bytes)?;
            weight_bytes += bytes.len();
            weight_files.push(path);
        }

        let model_file = dir.join(MODEL_FILE);
        write(&model_file, &model_bytes)?;

        log::info!(
            "Exported {} layers and {} bytes of weights to {}",
            artifact.model.model_topology.config.layers.len(),
            weight_bytes,
            dir.display()
        );

        Ok(ExportSummary {
            model_file,
            weight_files,
            weight_bytes,
        })
    }

    /// Builds the descriptor and weight files without touching the file system.
    pub fn artifact<M: LayersModel>(&self, model: &M) -> Result<Artifact, ExportError> {
        let layers = model.layers()?;
        let mut names = LayerNames::default();
        let mut layer_json = Vec::with_capacity(layers.len());
        let mut entries = Vec::new();
        let mut buffer = Vec::new();

        for (index, layer) in layers.iter().enumerate() {
            let name = names.next(&layer.kind);
            let batch_input_shape =
                (index == 0).then_some([None, Some(HEIGHT), Some(WIDTH), Some(CHANNELS)]);
            layer_json.push(layer_config(&layer.kind, name.clone(), batch_input_shape));

            for weight in layer.weights.iter() {
                let expected: usize = weight.shape.iter().product();
                if expected != weight.values.len() {
                    return Err(ExportError::TensorData(format!(
                        "{name}/{} has shape {:?} but {} values",
                        weight.suffix,
                        weight.shape,
                        weight.values.len()
                    )));
                }

                entries.push(WeightEntry {
                    name: format!("{name}/{}", weight.suffix),
                    shape: weight.shape.clone(),
                    dtype: DTYPE,
                });
                buffer.extend(weight.values.iter().flat_map(|value| value.to_le_bytes()));
            }
        }

        let weight_files = self.split_weights(buffer)?;
        let model = ModelJson {
            format: FORMAT,
            generated_by: self.config.generated_by.clone(),
            converted_by: self.config.converted_by.clone(),
            model_topology: ModelTopology {
                class_name: "Sequential",
                config: SequentialConfig {
                    name: self.config.model_name.clone(),
                    layers: layer_json,
                },
                keras_version: self.config.generated_by.clone(),
                backend: "tensor_flow.js",
            },
            training_config: self.config.training.clone(),
            weights_manifest: vec![WeightsGroup {
                paths: weight_files.iter().map(|(name, _)| name.clone()).collect(),
                weights: entries,
            }],
        };

        Ok(Artifact {
            model,
            weight_files,
        })
    }

    fn split_weights(&self, buffer: Vec<u8>) -> Result<Vec<(String, Vec<u8>)>, ExportError> {
        match self.config.weights_layout {
            WeightsLayout::Single => Ok(vec![(SINGLE_WEIGHTS_FILE.to_string(), buffer)]),
            WeightsLayout::Sharded { shard_bytes: 0 } => Err(ExportError::InvalidConfig(
                "shard size must be at least one byte".to_string(),
            )),
            WeightsLayout::Sharded { shard_bytes } => {
                let mut shards: Vec<Vec<u8>> =
                    buffer.chunks(shard_bytes).map(<[u8]>::to_vec).collect();
                if shards.is_empty() {
                    shards.push(Vec::new());
                }

                let count = shards.len();
                Ok(shards
                    .into_iter()
                    .enumerate()
                    .map(|(i, shard)| (format!("group1-shard{}of{}.bin", i + 1, count), shard))
                    .collect())
            }
        }
    }
}

fn write(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    fs::write(path, bytes).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Keras auto-naming: the first layer of a class gets the bare prefix, the next ones `_1`, `_2`...
#[derive(Default)]
struct LayerNames {
    counts: BTreeMap<&'static str, usize>,
}

impl LayerNames {
    fn next(&mut self, kind: &LayerKind) -> String {
        let prefix = match kind {
            LayerKind::Conv2d { .. } => "conv2d",
            LayerKind::MaxPool2d { .. } => "max_pooling2d",
            LayerKind::BatchNorm { .. } => "batch_normalization",
            LayerKind::Dropout { .. } => "dropout",
            LayerKind::Flatten => "flatten",
            LayerKind::Dense { .. } => "dense",
        };

        let count = self.counts.entry(prefix).or_insert(0);
        let name = match *count {
            0 => prefix.to_string(),
            n => format!("{prefix}_{n}"),
        };
        *count += 1;

        name
    }
}

fn layer_config(
    kind: &LayerKind,
    name: String,
    batch_input_shape: Option<[Option<usize>; 4]>,
) -> LayerJson {
    let common = LayerCommon {
        name,
        trainable: true,
        dtype: DTYPE,
        batch_input_shape,
    };

    match kind {
        LayerKind::Conv2d {
            filters,
            kernel_size,
            activation,
            use_bias,
        } => LayerJson::Conv2D(Conv2DJson {
            common,
            filters: *filters,
            kernel_size: *kernel_size,
            strides: [1, 1],
            padding: "valid",
            data_format: "channels_last",
            dilation_rate: [1, 1],
            activation: *activation,
            use_bias: *use_bias,
            kernel_initializer: InitializerJson::GlorotUniform { seed: None },
            bias_initializer: InitializerJson::Zeros {},
        }),
        LayerKind::MaxPool2d { pool_size } => LayerJson::MaxPooling2D(MaxPooling2DJson {
            common,
            pool_size: *pool_size,
            strides: *pool_size,
            padding: "valid",
            data_format: "channels_last",
        }),
        LayerKind::BatchNorm { momentum, epsilon } => {
            LayerJson::BatchNormalization(BatchNormalizationJson {
                common,
                axis: -1,
                momentum: *momentum,
                epsilon: *epsilon,
                center: true,
                scale: true,
            })
        }
        LayerKind::Dropout { rate } => LayerJson::Dropout(DropoutJson {
            common,
            rate: *rate,
        }),
        LayerKind::Flatten => LayerJson::Flatten(FlattenJson {
            common,
            data_format: "channels_last",
        }),
        LayerKind::Dense {
            units,
            activation,
            use_bias,
        } => LayerJson::Dense(DenseJson {
            common,
            units: *units,
            activation: *activation,
            use_bias: *use_bias,
            kernel_initializer: InitializerJson::GlorotUniform { seed: None },
            bias_initializer: InitializerJson::Zeros {},
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    struct FixedModel(Vec<ExportLayer>);

    impl LayersModel for FixedModel {
        fn layers(&self) -> Result<Vec<ExportLayer>, ExportError> {
            Ok(self.0.clone())
        }
    }

    fn weight(suffix: &'static str, shape: Vec<usize>, start: f32) -> LayerWeight {
        let len = shape.iter().product::<usize>();
        LayerWeight {
            suffix,
            shape,
            values: (0..len).map(|i| start + i as f32).collect(),
        }
    }

    fn model() -> FixedModel {
        FixedModel(vec![
            ExportLayer {
                kind: LayerKind::Conv2d {
                    filters: 2,
                    kernel_size: [3, 3],
                    activation: Activation::Relu,
                    use_bias: true,
                },
                weights: vec![
                    weight("kernel", vec![3, 3, 1, 2], 0.0),
                    weight("bias", vec![2], 100.0),
                ],
            },
            ExportLayer::max_pool2d(2),
            ExportLayer::dropout(0.25),
            ExportLayer::flatten(),
            ExportLayer {
                kind: LayerKind::Dense {
                    units: 10,
                    activation: Activation::Relu,
                    use_bias: false,
                },
                weights: vec![weight("kernel", vec![338, 10], 0.5)],
            },
            ExportLayer {
                kind: LayerKind::Dense {
                    units: 10,
                    activation: Activation::Softmax,
                    use_bias: false,
                },
                weights: vec![weight("kernel", vec![10, 10], -1.0)],
            },
        ])
    }

    fn exporter(weights_layout: WeightsLayout) -> ModelExporter {
        ModelExporter::new(ExportConfig::new().with_weights_layout(weights_layout))
    }

    #[test]
    fn topology_follows_keras_conventions() {
        let artifact = exporter(WeightsLayout::Single).artifact(&model()).unwrap();
        let json: Value = serde_json::from_slice(&artifact.model_bytes().unwrap()).unwrap();

        assert_eq!(json["format"], "layers-model");
        assert_eq!(json["modelTopology"]["class_name"], "Sequential");

        let layers = json["modelTopology"]["config"]["layers"].as_array().unwrap();
        let classes: Vec<_> = layers.iter().map(|l| l["class_name"].as_str().unwrap()).collect();
        assert_eq!(classes, ["Conv2D", "MaxPooling2D", "Dropout", "Flatten", "Dense", "Dense"]);

        let names: Vec<_> = layers.iter().map(|l| l["config"]["name"].as_str().unwrap()).collect();
        assert_eq!(names, ["conv2d", "max_pooling2d", "dropout", "flatten", "dense", "dense_1"]);

        assert_eq!(
            layers[0]["config"]["batch_input_shape"],
            serde_json::json!([null, 28, 28, 1])
        );
        assert!(layers[1]["config"].get("batch_input_shape").is_none());
        assert_eq!(layers[0]["config"]["activation"], "relu");
        assert_eq!(layers[5]["config"]["activation"], "softmax");
        assert_eq!(layers[5]["config"]["units"], 10);
        assert_eq!(layers[1]["config"]["strides"], serde_json::json!([2, 2]));
    }

    #[test]
    fn manifest_lists_weights_in_buffer_order() {
        let artifact = exporter(WeightsLayout::Single).artifact(&model()).unwrap();
        let group = &artifact.model.weights_manifest[0];

        assert_eq!(group.paths, vec![SINGLE_WEIGHTS_FILE.to_string()]);
        let names: Vec<_> = group.weights.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["conv2d/kernel", "conv2d/bias", "dense/kernel", "dense_1/kernel"]);

        let values = 18 + 2 + 3380 + 100;
        let (_, bytes) = &artifact.weight_files[0];
        assert_eq!(bytes.len(), values * 4);
        // First bias value follows the 18 kernel values.
        assert_eq!(&bytes[18 * 4..19 * 4], &100.0f32.to_le_bytes());
    }

    #[test]
    fn sharding_splits_the_buffer() {
        let artifact = exporter(WeightsLayout::Sharded { shard_bytes: 4096 })
            .artifact(&model())
            .unwrap();

        let names: Vec<_> = artifact.weight_files.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            [
                "group1-shard1of4.bin",
                "group1-shard2of4.bin",
                "group1-shard3of4.bin",
                "group1-shard4of4.bin",
            ]
        );
        assert!(artifact.weight_files[..3].iter().all(|(_, bytes)| bytes.len() == 4096));
        assert_eq!(artifact.weight_files[3].1.len(), 3500 * 4 - 3 * 4096);
        assert_eq!(artifact.model.weights_manifest[0].paths, names);
    }

    #[test]
    fn zero_sized_shards_are_rejected() {
        let result = exporter(WeightsLayout::Sharded { shard_bytes: 0 }).artifact(&model());

        assert!(matches!(result, Err(ExportError::InvalidConfig(_))));
    }

    #[test]
    fn mismatched_weight_length_is_rejected() {
        let mut model = model();
        model.0[0].weights[1].values.pop();

        let result = exporter(WeightsLayout::Single).artifact(&model);

        assert!(matches!(result, Err(ExportError::TensorData(_))));
    }

    #[test]
    fn export_writes_files_and_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("model");
        let exporter = exporter(WeightsLayout::Sharded { shard_bytes: 8192 });

        let summary = exporter.export(&model(), &target).unwrap();
        let first = fs::read(&summary.model_file).unwrap();
        let again = exporter.export(&model(), &target).unwrap();

        assert_eq!(summary, again);
        assert_eq!(first, fs::read(&again.model_file).unwrap());
        assert_eq!(summary.weight_files.len(), 2);
        assert_eq!(summary.weight_bytes, 3500 * 4);
        assert!(summary.weight_files.iter().all(|path| path.exists()));
    }

    #[test]
    fn unwritable_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        fs::write(&file, b"not a directory").unwrap();

        let result = exporter(WeightsLayout::Single).export(&model(), file.join("model"));

        assert!(matches!(result, Err(ExportError::Io { .. })));
    }

    #[test]
    fn training_config_is_optional() {
        let plain = exporter(WeightsLayout::Single).artifact(&model()).unwrap();
        let json: Value = serde_json::from_slice(&plain.model_bytes().unwrap()).unwrap();
        assert!(json.get("trainingConfig").is_none());

        let config = ExportConfig::new()
            .with_training(Some(TrainingSpec::adam(
                "categoricalCrossentropy",
                1e-3,
                0.9,
                0.999,
                1e-7,
            )));
        let compiled = ModelExporter::new(config).artifact(&model()).unwrap();
        let json: Value = serde_json::from_slice(&compiled.model_bytes().unwrap()).unwrap();
        assert_eq!(json["trainingConfig"]["loss"], "categoricalCrossentropy");
        assert_eq!(json["trainingConfig"]["optimizer_config"]["class_name"], "Adam");
        assert_eq!(
            json["trainingConfig"]["optimizer_config"]["config"]["learningRate"],
            1e-3
        );
    }
}
