//! Serialized form of `model.json`, the descriptor of a TensorFlow.js layers model.

use serde::{Deserialize, Serialize};

use super::layers::Activation;

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelJson {
    pub format: &'static str,
    pub generated_by: String,
    pub converted_by: Option<String>,
    pub model_topology: ModelTopology,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training_config: Option<TrainingSpec>,
    pub weights_manifest: Vec<WeightsGroup>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ModelTopology {
    pub class_name: &'static str,
    pub config: SequentialConfig,
    pub keras_version: String,
    pub backend: &'static str,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SequentialConfig {
    pub name: String,
    pub layers: Vec<LayerJson>,
}

/// Fields shared by every Keras layer config.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LayerCommon {
    pub name: String,
    pub trainable: bool,
    pub dtype: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_input_shape: Option<[Option<usize>; 4]>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "class_name", content = "config")]
pub enum LayerJson {
    Conv2D(Conv2DJson),
    MaxPooling2D(MaxPooling2DJson),
    BatchNormalization(BatchNormalizationJson),
    Dropout(DropoutJson),
    Flatten(FlattenJson),
    Dense(DenseJson),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Conv2DJson {
    #[serde(flatten)]
    pub common: LayerCommon,
    pub filters: usize,
    pub kernel_size: [usize; 2],
    pub strides: [usize; 2],
    pub padding: &'static str,
    pub data_format: &'static str,
    pub dilation_rate: [usize; 2],
    pub activation: Activation,
    pub use_bias: bool,
    pub kernel_initializer: InitializerJson,
    pub bias_initializer: InitializerJson,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MaxPooling2DJson {
    #[serde(flatten)]
    pub common: LayerCommon,
    pub pool_size: [usize; 2],
    pub strides: [usize; 2],
    pub padding: &'static str,
    pub data_format: &'static str,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BatchNormalizationJson {
    #[serde(flatten)]
    pub common: LayerCommon,
    pub axis: i32,
    pub momentum: f64,
    pub epsilon: f64,
    pub center: bool,
    pub scale: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DropoutJson {
    #[serde(flatten)]
    pub common: LayerCommon,
    pub rate: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FlattenJson {
    #[serde(flatten)]
    pub common: LayerCommon,
    pub data_format: &'static str,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DenseJson {
    #[serde(flatten)]
    pub common: LayerCommon,
    pub units: usize,
    pub activation: Activation,
    pub use_bias: bool,
    pub kernel_initializer: InitializerJson,
    pub bias_initializer: InitializerJson,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "class_name", content = "config")]
pub enum InitializerJson {
    GlorotUniform { seed: Option<u64> },
    Zeros {},
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WeightsGroup {
    pub paths: Vec<String>,
    pub weights: Vec<WeightEntry>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WeightEntry {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: &'static str,
}

/// How the model was compiled, restored by the runtime when the model is loaded for further
/// training.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrainingSpec {
    pub loss: String,
    pub metrics: Vec<String>,
    pub optimizer_config: OptimizerSpec,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OptimizerSpec {
    pub class_name: String,
    pub config: AdamSpec,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdamSpec {
    pub learning_rate: f64,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl TrainingSpec {
    /// Adam with the given hyperparameters and an accuracy metric.
    pub fn adam(loss: &str, learning_rate: f64, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            loss: loss.to_string(),
            metrics: vec!["accuracy".to_string()],
            optimizer_config: OptimizerSpec {
                class_name: "Adam".to_string(),
                config: AdamSpec {
                    learning_rate,
                    beta1,
                    beta2,
                    epsilon,
                },
            },
        }
    }
}
