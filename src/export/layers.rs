use burn::{
    nn::{conv::Conv2d, BatchNorm, Linear},
    prelude::*,
};
use serde::{Deserialize, Serialize};

use super::ExportError;

/// Activation applied on a layer's output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Softmax,
}

/// Architecture of one layer, independent of its weights.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerKind {
    Conv2d {
        filters: usize,
        kernel_size: [usize; 2],
        activation: Activation,
        use_bias: bool,
    },
    MaxPool2d {
        pool_size: [usize; 2],
    },
    /// `momentum` and `epsilon` use the moving-average convention of Keras.
    BatchNorm {
        momentum: f64,
        epsilon: f64,
    },
    Dropout {
        rate: f64,
    },
    Flatten,
    Dense {
        units: usize,
        activation: Activation,
        use_bias: bool,
    },
}

/// A weight tensor in the layout expected by the browser runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerWeight {
    /// Name of the weight inside its layer, e.g. `kernel` or `moving_mean`.
    pub suffix: &'static str,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// One layer of a sequential model with its weights, in execution order.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportLayer {
    pub kind: LayerKind,
    pub weights: Vec<LayerWeight>,
}

/// A sequential model that can describe itself layer by layer for export.
pub trait LayersModel {
    fn layers(&self) -> Result<Vec<ExportLayer>, ExportError>;
}

impl ExportLayer {
    /// Convolution kernels are stored `[out, in, kh, kw]` by burn and exported as
    /// `[kh, kw, in, out]`.
    pub fn conv2d<B: Backend>(
        conv: &Conv2d<B>,
        activation: Activation,
    ) -> Result<Self, ExportError> {
        let weight = conv.weight.val();
        let [filters, in_channels, kernel_height, kernel_width] = weight.dims();
        let kernel = oihw_to_hwio(
            &tensor_values(weight)?,
            [filters, in_channels, kernel_height, kernel_width],
        );

        let mut weights = vec![LayerWeight {
            suffix: "kernel",
            shape: vec![kernel_height, kernel_width, in_channels, filters],
            values: kernel,
        }];
        if let Some(bias) = &conv.bias {
            weights.push(LayerWeight {
                suffix: "bias",
                shape: vec![filters],
                values: tensor_values(bias.val())?,
            });
        }

        Ok(Self {
            kind: LayerKind::Conv2d {
                filters,
                kernel_size: [kernel_height, kernel_width],
                activation,
                use_bias: conv.bias.is_some(),
            },
            weights,
        })
    }

    /// Linear weights are already `[in, out]`.
    pub fn dense<B: Backend>(
        linear: &Linear<B>,
        activation: Activation,
    ) -> Result<Self, ExportError> {
        let weight = linear.weight.val();
        let [d_input, units] = weight.dims();

        let mut weights = vec![LayerWeight {
            suffix: "kernel",
            shape: vec![d_input, units],
            values: tensor_values(weight)?,
        }];
        if let Some(bias) = &linear.bias {
            weights.push(LayerWeight {
                suffix: "bias",
                shape: vec![units],
                values: tensor_values(bias.val())?,
            });
        }

        Ok(Self {
            kind: LayerKind::Dense {
                units,
                activation,
                use_bias: linear.bias.is_some(),
            },
            weights,
        })
    }

    pub fn batch_norm<B: Backend>(
        norm: &BatchNorm<B, 2>,
        momentum: f64,
        epsilon: f64,
    ) -> Result<Self, ExportError> {
        let tensors = [
            ("gamma", norm.gamma.val()),
            ("beta", norm.beta.val()),
            ("moving_mean", norm.running_mean.value()),
            ("moving_variance", norm.running_var.value()),
        ];

        let weights = tensors
            .into_iter()
            .map(|(suffix, tensor)| {
                Ok(LayerWeight {
                    suffix,
                    shape: tensor.dims().to_vec(),
                    values: tensor_values(tensor)?,
                })
            })
            .collect::<Result<Vec<_>, ExportError>>()?;

        Ok(Self {
            kind: LayerKind::BatchNorm { momentum, epsilon },
            weights,
        })
    }

    pub fn max_pool2d(pool_size: usize) -> Self {
        Self {
            kind: LayerKind::MaxPool2d {
                pool_size: [pool_size, pool_size],
            },
            weights: Vec::new(),
        }
    }

    pub fn dropout(rate: f64) -> Self {
        Self {
            kind: LayerKind::Dropout { rate },
            weights: Vec::new(),
        }
    }

    pub fn flatten() -> Self {
        Self {
            kind: LayerKind::Flatten,
            weights: Vec::new(),
        }
    }
}

fn tensor_values<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
) -> Result<Vec<f32>, ExportError> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| ExportError::TensorData(format!("{err:?}")))
}

/// Reorders a row-major `[out, in, kh, kw]` buffer into row-major `[kh, kw, in, out]`.
pub(crate) fn oihw_to_hwio(values: &[f32], [out, inp, kh, kw]: [usize; 4]) -> Vec<f32> {
    let mut hwio = vec![0.0; values.len()];

    for o in 0..out {
        for i in 0..inp {
            for h in 0..kh {
                for w in 0..kw {
                    let src = ((o * inp + i) * kh + h) * kw + w;
                    let dst = ((h * kw + w) * inp + i) * out + o;
                    hwio[dst] = values[src];
                }
            }
        }
    }

    hwio
}
