use std::sync::Arc;

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::{transform::ShuffledDataset, Dataset},
    },
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{activation::log_softmax, backend::AutodiffBackend},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    data::{DigitBatch, DigitBatcher, DigitItem, NUM_CLASSES},
    model::DigitClassifier,
};

/// Error type for [Trainer].
#[derive(Error, Debug)]
pub enum TrainingError {
    /// Training needs at least one sample.
    #[error("the training dataset is empty")]
    EmptyDataset,

    /// The training settings are unusable.
    #[error("invalid training configuration: {0}")]
    InvalidConfig(String),
}

/// Per-class loss multipliers, indexed by digit.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ClassWeights(pub [f32; NUM_CLASSES]);

impl ClassWeights {
    /// Every class weighs 1.
    pub fn uniform() -> Self {
        Self([1.0; NUM_CLASSES])
    }

    /// Multiplies the weight of each listed digit by `factor`. Values above 9 are skipped.
    pub fn emphasize(mut self, digits: &[u8], factor: f32) -> Self {
        for digit in digits {
            match self.0.get_mut(*digit as usize) {
                Some(weight) => *weight *= factor,
                None => log::warn!("Ignoring class weight for {digit}, which is not a digit"),
            }
        }
        self
    }

    fn to_tensor<B: Backend>(self, device: &B::Device) -> Tensor<B, 1> {
        let data = TensorData::new(self.0.to_vec(), [NUM_CLASSES]);
        Tensor::from_data(data.convert::<B::FloatElem>(), device)
    }
}

#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = 1)]
    pub num_epochs: usize,
    #[config(default = 128)]
    pub batch_size: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    /// Reshuffle the training set before every epoch.
    #[config(default = true)]
    pub shuffle: bool,
    #[config(default = 42)]
    pub seed: u64,
    /// Data loading threads, `0` loads batches on the training thread.
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = "None")]
    pub class_weights: Option<ClassWeights>,
    /// Adam decay rate of the first moment.
    #[config(default = 0.9)]
    pub beta_1: f32,
    /// Adam decay rate of the second moment.
    #[config(default = 0.999)]
    pub beta_2: f32,
    /// Keras fuzz factor, burn's Adam defaults to `1e-5`.
    #[config(default = 1e-7)]
    pub epsilon: f32,
}

impl TrainingConfig {
    /// The Adam optimizer described by this config.
    pub fn optimizer(&self) -> AdamConfig {
        AdamConfig::new()
            .with_beta_1(self.beta_1)
            .with_beta_2(self.beta_2)
            .with_epsilon(self.epsilon)
    }
}

/// Metrics of one epoch, averaged over samples.
#[derive(Clone, Debug, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
}

/// Metrics of every completed epoch, in order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct History {
    pub epochs: Vec<EpochMetrics>,
}

impl History {
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

#[derive(Default)]
struct RunningMetrics {
    loss_sum: f64,
    correct: usize,
    samples: usize,
}

impl RunningMetrics {
    fn update<B: Backend>(
        &mut self,
        loss: Tensor<B, 1>,
        logits: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) {
        let batch_size = targets.dims()[0];
        let predictions = logits.argmax(1).squeeze::<1>(1);

        self.loss_sum += loss.into_scalar().elem::<f64>() * batch_size as f64;
        self.correct += predictions.equal(targets).int().sum().into_scalar().elem::<i64>() as usize;
        self.samples += batch_size;
    }

    fn loss(&self) -> f64 {
        match self.samples {
            0 => 0.0,
            n => self.loss_sum / n as f64,
        }
    }

    fn accuracy(&self) -> f64 {
        match self.samples {
            0 => 0.0,
            n => self.correct as f64 / n as f64,
        }
    }
}

/// Mean cross-entropy between the softmax of `logits` and integer `targets`.
///
/// With class weights, each sample's loss is scaled by the weight of its target class before
/// the batch mean is taken.
pub fn cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
    class_weights: Option<&Tensor<B, 1>>,
) -> Tensor<B, 1> {
    let [batch_size, _] = logits.dims();
    let log_probs = log_softmax(logits, 1);
    let losses = log_probs
        .gather(1, targets.clone().reshape([batch_size, 1]))
        .reshape([batch_size])
        .neg();

    match class_weights {
        Some(weights) => (losses * weights.clone().select(0, targets)).mean(),
        None => losses.mean(),
    }
}

/// Runs mini-batch optimization of a [DigitClassifier] for a fixed number of epochs.
///
/// There is no checkpointing and no early stopping: an interrupted run starts over.
pub struct Trainer<B: AutodiffBackend> {
    config: TrainingConfig,
    device: B::Device,
    validation: Option<Arc<dyn Dataset<DigitItem>>>,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: TrainingConfig, device: B::Device) -> Self {
        Self {
            config,
            device,
            validation: None,
        }
    }

    /// Evaluates the model on `dataset` after every epoch.
    pub fn with_validation<D: Dataset<DigitItem> + 'static>(mut self, dataset: D) -> Self {
        self.validation = Some(Arc::new(dataset));
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Trains `model` on `dataset` and returns the updated model with its history.
    pub fn fit<M, D>(&self, mut model: M, dataset: D) -> Result<(M, History), TrainingError>
    where
        M: AutodiffModule<B> + DigitClassifier<B>,
        M::InnerModule: DigitClassifier<B::InnerBackend>,
        D: Dataset<DigitItem> + 'static,
    {
        let config = &self.config;
        if config.batch_size == 0 {
            return Err(TrainingError::InvalidConfig("batch size must be positive".to_string()));
        }
        if dataset.is_empty() {
            return Err(TrainingError::EmptyDataset);
        }

        log::info!(
            "Training on {} samples for {} epochs, batch size {}",
            dataset.len(),
            config.num_epochs,
            config.batch_size
        );

        let dataset: Arc<dyn Dataset<DigitItem>> = Arc::new(dataset);
        let dataloader_valid = self
            .validation
            .clone()
            .map(|dataset| build_loader::<B::InnerBackend>(dataset, config, &self.device));

        let class_weights = config
            .class_weights
            .map(|weights| weights.to_tensor::<B>(&self.device));
        let mut optimizer = config.optimizer().init::<B, M>();
        let mut history = History::default();

        for epoch in 1..=config.num_epochs {
            let mut train = RunningMetrics::default();
            let dataloader_train =
                build_loader::<B>(epoch_dataset(&dataset, config, epoch), config, &self.device);

            for (iteration, batch) in dataloader_train.iter().enumerate() {
                let logits = model.logits(batch.images);
                let loss =
                    cross_entropy(logits.clone(), batch.targets.clone(), class_weights.as_ref());

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optimizer.step(config.learning_rate, model, grads);

                train.update(loss.inner(), logits.inner(), batch.targets.inner());
                log::debug!("Epoch {epoch} iteration {iteration} loss {:.4}", train.loss());
            }

            let mut metrics = EpochMetrics {
                epoch,
                loss: train.loss(),
                accuracy: train.accuracy(),
                val_loss: None,
                val_accuracy: None,
            };

            if let Some(dataloader) = &dataloader_valid {
                let model_valid = model.valid();
                let mut valid = RunningMetrics::default();

                for batch in dataloader.iter() {
                    let logits = model_valid.logits(batch.images);
                    let loss = cross_entropy(logits.clone(), batch.targets.clone(), None);
                    valid.update(loss, logits, batch.targets);
                }

                metrics.val_loss = Some(valid.loss());
                metrics.val_accuracy = Some(valid.accuracy());
            }

            log::info!("{}", format_epoch(&metrics, config.num_epochs));
            history.epochs.push(metrics);
        }

        Ok((model, history))
    }
}

/// The training set as one epoch sees it.
///
/// Shuffling permutes the whole set with a per-epoch seed before the loader splits it between
/// workers, so every batch can draw from anywhere in the set.
fn epoch_dataset(
    dataset: &Arc<dyn Dataset<DigitItem>>,
    config: &TrainingConfig,
    epoch: usize,
) -> Arc<dyn Dataset<DigitItem>> {
    if !config.shuffle {
        return dataset.clone();
    }

    let seed = config.seed.wrapping_add(epoch as u64);
    Arc::new(ShuffledDataset::with_seed(dataset.clone(), seed))
}

fn build_loader<B: Backend>(
    dataset: Arc<dyn Dataset<DigitItem>>,
    config: &TrainingConfig,
    device: &B::Device,
) -> Arc<dyn DataLoader<B, DigitBatch<B>>> {
    let builder = DataLoaderBuilder::<B, DigitItem, DigitBatch<B>>::new(DigitBatcher)
        .batch_size(config.batch_size)
        .set_device(device.clone());

    let builder = match config.num_workers {
        0 => builder,
        workers => builder.num_workers(workers),
    };

    builder.build(dataset)
}

fn format_epoch(metrics: &EpochMetrics, num_epochs: usize) -> String {
    let mut line = format!(
        "Epoch {}/{} - loss: {:.4} - accuracy: {:.4}",
        metrics.epoch, num_epochs, metrics.loss, metrics.accuracy
    );
    if let (Some(loss), Some(accuracy)) = (metrics.val_loss, metrics.val_accuracy) {
        line.push_str(&format!(" - val_loss: {loss:.4} - val_accuracy: {accuracy:.4}"));
    }
    line
}
