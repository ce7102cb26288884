use thiserror::Error;

use crate::{
    dataset::DatasetError, export::ExportError, model::ModelError, training::TrainingError,
};

/// Error of any recipe stage.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Export(#[from] ExportError),
}
