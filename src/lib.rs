#![recursion_limit = "256"]

//! Train small convolutional MNIST classifiers with burn and export them as TensorFlow.js
//! layers models.

pub mod backend;
pub mod data;
pub mod dataset;
pub mod export;
pub mod model;
pub mod recipe;
pub mod training;

mod error;

pub use error::Error;
