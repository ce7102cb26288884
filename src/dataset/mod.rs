//! Sources of labeled digit images.
//!
//! Both sources yield [DigitItem](crate::data::DigitItem)s with intensities already normalized
//! to `[0, 1]`, split into disjoint train and test partitions.

mod mnist;
mod synthetic;

pub use mnist::*;
pub use synthetic::*;

use std::path::PathBuf;
use thiserror::Error;

/// Error type for the dataset sources.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// I/O operation error.
    #[error("I/O error on `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The remote archive could not be fetched.
    #[error("failed to download `{url}`: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The file content does not follow the IDX layout.
    #[error("malformed IDX data: {0}")]
    Format(String),

    /// The platform exposes no per-user cache directory.
    #[error("could not locate a cache directory for the dataset files")]
    NoCacheDir,
}
