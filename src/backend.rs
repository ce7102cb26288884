//! Backend the binaries train on, selected with cargo features.
//!
//! `wgpu` wins over `tch-cpu`, which wins over the default `ndarray`.

#[cfg(not(any(feature = "ndarray", feature = "tch-cpu", feature = "wgpu")))]
compile_error!("enable one of the `ndarray`, `tch-cpu` or `wgpu` features");

use burn::backend::Autodiff;

#[cfg(feature = "wgpu")]
pub type RecipeBackend = burn::backend::Wgpu;

#[cfg(all(feature = "tch-cpu", not(feature = "wgpu")))]
pub type RecipeBackend = burn::backend::LibTorch;

#[cfg(all(feature = "ndarray", not(any(feature = "tch-cpu", feature = "wgpu"))))]
pub type RecipeBackend = burn::backend::NdArray;

pub type RecipeAutodiffBackend = Autodiff<RecipeBackend>;
