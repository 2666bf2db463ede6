//! Compute backend of the `perceptual` binary.
//!
//! The tensor backend comes from the `cuda`, `wgpu` or `ndarray` feature,
//! checked in that order. Whatever is picked is wrapped in [`Autodiff`]:
//! `eval` backpropagates the loss into the reconstruction to report its
//! mean absolute gradient, and the frozen extractors still have to pass gradients
//! through to that image.

use burn::{backend::Autodiff, tensor::Device};
use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        /// Tensor backend under the autodiff wrapper.
        pub type ComputeBackend = burn::backend::Cuda;
        pub const BACKEND_NAME: &str = "CUDA (NVIDIA GPU)";
    } else if #[cfg(feature = "wgpu")] {
        pub type ComputeBackend = burn::backend::Wgpu;
        pub const BACKEND_NAME: &str = "WGPU (GPU)";
    } else {
        pub type ComputeBackend = burn::backend::NdArray;
        pub const BACKEND_NAME: &str = "NdArray (CPU)";
    }
}

/// Backend every loss is built and evaluated on.
pub type LossBackend = Autodiff<ComputeBackend>;

/// Device of [`LossBackend`], the default device of [`ComputeBackend`].
pub fn loss_device() -> Device<LossBackend> {
    Default::default()
}
