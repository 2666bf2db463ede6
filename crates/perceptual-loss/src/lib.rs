//! Composite perceptual training losses for image-to-image models.
//!
//! The losses compare a batch of reconstructions against the ground-truth batch
//! with pixel terms, DINO ViT features and VGG16 features, and regularize the
//! latent embeddings produced by the model.
//!
//! ## Loss variants
//!
//! - **[`NaiveLoss`]**: L1 + L2 + a fixed embedding penalty
//! - **[`LossG`]**: weighted transformer terms (key self-similarity, class
//!   token, key identity) plus pixel and embedding terms; disabled terms cost
//!   nothing
//! - **[`VggDistance`]**: multi-layer VGG16 feature distance
//! - **[`VitVgg`]**: VGG distance during warm-up, [`LossG`] afterwards
//! - **[`VitVggAlt`]**: both losses evaluated, total gated by the epoch
//!
//! Every variant returns a [`LossBreakdown`]: named terms plus the total under
//! `"loss"`. Variants are built by name through [`build_loss`].
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use burn::backend::NdArray;
//! use burn::prelude::*;
//! use perceptual_loss::{build_loss, CompositeLoss, LossConfig, LossInput};
//!
//! let device = Default::default();
//! let config = LossConfig::default().with_lambda_l1(1.0);
//! let bundle = build_loss::<NdArray>("ViT", &config, &device).expect("valid loss");
//!
//! let outputs = Tensor::<NdArray, 4>::zeros([2, 3, 224, 224], &device);
//! let inputs = Tensor::<NdArray, 4>::ones([2, 3, 224, 224], &device);
//! let content = Tensor::<NdArray, 2>::zeros([2, 256], &device);
//!
//! let breakdown = bundle.loss.forward(&LossInput::new(outputs, inputs, content));
//! let total = breakdown.loss();
//! ```

mod breakdown;
mod config;
mod error;
mod extractors;
mod factory;
mod input;
mod loss_g;
mod naive;
mod phase;
mod preprocess;
pub mod terms;
mod vgg_distance;

pub use breakdown::{term, LossBreakdown, TOTAL_KEY};
pub use config::{LossConfig, ModelKind, VggLossWeights, VitLossWeights};
pub use error::{LossError, LossResult};
pub use factory::{build_loss, LossBundle, LossKind, PerceptualLoss};
pub use input::{AuxiliaryCodes, LossInput};
pub use loss_g::LossG;
pub use naive::{NaiveLoss, NAIVE_REG_FACTOR};
pub use phase::{in_warm_up, VitVgg, VitVggAlt};
pub use preprocess::{Preprocess, PreprocessConfig, IMAGENET_MEAN, IMAGENET_STD};
pub use vgg_distance::VggDistance;

/// A loss evaluated on one training step.
pub trait CompositeLoss<B: burn::prelude::Backend> {
    /// Evaluates the enabled terms and their weighted sum.
    fn forward(&self, input: &LossInput<B>) -> LossBreakdown<B>;
}
