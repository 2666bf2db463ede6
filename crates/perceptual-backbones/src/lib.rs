//! Frozen pretrained feature extractors used by the perceptual losses.
//!
//! This crate provides the two backbones the losses compare images with:
//!
//! - **[`DinoVit`]**: a self-supervised vision transformer (DINO ViT-S/B with
//!   patch size 8 or 16) exposing attention keys, key self-similarity and the
//!   class token of intermediate layers.
//! - **[`VggFeatures`]**: the convolutional `features` stack of VGG16, exposing
//!   activations collected at a list of layer indices.
//!
//! Loss code only talks to the [`VitFeatureExtractor`] and
//! [`ConvFeatureExtractor`] traits, so alternate backbones can be plugged in
//! without touching it. Every query takes a [`GradScope`] that states whether
//! the comparison branch is tracked by autodiff or evaluated as a fixed target.

mod error;
mod extractor;
mod grad;
mod vgg;
mod vit;
#[cfg(feature = "pretrained")]
mod weights;

pub use error::{BackboneError, BackboneResult};
pub use extractor::{ConvFeatureExtractor, VitFeatureExtractor};
pub use grad::GradScope;
pub use vgg::{VggFeatures, VggLayer, VGG_DISTANCE_LAYERS};
pub use vit::{
    Attention, AttentionConfig, Block, BlockConfig, DinoVit, DinoVitConfig, Mlp, MlpConfig,
    PatchEmbed, PatchEmbedConfig, VitFeatures,
};
#[cfg(feature = "pretrained")]
pub use weights::{load_dino_weights, load_vgg_weights};
