//! Perceptual losses for image-to-image training on Burn.
//!
//! This crate re-exports the backbone and loss crates and hosts the pieces of
//! the `perceptual` command line tool: compile-time backend selection, image
//! loading and single-pair loss evaluation.

pub mod backend;
pub mod eval;
pub mod image;

#[doc(inline)]
pub use perceptual_backbones as backbones;
#[doc(inline)]
pub use perceptual_loss as loss;
