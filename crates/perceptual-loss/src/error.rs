use std::path::PathBuf;

use perceptual_backbones::BackboneError;
use thiserror::Error;

/// The error type for building perceptual losses.
///
/// Only construction can fail. Evaluating a loss never returns an error: shape
/// mismatches between paired batches surface as panics from the tensor math.
#[derive(Error, Debug)]
pub enum LossError {
    /// The requested loss variant does not exist.
    #[error("Unknown loss variant: {name} (expected one of Naive, ViT, VGG, ViTVGG, ViTVGGAlt)")]
    UnknownVariant {
        /// The requested variant name.
        name: String,
    },

    /// The configuration values are inconsistent.
    #[error("Invalid loss configuration: {reason}")]
    InvalidConfiguration {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// Reading or writing a configuration file failed.
    #[error("Failed to access configuration file {path}")]
    ConfigIo {
        /// The configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is not valid JSON for [`crate::LossConfig`].
    #[error("Failed to parse loss configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Pretrained weights were configured but weight loading is compiled out.
    #[error("Pretrained weights configured at {path}, but the `pretrained` feature is disabled")]
    PretrainedUnavailable {
        /// The configured weight file.
        path: PathBuf,
    },

    /// Building a feature extractor failed.
    #[error(transparent)]
    Backbone(#[from] BackboneError),
}

/// A specialized `Result` type for loss construction.
pub type LossResult<T> = Result<T, LossError>;
