use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building or loading a backbone.
#[derive(Error, Debug)]
pub enum BackboneError {
    /// The requested transformer variant is not known.
    #[error("Unknown DINO model: {name} (expected one of dino_vits16, dino_vits8, dino_vitb16, dino_vitb8)")]
    UnknownModel {
        /// The requested model name.
        name: String,
    },

    /// A layer index past the end of the network was requested.
    #[error("Layer {layer} is out of range for a backbone with {depth} layers")]
    LayerOutOfRange {
        /// The requested layer index.
        layer: usize,
        /// The number of layers available.
        depth: usize,
    },

    /// The backbone hyper-parameters are inconsistent.
    #[error("Invalid backbone configuration: {reason}")]
    InvalidConfiguration {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// Loading pretrained weights failed.
    #[error("Failed to load weights from {path}: {reason}")]
    WeightLoadingFailed {
        /// The weight file.
        path: PathBuf,
        /// The recorder error message.
        reason: String,
    },
}

/// A specialized `Result` type for backbone operations.
pub type BackboneResult<T> = Result<T, BackboneError>;
