//! Loss configuration.
//!
//! [`LossConfig`] is the flat key/value surface read from training
//! configuration files. The composite losses consume the grouped
//! [`VitLossWeights`] and [`VggLossWeights`] derived from it.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{LossError, LossResult, PreprocessConfig};

/// Architecture of the model being trained.
///
/// Training configurations name many architectures; only the decoder-encoder
/// kind changes how losses are built. Any other name is kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModelKind {
    #[default]
    Standard,
    /// Models whose decoder output is re-encoded; losses built for them carry
    /// an auxiliary transformer loss for embedding alignment.
    DecoderEncoder,
    Other(String),
}

impl ModelKind {
    pub const fn is_decoder_encoder(&self) -> bool {
        matches!(self, Self::DecoderEncoder)
    }

    /// The name used in training configurations.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Standard => "Standard",
            Self::DecoderEncoder => "DecoderEncoder",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ModelKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "Standard" => Self::Standard,
            "DecoderEncoder" => Self::DecoderEncoder,
            _ => Self::Other(name),
        }
    }
}

impl From<ModelKind> for String {
    fn from(kind: ModelKind) -> Self {
        match kind {
            ModelKind::Other(name) => name,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat loss configuration, as found in training configuration files.
///
/// Missing keys take their defaults. Every weight defaults to `0.0`, which
/// disables the corresponding term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    /// DINO variant: `dino_vits16`, `dino_vits8`, `dino_vitb16` or `dino_vitb8`.
    pub dino_model_name: String,
    /// Target length of the shorter image side before the transformer.
    pub dino_global_patch_size: usize,
    /// Upper bound for the longer image side before the transformer.
    pub dino_max_size: usize,
    /// Transformer block whose keys feed the self-similarity and identity terms.
    pub dino_layer: usize,
    /// Embedding regularization weight of the transformer loss.
    pub content_reg_dino: f64,
    /// Embedding regularization weight of the VGG loss.
    pub content_reg_vgg: f64,
    pub lambda_l1: f64,
    pub lambda_l2: f64,
    /// Embedding alignment weight.
    pub dino_embedding_l2: f64,
    pub lambda_global_cls: f64,
    pub lambda_global_ssim: f64,
    pub lambda_global_identity: f64,
    #[serde(rename = "lambda_VGG")]
    pub lambda_vgg: f64,
    /// Epochs evaluated with the VGG loss before switching to the transformer loss.
    pub warm_up_epochs: Option<usize>,
    pub model: ModelKind,
    /// PyTorch checkpoint for the DINO extractor.
    pub dino_weights: Option<PathBuf>,
    /// PyTorch checkpoint for the VGG16 features.
    pub vgg_weights: Option<PathBuf>,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            dino_model_name: "dino_vitb8".to_owned(),
            dino_global_patch_size: 224,
            dino_max_size: 480,
            dino_layer: 11,
            content_reg_dino: 0.0,
            content_reg_vgg: 0.0,
            lambda_l1: 0.0,
            lambda_l2: 0.0,
            dino_embedding_l2: 0.0,
            lambda_global_cls: 0.0,
            lambda_global_ssim: 0.0,
            lambda_global_identity: 0.0,
            lambda_vgg: 0.0,
            warm_up_epochs: None,
            model: ModelKind::Standard,
            dino_weights: None,
            vgg_weights: None,
        }
    }
}

impl LossConfig {
    /// Reads a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> LossResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| LossError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded loss configuration");
        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> LossResult<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| LossError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks that the weights are non-negative and the resize bounds are consistent.
    pub fn validate(&self) -> LossResult<()> {
        let weights = [
            ("content_reg_dino", self.content_reg_dino),
            ("content_reg_vgg", self.content_reg_vgg),
            ("lambda_l1", self.lambda_l1),
            ("lambda_l2", self.lambda_l2),
            ("dino_embedding_l2", self.dino_embedding_l2),
            ("lambda_global_cls", self.lambda_global_cls),
            ("lambda_global_ssim", self.lambda_global_ssim),
            ("lambda_global_identity", self.lambda_global_identity),
            ("lambda_VGG", self.lambda_vgg),
        ];
        if let Some((key, value)) = weights
            .into_iter()
            .find(|(_, value)| !value.is_finite() || *value < 0.0)
        {
            return Err(LossError::InvalidConfiguration {
                reason: format!("{key} must be a non-negative finite weight, got {value}"),
            });
        }

        if self.dino_global_patch_size == 0 {
            return Err(LossError::InvalidConfiguration {
                reason: "dino_global_patch_size must be positive".to_owned(),
            });
        }
        if self.dino_max_size <= self.dino_global_patch_size {
            return Err(LossError::InvalidConfiguration {
                reason: format!(
                    "dino_max_size ({}) must be greater than dino_global_patch_size ({})",
                    self.dino_max_size, self.dino_global_patch_size
                ),
            });
        }
        Ok(())
    }

    /// Warm-up length, with `0` treated as no warm-up.
    pub fn warm_up(&self) -> Option<usize> {
        self.warm_up_epochs.filter(|&epochs| epochs > 0)
    }

    /// Weights of the transformer loss.
    pub fn vit_weights(&self) -> VitLossWeights {
        VitLossWeights::new()
            .with_global_ssim(self.lambda_global_ssim)
            .with_global_cls(self.lambda_global_cls)
            .with_global_identity(self.lambda_global_identity)
            .with_l1(self.lambda_l1)
            .with_l2(self.lambda_l2)
            .with_content_reg(self.content_reg_dino)
            .with_embedding_alignment(self.dino_embedding_l2)
    }

    /// Weights of the VGG loss.
    pub fn vgg_loss_weights(&self) -> VggLossWeights {
        VggLossWeights::new()
            .with_vgg(self.lambda_vgg)
            .with_content_reg(self.content_reg_vgg)
    }

    /// Resize and normalization in front of the transformer.
    pub fn preprocess(&self) -> PreprocessConfig {
        PreprocessConfig::new()
            .with_size(self.dino_global_patch_size)
            .with_max_size(self.dino_max_size)
    }

    pub fn with_dino_model_name(mut self, name: impl Into<String>) -> Self {
        self.dino_model_name = name.into();
        self
    }

    pub const fn with_dino_global_patch_size(mut self, size: usize) -> Self {
        self.dino_global_patch_size = size;
        self
    }

    pub const fn with_dino_max_size(mut self, size: usize) -> Self {
        self.dino_max_size = size;
        self
    }

    pub const fn with_dino_layer(mut self, layer: usize) -> Self {
        self.dino_layer = layer;
        self
    }

    pub const fn with_content_reg_dino(mut self, weight: f64) -> Self {
        self.content_reg_dino = weight;
        self
    }

    pub const fn with_content_reg_vgg(mut self, weight: f64) -> Self {
        self.content_reg_vgg = weight;
        self
    }

    pub const fn with_lambda_l1(mut self, weight: f64) -> Self {
        self.lambda_l1 = weight;
        self
    }

    pub const fn with_lambda_l2(mut self, weight: f64) -> Self {
        self.lambda_l2 = weight;
        self
    }

    pub const fn with_dino_embedding_l2(mut self, weight: f64) -> Self {
        self.dino_embedding_l2 = weight;
        self
    }

    pub const fn with_lambda_global_cls(mut self, weight: f64) -> Self {
        self.lambda_global_cls = weight;
        self
    }

    pub const fn with_lambda_global_ssim(mut self, weight: f64) -> Self {
        self.lambda_global_ssim = weight;
        self
    }

    pub const fn with_lambda_global_identity(mut self, weight: f64) -> Self {
        self.lambda_global_identity = weight;
        self
    }

    pub const fn with_lambda_vgg(mut self, weight: f64) -> Self {
        self.lambda_vgg = weight;
        self
    }

    pub const fn with_warm_up_epochs(mut self, epochs: Option<usize>) -> Self {
        self.warm_up_epochs = epochs;
        self
    }

    pub fn with_model(mut self, model: impl Into<ModelKind>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_dino_weights(mut self, path: Option<PathBuf>) -> Self {
        self.dino_weights = path;
        self
    }

    pub fn with_vgg_weights(mut self, path: Option<PathBuf>) -> Self {
        self.vgg_weights = path;
        self
    }
}

/// Weights of the transformer loss terms. A weight of `0.0` disables the term.
#[derive(Config, Debug, PartialEq)]
pub struct VitLossWeights {
    /// Key self-similarity.
    #[config(default = 0.0)]
    pub global_ssim: f64,
    /// Class token.
    #[config(default = 0.0)]
    pub global_cls: f64,
    /// Raw keys.
    #[config(default = 0.0)]
    pub global_identity: f64,
    #[config(default = 0.0)]
    pub l1: f64,
    #[config(default = 0.0)]
    pub l2: f64,
    #[config(default = 0.0)]
    pub content_reg: f64,
    #[config(default = 0.0)]
    pub embedding_alignment: f64,
}

impl VitLossWeights {
    /// Whether any enabled term queries the transformer.
    pub fn uses_extractor(&self) -> bool {
        self.global_ssim > 0.0 || self.global_cls > 0.0 || self.global_identity > 0.0
    }
}

/// Weights of the VGG loss terms.
#[derive(Config, Debug, PartialEq)]
pub struct VggLossWeights {
    #[config(default = 1.0)]
    pub vgg: f64,
    #[config(default = 0.0)]
    pub content_reg: f64,
}
