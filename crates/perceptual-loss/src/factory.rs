//! Construction of losses by name.

use std::{fmt, str::FromStr};

use burn::prelude::*;

use crate::{
    CompositeLoss, LossBreakdown, LossConfig, LossError, LossG, LossInput, LossResult, NaiveLoss,
    VggDistance, VitVgg, VitVggAlt,
};

/// Loss variants selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LossKind {
    Naive,
    Vit,
    Vgg,
    VitVgg,
    VitVggAlt,
}

impl LossKind {
    pub const ALL: [Self; 5] = [
        Self::Naive,
        Self::Vit,
        Self::Vgg,
        Self::VitVgg,
        Self::VitVggAlt,
    ];

    /// The name used in training configurations.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Naive => "Naive",
            Self::Vit => "ViT",
            Self::Vgg => "VGG",
            Self::VitVgg => "ViTVGG",
            Self::VitVggAlt => "ViTVGGAlt",
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LossKind {
    type Err = LossError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| LossError::UnknownVariant {
                name: name.to_owned(),
            })
    }
}

/// Any loss variant.
#[derive(Module, Debug)]
pub enum PerceptualLoss<B: Backend> {
    Naive(NaiveLoss),
    Vit(LossG<B>),
    Vgg(VggDistance<B>),
    VitVgg(VitVgg<B>),
    VitVggAlt(VitVggAlt<B>),
}

impl<B: Backend> PerceptualLoss<B> {
    pub const fn kind(&self) -> LossKind {
        match self {
            Self::Naive(_) => LossKind::Naive,
            Self::Vit(_) => LossKind::Vit,
            Self::Vgg(_) => LossKind::Vgg,
            Self::VitVgg(_) => LossKind::VitVgg,
            Self::VitVggAlt(_) => LossKind::VitVggAlt,
        }
    }
}

impl<B: Backend> CompositeLoss<B> for PerceptualLoss<B> {
    fn forward(&self, input: &LossInput<B>) -> LossBreakdown<B> {
        match self {
            Self::Naive(loss) => loss.forward(input),
            Self::Vit(loss) => loss.forward(input),
            Self::Vgg(loss) => loss.forward(input),
            Self::VitVgg(loss) => loss.forward(input),
            Self::VitVggAlt(loss) => loss.forward(input),
        }
    }
}

/// A built loss and, for decoder-encoder models, an auxiliary transformer loss.
///
/// The auxiliary loss has every weight at zero; it only serves its extractor
/// queries ([`LossG::keys`], [`LossG::keys_self_similarity`], [`LossG::cls_token`]).
#[derive(Debug)]
pub struct LossBundle<B: Backend> {
    pub loss: PerceptualLoss<B>,
    pub auxiliary: Option<LossG<B>>,
}

/// Builds the loss variant named `name`.
///
/// # Errors
/// [`LossError::UnknownVariant`] for an unrecognized name, before any extractor
/// is built. [`LossError::InvalidConfiguration`] when an enabled term needs a
/// pretrained extractor whose checkpoint is not configured. Other configuration
/// and extractor errors otherwise.
pub fn build_loss<B: Backend>(
    name: &str,
    config: &LossConfig,
    device: &B::Device,
) -> LossResult<LossBundle<B>> {
    let kind: LossKind = name.parse()?;
    config.validate()?;
    tracing::info!(loss = %kind, model = %config.model, "building loss");

    let loss = match kind {
        LossKind::Naive => PerceptualLoss::Naive(NaiveLoss::new()),
        LossKind::Vit => PerceptualLoss::Vit(LossG::new(config, device)?),
        LossKind::Vgg => PerceptualLoss::Vgg(VggDistance::new(config, device)?),
        LossKind::VitVgg => PerceptualLoss::VitVgg(VitVgg::new(config, device)?),
        LossKind::VitVggAlt => PerceptualLoss::VitVggAlt(VitVggAlt::new(config, device)?),
    };

    let auxiliary = if config.model.is_decoder_encoder() {
        Some(LossG::auxiliary(config, device)?)
    } else {
        None
    };

    Ok(LossBundle { loss, auxiliary })
}
