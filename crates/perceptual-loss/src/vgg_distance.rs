//! VGG16 feature distance loss.

use burn::{module::Ignored, prelude::*};
use perceptual_backbones::{ConvFeatureExtractor, VggFeatures, VGG_DISTANCE_LAYERS};

use crate::{
    breakdown::term,
    extractors::build_vgg,
    terms::{embedding_l2_reg, vgg_distance},
    CompositeLoss, LossBreakdown, LossConfig, LossInput, LossResult, VggLossWeights,
};

/// `lambda_VGG * vgg + content_reg_vgg * content_reg`, each term gated on its weight.
///
/// Both images go through the network unnormalized and without resizing.
#[derive(Module, Debug)]
pub struct VggDistance<B: Backend, E = VggFeatures<B>> {
    features: E,
    layer_ids: Ignored<Vec<usize>>,
    vgg_weight: f64,
    content_reg_weight: f64,
    _backend: core::marker::PhantomData<B>,
}

impl<B: Backend> VggDistance<B> {
    /// Builds VGG16 features and the configured weights.
    ///
    /// `vgg_weights` must be set whenever `lambda_VGG` is positive.
    pub fn new(config: &LossConfig, device: &B::Device) -> LossResult<Self> {
        config.validate()?;
        let weights = config.vgg_loss_weights();
        let features = build_vgg(config, device, weights.vgg > 0.0)?;
        Ok(Self::from_parts(&weights, features))
    }
}

impl<B: Backend, E: ConvFeatureExtractor<B>> VggDistance<B, E> {
    /// Assembles the loss from already built features, collecting
    /// [`VGG_DISTANCE_LAYERS`].
    pub fn from_parts(weights: &VggLossWeights, features: E) -> Self {
        tracing::info!(
            vgg = weights.vgg,
            content_reg = weights.content_reg,
            "initialized VGG distance loss"
        );
        Self {
            features,
            layer_ids: Ignored(VGG_DISTANCE_LAYERS.to_vec()),
            vgg_weight: weights.vgg,
            content_reg_weight: weights.content_reg,
            _backend: core::marker::PhantomData,
        }
    }

    pub const fn weights(&self) -> VggLossWeights {
        VggLossWeights {
            vgg: self.vgg_weight,
            content_reg: self.content_reg_weight,
        }
    }
}

impl<B: Backend, E: ConvFeatureExtractor<B>> CompositeLoss<B> for VggDistance<B, E> {
    fn forward(&self, input: &LossInput<B>) -> LossBreakdown<B> {
        let mut breakdown = LossBreakdown::zero(&input.device());

        if self.vgg_weight > 0.0 {
            let loss = vgg_distance(
                &self.features,
                input.outputs.clone(),
                input.inputs.clone(),
                &self.layer_ids,
            );
            breakdown.add_weighted(term::VGG, loss, self.vgg_weight);
        }

        if self.content_reg_weight > 0.0 {
            let loss = embedding_l2_reg(input.content_embedding.clone());
            breakdown.add_weighted(term::CONTENT_REG, loss, self.content_reg_weight);
        }

        breakdown
    }
}
