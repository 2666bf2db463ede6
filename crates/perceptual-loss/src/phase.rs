//! Losses switched by training epoch.

use burn::prelude::*;

use crate::{
    breakdown::term, CompositeLoss, LossBreakdown, LossConfig, LossG, LossInput, LossResult,
    VggDistance,
};

/// Whether `epoch` falls inside a warm-up of `warm_up_epochs` epochs.
///
/// A zero-length warm-up never applies, and neither does an unknown epoch.
pub fn in_warm_up(warm_up_epochs: usize, epoch: Option<usize>) -> bool {
    epoch.is_some_and(|epoch| epoch < warm_up_epochs)
}

/// VGG distance during warm-up, transformer loss afterwards ("ViTVGG").
#[derive(Module, Debug)]
pub struct VitVgg<B: Backend> {
    vgg: VggDistance<B>,
    vit: LossG<B>,
    /// `0` disables the warm-up.
    warm_up_epochs: usize,
}

impl<B: Backend> VitVgg<B> {
    pub fn new(config: &LossConfig, device: &B::Device) -> LossResult<Self> {
        Ok(Self::from_parts(
            VggDistance::new(config, device)?,
            LossG::new(config, device)?,
            config.warm_up(),
        ))
    }

    pub fn from_parts(vgg: VggDistance<B>, vit: LossG<B>, warm_up_epochs: Option<usize>) -> Self {
        Self {
            vgg,
            vit,
            warm_up_epochs: warm_up_epochs.unwrap_or(0),
        }
    }

    pub const fn vgg(&self) -> &VggDistance<B> {
        &self.vgg
    }

    pub const fn vit(&self) -> &LossG<B> {
        &self.vit
    }
}

impl<B: Backend> CompositeLoss<B> for VitVgg<B> {
    fn forward(&self, input: &LossInput<B>) -> LossBreakdown<B> {
        if in_warm_up(self.warm_up_epochs, input.epoch) {
            tracing::debug!(epoch = ?input.epoch, "warm-up phase, using VGG distance");
            self.vgg.forward(input)
        } else {
            tracing::debug!(epoch = ?input.epoch, "main phase, using transformer loss");
            self.vit.forward(input)
        }
    }
}

/// Evaluates both losses and gates the total by epoch ("ViTVGGAlt").
///
/// The breakdown carries the transformer terms plus both totals under
/// [`term::VGG_TOTAL`] and [`term::VIT`]. The total is:
/// - during warm-up: the VGG total plus the weighted embedding alignment, if computed
/// - after warm-up: the transformer total
/// - without a warm-up: the sum of both totals
#[derive(Module, Debug)]
pub struct VitVggAlt<B: Backend> {
    vgg: VggDistance<B>,
    vit: LossG<B>,
    warm_up_epochs: usize,
}

impl<B: Backend> VitVggAlt<B> {
    pub fn new(config: &LossConfig, device: &B::Device) -> LossResult<Self> {
        Ok(Self::from_parts(
            VggDistance::new(config, device)?,
            LossG::new(config, device)?,
            config.warm_up(),
        ))
    }

    pub fn from_parts(vgg: VggDistance<B>, vit: LossG<B>, warm_up_epochs: Option<usize>) -> Self {
        Self {
            vgg,
            vit,
            warm_up_epochs: warm_up_epochs.unwrap_or(0),
        }
    }

    pub const fn vgg(&self) -> &VggDistance<B> {
        &self.vgg
    }

    pub const fn vit(&self) -> &LossG<B> {
        &self.vit
    }
}

impl<B: Backend> CompositeLoss<B> for VitVggAlt<B> {
    fn forward(&self, input: &LossInput<B>) -> LossBreakdown<B> {
        let vgg_total = self.vgg.forward(input).into_loss();
        let vit = self.vit.forward(input);
        let vit_total = vit.loss();

        let total = if self.warm_up_epochs == 0 {
            vgg_total.clone() + vit_total.clone()
        } else if in_warm_up(self.warm_up_epochs, input.epoch) {
            tracing::debug!(epoch = ?input.epoch, "warm-up phase, gating on VGG distance");
            let alignment_weight = self.vit.weights().embedding_alignment;
            match vit.get(term::EMBEDDING_ALIGNMENT) {
                Some(alignment) => vgg_total.clone() + alignment.mul_scalar(alignment_weight),
                None => vgg_total.clone(),
            }
        } else {
            tracing::debug!(epoch = ?input.epoch, "main phase, gating on transformer loss");
            vit_total.clone()
        };

        let mut breakdown = LossBreakdown::zero(&input.device());
        breakdown.extend_terms(vit);
        breakdown.record(term::VGG_TOTAL, vgg_total);
        breakdown.record(term::VIT, vit_total);
        breakdown.set_total(total);
        breakdown
    }
}
