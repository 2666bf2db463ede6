//! Baseline loss without perceptual terms.

use burn::prelude::*;

use crate::{
    breakdown::term,
    terms::{embedding_l2_reg, pixel_l1_loss, pixel_l2_loss},
    CompositeLoss, LossBreakdown, LossInput,
};

/// Fixed weight of the embedding regularization in [`NaiveLoss`].
pub const NAIVE_REG_FACTOR: f64 = 1e-3;

/// `l1 + l2 + 1e-3 * content_reg`, with no configurable weights.
#[derive(Module, Clone, Debug)]
pub struct NaiveLoss {
    reg_factor: f64,
}

impl Default for NaiveLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl NaiveLoss {
    pub const fn new() -> Self {
        Self {
            reg_factor: NAIVE_REG_FACTOR,
        }
    }
}

impl<B: Backend> CompositeLoss<B> for NaiveLoss {
    fn forward(&self, input: &LossInput<B>) -> LossBreakdown<B> {
        let mut breakdown = LossBreakdown::zero(&input.device());
        breakdown.add_weighted(
            term::L1,
            pixel_l1_loss(input.outputs.clone(), input.inputs.clone()),
            1.0,
        );
        breakdown.add_weighted(
            term::L2,
            pixel_l2_loss(input.outputs.clone(), input.inputs.clone()),
            1.0,
        );
        breakdown.add_weighted(
            term::CONTENT_REG,
            embedding_l2_reg(input.content_embedding.clone()),
            self.reg_factor,
        );
        breakdown
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Tolerance;

    use super::*;
    use crate::tests::{random_embedding, random_images, TestBackend};

    type FT = f32;

    #[test]
    fn reports_pixel_terms_and_regularization() {
        let device = Default::default();
        let outputs = Tensor::<TestBackend, 4>::zeros([2, 3, 4, 4], &device);
        let inputs = Tensor::<TestBackend, 4>::ones([2, 3, 4, 4], &device);
        let content = Tensor::<TestBackend, 2>::full([2, 10], 1.0, &device);

        let breakdown = NaiveLoss::new().forward(&LossInput::new(outputs, inputs, content));

        assert_eq!(
            breakdown.term_names().collect::<Vec<_>>(),
            vec![term::CONTENT_REG, term::L1, term::L2]
        );
        // 1 + 1 + 1e-3 * 10
        breakdown
            .loss()
            .into_data()
            .assert_approx_eq::<FT>(&TensorData::from([2.01]), Tolerance::default());
    }

    #[test]
    fn invariant_to_batch_permutation() {
        let device = Default::default();
        let outputs = random_images::<TestBackend>(3, &device);
        let inputs = random_images::<TestBackend>(3, &device);
        let content = random_embedding::<TestBackend>(3, &device);
        let permutation = Tensor::<TestBackend, 1, Int>::from_ints([2, 0, 1], &device);

        let loss = NaiveLoss::new();
        let original = loss.forward(&LossInput::new(
            outputs.clone(),
            inputs.clone(),
            content.clone(),
        ));
        let permuted = loss.forward(&LossInput::new(
            outputs.select(0, permutation.clone()),
            inputs.select(0, permutation.clone()),
            content.select(0, permutation),
        ));

        permuted
            .loss()
            .into_data()
            .assert_approx_eq::<FT>(&original.loss().into_data(), Tolerance::relative(1e-5));
    }
}
