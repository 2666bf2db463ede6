//! Named loss terms plus their weighted total.

use std::collections::BTreeMap;

use burn::{prelude::*, tensor::cast::ToElement};

/// Key of the weighted total in every breakdown.
pub const TOTAL_KEY: &str = "loss";

/// Term names reported in breakdowns.
pub mod term {
    pub const GLOBAL_SSIM: &str = "global_ssim";
    pub const GLOBAL_CLS: &str = "global_cls";
    pub const GLOBAL_IDENTITY: &str = "global_identity";
    pub const L1: &str = "l1";
    pub const L2: &str = "l2";
    pub const CONTENT_REG: &str = "content_reg";
    pub const EMBEDDING_ALIGNMENT: &str = "embedding_alignment";
    /// Unweighted VGG feature distance.
    pub const VGG: &str = "vgg";
    /// Total of the VGG loss inside a combined loss.
    pub const VGG_TOTAL: &str = "vgg_total";
    /// Total of the transformer loss inside a combined loss.
    pub const VIT: &str = "vit";
}

/// Unweighted term values and the weighted total of one loss evaluation.
///
/// Every tensor has shape `[1]`. The total is always present under
/// [`TOTAL_KEY`] and keeps its autodiff graph for `backward`.
#[derive(Debug, Clone)]
pub struct LossBreakdown<B: Backend> {
    terms: BTreeMap<&'static str, Tensor<B, 1>>,
    total: Tensor<B, 1>,
}

impl<B: Backend> LossBreakdown<B> {
    /// A breakdown with no terms and a zero total.
    pub fn zero(device: &B::Device) -> Self {
        Self {
            terms: BTreeMap::new(),
            total: Tensor::zeros([1], device),
        }
    }

    /// The weighted total.
    pub fn loss(&self) -> Tensor<B, 1> {
        self.total.clone()
    }

    pub fn into_loss(self) -> Tensor<B, 1> {
        self.total
    }

    /// Value of a term, or the total for [`TOTAL_KEY`].
    pub fn get(&self, name: &str) -> Option<Tensor<B, 1>> {
        if name == TOTAL_KEY {
            return Some(self.total.clone());
        }
        self.terms.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        name == TOTAL_KEY || self.terms.contains_key(name)
    }

    /// Names of the reported terms, excluding the total.
    pub fn term_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.terms.keys().copied()
    }

    /// Number of entries including the total.
    pub fn len(&self) -> usize {
        self.terms.len() + 1
    }

    /// Always `false`: the total is always present.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Every entry, total included, as `f64` for logging.
    pub fn scalars(&self) -> BTreeMap<String, f64> {
        self.terms
            .iter()
            .map(|(name, value)| ((*name).to_owned(), value.clone()))
            .chain(std::iter::once((TOTAL_KEY.to_owned(), self.total.clone())))
            .map(|(name, value)| (name, value.into_scalar().to_f64()))
            .collect()
    }

    /// Adds `weight * value` to the total and reports `value` under `name`.
    pub(crate) fn add_weighted(&mut self, name: &'static str, value: Tensor<B, 1>, weight: f64) {
        self.total = self.total.clone() + value.clone().mul_scalar(weight);
        self.terms.insert(name, value);
    }

    /// Reports `value` under `name` without touching the total.
    pub(crate) fn record(&mut self, name: &'static str, value: Tensor<B, 1>) {
        self.terms.insert(name, value);
    }

    pub(crate) fn set_total(&mut self, total: Tensor<B, 1>) {
        self.total = total;
    }

    /// Moves the terms of `other` into this breakdown; its total is dropped.
    pub(crate) fn extend_terms(&mut self, other: Self) {
        self.terms.extend(other.terms);
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Tolerance;

    use super::*;
    use crate::tests::TestBackend;

    type FT = f32;

    #[test]
    fn empty_breakdown_reports_zero_total() {
        let device = Default::default();
        let breakdown = LossBreakdown::<TestBackend>::zero(&device);

        assert!(breakdown.contains(TOTAL_KEY));
        assert_eq!(breakdown.len(), 1);
        assert_eq!(breakdown.term_names().count(), 0);
        assert_eq!(breakdown.scalars().get(TOTAL_KEY), Some(&0.0));
    }

    #[test]
    fn weighted_terms_accumulate_into_total() {
        let device = Default::default();
        let mut breakdown = LossBreakdown::<TestBackend>::zero(&device);

        breakdown.add_weighted(term::L1, Tensor::from_floats([2.0], &device), 0.5);
        breakdown.add_weighted(term::L2, Tensor::from_floats([3.0], &device), 2.0);
        breakdown.record(term::VGG, Tensor::from_floats([100.0], &device));

        breakdown
            .loss()
            .into_data()
            .assert_approx_eq::<FT>(&TensorData::from([7.0]), Tolerance::default());
        assert_eq!(
            breakdown.term_names().collect::<Vec<_>>(),
            vec![term::L1, term::L2, term::VGG]
        );
        let scalars = breakdown.scalars();
        assert_eq!(scalars.get(term::L1), Some(&2.0));
        assert_eq!(scalars.get(TOTAL_KEY), Some(&7.0));
    }

    #[test]
    fn get_returns_total_for_loss_key() {
        let device = Default::default();
        let mut breakdown = LossBreakdown::<TestBackend>::zero(&device);
        breakdown.add_weighted(term::L1, Tensor::from_floats([4.0], &device), 0.25);

        let total = breakdown.get(TOTAL_KEY).unwrap();

        total
            .into_data()
            .assert_approx_eq::<FT>(&TensorData::from([1.0]), Tolerance::default());
        assert!(breakdown.get(term::L2).is_none());
    }
}
