use burn::prelude::*;

/// Gradient tracking for one side of a feature comparison.
///
/// The reconstruction side of a perceptual comparison is [`GradScope::Tracked`]
/// so gradients reach the generator. The ground-truth side is a fixed target and
/// runs [`GradScope::Detached`]: its input is detached before extraction and its
/// features are detached afterwards, so no autodiff graph is recorded for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradScope {
    /// Autodiff records the extraction.
    Tracked,
    /// The extraction is evaluated outside the autodiff graph.
    Detached,
}

impl GradScope {
    /// Applies the scope to a tensor entering or leaving an extractor.
    pub fn apply<B: Backend, const D: usize>(self, tensor: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Tracked => tensor,
            Self::Detached => tensor.detach(),
        }
    }
}
