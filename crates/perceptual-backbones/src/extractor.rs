//! Capability interfaces the loss terms are written against.

use burn::prelude::*;

use crate::GradScope;

/// Queries against a frozen vision transformer.
///
/// Every query takes a single preprocessed image of shape `[1, 3, H, W]`;
/// callers loop over batches themselves to bound peak memory.
pub trait VitFeatureExtractor<B: Backend> {
    /// Attention keys of `layer`, shape `[heads, tokens, head_dim]`.
    fn extract_keys(&self, image: Tensor<B, 4>, layer: usize, scope: GradScope) -> Tensor<B, 3>;

    /// Cosine self-similarity of the keys of `layer`, shape `[1, tokens, tokens]`.
    fn extract_self_similarity(
        &self,
        image: Tensor<B, 4>,
        layer: usize,
        scope: GradScope,
    ) -> Tensor<B, 3>;

    /// Class token of the last block, shape `[embed_dim]`.
    fn extract_cls_token(&self, image: Tensor<B, 4>, scope: GradScope) -> Tensor<B, 1>;

    /// Number of transformer blocks, used to validate layer indices.
    fn depth(&self) -> usize;
}

/// Queries against a frozen convolutional network.
pub trait ConvFeatureExtractor<B: Backend> {
    /// Activations collected after each index in `layer_ids` (ascending order).
    fn extract_conv_features(
        &self,
        image: Tensor<B, 4>,
        layer_ids: &[usize],
        scope: GradScope,
    ) -> Vec<Tensor<B, 4>>;
}
