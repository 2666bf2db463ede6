//! Loss terms shared by the composite losses.
//!
//! Every term returns a tensor of shape `[1]`. Terms over image pairs loop over
//! the batch, querying the extractors one example at a time, and average the
//! per-example values. The ground-truth side of every transformer comparison
//! runs under [`GradScope::Detached`].

use burn::{
    nn::loss::{MseLoss, Reduction},
    prelude::*,
};
use perceptual_backbones::{ConvFeatureExtractor, GradScope, VitFeatureExtractor};

use crate::{AuxiliaryCodes, Preprocess};

/// MSE between the key self-similarity matrices of `layer`.
pub fn self_similarity_loss<B, E>(
    extractor: &E,
    preprocess: &Preprocess,
    outputs: Tensor<B, 4>,
    inputs: Tensor<B, 4>,
    layer: usize,
) -> Tensor<B, 1>
where
    B: Backend,
    E: VitFeatureExtractor<B> + ?Sized,
{
    per_example_mean(outputs, inputs, |output, input| {
        let target = extractor.extract_self_similarity(
            prepare(preprocess, input, GradScope::Detached),
            layer,
            GradScope::Detached,
        );
        let prediction = extractor.extract_self_similarity(
            prepare(preprocess, output, GradScope::Tracked),
            layer,
            GradScope::Tracked,
        );
        MseLoss::new().forward(prediction, target, Reduction::Mean)
    })
}

/// MSE between the class tokens of the last block.
pub fn cls_token_loss<B, E>(
    extractor: &E,
    preprocess: &Preprocess,
    outputs: Tensor<B, 4>,
    inputs: Tensor<B, 4>,
) -> Tensor<B, 1>
where
    B: Backend,
    E: VitFeatureExtractor<B> + ?Sized,
{
    per_example_mean(outputs, inputs, |output, input| {
        let target = extractor.extract_cls_token(
            prepare(preprocess, input, GradScope::Detached),
            GradScope::Detached,
        );
        let prediction = extractor
            .extract_cls_token(prepare(preprocess, output, GradScope::Tracked), GradScope::Tracked);
        MseLoss::new().forward(prediction, target, Reduction::Mean)
    })
}

/// MSE between the raw attention keys of `layer`.
pub fn identity_loss<B, E>(
    extractor: &E,
    preprocess: &Preprocess,
    outputs: Tensor<B, 4>,
    inputs: Tensor<B, 4>,
    layer: usize,
) -> Tensor<B, 1>
where
    B: Backend,
    E: VitFeatureExtractor<B> + ?Sized,
{
    per_example_mean(outputs, inputs, |output, input| {
        let target = extractor.extract_keys(
            prepare(preprocess, input, GradScope::Detached),
            layer,
            GradScope::Detached,
        );
        let prediction = extractor.extract_keys(
            prepare(preprocess, output, GradScope::Tracked),
            layer,
            GradScope::Tracked,
        );
        MseLoss::new().forward(prediction, target, Reduction::Mean)
    })
}

/// Mean absolute error over the whole batch.
pub fn pixel_l1_loss<B: Backend>(outputs: Tensor<B, 4>, inputs: Tensor<B, 4>) -> Tensor<B, 1> {
    assert_paired(&outputs, &inputs);
    (outputs - inputs).abs().mean()
}

/// Mean squared error over the whole batch.
pub fn pixel_l2_loss<B: Backend>(outputs: Tensor<B, 4>, inputs: Tensor<B, 4>) -> Tensor<B, 1> {
    assert_paired(&outputs, &inputs);
    MseLoss::new().forward(outputs, inputs, Reduction::Mean)
}

/// Squared L2 norm of each embedding, averaged over the batch (first) dimension.
pub fn embedding_l2_reg<B: Backend, const D: usize>(embedding: Tensor<B, D>) -> Tensor<B, 1> {
    let batch = embedding.dims()[0];
    assert!(batch > 0, "Embedding regularization needs a non-empty batch");
    embedding.powf_scalar(2.0).sum().div_scalar(batch as f64)
}

/// `MSE(out_content_codes, content) + MSE(out_class_codes, class)`.
pub fn embedding_alignment_loss<B: Backend>(
    content_embedding: Tensor<B, 2>,
    class_embedding: Tensor<B, 2>,
    codes: &AuxiliaryCodes<B>,
) -> Tensor<B, 1> {
    let mse = MseLoss::new();
    let content = mse.forward(
        codes.out_content_codes.clone(),
        content_embedding,
        Reduction::Mean,
    );
    let class = mse.forward(codes.out_class_codes.clone(), class_embedding, Reduction::Mean);
    content + class
}

/// Pixel mean absolute difference plus the mean absolute difference of the
/// activations at each of `layer_ids`, per example, averaged over the batch.
pub fn vgg_distance<B, E>(
    extractor: &E,
    outputs: Tensor<B, 4>,
    inputs: Tensor<B, 4>,
    layer_ids: &[usize],
) -> Tensor<B, 1>
where
    B: Backend,
    E: ConvFeatureExtractor<B> + ?Sized,
{
    per_example_mean(outputs, inputs, |output, input| {
        let pixel = (output.clone() - input.clone()).abs().mean();
        let output_features =
            extractor.extract_conv_features(output, layer_ids, GradScope::Tracked);
        let input_features = extractor.extract_conv_features(input, layer_ids, GradScope::Tracked);

        output_features
            .into_iter()
            .zip(input_features)
            .fold(pixel, |distance, (output, input)| {
                distance + (output - input).abs().mean()
            })
    })
}

fn prepare<B: Backend>(preprocess: &Preprocess, image: Tensor<B, 4>, scope: GradScope) -> Tensor<B, 4> {
    preprocess.forward(scope.apply(image))
}

fn assert_paired<B: Backend>(outputs: &Tensor<B, 4>, inputs: &Tensor<B, 4>) {
    assert_eq!(
        outputs.dims(),
        inputs.dims(),
        "Shape of outputs ({:?}) must match shape of inputs ({:?})",
        outputs.dims(),
        inputs.dims()
    );
}

/// Evaluates `loss` on each `(output, input)` pair of batch size 1 and averages.
fn per_example_mean<B, F>(outputs: Tensor<B, 4>, inputs: Tensor<B, 4>, mut loss: F) -> Tensor<B, 1>
where
    B: Backend,
    F: FnMut(Tensor<B, 4>, Tensor<B, 4>) -> Tensor<B, 1>,
{
    assert_paired(&outputs, &inputs);
    assert!(outputs.dims()[0] > 0, "Loss terms need a non-empty batch");

    let losses: Vec<_> = outputs
        .iter_dim(0)
        .zip(inputs.iter_dim(0))
        .map(|(output, input)| loss(output, input))
        .collect();
    Tensor::cat(losses, 0).mean()
}
