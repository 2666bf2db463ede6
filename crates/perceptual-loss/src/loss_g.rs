//! Weighted transformer loss.

use burn::{module::Ignored, prelude::*};
use perceptual_backbones::{BackboneError, DinoVit, GradScope, VitFeatureExtractor};

use crate::{
    breakdown::term,
    extractors::build_dino,
    terms::{
        cls_token_loss, embedding_alignment_loss, embedding_l2_reg, identity_loss, pixel_l1_loss,
        pixel_l2_loss, self_similarity_loss,
    },
    CompositeLoss, LossBreakdown, LossConfig, LossInput, LossResult, Preprocess, VitLossWeights,
};

/// Transformer-based loss ("ViT").
///
/// Evaluates exactly the terms whose weight is positive. The extractor is only
/// queried by the self-similarity, class token and identity terms, so a
/// configuration with those disabled never runs the transformer.
///
/// `E` is any frozen [`VitFeatureExtractor`]; configurations build a [`DinoVit`].
#[derive(Module, Debug)]
pub struct LossG<B: Backend, E = DinoVit<B>> {
    extractor: E,
    preprocess: Ignored<Preprocess>,
    layer: usize,
    global_ssim_weight: f64,
    global_cls_weight: f64,
    global_identity_weight: f64,
    l1_weight: f64,
    l2_weight: f64,
    content_reg_weight: f64,
    embedding_alignment_weight: f64,
    _backend: core::marker::PhantomData<B>,
}

impl<B: Backend> LossG<B> {
    /// Builds the configured extractor and weights.
    ///
    /// # Errors
    /// [`LossError::InvalidConfiguration`](crate::LossError::InvalidConfiguration)
    /// when a term that runs the transformer is enabled but `dino_weights` is unset.
    pub fn new(config: &LossConfig, device: &B::Device) -> LossResult<Self> {
        config.validate()?;
        let weights = config.vit_weights();
        let extractor = build_dino(config, device, weights.uses_extractor())?;
        Self::from_parts(
            &weights,
            extractor,
            config.preprocess().init(),
            config.dino_layer,
        )
    }

    /// An all-zero-weight instance, used only for its extractor queries.
    ///
    /// Always requires `dino_weights`.
    pub fn auxiliary(config: &LossConfig, device: &B::Device) -> LossResult<Self> {
        config.validate()?;
        let extractor = build_dino(config, device, true)?;
        Self::from_parts(
            &VitLossWeights::new(),
            extractor,
            config.preprocess().init(),
            config.dino_layer,
        )
    }
}

impl<B: Backend, E: VitFeatureExtractor<B>> LossG<B, E> {
    /// Assembles the loss from an already built extractor.
    ///
    /// # Errors
    /// If `layer` is not a block of `extractor`.
    pub fn from_parts(
        weights: &VitLossWeights,
        extractor: E,
        preprocess: Preprocess,
        layer: usize,
    ) -> LossResult<Self> {
        let depth = extractor.depth();
        if layer >= depth {
            return Err(BackboneError::LayerOutOfRange { layer, depth }.into());
        }

        tracing::info!(
            global_ssim = weights.global_ssim,
            global_cls = weights.global_cls,
            global_identity = weights.global_identity,
            l1 = weights.l1,
            l2 = weights.l2,
            content_reg = weights.content_reg,
            embedding_alignment = weights.embedding_alignment,
            "initialized transformer loss"
        );

        Ok(Self {
            extractor,
            preprocess: Ignored(preprocess),
            layer,
            global_ssim_weight: weights.global_ssim,
            global_cls_weight: weights.global_cls,
            global_identity_weight: weights.global_identity,
            l1_weight: weights.l1,
            l2_weight: weights.l2,
            content_reg_weight: weights.content_reg,
            embedding_alignment_weight: weights.embedding_alignment,
            _backend: core::marker::PhantomData,
        })
    }

    pub const fn weights(&self) -> VitLossWeights {
        VitLossWeights {
            global_ssim: self.global_ssim_weight,
            global_cls: self.global_cls_weight,
            global_identity: self.global_identity_weight,
            l1: self.l1_weight,
            l2: self.l2_weight,
            content_reg: self.content_reg_weight,
            embedding_alignment: self.embedding_alignment_weight,
        }
    }

    /// Block whose keys feed the self-similarity and identity terms.
    pub const fn layer(&self) -> usize {
        self.layer
    }

    pub fn preprocess(&self) -> &Preprocess {
        &self.preprocess
    }

    pub const fn extractor(&self) -> &E {
        &self.extractor
    }

    /// Keys of the configured layer for a `[1, 3, H, W]` image, after preprocessing.
    pub fn keys(&self, image: Tensor<B, 4>, scope: GradScope) -> Tensor<B, 3> {
        self.extractor
            .extract_keys(self.prepare(image, scope), self.layer, scope)
    }

    /// Key self-similarity of the configured layer, after preprocessing.
    pub fn keys_self_similarity(&self, image: Tensor<B, 4>, scope: GradScope) -> Tensor<B, 3> {
        self.extractor
            .extract_self_similarity(self.prepare(image, scope), self.layer, scope)
    }

    /// Class token of the last block, after preprocessing.
    pub fn cls_token(&self, image: Tensor<B, 4>, scope: GradScope) -> Tensor<B, 1> {
        self.extractor
            .extract_cls_token(self.prepare(image, scope), scope)
    }

    fn prepare(&self, image: Tensor<B, 4>, scope: GradScope) -> Tensor<B, 4> {
        self.preprocess.forward(scope.apply(image))
    }
}

impl<B: Backend, E: VitFeatureExtractor<B>> CompositeLoss<B> for LossG<B, E> {
    fn forward(&self, input: &LossInput<B>) -> LossBreakdown<B> {
        let mut breakdown = LossBreakdown::zero(&input.device());

        if self.global_ssim_weight > 0.0 {
            let loss = self_similarity_loss(
                &self.extractor,
                &self.preprocess,
                input.outputs.clone(),
                input.inputs.clone(),
                self.layer,
            );
            breakdown.add_weighted(term::GLOBAL_SSIM, loss, self.global_ssim_weight);
        }

        if self.global_cls_weight > 0.0 {
            let loss = cls_token_loss(
                &self.extractor,
                &self.preprocess,
                input.outputs.clone(),
                input.inputs.clone(),
            );
            breakdown.add_weighted(term::GLOBAL_CLS, loss, self.global_cls_weight);
        }

        if self.global_identity_weight > 0.0 {
            let loss = identity_loss(
                &self.extractor,
                &self.preprocess,
                input.outputs.clone(),
                input.inputs.clone(),
                self.layer,
            );
            breakdown.add_weighted(term::GLOBAL_IDENTITY, loss, self.global_identity_weight);
        }

        if self.l1_weight > 0.0 {
            let loss = pixel_l1_loss(input.outputs.clone(), input.inputs.clone());
            breakdown.add_weighted(term::L1, loss, self.l1_weight);
        }

        if self.l2_weight > 0.0 {
            let loss = pixel_l2_loss(input.outputs.clone(), input.inputs.clone());
            breakdown.add_weighted(term::L2, loss, self.l2_weight);
        }

        if self.content_reg_weight > 0.0 {
            let loss = embedding_l2_reg(input.content_embedding.clone());
            breakdown.add_weighted(term::CONTENT_REG, loss, self.content_reg_weight);
        }

        if self.embedding_alignment_weight > 0.0 {
            match (&input.class_embedding, &input.auxiliary) {
                (Some(class_embedding), Some(codes)) => {
                    let loss = embedding_alignment_loss(
                        input.content_embedding.clone(),
                        class_embedding.clone(),
                        codes,
                    );
                    breakdown.add_weighted(
                        term::EMBEDDING_ALIGNMENT,
                        loss,
                        self.embedding_alignment_weight,
                    );
                }
                _ => tracing::debug!(
                    "skipping embedding alignment: class embedding or auxiliary codes missing"
                ),
            }
        }

        breakdown
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use burn::tensor::{Tolerance, cast::ToElement};

    use super::*;
    use crate::{
        tests::{
            random_embedding, random_images, tiny_preprocess, tiny_vit, TestAutodiffBackend,
            TestBackend, TINY_LAYER,
        },
        AuxiliaryCodes, LossError, TOTAL_KEY,
    };

    type FT = f32;

    /// Delegates to a tiny transformer and records the scope of every query.
    #[derive(Module, Debug)]
    struct RecordingExtractor<B: Backend> {
        inner: DinoVit<B>,
        scopes: Ignored<Arc<Mutex<Vec<GradScope>>>>,
    }

    impl<B: Backend> RecordingExtractor<B> {
        fn new(device: &B::Device) -> Self {
            Self {
                inner: tiny_vit(device),
                scopes: Ignored(Arc::default()),
            }
        }

        fn count(&self, scope: GradScope) -> usize {
            self.scopes
                .lock()
                .unwrap()
                .iter()
                .filter(|&&recorded| recorded == scope)
                .count()
        }

        fn total(&self) -> usize {
            self.scopes.lock().unwrap().len()
        }

        fn record(&self, scope: GradScope) {
            self.scopes.lock().unwrap().push(scope);
        }
    }

    impl<B: Backend> VitFeatureExtractor<B> for RecordingExtractor<B> {
        fn extract_keys(
            &self,
            image: Tensor<B, 4>,
            layer: usize,
            scope: GradScope,
        ) -> Tensor<B, 3> {
            self.record(scope);
            self.inner.extract_keys(image, layer, scope)
        }

        fn extract_self_similarity(
            &self,
            image: Tensor<B, 4>,
            layer: usize,
            scope: GradScope,
        ) -> Tensor<B, 3> {
            self.record(scope);
            self.inner.extract_self_similarity(image, layer, scope)
        }

        fn extract_cls_token(&self, image: Tensor<B, 4>, scope: GradScope) -> Tensor<B, 1> {
            self.record(scope);
            self.inner.extract_cls_token(image, scope)
        }

        fn depth(&self) -> usize {
            self.inner.depth()
        }
    }

    fn recording_loss(
        weights: VitLossWeights,
    ) -> LossG<TestBackend, RecordingExtractor<TestBackend>> {
        let device = Default::default();
        LossG::from_parts(
            &weights,
            RecordingExtractor::new(&device),
            tiny_preprocess(),
            TINY_LAYER,
        )
        .expect("valid layer")
    }

    fn loss_with(weights: VitLossWeights) -> LossG<TestBackend> {
        let device = Default::default();
        LossG::from_parts(&weights, tiny_vit(&device), tiny_preprocess(), TINY_LAYER)
            .expect("valid layer")
    }

    fn full_input(device: &<TestBackend as Backend>::Device) -> LossInput<TestBackend> {
        LossInput::new(
            random_images(2, device),
            random_images(2, device),
            random_embedding(2, device),
        )
        .with_class_embedding(random_embedding(2, device))
        .with_auxiliary(AuxiliaryCodes {
            out_content_codes: random_embedding(2, device),
            out_class_codes: random_embedding(2, device),
        })
    }

    #[test]
    fn single_enabled_term_is_reported_and_weighted() {
        let device = Default::default();
        let weight = 2.5;
        let cases = [
            (term::GLOBAL_SSIM, VitLossWeights::new().with_global_ssim(weight)),
            (term::GLOBAL_CLS, VitLossWeights::new().with_global_cls(weight)),
            (term::GLOBAL_IDENTITY, VitLossWeights::new().with_global_identity(weight)),
            (term::L1, VitLossWeights::new().with_l1(weight)),
            (term::L2, VitLossWeights::new().with_l2(weight)),
            (term::CONTENT_REG, VitLossWeights::new().with_content_reg(weight)),
            (
                term::EMBEDDING_ALIGNMENT,
                VitLossWeights::new().with_embedding_alignment(weight),
            ),
        ];

        for (name, weights) in cases {
            let input = full_input(&device);
            let breakdown = loss_with(weights).forward(&input);

            assert_eq!(breakdown.term_names().collect::<Vec<_>>(), vec![name]);
            assert!(breakdown.contains(TOTAL_KEY));
            let term = breakdown.get(name).unwrap();
            breakdown.loss().into_data().assert_approx_eq::<FT>(
                &term.mul_scalar(weight).into_data(),
                Tolerance::relative(1e-5),
            );
        }
    }

    #[test]
    fn all_weights_zero_reports_only_zero_total() {
        let device = Default::default();

        let breakdown = loss_with(VitLossWeights::new()).forward(&full_input(&device));

        assert_eq!(breakdown.len(), 1);
        assert_eq!(breakdown.loss().into_scalar().to_f64(), 0.0);
    }

    #[test]
    fn transformer_is_not_queried_when_its_terms_are_disabled() {
        let device = Default::default();
        let weights = VitLossWeights::new()
            .with_l1(1.0)
            .with_l2(1.0)
            .with_content_reg(1.0)
            .with_embedding_alignment(1.0);
        let loss = recording_loss(weights);

        let breakdown = loss.forward(&full_input(&device));

        assert_eq!(loss.extractor().total(), 0);
        assert_eq!(breakdown.term_names().count(), 4);
    }

    #[test]
    fn single_transformer_term_queries_once_per_example_and_side() {
        let device = Default::default();
        let batch = 3;
        let cases = [
            VitLossWeights::new().with_global_ssim(1.0),
            VitLossWeights::new().with_global_cls(1.0),
            VitLossWeights::new().with_global_identity(1.0),
        ];

        for weights in cases {
            let loss = recording_loss(weights);
            let input = LossInput::new(
                random_images(batch, &device),
                random_images(batch, &device),
                random_embedding(batch, &device),
            );

            loss.forward(&input);

            let extractor = loss.extractor();
            assert_eq!(extractor.count(GradScope::Tracked), batch);
            assert_eq!(extractor.count(GradScope::Detached), batch);
            assert_eq!(extractor.total(), 2 * batch);
        }
    }

    #[test]
    fn identical_batches_give_zero_image_terms() {
        let device = Default::default();
        let images = random_images::<TestBackend>(2, &device);
        let input = LossInput::new(images.clone(), images, random_embedding(2, &device));
        let weights = VitLossWeights::new()
            .with_global_ssim(1.0)
            .with_global_cls(1.0)
            .with_global_identity(1.0)
            .with_l1(1.0)
            .with_l2(1.0);

        let breakdown = loss_with(weights).forward(&input);

        assert_eq!(breakdown.term_names().count(), 5);
        for value in breakdown.scalars().values() {
            assert!(value.abs() < 1e-6, "expected zero, got {value}");
        }
    }

    #[test]
    fn alignment_is_skipped_without_auxiliary_codes() {
        let device = Default::default();
        let input = LossInput::new(
            random_images(2, &device),
            random_images(2, &device),
            random_embedding(2, &device),
        )
        .with_class_embedding(random_embedding(2, &device));
        let weights = VitLossWeights::new()
            .with_embedding_alignment(1.0)
            .with_l1(1.0);

        let breakdown = loss_with(weights).forward(&input);

        assert!(!breakdown.contains(term::EMBEDDING_ALIGNMENT));
        assert!(breakdown.contains(term::L1));
    }

    #[test]
    fn rejects_layer_beyond_depth() {
        let device = Default::default();

        let err = LossG::<TestBackend>::from_parts(
            &VitLossWeights::new(),
            tiny_vit(&device),
            tiny_preprocess(),
            5,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            LossError::Backbone(BackboneError::LayerOutOfRange { layer: 5, depth: 2 })
        ));
    }

    #[test]
    fn queries_preprocess_before_extraction() {
        let device = Default::default();
        let loss = loss_with(VitLossWeights::new());
        let image = random_images::<TestBackend>(1, &device);

        let keys = loss.keys(image.clone(), GradScope::Detached);
        let expected = loss.extractor().extract_keys(
            loss.preprocess().forward(image.clone()),
            TINY_LAYER,
            GradScope::Detached,
        );

        keys.into_data()
            .assert_approx_eq::<FT>(&expected.into_data(), Tolerance::default());
        assert_eq!(loss.keys_self_similarity(image.clone(), GradScope::Detached).dims(), [1, 17, 17]);
        assert_eq!(loss.cls_token(image, GradScope::Detached).dims(), [16]);
    }

    #[test]
    fn backward_reaches_outputs_only() {
        let device = Default::default();
        let loss = LossG::<TestAutodiffBackend>::from_parts(
            &VitLossWeights::new()
                .with_global_ssim(1.0)
                .with_global_cls(1.0)
                .with_global_identity(1.0),
            tiny_vit(&device),
            tiny_preprocess(),
            TINY_LAYER,
        )
        .unwrap();
        let outputs = random_images::<TestAutodiffBackend>(1, &device).require_grad();
        let inputs = random_images::<TestAutodiffBackend>(1, &device).require_grad();

        let breakdown = loss.forward(&LossInput::new(
            outputs.clone(),
            inputs.clone(),
            random_embedding(1, &device),
        ));
        let grads = breakdown.into_loss().backward();

        assert!(outputs.grad(&grads).is_some());
        assert!(inputs.grad(&grads).is_none());
    }
}
