//! # DINO Vision Transformer
//!
//! A plain ViT as trained by DINO (self-distillation with no labels), kept frozen
//! and used purely as a feature extractor.
//!
//! ## Architecture Overview
//! - **PatchEmbed**: strided convolution turning the image into patch tokens
//! - **Class token** prepended to the patch tokens
//! - **Position embedding** learned for the training grid, interpolated to the
//!   grid of the actual input
//! - **Block**: pre-norm multi-head self-attention followed by a pre-norm MLP
//!
//! ## Model Variants
//! - **dino_vits16 / dino_vits8**: 384 dim, 6 heads, patch 16 / 8
//! - **dino_vitb16 / dino_vitb8**: 768 dim, 12 heads, patch 16 / 8
//!
//! All variants have 12 blocks.
//!
//! ## Reference
//! "Emerging Properties in Self-Supervised Vision Transformers"
//! - Paper: https://arxiv.org/abs/2104.14294

use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Gelu, LayerNorm, LayerNormConfig, Linear, LinearConfig,
    },
    prelude::*,
    tensor::{
        activation::softmax,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
        Distribution,
    },
};

use crate::{BackboneError, BackboneResult, GradScope, VitFeatureExtractor};

/// Lower bound of the norm product in the key cosine similarity.
const COSINE_EPS: f64 = 1e-8;

/// Configuration for the MLP of a transformer block.
#[derive(Config, Debug)]
pub struct MlpConfig {
    in_features: usize,
    hidden_features: usize,
}

impl MlpConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Mlp<B> {
        Mlp {
            fc1: LinearConfig::new(self.in_features, self.hidden_features).init(device),
            act: Gelu::new(),
            fc2: LinearConfig::new(self.hidden_features, self.in_features).init(device),
        }
    }
}

/// Feed-forward network of a transformer block: `Linear -> GELU -> Linear`.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    fc1: Linear<B>,
    act: Gelu,
    fc2: Linear<B>,
}

impl<B: Backend> Mlp<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.fc1.forward(x);
        let x = self.act.forward(x);
        self.fc2.forward(x)
    }
}

/// Configuration for multi-head self-attention.
#[derive(Config, Debug)]
pub struct AttentionConfig {
    dim: usize,
    num_heads: usize,
    #[config(default = "true")]
    qkv_bias: bool,
}

impl AttentionConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Attention<B> {
        let head_dim = self.dim / self.num_heads;

        Attention {
            num_heads: self.num_heads,
            scale: (head_dim as f64).powf(-0.5),
            qkv: LinearConfig::new(self.dim, self.dim * 3)
                .with_bias(self.qkv_bias)
                .init(device),
            proj: LinearConfig::new(self.dim, self.dim).init(device),
        }
    }
}

/// Global multi-head self-attention over all tokens.
///
/// Besides the attention output, `forward` returns the raw output of the
/// fused `qkv` projection, which is where the extractor reads keys from.
#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    num_heads: usize,
    scale: f64,
    qkv: Linear<B>,
    proj: Linear<B>,
}

impl<B: Backend> Attention<B> {
    /// # Shapes
    /// - x: `[batch, tokens, dim]`
    /// - output: (`[batch, tokens, dim]`, qkv `[batch, tokens, 3 * dim]`)
    pub fn forward(&self, x: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let [b, n, c] = x.dims();
        let head_dim = c / self.num_heads;

        let qkv = self.qkv.forward(x);
        let heads = qkv
            .clone()
            .reshape([b, n, 3, self.num_heads, head_dim])
            .permute([2, 0, 3, 1, 4]);
        let q: Tensor<B, 4> = heads
            .clone()
            .narrow(0, 0, 1)
            .reshape([b, self.num_heads, n, head_dim]);
        let k: Tensor<B, 4> = heads
            .clone()
            .narrow(0, 1, 1)
            .reshape([b, self.num_heads, n, head_dim]);
        let v: Tensor<B, 4> = heads
            .narrow(0, 2, 1)
            .reshape([b, self.num_heads, n, head_dim]);

        let attn = softmax((q * self.scale).matmul(k.swap_dims(2, 3)), 3);
        let x = attn.matmul(v).swap_dims(1, 2).reshape([b, n, c]);

        (self.proj.forward(x), qkv)
    }
}

/// Configuration for a pre-norm transformer block.
#[derive(Config, Debug)]
pub struct BlockConfig {
    dim: usize,
    num_heads: usize,
    #[config(default = "4.0")]
    mlp_ratio: f64,
    #[config(default = "true")]
    qkv_bias: bool,
    #[config(default = "1e-6")]
    norm_eps: f64,
}

impl BlockConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Block<B> {
        let hidden = (self.dim as f64 * self.mlp_ratio) as usize;

        Block {
            norm1: LayerNormConfig::new(self.dim)
                .with_epsilon(self.norm_eps)
                .init(device),
            attn: AttentionConfig::new(self.dim, self.num_heads)
                .with_qkv_bias(self.qkv_bias)
                .init(device),
            norm2: LayerNormConfig::new(self.dim)
                .with_epsilon(self.norm_eps)
                .init(device),
            mlp: MlpConfig::new(self.dim, hidden).init(device),
        }
    }
}

/// Transformer block: `x + attn(norm1(x))` then `x + mlp(norm2(x))`.
#[derive(Module, Debug)]
pub struct Block<B: Backend> {
    norm1: LayerNorm<B>,
    attn: Attention<B>,
    norm2: LayerNorm<B>,
    mlp: Mlp<B>,
}

impl<B: Backend> Block<B> {
    /// Returns the block output together with the attention `qkv` activations.
    pub fn forward(&self, x: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let (attn, qkv) = self.attn.forward(self.norm1.forward(x.clone()));
        let x = x + attn;
        let x = x.clone() + self.mlp.forward(self.norm2.forward(x));

        (x, qkv)
    }
}

/// Configuration for the patch embedding.
#[derive(Config, Debug)]
pub struct PatchEmbedConfig {
    patch_size: usize,
    embed_dim: usize,
    #[config(default = "3")]
    in_channels: usize,
}

impl PatchEmbedConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> PatchEmbed<B> {
        PatchEmbed {
            proj: Conv2dConfig::new(
                [self.in_channels, self.embed_dim],
                [self.patch_size, self.patch_size],
            )
            .with_stride([self.patch_size, self.patch_size])
            .init(device),
        }
    }
}

/// Non-overlapping patch projection.
#[derive(Module, Debug)]
pub struct PatchEmbed<B: Backend> {
    proj: Conv2d<B>,
}

impl<B: Backend> PatchEmbed<B> {
    /// # Shapes
    /// - x: `[batch, 3, H, W]`
    /// - output: `[batch, dim, H / patch, W / patch]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.proj.forward(x)
    }
}

/// Configuration for [`DinoVit`].
#[derive(Config, Debug)]
pub struct DinoVitConfig {
    #[config(default = "16")]
    pub patch_size: usize,
    #[config(default = "384")]
    pub embed_dim: usize,
    #[config(default = "12")]
    pub depth: usize,
    #[config(default = "6")]
    pub num_heads: usize,
    #[config(default = "4.0")]
    pub mlp_ratio: f64,
    #[config(default = "true")]
    pub qkv_bias: bool,
    /// Training resolution; fixes the size of the learned position grid.
    #[config(default = "224")]
    pub img_size: usize,
    #[config(default = "1e-6")]
    pub norm_eps: f64,
}

impl DinoVitConfig {
    /// Configuration of a published DINO checkpoint.
    pub fn from_model_name(name: &str) -> BackboneResult<Self> {
        let (patch_size, embed_dim, num_heads) = match name {
            "dino_vits16" => (16, 384, 6),
            "dino_vits8" => (8, 384, 6),
            "dino_vitb16" => (16, 768, 12),
            "dino_vitb8" => (8, 768, 12),
            _ => {
                return Err(BackboneError::UnknownModel {
                    name: name.to_owned(),
                })
            }
        };

        Ok(Self::new()
            .with_patch_size(patch_size)
            .with_embed_dim(embed_dim)
            .with_num_heads(num_heads))
    }

    /// Initializes a randomly weighted, frozen transformer.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> BackboneResult<DinoVit<B>> {
        self.validate()?;

        let grid_size = self.img_size / self.patch_size;
        let cls_token = Tensor::random(
            [1, 1, self.embed_dim],
            Distribution::Normal(0.0, 0.02),
            device,
        );
        let pos_embed = Tensor::random(
            [1, 1 + grid_size * grid_size, self.embed_dim],
            Distribution::Normal(0.0, 0.02),
            device,
        );
        let blocks = (0..self.depth)
            .map(|_| {
                BlockConfig::new(self.embed_dim, self.num_heads)
                    .with_mlp_ratio(self.mlp_ratio)
                    .with_qkv_bias(self.qkv_bias)
                    .with_norm_eps(self.norm_eps)
                    .init(device)
            })
            .collect();

        let model = DinoVit {
            patch_embed: PatchEmbedConfig::new(self.patch_size, self.embed_dim).init(device),
            cls_token: Param::from_tensor(cls_token),
            pos_embed: Param::from_tensor(pos_embed),
            blocks,
            patch_size: self.patch_size,
            num_heads: self.num_heads,
            grid_size,
        };
        tracing::debug!(
            patch_size = self.patch_size,
            embed_dim = self.embed_dim,
            depth = self.depth,
            "initialized DINO ViT"
        );

        Ok(model.no_grad())
    }

    fn validate(&self) -> BackboneResult<()> {
        if self.depth == 0 {
            return Err(BackboneError::InvalidConfiguration {
                reason: "depth must be at least 1".to_owned(),
            });
        }
        if self.num_heads == 0 || self.embed_dim % self.num_heads != 0 {
            return Err(BackboneError::InvalidConfiguration {
                reason: format!(
                    "embed_dim {} is not divisible by num_heads {}",
                    self.embed_dim, self.num_heads
                ),
            });
        }
        if self.patch_size == 0 || self.img_size % self.patch_size != 0 {
            return Err(BackboneError::InvalidConfiguration {
                reason: format!(
                    "img_size {} is not a multiple of patch_size {}",
                    self.img_size, self.patch_size
                ),
            });
        }
        Ok(())
    }
}

/// Intermediate activations of a [`DinoVit`] forward pass.
#[derive(Debug, Clone)]
pub struct VitFeatures<B: Backend> {
    /// Output of every evaluated block, `[batch, tokens, dim]`.
    pub block_outputs: Vec<Tensor<B, 3>>,
    /// Fused `qkv` projection of every evaluated block, `[batch, tokens, 3 * dim]`.
    pub qkv: Vec<Tensor<B, 3>>,
}

/// DINO vision transformer used as a frozen feature extractor.
#[derive(Module, Debug)]
pub struct DinoVit<B: Backend> {
    patch_embed: PatchEmbed<B>,
    cls_token: Param<Tensor<B, 3>>,
    pos_embed: Param<Tensor<B, 3>>,
    blocks: Vec<Block<B>>,
    patch_size: usize,
    num_heads: usize,
    grid_size: usize,
}

impl<B: Backend> DinoVit<B> {
    /// Number of transformer blocks.
    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub const fn patch_size(&self) -> usize {
        self.patch_size
    }

    pub const fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Runs blocks `0..=last_layer` and records their outputs and `qkv` activations.
    pub fn forward_until(&self, x: Tensor<B, 4>, last_layer: usize) -> VitFeatures<B> {
        self.assert_layer(last_layer);

        let mut x = self.embed(x);
        let mut block_outputs = Vec::with_capacity(last_layer + 1);
        let mut qkv = Vec::with_capacity(last_layer + 1);
        for block in &self.blocks[..=last_layer] {
            let (out, block_qkv) = block.forward(x);
            block_outputs.push(out.clone());
            qkv.push(block_qkv);
            x = out;
        }

        VitFeatures { block_outputs, qkv }
    }

    /// Runs every block.
    pub fn forward_features(&self, x: Tensor<B, 4>) -> VitFeatures<B> {
        self.forward_until(x, self.depth() - 1)
    }

    /// Attention keys of `layer` for a single image.
    ///
    /// # Shapes
    /// - image: `[1, 3, H, W]`
    /// - output: `[heads, tokens, head_dim]`
    pub fn keys(&self, image: Tensor<B, 4>, layer: usize) -> Tensor<B, 3> {
        self.assert_layer(layer);
        let [batch, _, _, _] = image.dims();
        assert_eq!(batch, 1, "Key extraction expects a single image, got batch {batch}");

        let mut x = self.embed(image);
        for block in &self.blocks[..layer] {
            x = block.forward(x).0;
        }
        let (_, qkv) = self.blocks[layer].forward(x);

        keys_from_qkv(qkv, self.num_heads)
    }

    /// Cosine self-similarity between the per-token keys of `layer`.
    ///
    /// # Shapes
    /// - image: `[1, 3, H, W]`
    /// - output: `[1, tokens, tokens]`
    pub fn keys_self_similarity(&self, image: Tensor<B, 4>, layer: usize) -> Tensor<B, 3> {
        cosine_self_similarity(self.keys(image, layer))
    }

    /// Class token of the last block output for a single image, `[dim]`.
    pub fn cls_token(&self, image: Tensor<B, 4>) -> Tensor<B, 1> {
        let [batch, _, _, _] = image.dims();
        assert_eq!(batch, 1, "Class token extraction expects a single image, got batch {batch}");

        let mut x = self.embed(image);
        for block in &self.blocks {
            x = block.forward(x).0;
        }
        let [_, _, dim] = x.dims();

        x.narrow(1, 0, 1).reshape([dim])
    }

    /// Patch tokens plus class token plus position embedding, `[batch, 1 + patches, dim]`.
    fn embed(&self, x: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, _, _, _] = x.dims();
        let x = self.patch_embed.forward(x);
        let [_, _, grid_h, grid_w] = x.dims();
        let patches = x.flatten::<3>(2, 3).swap_dims(1, 2);

        let cls = self.cls_token.val().repeat_dim(0, batch);
        let tokens = Tensor::cat(vec![cls, patches], 1);

        tokens + self.interpolate_pos_encoding(grid_h, grid_w)
    }

    /// Resamples the learned position grid to `grid_h x grid_w` patches.
    fn interpolate_pos_encoding(&self, grid_h: usize, grid_w: usize) -> Tensor<B, 3> {
        let pos = self.pos_embed.val();
        if grid_h == self.grid_size && grid_w == self.grid_size {
            return pos;
        }

        let [_, tokens, dim] = pos.dims();
        let cls_pos = pos.clone().narrow(1, 0, 1);
        let patch_pos = pos
            .narrow(1, 1, tokens - 1)
            .reshape([1, self.grid_size, self.grid_size, dim])
            .permute([0, 3, 1, 2]);
        let patch_pos = interpolate(
            patch_pos,
            [grid_h, grid_w],
            InterpolateOptions::new(InterpolateMode::Bicubic),
        )
        .permute([0, 2, 3, 1])
        .reshape([1, grid_h * grid_w, dim]);

        Tensor::cat(vec![cls_pos, patch_pos], 1)
    }

    fn assert_layer(&self, layer: usize) {
        assert!(
            layer < self.depth(),
            "{}",
            BackboneError::LayerOutOfRange {
                layer,
                depth: self.depth(),
            }
        );
    }
}

impl<B: Backend> VitFeatureExtractor<B> for DinoVit<B> {
    fn extract_keys(&self, image: Tensor<B, 4>, layer: usize, scope: GradScope) -> Tensor<B, 3> {
        scope.apply(self.keys(scope.apply(image), layer))
    }

    fn extract_self_similarity(
        &self,
        image: Tensor<B, 4>,
        layer: usize,
        scope: GradScope,
    ) -> Tensor<B, 3> {
        scope.apply(self.keys_self_similarity(scope.apply(image), layer))
    }

    fn extract_cls_token(&self, image: Tensor<B, 4>, scope: GradScope) -> Tensor<B, 1> {
        scope.apply(self.cls_token(scope.apply(image)))
    }

    fn depth(&self) -> usize {
        self.blocks.len()
    }
}

/// Splits the key slice out of a fused `[1, tokens, 3 * dim]` qkv activation.
fn keys_from_qkv<B: Backend>(qkv: Tensor<B, 3>, num_heads: usize) -> Tensor<B, 3> {
    let [_, tokens, width] = qkv.dims();
    let head_dim = width / 3 / num_heads;

    qkv.reshape([tokens, 3, num_heads, head_dim])
        .permute([1, 2, 0, 3])
        .narrow(0, 1, 1)
        .reshape([num_heads, tokens, head_dim])
}

/// Cosine similarity between tokens, with keys of all heads concatenated per token.
fn cosine_self_similarity<B: Backend>(keys: Tensor<B, 3>) -> Tensor<B, 3> {
    let [heads, tokens, head_dim] = keys.dims();
    let x = keys.swap_dims(0, 1).reshape([tokens, heads * head_dim]);

    let norm = x.clone().powf_scalar(2.0).sum_dim(1).sqrt();
    let factor = norm.clone().matmul(norm.transpose()).clamp_min(COSINE_EPS);
    let sim = x.clone().matmul(x.transpose()) / factor;

    sim.unsqueeze::<3>()
}

#[cfg(test)]
mod tests {
    use burn::tensor::{ops::FloatElem, TensorData, Tolerance};

    use super::*;
    use crate::tests::{TestAutodiffBackend, TestBackend};

    type FT = FloatElem<TestBackend>;

    fn tiny_config() -> DinoVitConfig {
        DinoVitConfig::new()
            .with_patch_size(8)
            .with_embed_dim(16)
            .with_depth(3)
            .with_num_heads(2)
            .with_img_size(32)
    }

    #[test]
    fn model_names_map_to_published_variants() {
        let vitb8 = DinoVitConfig::from_model_name("dino_vitb8").unwrap();
        assert_eq!(
            (vitb8.patch_size, vitb8.embed_dim, vitb8.num_heads),
            (8, 768, 12)
        );

        let vits16 = DinoVitConfig::from_model_name("dino_vits16").unwrap();
        assert_eq!(
            (vits16.patch_size, vits16.embed_dim, vits16.num_heads),
            (16, 384, 6)
        );
    }

    #[test]
    fn unknown_model_name_is_rejected() {
        let err = DinoVitConfig::from_model_name("dino_vitl14").unwrap_err();
        assert!(matches!(err, BackboneError::UnknownModel { name } if name == "dino_vitl14"));
    }

    #[test]
    fn config_with_indivisible_heads_is_rejected() {
        let device = Default::default();
        let result = tiny_config()
            .with_num_heads(3)
            .init::<TestBackend>(&device);
        assert!(matches!(
            result,
            Err(BackboneError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn forward_until_records_requested_layers() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        let image = Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Default, &device);

        let features = model.forward_until(image, 1);

        assert_eq!(features.block_outputs.len(), 2);
        assert_eq!(features.qkv.len(), 2);
        // 4x4 patches plus the class token
        assert_eq!(features.block_outputs[1].dims(), [2, 17, 16]);
        assert_eq!(features.qkv[0].dims(), [2, 17, 48]);
    }

    #[test]
    fn keys_have_head_token_layout() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        let image = Tensor::<TestBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device);

        let keys = model.keys(image, 2);

        assert_eq!(keys.dims(), [2, 17, 8]);
    }

    #[test]
    fn keys_match_the_key_slice_of_qkv() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        let image = Tensor::<TestBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device);

        let qkv = model.forward_until(image.clone(), 1).qkv.remove(1);
        // token 0, key slice of head 0
        let expected = qkv.narrow(1, 0, 1).narrow(2, 16, 8).reshape([8]);
        let keys = model.keys(image, 1).narrow(0, 0, 1).narrow(1, 0, 1).reshape([8]);

        keys.into_data()
            .assert_approx_eq::<FT>(&expected.into_data(), Tolerance::default());
    }

    #[test]
    fn self_similarity_is_symmetric_with_unit_diagonal() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        let image = Tensor::<TestBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device);

        let sim = model.keys_self_similarity(image, 0);
        assert_eq!(sim.dims(), [1, 17, 17]);

        let matrix: Tensor<TestBackend, 2> = sim.reshape([17, 17]);
        matrix
            .clone()
            .into_data()
            .assert_approx_eq::<FT>(&matrix.clone().transpose().into_data(), Tolerance::default());

        for token in [0, 5, 16] {
            let self_sim = matrix.clone().narrow(0, token, 1).narrow(1, token, 1).reshape([1]);
            self_sim
                .into_data()
                .assert_approx_eq::<FT>(&TensorData::from([1.0]), Tolerance::relative(1e-3));
        }
    }

    #[test]
    fn cls_token_is_first_token_of_last_block() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        let image = Tensor::<TestBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device);

        let last = model.forward_features(image.clone()).block_outputs.remove(2);
        let expected = last.narrow(1, 0, 1).reshape([16]);

        model
            .cls_token(image)
            .into_data()
            .assert_approx_eq::<FT>(&expected.into_data(), Tolerance::default());
    }

    #[test]
    fn position_embedding_is_resampled_for_other_resolutions() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        let image = Tensor::<TestBackend, 4>::random([1, 3, 48, 64], Distribution::Default, &device);

        let keys = model.keys(image, 0);

        // 6x8 patches plus the class token
        assert_eq!(keys.dims(), [2, 49, 8]);
    }

    #[test]
    #[should_panic = "out of range"]
    fn keys_past_last_layer_panic() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        let image = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);

        let _ = model.keys(image, 3);
    }

    #[test]
    fn detached_target_side_records_no_gradient() {
        let device = Default::default();
        let model = tiny_config().init::<TestAutodiffBackend>(&device).unwrap();
        let output = Tensor::<TestAutodiffBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device)
            .require_grad();
        let target = Tensor::<TestAutodiffBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device)
            .require_grad();

        let tracked = model.extract_cls_token(output.clone(), GradScope::Tracked);
        let fixed = model.extract_cls_token(target.clone(), GradScope::Detached);
        let loss = (tracked - fixed).powf_scalar(2.0).mean();
        let grads = loss.backward();

        assert!(output.grad(&grads).is_some());
        assert!(target.grad(&grads).is_none());
    }
}
