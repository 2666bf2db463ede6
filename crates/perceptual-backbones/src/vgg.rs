//! VGG16 convolutional features for perceptual distances.
//!
//! The layers are kept as one flat, indexed list mirroring torchvision's
//! `vgg16().features`, so activations can be collected by the same layer
//! indices the published perceptual losses use.

use core::f64::consts::SQRT_2;

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
};

use crate::{ConvFeatureExtractor, GradScope};

/// Layer indices collected by the VGG distance: `conv1_2`, `conv2_2`,
/// `conv3_2`, `conv4_3` (before their ReLU) and the last max pool.
pub const VGG_DISTANCE_LAYERS: [usize; 5] = [2, 7, 12, 21, 30];

/// VGG16 stage layout: output channels per convolution, `None` for max pooling.
const VGG16_STAGES: [Option<usize>; 18] = [
    Some(64),
    Some(64),
    None,
    Some(128),
    Some(128),
    None,
    Some(256),
    Some(256),
    Some(256),
    None,
    Some(512),
    Some(512),
    Some(512),
    None,
    Some(512),
    Some(512),
    Some(512),
    None,
];

/// One entry of the `features` list.
#[derive(Module, Debug)]
pub enum VggLayer<B: Backend> {
    /// 3x3 convolution, stride 1, padding 1.
    Conv(Conv2d<B>),
    /// ReLU following every convolution.
    Relu(Relu),
    /// 2x2 max pooling, stride 2.
    MaxPool(MaxPool2d),
}

impl<B: Backend> VggLayer<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Conv(conv) => conv.forward(input),
            Self::Relu(relu) => relu.forward(input),
            Self::MaxPool(pool) => pool.forward(input),
        }
    }
}

/// Frozen VGG16 `features` stack.
#[derive(Module, Debug)]
pub struct VggFeatures<B: Backend> {
    layers: Vec<VggLayer<B>>,
}

impl<B: Backend> VggFeatures<B> {
    /// Create a randomly initialized, frozen VGG16 feature stack.
    pub fn vgg16(device: &Device<B>) -> Self {
        let initializer = Initializer::KaimingNormal {
            gain: SQRT_2,
            fan_out_only: true,
        };

        let mut layers = Vec::with_capacity(31);
        let mut channels = 3;
        for stage in VGG16_STAGES {
            match stage {
                Some(out_channels) => {
                    let conv = Conv2dConfig::new([channels, out_channels], [3, 3])
                        .with_padding(PaddingConfig2d::Explicit(1, 1))
                        .with_initializer(initializer.clone())
                        .init(device);
                    layers.push(VggLayer::Conv(conv));
                    layers.push(VggLayer::Relu(Relu::new()));
                    channels = out_channels;
                }
                None => {
                    let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
                    layers.push(VggLayer::MaxPool(pool));
                }
            }
        }

        tracing::debug!(layers = layers.len(), "initialized VGG16 features");
        Self { layers }.no_grad()
    }

    /// Number of entries in the `features` list.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Applies layers `0..=max(layer_ids)` in order and returns the output
    /// after each index listed in `layer_ids`.
    ///
    /// # Panics
    /// If `layer_ids` is empty, not strictly ascending, or points past the last layer.
    pub fn forward_collect(&self, input: Tensor<B, 4>, layer_ids: &[usize]) -> Vec<Tensor<B, 4>> {
        let Some(&last) = layer_ids.last() else {
            panic!("VGG feature collection needs at least one layer index");
        };
        assert!(
            layer_ids.windows(2).all(|pair| pair[0] < pair[1]),
            "VGG layer indices must be strictly ascending, got {layer_ids:?}"
        );
        assert!(
            last < self.layers.len(),
            "VGG layer {last} is out of range for {} layers",
            self.layers.len()
        );

        let mut features = Vec::with_capacity(layer_ids.len());
        let mut x = input;
        for (index, layer) in self.layers[..=last].iter().enumerate() {
            x = layer.forward(x);
            if layer_ids.contains(&index) {
                features.push(x.clone());
            }
        }
        features
    }
}

impl<B: Backend> ConvFeatureExtractor<B> for VggFeatures<B> {
    fn extract_conv_features(
        &self,
        image: Tensor<B, 4>,
        layer_ids: &[usize],
        scope: GradScope,
    ) -> Vec<Tensor<B, 4>> {
        self.forward_collect(scope.apply(image), layer_ids)
            .into_iter()
            .map(|features| scope.apply(features))
            .collect()
    }
}
