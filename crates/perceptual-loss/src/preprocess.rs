//! Resize and normalization in front of the vision transformer.

use burn::{
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

/// ImageNet channel means.
pub const IMAGENET_MEAN: [f64; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations.
pub const IMAGENET_STD: [f64; 3] = [0.229, 0.224, 0.225];

/// Configuration of [`Preprocess`].
#[derive(Config, Debug)]
pub struct PreprocessConfig {
    /// Target length of the shorter side.
    #[config(default = 224)]
    pub size: usize,
    /// Upper bound for the longer side; must be greater than `size`.
    #[config(default = 480)]
    pub max_size: usize,
    #[config(default = "IMAGENET_MEAN")]
    pub mean: [f64; 3],
    #[config(default = "IMAGENET_STD")]
    pub std: [f64; 3],
}

impl PreprocessConfig {
    /// # Panics
    /// If `size` is zero or `max_size` is not greater than `size`.
    pub fn init(&self) -> Preprocess {
        self.assertions();
        Preprocess {
            size: self.size,
            max_size: self.max_size,
            mean: self.mean,
            std: self.std,
        }
    }

    fn assertions(&self) {
        assert!(self.size > 0, "Resize target size must be positive");
        assert!(
            self.max_size > self.size,
            "max_size ({}) must be greater than the resize size ({})",
            self.max_size,
            self.size
        );
        assert!(
            self.std.iter().all(|&std| std > 0.0),
            "Normalization std must be positive, got {:?}",
            self.std
        );
    }
}

/// Resizes the shorter side to a fixed size, bounded by a maximum longer side,
/// then normalizes every channel.
///
/// The same pipeline runs on both images of a perceptual comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocess {
    size: usize,
    max_size: usize,
    mean: [f64; 3],
    std: [f64; 3],
}

impl Preprocess {
    /// Output `[height, width]` for an image of `height x width`.
    pub fn resized_dims(&self, height: usize, width: usize) -> [usize; 2] {
        let (short, long) = if width <= height {
            (width, height)
        } else {
            (height, width)
        };

        let mut new_short = self.size;
        let mut new_long = self.size * long / short;
        if new_long > self.max_size {
            new_short = self.max_size * new_short / new_long;
            new_long = self.max_size;
        }

        if width <= height {
            [new_long, new_short]
        } else {
            [new_short, new_long]
        }
    }

    /// Bilinear resize of `[N, C, H, W]` images; returns the input untouched
    /// when it already has the target size.
    pub fn resize<B: Backend>(&self, image: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = image.dims();
        let output_size = self.resized_dims(height, width);
        if output_size == [height, width] {
            return image;
        }

        interpolate(
            image,
            output_size,
            InterpolateOptions::new(InterpolateMode::Bilinear),
        )
    }

    /// `(x - mean[c]) / std[c]` for `[N, 3, H, W]` images.
    pub fn normalize<B: Backend>(&self, image: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = image.dims();
        assert_eq!(
            channels, 3,
            "Normalization expects 3 channels, got {channels}"
        );

        let device = image.device();
        let mean = Tensor::<B, 1>::from_floats(self.mean, &device).reshape([1, 3, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(self.std, &device).reshape([1, 3, 1, 1]);
        (image - mean) / std
    }

    pub fn forward<B: Backend>(&self, image: Tensor<B, 4>) -> Tensor<B, 4> {
        self.normalize(self.resize(image))
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{Tolerance, cast::ToElement};

    use super::*;
    use crate::tests::TestBackend;

    type FT = f32;

    #[test]
    fn shorter_side_is_resized_to_size() {
        let preprocess = PreprocessConfig::new().init();

        assert_eq!(preprocess.resized_dims(300, 400), [224, 298]);
        assert_eq!(preprocess.resized_dims(400, 300), [298, 224]);
        assert_eq!(preprocess.resized_dims(224, 224), [224, 224]);
    }

    #[test]
    fn longer_side_is_capped_at_max_size() {
        let preprocess = PreprocessConfig::new().init();

        assert_eq!(preprocess.resized_dims(800, 200), [480, 120]);
        assert_eq!(preprocess.resized_dims(100, 1000), [48, 480]);
    }

    #[test]
    fn resize_skips_images_already_at_target_size() {
        let device = Default::default();
        let preprocess = PreprocessConfig::new().with_size(8).with_max_size(16).init();
        let image = Tensor::<TestBackend, 4>::ones([1, 3, 8, 8], &device);

        let resized = preprocess.resize(image.clone());

        resized.into_data().assert_eq(&image.into_data(), true);
    }

    #[test]
    fn resize_produces_target_dims() {
        let device = Default::default();
        let preprocess = PreprocessConfig::new().with_size(8).with_max_size(32).init();
        let image = Tensor::<TestBackend, 4>::ones([1, 3, 16, 24], &device);

        let resized = preprocess.resize(image);

        assert_eq!(resized.dims(), [1, 3, 8, 12]);
        let mean = resized.mean().into_scalar().to_f64();
        assert!((mean - 1.0).abs() < 1e-5);
    }

    #[test]
    fn normalize_uses_imagenet_statistics() {
        let device = Default::default();
        let preprocess = PreprocessConfig::new().init();
        let image = Tensor::<TestBackend, 4>::ones([1, 3, 2, 2], &device);

        let normalized = preprocess.normalize(image);

        let per_channel = normalized.mean_dim(3).mean_dim(2).reshape([3]);
        let expected = TensorData::from([
            (1.0 - 0.485) / 0.229,
            (1.0 - 0.456) / 0.224,
            (1.0 - 0.406) / 0.225,
        ]);
        per_channel
            .into_data()
            .assert_approx_eq::<FT>(&expected, Tolerance::default());
    }

    #[test]
    #[should_panic = "max_size"]
    fn init_rejects_max_size_not_above_size() {
        let _ = PreprocessConfig::new().with_size(480).with_max_size(480).init();
    }
}
