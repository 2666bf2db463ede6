//! Image loading into `[1, 3, H, W]` tensors with values in `[0, 1]`.

use std::path::Path;

use burn::prelude::*;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to open image at '{path}': {source}")]
    ImageLoadError {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

pub type ImageResult<T> = Result<T, ImageError>;

/// Opens an image file.
pub fn open_image(path: impl AsRef<Path>) -> ImageResult<DynamicImage> {
    let path = path.as_ref();
    image::open(path).map_err(|source| ImageError::ImageLoadError {
        path: path.display().to_string(),
        source,
    })
}

/// Converts an image to an RGB tensor of shape `[1, 3, H, W]`.
pub fn dynamic_image_to_tensor<B: Backend>(img: DynamicImage, device: &B::Device) -> Tensor<B, 4> {
    let (width, height) = img.dimensions();
    let buf = img.into_rgb32f().into_raw();

    let data = TensorData::new(buf, [height as usize, width as usize, 3]);
    Tensor::<B, 3>::from_data(data, device)
        .permute([2, 0, 1])
        .unsqueeze::<4>()
}

/// Loads a target and a reconstruction at a common size.
///
/// The reconstruction is resized to the target's dimensions when they differ.
pub fn load_image_pair<B: Backend>(
    target: impl AsRef<Path>,
    reconstruction: impl AsRef<Path>,
    device: &B::Device,
) -> ImageResult<(Tensor<B, 4>, Tensor<B, 4>)> {
    let target = open_image(target)?;
    let mut reconstruction = open_image(reconstruction)?;

    let (width, height) = target.dimensions();
    if reconstruction.dimensions() != (width, height) {
        tracing::warn!(
            from = ?reconstruction.dimensions(),
            to = ?(width, height),
            "resizing reconstruction to target size"
        );
        reconstruction = reconstruction.resize_exact(width, height, FilterType::Triangle);
    }

    Ok((
        dynamic_image_to_tensor(target, device),
        dynamic_image_to_tensor(reconstruction, device),
    ))
}
