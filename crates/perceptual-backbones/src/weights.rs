//! Pretrained weight loading from PyTorch checkpoints.
//!
//! DINO checkpoints use timm parameter names, which the transformer modules
//! mirror directly. torchvision VGG checkpoints store the convolutional stack
//! under `features.<index>` and are remapped onto the flat layer list.

use std::path::Path;

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, Recorder},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

use crate::{BackboneError, BackboneResult, DinoVit, VggFeatures};

/// Loads a DINO `.pth` state dict into `model` and re-freezes it.
pub fn load_dino_weights<B: Backend>(
    model: DinoVit<B>,
    path: &Path,
    device: &B::Device,
) -> BackboneResult<DinoVit<B>> {
    let load_args = LoadArgs::new(path.to_path_buf())
        // checkpoints saved from DistributedDataParallel
        .with_key_remap("^module\\.(.+)", "$1")
        .with_key_remap("^backbone\\.(.+)", "$1");

    let record: <DinoVit<B> as Module<B>>::Record =
        PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(load_args, device)
            .map_err(|e| BackboneError::WeightLoadingFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

    tracing::info!(path = %path.display(), "loaded DINO weights");
    Ok(model.load_record(record).no_grad())
}

/// Loads a torchvision VGG16 `.pth` state dict into `model` and re-freezes it.
pub fn load_vgg_weights<B: Backend>(
    model: VggFeatures<B>,
    path: &Path,
    device: &B::Device,
) -> BackboneResult<VggFeatures<B>> {
    let load_args =
        LoadArgs::new(path.to_path_buf()).with_key_remap("^features\\.([0-9]+)\\.(.+)", "layers.$1.$2");

    let record: <VggFeatures<B> as Module<B>>::Record =
        PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(load_args, device)
            .map_err(|e| BackboneError::WeightLoadingFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

    tracing::info!(path = %path.display(), "loaded VGG16 weights");
    Ok(model.load_record(record).no_grad())
}
