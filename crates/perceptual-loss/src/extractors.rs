//! Construction of the frozen extractors from a [`LossConfig`].

use std::path::Path;

use burn::prelude::*;
use perceptual_backbones::{DinoVit, DinoVitConfig, VggFeatures};

use crate::{LossConfig, LossError, LossResult};

/// Builds the configured DINO transformer, loading weights when a checkpoint is set.
///
/// With `queried` set the transformer feeds an enabled term, so `dino_weights`
/// must be configured. Otherwise the model is never run and keeps its initial
/// weights.
pub(crate) fn build_dino<B: Backend>(
    config: &LossConfig,
    device: &B::Device,
    queried: bool,
) -> LossResult<DinoVit<B>> {
    let model_config = DinoVitConfig::from_model_name(&config.dino_model_name)?;
    let checkpoint = config.dino_weights.as_deref();
    if queried && checkpoint.is_none() {
        return Err(missing_checkpoint("dino_weights", "a transformer term"));
    }

    let model = model_config.init(device)?;
    tracing::info!(
        model = %config.dino_model_name,
        layer = config.dino_layer,
        queried,
        "initialized DINO feature extractor"
    );
    match checkpoint {
        Some(path) => load_dino(model, path, device),
        None => Ok(model),
    }
}

/// Builds VGG16 features, loading weights when a checkpoint is set.
///
/// `vgg_weights` is required when `queried` is set.
pub(crate) fn build_vgg<B: Backend>(
    config: &LossConfig,
    device: &B::Device,
    queried: bool,
) -> LossResult<VggFeatures<B>> {
    let checkpoint = config.vgg_weights.as_deref();
    if queried && checkpoint.is_none() {
        return Err(missing_checkpoint("vgg_weights", "lambda_VGG"));
    }

    let model = VggFeatures::vgg16(device);
    tracing::info!(queried, "initialized VGG16 feature extractor");
    match checkpoint {
        Some(path) => load_vgg(model, path, device),
        None => Ok(model),
    }
}

fn missing_checkpoint(key: &str, user: &str) -> LossError {
    LossError::InvalidConfiguration {
        reason: format!("{key} must name a pretrained checkpoint when {user} is enabled"),
    }
}

#[cfg(feature = "pretrained")]
fn load_dino<B: Backend>(model: DinoVit<B>, path: &Path, device: &B::Device) -> LossResult<DinoVit<B>> {
    Ok(perceptual_backbones::load_dino_weights(model, path, device)?)
}

#[cfg(feature = "pretrained")]
fn load_vgg<B: Backend>(
    model: VggFeatures<B>,
    path: &Path,
    device: &B::Device,
) -> LossResult<VggFeatures<B>> {
    Ok(perceptual_backbones::load_vgg_weights(model, path, device)?)
}

#[cfg(not(feature = "pretrained"))]
fn load_dino<B: Backend>(_model: DinoVit<B>, path: &Path, _device: &B::Device) -> LossResult<DinoVit<B>> {
    Err(LossError::PretrainedUnavailable {
        path: path.to_path_buf(),
    })
}

#[cfg(not(feature = "pretrained"))]
fn load_vgg<B: Backend>(
    _model: VggFeatures<B>,
    path: &Path,
    _device: &B::Device,
) -> LossResult<VggFeatures<B>> {
    Err(LossError::PretrainedUnavailable {
        path: path.to_path_buf(),
    })
}

#[cfg(all(test, not(feature = "pretrained")))]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn configured_checkpoint_requires_pretrained_feature() {
        let device = Default::default();
        let config = LossConfig::default().with_vgg_weights(Some(PathBuf::from("vgg16.pth")));

        let err = build_vgg::<TestBackend>(&config, &device, true).unwrap_err();

        assert!(matches!(err, LossError::PretrainedUnavailable { .. }));
    }

    #[test]
    fn queried_extractors_require_a_checkpoint() {
        let device = Default::default();
        let config = LossConfig::default();

        let dino = build_dino::<TestBackend>(&config, &device, true).unwrap_err();
        let vgg = build_vgg::<TestBackend>(&config, &device, true).unwrap_err();

        assert!(
            matches!(dino, LossError::InvalidConfiguration { ref reason } if reason.contains("dino_weights"))
        );
        assert!(
            matches!(vgg, LossError::InvalidConfiguration { ref reason } if reason.contains("vgg_weights"))
        );
    }

    #[test]
    fn unqueried_extractor_builds_without_checkpoint() {
        let device = Default::default();

        assert!(build_vgg::<TestBackend>(&LossConfig::default(), &device, false).is_ok());
    }

    #[test]
    fn unknown_dino_model_is_rejected() {
        let device = Default::default();
        let config = LossConfig::default().with_dino_model_name("dino_vitl14");

        let err = build_dino::<TestBackend>(&config, &device, true).unwrap_err();

        assert!(matches!(err, LossError::Backbone(_)));
    }
}
