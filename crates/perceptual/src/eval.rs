//! Evaluation of a loss on one target/reconstruction pair.

use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context, Result};
use burn::{prelude::*, tensor::backend::AutodiffBackend, tensor::cast::ToElement};
use perceptual_loss::{build_loss, CompositeLoss, LossConfig, LossInput};

use crate::image::load_image_pair;

/// Evaluation request.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Loss variant name (`Naive`, `ViT`, `VGG`, `ViTVGG`, `ViTVGGAlt`).
    pub loss: String,
    /// JSON loss configuration; defaults are used when absent.
    pub config: Option<PathBuf>,
    pub target: PathBuf,
    pub reconstruction: PathBuf,
    pub epoch: Option<usize>,
    /// Width of the zero content embedding fed to the regularization terms.
    pub embedding_dim: usize,
}

/// Loss breakdown of one evaluation plus the gradient reaching the reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    pub terms: BTreeMap<String, f64>,
    /// Mean absolute gradient of the total with respect to the reconstruction.
    pub reconstruction_grad: f64,
}

/// Builds the requested loss and evaluates it on the image pair.
///
/// # Errors
///
/// Returns an error if the configuration cannot be read, the loss cannot be
/// built, or either image fails to load.
pub fn run_eval<B: AutodiffBackend>(config: &EvalConfig, device: &B::Device) -> Result<EvalReport> {
    let loss_config = match &config.config {
        Some(path) => LossConfig::load(path)
            .with_context(|| format!("loading loss configuration {}", path.display()))?,
        None => LossConfig::default(),
    };

    tracing::info!(
        loss = %config.loss,
        target = %config.target.display(),
        reconstruction = %config.reconstruction.display(),
        epoch = ?config.epoch,
        "evaluating loss",
    );

    let bundle = build_loss::<B>(&config.loss, &loss_config, device)?;
    let (inputs, outputs) = load_image_pair::<B>(&config.target, &config.reconstruction, device)?;
    let outputs = outputs.require_grad();
    let content_embedding = Tensor::zeros([1, config.embedding_dim], device);

    let mut input = LossInput::new(outputs.clone(), inputs, content_embedding);
    if let Some(epoch) = config.epoch {
        input = input.with_epoch(epoch);
    }

    let breakdown = bundle.loss.forward(&input);
    let terms = breakdown.scalars();
    for (name, value) in &terms {
        tracing::info!(term = %name, value, "loss term");
    }

    let grads = breakdown.into_loss().backward();
    let reconstruction_grad = outputs
        .grad(&grads)
        .map_or(0.0, |grad| grad.abs().mean().into_scalar().to_f64());
    tracing::info!(reconstruction_grad, "backward pass complete");

    Ok(EvalReport {
        terms,
        reconstruction_grad,
    })
}
