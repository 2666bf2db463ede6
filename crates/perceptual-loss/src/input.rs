use burn::prelude::*;

/// Secondary encoder outputs aligned against the primary embeddings.
#[derive(Debug, Clone)]
pub struct AuxiliaryCodes<B: Backend> {
    /// Same shape as the content embedding.
    pub out_content_codes: Tensor<B, 2>,
    /// Same shape as the class embedding.
    pub out_class_codes: Tensor<B, 2>,
}

/// Everything a loss sees on one training step.
#[derive(Debug, Clone)]
pub struct LossInput<B: Backend> {
    /// Reconstructions `[N, 3, H, W]`; gradients flow back through these.
    pub outputs: Tensor<B, 4>,
    /// Ground truth `[N, 3, H, W]`.
    pub inputs: Tensor<B, 4>,
    /// Content embedding `[N, D]`.
    pub content_embedding: Tensor<B, 2>,
    /// Class embedding `[N, D']`.
    pub class_embedding: Option<Tensor<B, 2>>,
    pub auxiliary: Option<AuxiliaryCodes<B>>,
    /// Current training epoch, used by the warm-up variants.
    pub epoch: Option<usize>,
}

impl<B: Backend> LossInput<B> {
    pub fn new(outputs: Tensor<B, 4>, inputs: Tensor<B, 4>, content_embedding: Tensor<B, 2>) -> Self {
        Self {
            outputs,
            inputs,
            content_embedding,
            class_embedding: None,
            auxiliary: None,
            epoch: None,
        }
    }

    pub fn with_class_embedding(mut self, class_embedding: Tensor<B, 2>) -> Self {
        self.class_embedding = Some(class_embedding);
        self
    }

    pub fn with_auxiliary(mut self, auxiliary: AuxiliaryCodes<B>) -> Self {
        self.auxiliary = Some(auxiliary);
        self
    }

    pub fn with_epoch(mut self, epoch: usize) -> Self {
        self.epoch = Some(epoch);
        self
    }

    pub fn device(&self) -> B::Device {
        self.outputs.device()
    }
}
