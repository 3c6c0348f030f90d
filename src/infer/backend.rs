use anyhow::Result;

use crate::tensor::Tensor;

/// Inference backend trait.
///
/// A backend is the opaque model: it receives one `(1, 3, H, W)` planar
/// tensor and returns a planar tensor of shape `(3, H, W)` or `(1, 3, H, W)`.
/// The gateway checks the returned shape; backends do not need to.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the model on one batched input tensor.
    fn infer(&mut self, input: &Tensor) -> Result<Tensor>;

    /// Optional warm-up hook, run once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl InferenceBackend for Box<dyn InferenceBackend> {
    fn name(&self) -> &'static str {
        self.as_ref().name()
    }

    fn infer(&mut self, input: &Tensor) -> Result<Tensor> {
        self.as_mut().infer(input)
    }

    fn warm_up(&mut self) -> Result<()> {
        self.as_mut().warm_up()
    }
}
