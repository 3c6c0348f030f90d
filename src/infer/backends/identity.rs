use anyhow::Result;

use crate::infer::backend::InferenceBackend;
use crate::tensor::Tensor;

/// Backend that returns its input unchanged (minus the batch dimension).
///
/// Used when no model is configured and in tests: the decoded output is then
/// the enhanced input rescaled to the full 0..=255 range.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityBackend;

impl IdentityBackend {
    pub fn new() -> Self {
        Self
    }
}

impl InferenceBackend for IdentityBackend {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn infer(&mut self, input: &Tensor) -> Result<Tensor> {
        input.clone().without_batch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_drops_batch_dimension() -> Result<()> {
        let input = Tensor::new(vec![1, 3, 1, 2], vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5])?;
        let output = IdentityBackend::new().infer(&input)?;
        assert_eq!(output.shape(), &[3, 1, 2]);
        assert_eq!(output.data(), input.data());
        Ok(())
    }
}
