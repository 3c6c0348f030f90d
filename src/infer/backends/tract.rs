#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::error::model_load;
use crate::infer::backend::InferenceBackend;
use crate::tensor::Tensor as FrameTensor;

/// Tract-based backend for ONNX image-to-image models.
///
/// The model is loaded from a local file with its input fixed to
/// `(1, 3, height, width)` f32. No network I/O, no writes.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    ///
    /// Any failure here is a model load failure.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = Self::load(model_path, width, height).map_err(|e| {
            model_load(format!(
                "failed to load ONNX model from {}: {:#}",
                model_path.display(),
                e
            ))
        })?;
        log::info!(
            "tract backend loaded {} (input 1x3x{}x{})",
            model_path.display(),
            height,
            width
        );
        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn load(model_path: &Path, width: u32, height: u32) -> Result<TypedRunnableModel<TypedModel>> {
        tract_onnx::onnx()
            .model_for_path(model_path)
            .context("failed to parse ONNX model")?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")
    }

    fn build_input(&self, input: &FrameTensor) -> Result<Tensor> {
        let expected = [1, 3, self.height as usize, self.width as usize];
        if input.shape() != expected {
            return Err(anyhow!(
                "input shape {:?} does not match model input {:?}",
                input.shape(),
                expected
            ));
        }
        let array = tract_ndarray::Array4::from_shape_vec(
            (1, 3, self.height as usize, self.width as usize),
            input.data().to_vec(),
        )
        .context("failed to shape model input")?;
        Ok(array.into_tensor())
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, input: &FrameTensor) -> Result<FrameTensor> {
        let input = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        FrameTensor::new(view.shape().to_vec(), view.iter().copied().collect())
    }

    fn warm_up(&mut self) -> Result<()> {
        let zeros = FrameTensor::new(
            vec![1, 3, self.height as usize, self.width as usize],
            vec![0.0; 3 * self.height as usize * self.width as usize],
        )?;
        self.infer(&zeros).map(|_| ())
    }
}
