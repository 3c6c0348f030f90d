//! Planar float tensors and the image <-> tensor codec.
//!
//! Layout is channel-major: every value of channel 0 (R), then channel 1 (G),
//! then channel 2 (B); within a channel, rows top to bottom. The value of
//! channel `c` at `(x, y)` lives at `c * H * W + y * W + x`.

use anyhow::{anyhow, Result};
use image::{RgbImage, Rgba, RgbaImage};

use crate::error::shape_mismatch;

/// Gray used when a tensor has no dynamic range.
pub const NEUTRAL_GRAY: u8 = 128;

/// Flat `f32` buffer with an explicit shape. `data.len()` always equals the
/// product of `shape`.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| anyhow!("tensor shape {:?} overflows", shape))?;
        if expected != data.len() {
            return Err(shape_mismatch(format!(
                "shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `(H, W)` for a `(3, H, W)` or `(1, 3, H, W)` tensor.
    pub fn planar_dims(&self) -> Result<(usize, usize)> {
        match self.shape.as_slice() {
            [3, h, w] | [1, 3, h, w] => Ok((*h, *w)),
            other => Err(shape_mismatch(format!(
                "expected shape (3,H,W) or (1,3,H,W), got {:?}",
                other
            ))),
        }
    }

    /// Same data viewed as `(1, 3, H, W)`.
    pub fn with_batch(self) -> Result<Self> {
        let (h, w) = self.planar_dims()?;
        Ok(Self {
            shape: vec![1, 3, h, w],
            data: self.data,
        })
    }

    /// Same data viewed as `(3, H, W)`.
    pub fn without_batch(self) -> Result<Self> {
        let (h, w) = self.planar_dims()?;
        Ok(Self {
            shape: vec![3, h, w],
            data: self.data,
        })
    }
}

/// Per-channel `(pixel / 255 - mean[c]) / std[c]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalizationParams {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for NormalizationParams {
    /// Scale to `[0, 1]` without whitening.
    fn default() -> Self {
        Self {
            mean: [0.0; 3],
            std: [1.0; 3],
        }
    }
}

impl NormalizationParams {
    pub fn validate(&self) -> Result<()> {
        for c in 0..3 {
            if !self.mean[c].is_finite() {
                return Err(anyhow!("normalization mean[{}] must be finite", c));
            }
            if !self.std[c].is_finite() || self.std[c] == 0.0 {
                return Err(anyhow!(
                    "normalization std[{}] must be finite and non-zero, got {}",
                    c,
                    self.std[c]
                ));
            }
        }
        Ok(())
    }
}

/// Encode an RGB image as a `(3, H, W)` planar tensor.
pub fn encode(image: &RgbImage, params: &NormalizationParams) -> Tensor {
    let (w, h) = image.dimensions();
    let plane = w as usize * h as usize;

    let mut data = vec![0.0f32; 3 * plane];
    for (i, px) in image.as_raw().chunks_exact(3).enumerate() {
        for c in 0..3 {
            data[c * plane + i] = (px[c] as f32 / 255.0 - params.mean[c]) / params.std[c];
        }
    }

    Tensor {
        shape: vec![3, h as usize, w as usize],
        data,
    }
}

/// Decode a planar tensor into an opaque RGBA image of `width x height`.
///
/// Values are rescaled with one min/max over the whole tensor (all channels
/// together). A tensor without dynamic range decodes to `NEUTRAL_GRAY`.
pub fn decode(tensor: &Tensor, width: u32, height: u32) -> Result<RgbaImage> {
    let plane = width as usize * height as usize;
    let values = tensor.data();
    if values.len() != 3 * plane {
        return Err(shape_mismatch(format!(
            "expected {} values for 3x{}x{}, got {}",
            3 * plane,
            height,
            width,
            values.len()
        )));
    }

    // f64 so extremes near +/-f32::MAX still have a finite range.
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v as f64), hi.max(v as f64))
        });
    let delta = max - min;

    if !(min.is_finite() && max.is_finite() && delta > 0.0) {
        return Ok(RgbaImage::from_pixel(
            width,
            height,
            Rgba([NEUTRAL_GRAY, NEUTRAL_GRAY, NEUTRAL_GRAY, 255]),
        ));
    }

    let rescale =
        |v: f32| -> u8 { ((v as f64 - min) / delta * 255.0).round().clamp(0.0, 255.0) as u8 };

    let mut out = Vec::with_capacity(4 * plane);
    for i in 0..plane {
        out.push(rescale(values[i]));
        out.push(rescale(values[plane + i]));
        out.push(rescale(values[2 * plane + i]));
        out.push(255);
    }
    RgbaImage::from_raw(width, height, out)
        .ok_or_else(|| anyhow!("decoded buffer does not match {}x{}", width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, PipelineErrorKind};
    use image::Rgb;

    #[test]
    fn encode_is_planar_and_scaled() {
        let img = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgb([255, 0, 51])
            } else {
                Rgb([0, 102, 255])
            }
        });
        let t = encode(&img, &NormalizationParams::default());
        assert_eq!(t.shape(), &[3, 1, 2]);
        let expected = [1.0, 0.0, 0.0, 0.4, 0.2, 1.0];
        for (got, want) in t.data().iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{} vs {}", got, want);
        }
    }

    #[test]
    fn encode_applies_mean_and_std() {
        let img = RgbImage::from_pixel(1, 1, Rgb([255, 0, 51]));
        let params = NormalizationParams {
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.25, 2.0],
        };
        let t = encode(&img, &params);
        assert!((t.data()[0] - 1.0).abs() < 1e-6);
        assert!((t.data()[1] + 2.0).abs() < 1e-6);
        assert!((t.data()[2] + 0.15).abs() < 1e-6);
    }

    #[test]
    fn decodes_reference_tensor() -> Result<()> {
        let t = Tensor::new(
            vec![3, 2, 2],
            vec![-1.0, 0.0, 1.0, 2.0, -1.0, 0.0, 1.0, 2.0, -1.0, 0.0, 1.0, 2.0],
        )?;
        let img = decode(&t, 2, 2)?;
        let reds: Vec<u8> = img.pixels().map(|p| p.0[0]).collect();
        assert_eq!(reds, vec![0, 85, 170, 255]);
        for p in img.pixels() {
            assert_eq!(p.0[0], p.0[1]);
            assert_eq!(p.0[1], p.0[2]);
            assert_eq!(p.0[3], 255);
        }
        Ok(())
    }

    #[test]
    fn extremes_land_on_their_planar_positions() -> Result<()> {
        // min in green at (1,0), max in blue at (0,1).
        let mut data = vec![0.5f32; 12];
        data[4 + 1] = -3.0;
        data[8 + 2] = 7.0;
        let img = decode(&Tensor::new(vec![3, 2, 2], data)?, 2, 2)?;
        assert_eq!(img.get_pixel(1, 0).0[1], 0);
        assert_eq!(img.get_pixel(0, 1).0[2], 255);
        Ok(())
    }

    #[test]
    fn extremes_near_f32_max_keep_full_range() -> Result<()> {
        let mut data = vec![0.0f32; 12];
        data[0] = -3e38;
        data[11] = 3e38;
        let img = decode(&Tensor::new(vec![3, 2, 2], data)?, 2, 2)?;
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
        assert_eq!(img.get_pixel(1, 1).0[2], 255);
        assert_eq!(img.get_pixel(1, 0).0[1], 128);

        let img = decode(
            &Tensor::new(vec![3, 1, 1], vec![-f32::MAX, 0.0, f32::MAX])?,
            1,
            1,
        )?;
        assert_eq!(img.get_pixel(0, 0).0, [0, 128, 255, 255]);
        Ok(())
    }

    #[test]
    fn flat_tensor_decodes_to_neutral_gray() -> Result<()> {
        let t = Tensor::new(vec![1, 3, 2, 3], vec![0.25; 18])?;
        let img = decode(&t, 3, 2)?;
        assert!(img.pixels().all(|p| p.0 == [128, 128, 128, 255]));
        Ok(())
    }

    #[test]
    fn length_mismatch_is_reported() -> Result<()> {
        let t = Tensor::new(vec![3, 2, 2], vec![0.0; 12])?;
        let err = decode(&t, 3, 3).unwrap_err();
        assert_eq!(
            PipelineError::kind_of(&err),
            Some(PipelineErrorKind::ShapeMismatch)
        );
        Ok(())
    }

    #[test]
    fn encode_then_decode_restores_full_range_image() -> Result<()> {
        let img = RgbImage::from_fn(4, 4, |x, y| {
            let v = (x * 64 + y * 16) as u8;
            Rgb([v, 255 - v, if x == 0 { 0 } else { 255 }])
        });
        let decoded = decode(&encode(&img, &NormalizationParams::default()), 4, 4)?;
        for (src, dst) in img.pixels().zip(decoded.pixels()) {
            assert_eq!(&src.0[..], &dst.0[..3]);
        }
        Ok(())
    }

    #[test]
    fn encode_then_decode_is_monotonic_for_partial_range() -> Result<()> {
        let img = RgbImage::from_fn(8, 1, |x, _| Rgb([40 + x as u8 * 10, 60, 90]));
        let decoded = decode(&encode(&img, &NormalizationParams::default()), 8, 1)?;
        let reds: Vec<u8> = decoded.pixels().map(|p| p.0[0]).collect();
        assert!(reds.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(reds[0], 0);
        // green and blue keep their order relative to each other
        let p = decoded.get_pixel(0, 0).0;
        assert!(p[1] < p[2]);
        Ok(())
    }

    #[test]
    fn tensor_shape_must_match_data() {
        assert!(Tensor::new(vec![3, 2, 2], vec![0.0; 11]).is_err());
    }

    #[test]
    fn batch_dimension_round_trips() -> Result<()> {
        let t = Tensor::new(vec![3, 1, 2], vec![0.0; 6])?.with_batch()?;
        assert_eq!(t.shape(), &[1, 3, 1, 2]);
        assert_eq!(t.without_batch()?.shape(), &[3, 1, 2]);
        assert!(Tensor::new(vec![2, 3], vec![0.0; 6])?.planar_dims().is_err());
        Ok(())
    }

    #[test]
    fn zero_std_is_invalid() {
        let params = NormalizationParams {
            mean: [0.0; 3],
            std: [1.0, 0.0, 1.0],
        };
        assert!(params.validate().is_err());
        assert!(NormalizationParams::default().validate().is_ok());
    }
}
