//! Geometric normalization to the model input size.
//!
//! One affine transform is composed per frame: rotate about the frame center
//! (clockwise, quarter turns only), then scale each axis independently so the
//! rotated frame fills the target exactly. The output is resampled once
//! through the inverse transform with bilinear interpolation. Aspect ratio is
//! not preserved.

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::frame::{RawFrame, Rotation};
use crate::ingest::yuv::{clamp_to_u8, i420_to_rgb};

/// Model input width.
pub const MODEL_INPUT_WIDTH: u32 = 240;
/// Model input height.
pub const MODEL_INPUT_HEIGHT: u32 = 240;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeometricNormalizer {
    target_width: u32,
    target_height: u32,
}

impl Default for GeometricNormalizer {
    fn default() -> Self {
        Self {
            target_width: MODEL_INPUT_WIDTH,
            target_height: MODEL_INPUT_HEIGHT,
        }
    }
}

impl GeometricNormalizer {
    pub fn new(target_width: u32, target_height: u32) -> Result<Self> {
        if target_width == 0 || target_height == 0 {
            return Err(anyhow!(
                "target size {}x{} must be non-zero",
                target_width,
                target_height
            ));
        }
        Ok(Self {
            target_width,
            target_height,
        })
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Convert a raw frame to RGB and warp it to the target size.
    pub fn normalize(&self, frame: &RawFrame) -> Result<RgbImage> {
        let rgb = i420_to_rgb(frame)?;
        Ok(self.warp(&rgb, frame.rotation()))
    }

    /// Rotate and scale an RGB image to the target size in a single resampling pass.
    pub fn warp(&self, src: &RgbImage, rotation: Rotation) -> RgbImage {
        if src.width() == 0 || src.height() == 0 {
            return RgbImage::new(self.target_width, self.target_height);
        }
        let transform = Affine::compose(
            src.width(),
            src.height(),
            rotation,
            self.target_width,
            self.target_height,
        );

        let mut out = RgbImage::new(self.target_width, self.target_height);
        for (u, v, px) in out.enumerate_pixels_mut() {
            let (x, y) = transform.source_coords(u, v);
            px.0 = sample_bilinear(src, x, y);
        }
        out
    }
}

/// Inverse mapping from target pixel centers to source coordinates.
struct Affine {
    cos: f32,
    sin: f32,
    scale_x: f32,
    scale_y: f32,
    src_cx: f32,
    src_cy: f32,
    dst_cx: f32,
    dst_cy: f32,
}

impl Affine {
    fn compose(
        src_w: u32,
        src_h: u32,
        rotation: Rotation,
        dst_w: u32,
        dst_h: u32,
    ) -> Self {
        let (rot_w, rot_h) = if rotation.is_transposing() {
            (src_h, src_w)
        } else {
            (src_w, src_h)
        };
        let (cos, sin) = rotation.cos_sin();
        Self {
            cos,
            sin,
            scale_x: dst_w as f32 / rot_w as f32,
            scale_y: dst_h as f32 / rot_h as f32,
            src_cx: src_w as f32 / 2.0,
            src_cy: src_h as f32 / 2.0,
            dst_cx: dst_w as f32 / 2.0,
            dst_cy: dst_h as f32 / 2.0,
        }
    }

    fn source_coords(&self, u: u32, v: u32) -> (f32, f32) {
        // Undo the scale, then the rotation, both relative to the centers.
        let rx = (u as f32 + 0.5 - self.dst_cx) / self.scale_x;
        let ry = (v as f32 + 0.5 - self.dst_cy) / self.scale_y;
        let px = rx * self.cos + ry * self.sin;
        let py = -rx * self.sin + ry * self.cos;
        (px + self.src_cx - 0.5, py + self.src_cy - 0.5)
    }
}

fn sample_bilinear(src: &RgbImage, x: f32, y: f32) -> [u8; 3] {
    let max_x = (src.width() - 1) as f32;
    let max_y = (src.height() - 1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(src.width() - 1);
    let y1 = (y0 + 1).min(src.height() - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = src.get_pixel(x0, y0).0;
    let p10 = src.get_pixel(x1, y0).0;
    let p01 = src.get_pixel(x0, y1).0;
    let p11 = src.get_pixel(x1, y1).0;

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = clamp_to_u8(top * (1.0 - fy) + bottom * fy);
    }
    out
}
