use anyhow::Result;
use image::RgbImage;

use crate::error::malformed;
use crate::frame::{chroma_dimensions, RawFrame};

/// Convert a planar YUV 4:2:0 frame to interleaved RGB at the same resolution.
///
/// Full-range BT.601 reconstruction; chroma is shared by each 2x2 luma block.
pub fn i420_to_rgb(frame: &RawFrame) -> Result<RgbImage> {
    frame.validate()?;

    let w = frame.width() as usize;
    let h = frame.height() as usize;
    let (cw, _) = chroma_dimensions(frame.width(), frame.height());
    let cw = cw as usize;

    let luma = frame.luma();
    let u_plane = frame.chroma_u();
    let v_plane = frame.chroma_v();

    let mut rgb = vec![0u8; w * h * 3];
    for j in 0..h {
        let chroma_row = (j / 2) * cw;
        for i in 0..w {
            let y = luma[j * w + i] as f32;
            let u = u_plane[chroma_row + i / 2] as f32 - 128.0;
            let v = v_plane[chroma_row + i / 2] as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }

    RgbImage::from_raw(frame.width(), frame.height(), rgb)
        .ok_or_else(|| malformed("converted RGB buffer does not match frame size"))
}

pub(crate) fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
