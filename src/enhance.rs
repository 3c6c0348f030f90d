//! Contrast-limited adaptive histogram equalization (CLAHE).
//!
//! Applied to R, G and B independently, not to a lightness channel. Each
//! plane is cut into a fixed tile grid; every tile gets a clipped-histogram
//! CDF as its remapping curve, and each pixel blends the curves of the four
//! nearest tile centers so tile borders do not show.

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::ingest::yuv::clamp_to_u8;

/// Default clip limit, as a multiple of the mean histogram bin count.
pub const DEFAULT_CLIP_LIMIT: f32 = 2.0;
/// Tile grid (columns, rows). Fixed for every frame the pipeline sees.
pub const DEFAULT_TILE_GRID: (u32, u32) = (8, 8);

const HIST_BINS: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnhancementParams {
    /// Clip limit relative to the mean bin count. `<= 0` disables clipping.
    pub clip_limit: f32,
    pub tile_grid: (u32, u32),
}

impl Default for EnhancementParams {
    fn default() -> Self {
        Self {
            clip_limit: DEFAULT_CLIP_LIMIT,
            tile_grid: DEFAULT_TILE_GRID,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ContrastEnhancer {
    params: EnhancementParams,
}

impl Default for ContrastEnhancer {
    fn default() -> Self {
        Self {
            params: EnhancementParams::default(),
        }
    }
}

impl ContrastEnhancer {
    pub fn new(params: EnhancementParams) -> Result<Self> {
        let (gx, gy) = params.tile_grid;
        if gx == 0 || gy == 0 {
            return Err(anyhow!("tile grid {}x{} must be non-zero", gx, gy));
        }
        if !params.clip_limit.is_finite() {
            return Err(anyhow!("clip limit must be finite"));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> EnhancementParams {
        self.params
    }

    /// Equalize each color channel of `image`.
    pub fn enhance(&self, image: RgbImage) -> RgbImage {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return image;
        }

        let raw = image.into_raw();
        let pixel_count = raw.len() / 3;
        let mut out = raw.clone();
        let mut plane = vec![0u8; pixel_count];
        for channel in 0..3 {
            for (dst, px) in plane.iter_mut().zip(raw.chunks_exact(3)) {
                *dst = px[channel];
            }
            let equalized = self.equalize_plane(&plane, width, height);
            for (px, value) in out.chunks_exact_mut(3).zip(equalized) {
                px[channel] = value;
            }
        }

        // Same length as the input buffer, so this cannot fail.
        RgbImage::from_raw(width, height, out).unwrap_or_else(|| RgbImage::new(width, height))
    }

    /// Equalize one 8-bit plane of `width * height` samples.
    pub fn equalize_plane(&self, plane: &[u8], width: u32, height: u32) -> Vec<u8> {
        let w = width as usize;
        let h = height as usize;
        if w == 0 || h == 0 || plane.len() < w * h {
            return plane.to_vec();
        }

        let (gx, gy) = (self.params.tile_grid.0 as usize, self.params.tile_grid.1 as usize);
        let mut luts = Vec::with_capacity(gx * gy);
        for ty in 0..gy {
            let (y0, y1) = (ty * h / gy, (ty + 1) * h / gy);
            for tx in 0..gx {
                let (x0, x1) = (tx * w / gx, (tx + 1) * w / gx);
                luts.push(tile_lut(plane, w, x0..x1, y0..y1, self.params.clip_limit));
            }
        }

        let tile_w = w as f32 / gx as f32;
        let tile_h = h as f32 / gy as f32;
        let columns: Vec<Neighbors> = (0..w).map(|x| Neighbors::new(x, tile_w, gx)).collect();

        let mut out = vec![0u8; w * h];
        for y in 0..h {
            let row = Neighbors::new(y, tile_h, gy);
            let top = row.low * gx;
            let bottom = row.high * gx;
            for (x, col) in columns.iter().enumerate() {
                let v = plane[y * w + x] as usize;
                let upper = luts[top + col.low][v] as f32 * (1.0 - col.weight)
                    + luts[top + col.high][v] as f32 * col.weight;
                let lower = luts[bottom + col.low][v] as f32 * (1.0 - col.weight)
                    + luts[bottom + col.high][v] as f32 * col.weight;
                out[y * w + x] = clamp_to_u8(upper * (1.0 - row.weight) + lower * row.weight);
            }
        }
        out
    }
}

/// The two tile indices bracketing a pixel along one axis and the blend weight
/// of the higher one.
struct Neighbors {
    low: usize,
    high: usize,
    weight: f32,
}

impl Neighbors {
    fn new(pos: usize, tile_size: f32, tiles: usize) -> Self {
        let t = pos as f32 / tile_size - 0.5;
        let low = t.floor();
        let weight = t - low;
        let last = tiles as i64 - 1;
        let low_idx = (low as i64).clamp(0, last) as usize;
        let high_idx = (low as i64 + 1).clamp(0, last) as usize;
        Self {
            low: low_idx,
            high: high_idx,
            weight,
        }
    }
}

fn tile_lut(
    plane: &[u8],
    stride: usize,
    xs: std::ops::Range<usize>,
    ys: std::ops::Range<usize>,
    clip_limit: f32,
) -> [u8; HIST_BINS] {
    let area = xs.len() * ys.len();
    if area == 0 {
        return identity_lut();
    }

    let mut hist = [0u32; HIST_BINS];
    for y in ys {
        for &v in &plane[y * stride + xs.start..y * stride + xs.end] {
            hist[v as usize] += 1;
        }
    }

    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / HIST_BINS as f32) as u32).max(1);
        clip_histogram(&mut hist, limit);
    }

    let scale = 255.0 / area as f32;
    let mut lut = [0u8; HIST_BINS];
    let mut sum = 0u32;
    for (entry, count) in lut.iter_mut().zip(hist) {
        sum += count;
        *entry = clamp_to_u8(sum as f32 * scale);
    }
    lut
}

/// Cap every bin at `limit` and spread the excess evenly over all bins; the
/// remainder goes one unit per bin at a fixed stride.
fn clip_histogram(hist: &mut [u32; HIST_BINS], limit: u32) {
    let mut clipped = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            clipped += *bin - limit;
            *bin = limit;
        }
    }
    if clipped == 0 {
        return;
    }

    let batch = clipped / HIST_BINS as u32;
    let residual = (clipped % HIST_BINS as u32) as usize;
    for bin in hist.iter_mut() {
        *bin += batch;
    }
    if residual > 0 {
        let step = (HIST_BINS / residual).max(1);
        for bin in hist.iter_mut().step_by(step).take(residual) {
            *bin += 1;
        }
    }
}

fn identity_lut() -> [u8; HIST_BINS] {
    let mut lut = [0u8; HIST_BINS];
    for (i, entry) in lut.iter_mut().enumerate() {
        *entry = i as u8;
    }
    lut
}
