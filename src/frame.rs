//! Raw camera frames.
//!
//! - `Rotation`: display rotation hint, restricted to quarter turns.
//! - `RawFrame`: planar YUV 4:2:0 frame as delivered by the capture source.
//!
//! Planes are stored tightly packed (no row padding). Plane sizes are NOT
//! validated at construction; a short plane is reported as a malformed frame
//! when the pipeline converts the frame, so a bad frame never takes the
//! capture loop down with it.

use anyhow::Result;
use std::time::Instant;

use crate::error::malformed;

/// Rotation hint attached to a frame, clockwise in image coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Parse a rotation in degrees. Values are reduced modulo 360;
    /// anything that is not a quarter turn is rejected.
    pub fn from_degrees(degrees: i32) -> Result<Self> {
        match degrees.rem_euclid(360) {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            _ => Err(malformed(format!(
                "rotation {} is not a multiple of 90 degrees",
                degrees
            ))),
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Rotation equivalent to applying `self` and then `next`.
    pub fn then(self, next: Rotation) -> Rotation {
        match (self.degrees() + next.degrees()) % 360 {
            90 => Rotation::Deg90,
            180 => Rotation::Deg180,
            270 => Rotation::Deg270,
            _ => Rotation::Deg0,
        }
    }

    /// True when the rotated frame swaps width and height.
    pub fn is_transposing(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }

    /// (cos, sin) of the rotation angle, exact for quarter turns.
    pub(crate) fn cos_sin(self) -> (f32, f32) {
        match self {
            Rotation::Deg0 => (1.0, 0.0),
            Rotation::Deg90 => (0.0, 1.0),
            Rotation::Deg180 => (-1.0, 0.0),
            Rotation::Deg270 => (0.0, -1.0),
        }
    }
}

/// Chroma plane dimensions for a 4:2:0 frame of the given size.
pub fn chroma_dimensions(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(2), height.div_ceil(2))
}

/// Planar YUV 4:2:0 frame.
pub struct RawFrame {
    width: u32,
    height: u32,
    luma: Vec<u8>,
    chroma_u: Vec<u8>,
    chroma_v: Vec<u8>,
    rotation: Rotation,
    sequence: u64,
    captured_at: Instant,
}

impl RawFrame {
    pub fn new(
        width: u32,
        height: u32,
        luma: Vec<u8>,
        chroma_u: Vec<u8>,
        chroma_v: Vec<u8>,
        rotation: Rotation,
    ) -> Self {
        Self {
            width,
            height,
            luma,
            chroma_u,
            chroma_v,
            rotation,
            sequence: 0,
            captured_at: Instant::now(),
        }
    }

    /// Split a contiguous I420 buffer (Y, then U, then V) into planes.
    ///
    /// A buffer shorter than a full frame yields short planes; the frame is
    /// then rejected downstream as malformed.
    pub fn from_i420(width: u32, height: u32, bytes: &[u8], rotation: Rotation) -> Self {
        let luma_len = width as usize * height as usize;
        let (cw, ch) = chroma_dimensions(width, height);
        let chroma_len = cw as usize * ch as usize;

        let split = |start: usize, len: usize| -> Vec<u8> {
            let start = start.min(bytes.len());
            let end = start.saturating_add(len).min(bytes.len());
            bytes[start..end].to_vec()
        };

        Self::new(
            width,
            height,
            split(0, luma_len),
            split(luma_len, chroma_len),
            split(luma_len + chroma_len, chroma_len),
            rotation,
        )
    }

    /// Byte length of one tightly packed I420 frame.
    pub fn i420_len(width: u32, height: u32) -> usize {
        let (cw, ch) = chroma_dimensions(width, height);
        width as usize * height as usize + 2 * cw as usize * ch as usize
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn luma(&self) -> &[u8] {
        &self.luma
    }

    pub fn chroma_u(&self) -> &[u8] {
        &self.chroma_u
    }

    pub fn chroma_v(&self) -> &[u8] {
        &self.chroma_v
    }

    /// Time since the source handed this frame over.
    pub fn age_ms(&self) -> u128 {
        self.captured_at.elapsed().as_millis()
    }

    /// Check dimensions and plane lengths.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(malformed(format!(
                "frame has zero dimension {}x{}",
                self.width, self.height
            )));
        }
        let luma_len = (self.width as usize)
            .checked_mul(self.height as usize)
            .ok_or_else(|| malformed("frame dimensions overflow"))?;
        if self.luma.len() < luma_len {
            return Err(malformed(format!(
                "luma plane too short: expected {}, got {}",
                luma_len,
                self.luma.len()
            )));
        }
        let (cw, ch) = chroma_dimensions(self.width, self.height);
        let chroma_len = cw as usize * ch as usize;
        for (name, plane) in [("u", &self.chroma_u), ("v", &self.chroma_v)] {
            if plane.len() < chroma_len {
                return Err(malformed(format!(
                    "chroma {} plane too short: expected {}, got {}",
                    name,
                    chroma_len,
                    plane.len()
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("rotation", &self.rotation)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}
