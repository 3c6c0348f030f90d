//! Local file frame source.
//!
//! `FileSource` replays raw I420 frames (Y, U, V planes, tightly packed,
//! back to back) from a local file, or synthesizes dark, noisy frames for
//! `stub://` paths. It stands in for the camera: every produced frame
//! carries the configured rotation hint and a sequence number.

use anyhow::{anyhow, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};

use crate::frame::{chroma_dimensions, RawFrame, Rotation};

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path, or `stub://<name>` for synthetic frames.
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    /// Number of frames a synthetic source produces before ending.
    pub synthetic_frames: Option<u64>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: "stub://night".to_string(),
            width: 480,
            height: 640,
            rotation: Rotation::Deg90,
            synthetic_frames: None,
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    Raw(RawI420FileSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!(
                "frame size {}x{} must be non-zero",
                config.width,
                config.height
            ));
        }
        let backend = if config.path.starts_with("stub://") {
            FileBackend::Synthetic(SyntheticFileSource::new(config))
        } else {
            FileBackend::Raw(RawI420FileSource::open(config)?)
        };
        Ok(Self { backend })
    }

    /// Produce the next frame. `None` at end of input.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => Ok(source.next_frame()),
            FileBackend::Raw(source) => source.next_frame(),
        }
    }

    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => FileStats {
                frames_read: source.frame_count,
                path: source.config.path.clone(),
            },
            FileBackend::Raw(source) => FileStats {
                frames_read: source.frame_count,
                path: source.config.path.clone(),
            },
        }
    }
}

impl Iterator for FileSource {
    type Item = Result<RawFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_read: u64,
    pub path: String,
}

// ----------------------------------------------------------------------------
// Raw I420 replay
// ----------------------------------------------------------------------------

struct RawI420FileSource {
    config: FileConfig,
    reader: BufReader<File>,
    frame_len: usize,
    frame_count: u64,
}

impl RawI420FileSource {
    fn open(config: FileConfig) -> Result<Self> {
        let file = File::open(&config.path)
            .with_context(|| format!("failed to open frame file {}", config.path))?;
        let frame_len = RawFrame::i420_len(config.width, config.height);
        log::info!(
            "FileSource: replaying {} ({}x{} I420, {} bytes/frame, rotation {})",
            config.path,
            config.width,
            config.height,
            frame_len,
            config.rotation.degrees()
        );
        Ok(Self {
            config,
            reader: BufReader::new(file),
            frame_len,
            frame_count: 0,
        })
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        let mut buf = vec![0u8; self.frame_len];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to read {}", self.config.path))
                }
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < buf.len() {
            log::warn!(
                "FileSource: trailing partial frame in {} ({} of {} bytes)",
                self.config.path,
                filled,
                self.frame_len
            );
        }
        buf.truncate(filled);
        self.frame_count += 1;
        Ok(Some(
            RawFrame::from_i420(
                self.config.width,
                self.config.height,
                &buf,
                self.config.rotation,
            )
            .with_sequence(self.frame_count),
        ))
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    config: FileConfig,
    frame_count: u64,
    rng: StdRng,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Self {
        log::info!(
            "FileSource: synthetic {} ({}x{}, rotation {})",
            config.path,
            config.width,
            config.height,
            config.rotation.degrees()
        );
        Self {
            config,
            frame_count: 0,
            rng: StdRng::seed_from_u64(0x6e69_6768_74),
        }
    }

    fn next_frame(&mut self) -> Option<RawFrame> {
        if let Some(limit) = self.config.synthetic_frames {
            if self.frame_count >= limit {
                return None;
            }
        }
        self.frame_count += 1;

        let w = self.config.width as usize;
        let h = self.config.height as usize;
        let drift = (self.frame_count % 64) as usize;

        // Dim diagonal gradient with sensor-like noise, low-light range 8..=60.
        let mut luma = vec![0u8; w * h];
        for (idx, px) in luma.iter_mut().enumerate() {
            let (x, y) = (idx % w, idx / w);
            let base = 8 + ((x + y + drift) * 40 / (w + h + 64)) as u8;
            *px = base.saturating_add(self.rng.gen_range(0..=12));
        }
        let (cw, ch) = chroma_dimensions(self.config.width, self.config.height);
        let chroma_len = cw as usize * ch as usize;
        let chroma_u: Vec<u8> = (0..chroma_len)
            .map(|_| 128 + self.rng.gen_range(0..=6))
            .collect();
        let chroma_v: Vec<u8> = (0..chroma_len)
            .map(|_| 124 + self.rng.gen_range(0..=6))
            .collect();

        Some(
            RawFrame::new(
                self.config.width,
                self.config.height,
                luma,
                chroma_u,
                chroma_v,
                self.config.rotation,
            )
            .with_sequence(self.frame_count),
        )
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn rejects_url_schemes() {
        let config = FileConfig {
            path: "rtsp://camera/stream".to_string(),
            ..FileConfig::default()
        };
        assert!(FileSource::new(config).is_err());
    }

    #[test]
    fn synthetic_source_honors_frame_limit() -> Result<()> {
        let config = FileConfig {
            path: "stub://test".to_string(),
            width: 8,
            height: 6,
            rotation: Rotation::Deg0,
            synthetic_frames: Some(3),
        };
        let frames: Vec<RawFrame> = FileSource::new(config)?.collect::<Result<_>>()?;
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].sequence(), 3);
        for frame in &frames {
            frame.validate()?;
            assert!(frame.luma().iter().all(|&y| y <= 72));
        }
        Ok(())
    }

    #[test]
    fn replays_raw_frames_and_keeps_partial_tail() -> Result<()> {
        let frame_len = RawFrame::i420_len(4, 2);
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(&vec![16u8; frame_len * 2 + 3])?;

        let config = FileConfig {
            path: file.path().display().to_string(),
            width: 4,
            height: 2,
            rotation: Rotation::Deg180,
            synthetic_frames: None,
        };
        let mut source = FileSource::new(config)?;

        let first = source.next_frame()?.expect("first frame");
        first.validate()?;
        assert_eq!(first.rotation(), Rotation::Deg180);
        source.next_frame()?.expect("second frame").validate()?;

        let tail = source.next_frame()?.expect("partial frame");
        assert!(tail.validate().is_err());
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_read, 3);
        Ok(())
    }
}
