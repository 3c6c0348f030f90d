//! Frame ingestion.
//!
//! - `file`: raw I420 replay and synthetic low-light frames (stands in for the camera)
//! - `slot`: single-slot latest-frame handoff to the pipeline worker
//! - `yuv`: planar YUV 4:2:0 to RGB conversion
//!
//! Sources hand frames over through `LatestFrameSlot`; the pipeline never
//! sees a backlog.

pub mod file;
pub mod slot;
pub mod yuv;

pub use file::{FileConfig, FileSource, FileStats};
pub use slot::{LatestFrameSlot, SlotStats};
pub use yuv::i420_to_rgb;
