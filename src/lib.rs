//! night2day
//!
//! Per-frame night-to-day camera enhancement.
//!
//! # Architecture
//!
//! Every frame takes the same path, one frame at a time, on a single worker:
//!
//! 1. **Normalize**: full-range BT.601 YUV 4:2:0 to RGB, then rotate and scale
//!    to the model input size in one bilinear resampling pass.
//! 2. **Enhance**: tiled, clip-limited histogram equalization on each RGB
//!    channel independently.
//! 3. **Encode**: planar `(3, H, W)` float tensor, `(px / 255 - mean) / std`.
//! 4. **Infer**: one call into an opaque image-to-image model behind the
//!    `InferenceGateway`, optionally bounded by a timeout.
//! 5. **Decode**: global min-max rescale of the output tensor to an opaque
//!    RGBA image.
//! 6. **Publish**: the image plus FPS, placeholder location and placeholder
//!    hazard text, handed to a `ResultSink`.
//!
//! Frames reach the worker through a single-slot `LatestFrameSlot`; a slow
//! pipeline drops stale frames instead of queueing them.
//!
//! # Module Structure
//!
//! - `frame`: Raw YUV frames and rotation
//! - `ingest`: Frame sources, YUV conversion and the latest-frame mailbox
//! - `geometry`, `enhance`, `tensor`: Per-frame image stages
//! - `infer`: Backends, inference gateway, model staging
//! - `telemetry`: Cadence tracking and placeholder telemetry
//! - `pipeline`: The per-frame orchestrator
//! - `config`, `error`: Configuration and typed failures

pub mod config;
pub mod enhance;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod infer;
pub mod ingest;
pub mod pipeline;
pub mod telemetry;
pub mod tensor;

pub use config::Night2DayConfig;
pub use enhance::{ContrastEnhancer, EnhancementParams};
pub use error::{PipelineError, PipelineErrorKind};
pub use frame::{RawFrame, Rotation};
pub use geometry::{GeometricNormalizer, MODEL_INPUT_HEIGHT, MODEL_INPUT_WIDTH};
#[cfg(feature = "backend-tract")]
pub use infer::TractBackend;
pub use infer::{IdentityBackend, InferenceBackend, InferenceGateway, StagedModel};
pub use ingest::{FileConfig, FileSource, LatestFrameSlot};
pub use pipeline::{
    ChannelSink, FrameOutcome, FramePipeline, PipelineResult, PipelineSettings, PipelineStats,
    ResultSink, Stage,
};
pub use telemetry::{CadenceTracker, FrameRate, HazardFlag};
pub use tensor::{NormalizationParams, Tensor, NEUTRAL_GRAY};
