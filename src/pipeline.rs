//! Per-frame orchestration.
//!
//! `FramePipeline` owns every stage plus the inference gateway and runs one
//! frame at a time through
//! `Idle -> Normalizing -> Enhancing -> Encoding -> Inferring -> Decoding -> Publishing -> Idle`.
//! A failure in any stage drops the frame, is counted by kind and leaves
//! cadence and telemetry untouched.

use anyhow::Result;
use image::RgbaImage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::mpsc::Sender;
use std::time::Instant;

use crate::enhance::{ContrastEnhancer, EnhancementParams};
use crate::error::{shape_mismatch, PipelineError, PipelineErrorKind};
use crate::frame::RawFrame;
use crate::geometry::GeometricNormalizer;
use crate::infer::InferenceGateway;
use crate::ingest::LatestFrameSlot;
use crate::telemetry::{
    format_fps, CadenceTracker, Clock, FrameRate, HazardFlag, Location, MonotonicClock,
    TelemetryStubs,
};
use crate::tensor::{self, NormalizationParams};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Normalizing,
    Enhancing,
    Encoding,
    Inferring,
    Decoding,
    Publishing,
}

/// Fixed per-pipeline parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineSettings {
    pub target_width: u32,
    pub target_height: u32,
    pub normalization: NormalizationParams,
    pub enhancement: EnhancementParams,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            target_width: crate::geometry::MODEL_INPUT_WIDTH,
            target_height: crate::geometry::MODEL_INPUT_HEIGHT,
            normalization: NormalizationParams::default(),
            enhancement: EnhancementParams::default(),
        }
    }
}

/// One completed frame: the day-style image plus its telemetry strings.
#[derive(Clone, Debug)]
pub struct PipelineResult {
    image: RgbaImage,
    sequence: u64,
    frame_rate: Option<FrameRate>,
    inference_ms: u64,
    location: Location,
    hazard: HazardFlag,
    fps: String,
    location_text: String,
    warning: String,
}

impl PipelineResult {
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// `None` for the first completed frame.
    pub fn frame_rate(&self) -> Option<FrameRate> {
        self.frame_rate
    }

    pub fn inference_ms(&self) -> u64 {
        self.inference_ms
    }

    pub fn hazard(&self) -> HazardFlag {
        self.hazard
    }

    pub fn coordinates(&self) -> Location {
        self.location
    }

    /// `FPS: 20.00 Inference: 37ms`
    pub fn fps(&self) -> &str {
        &self.fps
    }

    /// `120.03E, 29.98N`
    pub fn location(&self) -> &str {
        &self.location_text
    }

    pub fn warning(&self) -> &str {
        &self.warning
    }
}

/// Receives completed frames. Delivery is fire-and-forget.
pub trait ResultSink: Send {
    fn publish(&mut self, result: PipelineResult);
}

/// Forwards results over an mpsc channel. A gone receiver is ignored.
pub struct ChannelSink {
    tx: Sender<PipelineResult>,
}

impl ChannelSink {
    pub fn new(tx: Sender<PipelineResult>) -> Self {
        Self { tx }
    }
}

impl ResultSink for ChannelSink {
    fn publish(&mut self, result: PipelineResult) {
        let sequence = result.sequence;
        if self.tx.send(result).is_err() {
            log::debug!("result receiver gone, discarding frame {}", sequence);
        }
    }
}

impl ResultSink for Vec<PipelineResult> {
    fn publish(&mut self, result: PipelineResult) {
        self.push(result);
    }
}

/// Published and dropped frame counts. Drops are keyed by error code.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub published: u64,
    pub dropped: BTreeMap<&'static str, u64>,
}

impl PipelineStats {
    pub fn dropped_total(&self) -> u64 {
        self.dropped.values().sum()
    }

    pub fn dropped_for(&self, kind: PipelineErrorKind) -> u64 {
        self.dropped.get(kind.code()).copied().unwrap_or(0)
    }

    fn record_drop(&mut self, kind: Option<PipelineErrorKind>) {
        let code = kind.map(|k| k.code()).unwrap_or("other");
        *self.dropped.entry(code).or_insert(0) += 1;
    }
}

/// What happened to one frame handed to `FramePipeline::handle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Published,
    /// `None` when the failure carried no `PipelineError`.
    Dropped(Option<PipelineErrorKind>),
}

pub struct FramePipeline<S: ResultSink> {
    normalizer: GeometricNormalizer,
    enhancer: ContrastEnhancer,
    normalization: NormalizationParams,
    gateway: InferenceGateway,
    sink: S,
    clock: Box<dyn Clock>,
    cadence: CadenceTracker,
    telemetry: TelemetryStubs,
    stage: Stage,
    stats: PipelineStats,
}

impl<S: ResultSink> FramePipeline<S> {
    pub fn new(settings: PipelineSettings, gateway: InferenceGateway, sink: S) -> Result<Self> {
        settings.normalization.validate()?;
        Ok(Self {
            normalizer: GeometricNormalizer::new(settings.target_width, settings.target_height)?,
            enhancer: ContrastEnhancer::new(settings.enhancement)?,
            normalization: settings.normalization,
            gateway,
            sink,
            clock: Box::new(MonotonicClock::new()),
            cadence: CadenceTracker::new(),
            telemetry: TelemetryStubs::default(),
            stage: Stage::Idle,
            stats: PipelineStats::default(),
        })
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryStubs) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Process one frame, counting and logging a failure instead of returning it.
    pub fn handle(&mut self, frame: RawFrame) -> FrameOutcome {
        let sequence = frame.sequence();
        match self.process(frame) {
            Ok(()) => FrameOutcome::Published,
            Err(err) => {
                let kind = PipelineError::kind_of(&err);
                self.stats.record_drop(kind);
                log::warn!("dropping frame {}: {:#}", sequence, err);
                FrameOutcome::Dropped(kind)
            }
        }
    }

    /// Process one frame and publish the result. The pipeline is back in
    /// `Idle` when this returns, whether it succeeded or not.
    pub fn process(&mut self, frame: RawFrame) -> Result<()> {
        let result = self.run_stages(&frame);
        self.stage = Stage::Idle;
        result
    }

    fn run_stages(&mut self, frame: &RawFrame) -> Result<()> {
        let started = Instant::now();
        let (width, height) = self.normalizer.target_size();

        self.stage = Stage::Normalizing;
        let rgb = self.normalizer.normalize(frame)?;

        self.stage = Stage::Enhancing;
        let rgb = self.enhancer.enhance(rgb);

        self.stage = Stage::Encoding;
        let input = tensor::encode(&rgb, &self.normalization);
        let prepared = started.elapsed();

        self.stage = Stage::Inferring;
        let inference_start = self.clock.now_ms();
        let output = self.gateway.run(input)?;
        let inference_ms = self.clock.now_ms().saturating_sub(inference_start);

        self.stage = Stage::Decoding;
        let (out_h, out_w) = output.planar_dims()?;
        if (out_w, out_h) != (width as usize, height as usize) {
            return Err(shape_mismatch(format!(
                "model returned {:?}, expected 3x{}x{}",
                output.shape(),
                height,
                width
            )));
        }
        let image = tensor::decode(&output, width, height)?;

        self.stage = Stage::Publishing;
        let frame_rate = self.cadence.record(self.clock.now_ms());
        let (location, hazard) = self.telemetry.sample();
        let result = PipelineResult {
            image,
            sequence: frame.sequence(),
            frame_rate,
            inference_ms,
            location,
            hazard,
            fps: format_fps(frame_rate, inference_ms),
            location_text: location.to_string(),
            warning: hazard.to_string(),
        };
        self.sink.publish(result);
        self.stats.published += 1;

        log::debug!(
            "frame {}: prepare {:?}, inference {} ms, total {:?}, age {} ms",
            frame.sequence(),
            prepared,
            inference_ms,
            started.elapsed(),
            frame.age_ms()
        );
        Ok(())
    }

    /// Drain `slot` until it is closed, handling each frame as it arrives.
    pub fn run(&mut self, slot: &LatestFrameSlot) -> Result<()> {
        log::info!(
            "pipeline worker started (backend {})",
            self.gateway.backend_name()
        );
        while let Some(frame) = slot.take()? {
            self.handle(frame);
        }
        log::info!(
            "pipeline worker stopped: {} published, {} dropped",
            self.stats.published,
            self.stats.dropped_total()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Rotation;
    use crate::infer::{IdentityBackend, InferenceBackend};
    use crate::telemetry::{HazardStub, LocationStub, ManualClock};
    use crate::tensor::Tensor;

    fn small_settings() -> PipelineSettings {
        PipelineSettings {
            target_width: 8,
            target_height: 8,
            ..PipelineSettings::default()
        }
    }

    fn night_frame(width: u32, height: u32, sequence: u64) -> RawFrame {
        let (cw, ch) = crate::frame::chroma_dimensions(width, height);
        let luma = (0..width * height).map(|i| (i % 40) as u8 + 5).collect();
        let chroma = vec![128u8; (cw * ch) as usize];
        RawFrame::new(width, height, luma, chroma.clone(), chroma, Rotation::Deg90)
            .with_sequence(sequence)
    }

    fn pipeline(
        gateway: InferenceGateway,
        clock: ManualClock,
    ) -> FramePipeline<Vec<PipelineResult>> {
        FramePipeline::new(small_settings(), gateway, Vec::new())
            .unwrap()
            .with_clock(clock)
            .with_telemetry(TelemetryStubs::new(
                LocationStub::default(),
                HazardStub::new(1.0),
                Some(1),
            ))
    }

    /// Returns a tensor of the right rank but the wrong spatial size.
    struct HalfSizeBackend;

    impl InferenceBackend for HalfSizeBackend {
        fn name(&self) -> &'static str {
            "half"
        }

        fn infer(&mut self, _input: &Tensor) -> Result<Tensor> {
            Tensor::new(vec![3, 4, 4], vec![0.5; 48])
        }
    }

    #[test]
    fn publishes_decoded_image_with_telemetry() {
        let clock = ManualClock::new(1000);
        let mut pipeline = pipeline(InferenceGateway::new(IdentityBackend::new()), clock.clone());

        assert_eq!(pipeline.handle(night_frame(16, 12, 1)), FrameOutcome::Published);
        clock.set(1050);
        assert_eq!(pipeline.handle(night_frame(16, 12, 2)), FrameOutcome::Published);
        assert_eq!(pipeline.stage(), Stage::Idle);

        let results = pipeline.sink();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].fps(), "FPS: -- Inference: 0ms");
        assert_eq!(results[1].fps(), "FPS: 20.00 Inference: 0ms");
        assert_eq!(results[1].sequence(), 2);
        assert_eq!(results[1].image().dimensions(), (8, 8));
        assert!(results[1].image().pixels().all(|p| p.0[3] == 255));
        assert_eq!(results[1].warning(), "OBJECT APPROACHING!!!");
        assert!(results[1].location().ends_with('N'));
        assert_eq!(pipeline.stats().published, 2);
    }

    #[test]
    fn malformed_frame_is_dropped_and_cadence_untouched() {
        let clock = ManualClock::new(1000);
        let mut pipeline = pipeline(InferenceGateway::new(IdentityBackend::new()), clock.clone());

        pipeline.handle(night_frame(16, 12, 1));
        clock.set(1040);
        let short = RawFrame::new(16, 12, vec![0; 10], vec![128; 48], vec![128; 48], Rotation::Deg0);
        assert_eq!(
            pipeline.handle(short),
            FrameOutcome::Dropped(Some(PipelineErrorKind::MalformedFrame))
        );
        assert_eq!(pipeline.stage(), Stage::Idle);

        clock.set(1100);
        pipeline.handle(night_frame(16, 12, 3));
        let results = pipeline.sink();
        assert_eq!(results.len(), 2);
        // Measured from the previous completion, not the failed frame.
        assert_eq!(results[1].frame_rate().map(|r| r.elapsed_ms), Some(100));
        assert_eq!(pipeline.stats().dropped_for(PipelineErrorKind::MalformedFrame), 1);
    }

    #[test]
    fn wrong_output_size_is_a_shape_mismatch() {
        let mut pipeline = pipeline(InferenceGateway::new(HalfSizeBackend), ManualClock::new(0));
        let err = pipeline.process(night_frame(16, 12, 1)).unwrap_err();
        assert_eq!(
            PipelineError::kind_of(&err),
            Some(PipelineErrorKind::ShapeMismatch)
        );
        assert_eq!(pipeline.stage(), Stage::Idle);
        assert!(pipeline.sink().is_empty());
    }

    /// Same number of values as the input, laid out as a wider, shorter image.
    struct TransposedBackend;

    impl InferenceBackend for TransposedBackend {
        fn name(&self) -> &'static str {
            "transposed"
        }

        fn infer(&mut self, input: &Tensor) -> Result<Tensor> {
            Tensor::new(vec![3, 4, 16], input.data().to_vec())
        }
    }

    #[test]
    fn same_length_but_different_layout_is_a_shape_mismatch() {
        let mut pipeline = pipeline(InferenceGateway::new(TransposedBackend), ManualClock::new(0));
        let err = pipeline.process(night_frame(16, 12, 1)).unwrap_err();
        assert_eq!(
            PipelineError::kind_of(&err),
            Some(PipelineErrorKind::ShapeMismatch)
        );
        assert!(pipeline.sink().is_empty());
    }

    #[test]
    fn run_drains_slot_until_closed() -> Result<()> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut pipeline = FramePipeline::new(
            small_settings(),
            InferenceGateway::new(IdentityBackend::new()),
            ChannelSink::new(tx),
        )?;
        let slot = LatestFrameSlot::new();
        slot.offer(night_frame(16, 12, 9))?;
        slot.close()?;
        pipeline.run(&slot)?;

        let result = rx.try_recv()?;
        assert_eq!(result.sequence(), 9);
        Ok(())
    }

    #[test]
    fn channel_sink_ignores_dropped_receiver() -> Result<()> {
        let (tx, rx) = std::sync::mpsc::channel();
        drop(rx);
        let mut pipeline = FramePipeline::new(
            small_settings(),
            InferenceGateway::new(IdentityBackend::new()),
            ChannelSink::new(tx),
        )?;
        assert_eq!(pipeline.handle(night_frame(16, 12, 1)), FrameOutcome::Published);
        Ok(())
    }
}
