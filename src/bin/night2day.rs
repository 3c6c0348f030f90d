//! night2day - run the night-to-day pipeline over a frame source
//!
//! Frames are produced on one thread (raw I420 file replay or synthetic
//! `stub://` frames), handed to the pipeline worker through the latest-frame
//! slot, and results come back to the main thread over a channel where they
//! are logged, optionally printed as JSON lines and optionally written as PNG.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use night2day::{
    ChannelSink, FileConfig, FileSource, FramePipeline, HazardFlag, IdentityBackend,
    InferenceBackend, InferenceGateway, LatestFrameSlot, Night2DayConfig, PipelineResult,
    PipelineStats, Rotation,
};

/// Slot statistics are logged after this many results.
const STATS_EVERY: u64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// Pass the encoded tensor straight through.
    Identity,
    /// ONNX model via tract (requires the `backend-tract` feature).
    Tract,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML config file (overrides NIGHT2DAY_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Raw I420 file, or stub://<name> for synthetic low-light frames.
    #[arg(long, default_value = "stub://night")]
    input: String,
    /// Source frame width in pixels.
    #[arg(long, default_value_t = 480)]
    width: u32,
    /// Source frame height in pixels.
    #[arg(long, default_value_t = 640)]
    height: u32,
    /// Clockwise rotation needed to display the source upright (0, 90, 180, 270).
    #[arg(long, default_value_t = 90, allow_negative_numbers = true)]
    rotation: i32,
    /// Producer frame rate.
    #[arg(long, default_value_t = 15)]
    fps: u32,
    /// Stop after this many source frames.
    #[arg(long)]
    frames: Option<u64>,
    #[arg(long, value_enum, default_value_t = BackendKind::Identity)]
    backend: BackendKind,
    /// Directory for decoded PNG frames.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Write every Nth result when --out is set.
    #[arg(long, default_value_t = 1)]
    every: u64,
    /// Print telemetry as JSON lines on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct TelemetryLine<'a> {
    sequence: u64,
    fps: &'a str,
    inference_ms: u64,
    location: &'a str,
    warning: &'a str,
    hazard: bool,
    width: u32,
    height: u32,
}

/// Final `--json` line.
#[derive(Serialize)]
struct RunSummary<'a> {
    #[serde(flatten)]
    stats: &'a PipelineStats,
    /// Frames replaced in the slot before the worker took them.
    stale: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    if args.every == 0 {
        return Err(anyhow!("every must be >= 1"));
    }
    let rotation = Rotation::from_degrees(args.rotation)?;

    let cfg = match args.config.as_deref() {
        Some(path) => Night2DayConfig::load_from(Some(path))?,
        None => Night2DayConfig::load()?,
    };
    if let Some(dir) = &args.out {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output dir {}", dir.display()))?;
    }

    let mut gateway = build_gateway(&cfg, args.backend)?;
    gateway.warm_up()?;
    log::info!(
        "night2day {} backend={} input={}x{} timeout={:?}",
        env!("CARGO_PKG_VERSION"),
        gateway.backend_name(),
        cfg.input_width,
        cfg.input_height,
        gateway.timeout()
    );

    let (result_tx, result_rx) = mpsc::channel::<PipelineResult>();
    let pipeline = FramePipeline::new(cfg.pipeline_settings(), gateway, ChannelSink::new(result_tx))?
        .with_telemetry(cfg.telemetry_stubs());

    let source = FileSource::new(FileConfig {
        path: args.input.clone(),
        width: args.width,
        height: args.height,
        rotation,
        synthetic_frames: args.frames,
    })?;

    let slot = Arc::new(LatestFrameSlot::new());
    {
        let slot = Arc::clone(&slot);
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received, closing frame slot...");
            if let Err(e) = slot.close() {
                log::error!("failed to close frame slot: {:#}", e);
            }
        })
        .context("error setting Ctrl-C handler")?;
    }

    let producer = {
        let slot = Arc::clone(&slot);
        let interval = Duration::from_secs_f64(1.0 / args.fps as f64);
        let limit = args.frames;
        thread::Builder::new()
            .name("producer".to_string())
            .spawn(move || produce(source, &slot, interval, limit))?
    };

    let worker = {
        let slot = Arc::clone(&slot);
        thread::Builder::new()
            .name("pipeline".to_string())
            .spawn(move || -> Result<PipelineStats> {
                let mut pipeline = pipeline;
                pipeline.run(&slot)?;
                Ok(pipeline.stats().clone())
            })?
    };

    let mut received = 0u64;
    for result in result_rx {
        received += 1;
        report(&result, args.json)?;
        if let Some(dir) = &args.out {
            if should_write(received, args.every) {
                let path = dir.join(format!("frame_{:06}.png", result.sequence()));
                result
                    .image()
                    .save(&path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
        }
        if received % STATS_EVERY == 0 {
            let stats = slot.stats()?;
            log::info!(
                "{} results, slot offered={} dropped={}",
                received,
                stats.offered,
                stats.dropped
            );
        }
    }

    match producer.join() {
        Ok(Ok(frames)) => log::info!("producer finished after {} frames", frames),
        Ok(Err(e)) => log::error!("producer failed: {:#}", e),
        Err(_) => log::error!("producer thread panicked"),
    }
    let stats = worker
        .join()
        .map_err(|_| anyhow!("pipeline thread panicked"))??;
    let slot_stats = slot.stats()?;
    if args.json {
        let summary = RunSummary {
            stats: &stats,
            stale: slot_stats.dropped,
        };
        println!("{}", serde_json::to_string(&summary)?);
    }
    log::info!(
        "done: published={} dropped={:?} stale={}",
        stats.published,
        stats.dropped,
        slot_stats.dropped
    );
    Ok(())
}

/// `received` counts results from 1; the first result is always written.
fn should_write(received: u64, every: u64) -> bool {
    every > 0 && received.saturating_sub(1) % every == 0
}

fn build_gateway(cfg: &Night2DayConfig, kind: BackendKind) -> Result<InferenceGateway> {
    match kind {
        BackendKind::Identity => wrap_backend(IdentityBackend::new(), cfg.inference_timeout),
        BackendKind::Tract => wrap_backend(load_tract(cfg)?, cfg.inference_timeout),
    }
}

fn wrap_backend<B: InferenceBackend + 'static>(
    backend: B,
    timeout: Option<Duration>,
) -> Result<InferenceGateway> {
    match timeout {
        Some(timeout) => InferenceGateway::with_timeout(backend, timeout),
        None => Ok(InferenceGateway::new(backend)),
    }
}

#[cfg(feature = "backend-tract")]
fn load_tract(cfg: &Night2DayConfig) -> Result<night2day::TractBackend> {
    let staged = night2day::infer::stage_model(&cfg.model.packaged_path, &cfg.model.cache_dir)?;
    if let Some(expected) = &cfg.model.sha256 {
        night2day::infer::verify_model_digest(&staged.path, expected)?;
        log::info!("model digest verified");
    }
    night2day::TractBackend::new(&staged.path, cfg.input_width, cfg.input_height)
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(_cfg: &Night2DayConfig) -> Result<IdentityBackend> {
    Err(anyhow!(
        "tract backend requested but night2day was built without the backend-tract feature"
    ))
}

/// Feed frames into the slot at a fixed pace. Returns the number of frames offered.
fn produce(
    mut source: FileSource,
    slot: &LatestFrameSlot,
    interval: Duration,
    limit: Option<u64>,
) -> Result<u64> {
    let mut offered = 0u64;
    while limit.map_or(true, |limit| offered < limit) {
        if slot.is_closed()? {
            break;
        }
        let Some(frame) = source.next_frame()? else {
            break;
        };
        slot.offer(frame)?;
        offered += 1;
        thread::sleep(interval);
    }
    slot.close()?;
    let stats = source.stats();
    log::debug!("source {} read {} frames", stats.path, stats.frames_read);
    Ok(offered)
}

fn report(result: &PipelineResult, json: bool) -> Result<()> {
    if json {
        let (width, height) = result.image().dimensions();
        let line = TelemetryLine {
            sequence: result.sequence(),
            fps: result.fps(),
            inference_ms: result.inference_ms(),
            location: result.location(),
            warning: result.warning(),
            hazard: result.hazard() == HazardFlag::Hazard,
            width,
            height,
        };
        println!("{}", serde_json::to_string(&line)?);
    } else {
        log::info!(
            "frame {}: {} | {} | {}",
            result.sequence(),
            result.fps(),
            result.location(),
            result.warning()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_nth_result_is_written_regardless_of_sequence_gaps() {
        let written: Vec<u64> = (1..=7).filter(|&n| should_write(n, 2)).collect();
        assert_eq!(written, vec![1, 3, 5, 7]);
        assert!((1..=5).all(|n| should_write(n, 1)));
        assert!(!should_write(1, 0));
    }

    #[test]
    fn summary_line_carries_pipeline_stats() {
        let mut stats = PipelineStats::default();
        stats.published = 4;
        stats.dropped.insert("malformed_frame", 1);
        let line = serde_json::to_value(RunSummary {
            stats: &stats,
            stale: 2,
        })
        .unwrap();
        assert_eq!(line["published"], 4);
        assert_eq!(line["dropped"]["malformed_frame"], 1);
        assert_eq!(line["stale"], 2);
    }
}
