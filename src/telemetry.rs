//! Frame cadence and placeholder telemetry.
//!
//! `CadenceTracker` turns completion timestamps into an instantaneous frame
//! rate. `LocationStub` and `HazardStub` are placeholders: a jittered fixed
//! coordinate and a coin flip. Neither reads a sensor or runs a detector.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic millisecond clock.
pub trait Clock: Send {
    fn now_ms(&self) -> u64;
}

/// `Instant`-backed clock, counting from construction.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Frame rate derived from two consecutive completions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameRate {
    pub elapsed_ms: u64,
    pub fps: f64,
}

/// Last-completion timestamp. Owned by the pipeline worker.
#[derive(Clone, Debug, Default)]
pub struct CadenceTracker {
    last_completion_ms: Option<u64>,
}

impl CadenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed frame at `now_ms`.
    ///
    /// Returns `None` for the first frame, which has nothing to measure against.
    pub fn record(&mut self, now_ms: u64) -> Option<FrameRate> {
        let previous = self.last_completion_ms.replace(now_ms)?;
        let elapsed_ms = now_ms.saturating_sub(previous).max(1);
        Some(FrameRate {
            elapsed_ms,
            fps: 1000.0 / elapsed_ms as f64,
        })
    }

    pub fn last_completion_ms(&self) -> Option<u64> {
        self.last_completion_ms
    }
}

/// `FPS: 20.00 Inference: 37ms`; the first frame shows `FPS: --`.
pub fn format_fps(rate: Option<FrameRate>, inference_ms: u64) -> String {
    match rate {
        Some(rate) => format!("FPS: {:.2} Inference: {}ms", rate.fps, inference_ms),
        None => format!("FPS: -- Inference: {}ms", inference_ms),
    }
}

/// Placeholder coordinate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Location {
    pub longitude: f64,
    pub latitude: f64,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}E, {:.2}N", self.longitude, self.latitude)
    }
}

/// Fixed base coordinate plus `(k - 5) / 100` degrees per axis, `k` in 0..=10.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocationStub {
    pub base: Location,
}

/// Jitter steps on either side of the base coordinate.
const JITTER_STEPS: i32 = 5;
const JITTER_STEP_DEG: f64 = 0.01;

impl Default for LocationStub {
    fn default() -> Self {
        Self {
            base: Location {
                longitude: 120.0,
                latitude: 30.0,
            },
        }
    }
}

impl LocationStub {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Location {
        let mut jitter =
            || (rng.gen_range(0..=2 * JITTER_STEPS) - JITTER_STEPS) as f64 * JITTER_STEP_DEG;
        Location {
            longitude: self.base.longitude + jitter(),
            latitude: self.base.latitude + jitter(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HazardFlag {
    Hazard,
    Clear,
}

impl std::fmt::Display for HazardFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HazardFlag::Hazard => f.write_str("OBJECT APPROACHING!!!"),
            HazardFlag::Clear => f.write_str("No danger"),
        }
    }
}

/// Raises `Hazard` with a fixed probability.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HazardStub {
    probability: f64,
}

pub const DEFAULT_HAZARD_PROBABILITY: f64 = 0.3;

impl Default for HazardStub {
    fn default() -> Self {
        Self {
            probability: DEFAULT_HAZARD_PROBABILITY,
        }
    }
}

impl HazardStub {
    /// `probability` is clamped to `[0, 1]`.
    pub fn new(probability: f64) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        Self { probability }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> HazardFlag {
        if rng.gen_bool(self.probability) {
            HazardFlag::Hazard
        } else {
            HazardFlag::Clear
        }
    }
}

/// Both placeholders plus the random source they draw from.
pub struct TelemetryStubs {
    pub location: LocationStub,
    pub hazard: HazardStub,
    rng: StdRng,
}

impl TelemetryStubs {
    pub fn new(location: LocationStub, hazard: HazardStub, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            location,
            hazard,
            rng,
        }
    }

    pub fn sample(&mut self) -> (Location, HazardFlag) {
        let location = self.location.sample(&mut self.rng);
        let hazard = self.hazard.sample(&mut self.rng);
        (location, hazard)
    }
}

impl Default for TelemetryStubs {
    fn default() -> Self {
        Self::new(LocationStub::default(), HazardStub::default(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_from_consecutive_completions() {
        let mut cadence = CadenceTracker::new();
        assert_eq!(cadence.record(1000), None);
        let rate = cadence.record(1050).expect("second frame has a rate");
        assert_eq!(rate.elapsed_ms, 50);
        assert_eq!(format!("{:.2}", rate.fps), "20.00");
        assert_eq!(cadence.last_completion_ms(), Some(1050));
    }

    #[test]
    fn same_millisecond_counts_as_one() {
        let mut cadence = CadenceTracker::new();
        cadence.record(10);
        let rate = cadence.record(10).unwrap();
        assert_eq!(rate.elapsed_ms, 1);
        assert_eq!(rate.fps, 1000.0);
    }

    #[test]
    fn fps_text_suppresses_first_frame() {
        assert_eq!(format_fps(None, 42), "FPS: -- Inference: 42ms");
        let rate = FrameRate {
            elapsed_ms: 50,
            fps: 20.0,
        };
        assert_eq!(format_fps(Some(rate), 37), "FPS: 20.00 Inference: 37ms");
    }

    #[test]
    fn location_jitter_stays_in_range() {
        let stub = LocationStub::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let loc = stub.sample(&mut rng);
            assert!((loc.longitude - 120.0).abs() <= 0.05 + 1e-9);
            assert!((loc.latitude - 30.0).abs() <= 0.05 + 1e-9);
        }
    }

    #[test]
    fn location_text_uses_two_decimals() {
        let loc = Location {
            longitude: 119.97,
            latitude: 30.04,
        };
        assert_eq!(loc.to_string(), "119.97E, 30.04N");
    }

    #[test]
    fn hazard_rate_is_roughly_configured_probability() {
        let stub = HazardStub::default();
        let mut rng = StdRng::seed_from_u64(11);
        let hazards = (0..10_000)
            .filter(|_| stub.sample(&mut rng) == HazardFlag::Hazard)
            .count();
        assert!((2_500..=3_500).contains(&hazards), "hazards={}", hazards);
    }

    #[test]
    fn hazard_extremes_are_deterministic() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(HazardStub::new(0.0).sample(&mut rng), HazardFlag::Clear);
        assert_eq!(HazardStub::new(5.0).sample(&mut rng), HazardFlag::Hazard);
        assert_eq!(HazardFlag::Hazard.to_string(), "OBJECT APPROACHING!!!");
        assert_eq!(HazardFlag::Clear.to_string(), "No danger");
    }

    #[test]
    fn seeded_stubs_repeat() {
        let mut a = TelemetryStubs::new(LocationStub::default(), HazardStub::default(), Some(5));
        let mut b = TelemetryStubs::new(LocationStub::default(), HazardStub::default(), Some(5));
        for _ in 0..20 {
            assert_eq!(a.sample(), b.sample());
        }
    }

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new(1000);
        let other = clock.clone();
        clock.advance(50);
        assert_eq!(other.now_ms(), 1050);
        other.set(7);
        assert_eq!(clock.now_ms(), 7);
    }
}
