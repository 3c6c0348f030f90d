use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::enhance::{EnhancementParams, DEFAULT_CLIP_LIMIT};
use crate::geometry::{MODEL_INPUT_HEIGHT, MODEL_INPUT_WIDTH};
use crate::pipeline::PipelineSettings;
use crate::telemetry::{
    HazardStub, Location, LocationStub, TelemetryStubs, DEFAULT_HAZARD_PROBABILITY,
};
use crate::tensor::NormalizationParams;

const DEFAULT_MODEL_PATH: &str = "assets/night2day.onnx";
const DEFAULT_MODEL_CACHE_DIR: &str = ".night2day";
const DEFAULT_BASE_LONGITUDE: f64 = 120.0;
const DEFAULT_BASE_LATITUDE: f64 = 30.0;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct Night2DayConfigFile {
    model: Option<ModelConfigFile>,
    input: Option<InputConfigFile>,
    normalization: Option<NormalizationConfigFile>,
    enhancement: Option<EnhancementConfigFile>,
    inference: Option<InferenceConfigFile>,
    telemetry: Option<TelemetryConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    packaged_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    sha256: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct InputConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct NormalizationConfigFile {
    mean: Option<[f32; 3]>,
    std: Option<[f32; 3]>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EnhancementConfigFile {
    clip_limit: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct InferenceConfigFile {
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TelemetryConfigFile {
    base_longitude: Option<f64>,
    base_latitude: Option<f64>,
    hazard_probability: Option<f64>,
    seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Night2DayConfig {
    pub model: ModelSettings,
    pub input_width: u32,
    pub input_height: u32,
    pub normalization: NormalizationParams,
    pub clip_limit: f32,
    /// `None` lets an inference call block indefinitely.
    pub inference_timeout: Option<Duration>,
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub packaged_path: PathBuf,
    pub cache_dir: PathBuf,
    /// Lowercase hex SHA-256 the staged model must hash to.
    pub sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub base_longitude: f64,
    pub base_latitude: f64,
    pub hazard_probability: f64,
    pub seed: Option<u64>,
}

impl Night2DayConfig {
    /// File named by `NIGHT2DAY_CONFIG` (if any), then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("NIGHT2DAY_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit config file instead of `NIGHT2DAY_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse TOML and fill defaults. Environment overrides are not applied.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: Night2DayConfigFile =
            toml::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let mut cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: Night2DayConfigFile) -> Self {
        let model_file = file.model.unwrap_or_default();
        let model = ModelSettings {
            packaged_path: model_file
                .packaged_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            cache_dir: model_file
                .cache_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_CACHE_DIR)),
            sha256: model_file.sha256,
        };
        let input = file.input.unwrap_or_default();
        let defaults = NormalizationParams::default();
        let normalization = file
            .normalization
            .map(|n| NormalizationParams {
                mean: n.mean.unwrap_or(defaults.mean),
                std: n.std.unwrap_or(defaults.std),
            })
            .unwrap_or(defaults);
        let telemetry_file = file.telemetry.unwrap_or_default();
        let telemetry = TelemetrySettings {
            base_longitude: telemetry_file
                .base_longitude
                .unwrap_or(DEFAULT_BASE_LONGITUDE),
            base_latitude: telemetry_file
                .base_latitude
                .unwrap_or(DEFAULT_BASE_LATITUDE),
            hazard_probability: telemetry_file
                .hazard_probability
                .unwrap_or(DEFAULT_HAZARD_PROBABILITY),
            seed: telemetry_file.seed,
        };
        Self {
            model,
            input_width: input.width.unwrap_or(MODEL_INPUT_WIDTH),
            input_height: input.height.unwrap_or(MODEL_INPUT_HEIGHT),
            normalization,
            clip_limit: file
                .enhancement
                .and_then(|e| e.clip_limit)
                .unwrap_or(DEFAULT_CLIP_LIMIT),
            inference_timeout: file
                .inference
                .and_then(|i| i.timeout_ms)
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            telemetry,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("NIGHT2DAY_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model.packaged_path = PathBuf::from(path);
            }
        }
        if let Ok(dir) = std::env::var("NIGHT2DAY_MODEL_CACHE_DIR") {
            if !dir.trim().is_empty() {
                self.model.cache_dir = PathBuf::from(dir);
            }
        }
        if let Ok(digest) = std::env::var("NIGHT2DAY_MODEL_SHA256") {
            if !digest.trim().is_empty() {
                self.model.sha256 = Some(digest);
            }
        }
        if let Ok(clip) = std::env::var("NIGHT2DAY_CLIP_LIMIT") {
            if !clip.trim().is_empty() {
                self.clip_limit = clip
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("NIGHT2DAY_CLIP_LIMIT must be a number"))?;
            }
        }
        if let Ok(timeout) = std::env::var("NIGHT2DAY_INFERENCE_TIMEOUT_MS") {
            if !timeout.trim().is_empty() {
                let ms: u64 = timeout.trim().parse().map_err(|_| {
                    anyhow!("NIGHT2DAY_INFERENCE_TIMEOUT_MS must be an integer number of milliseconds")
                })?;
                self.inference_timeout = (ms > 0).then(|| Duration::from_millis(ms));
            }
        }
        if let Ok(seed) = std::env::var("NIGHT2DAY_TELEMETRY_SEED") {
            if !seed.trim().is_empty() {
                let seed: u64 = seed
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("NIGHT2DAY_TELEMETRY_SEED must be an unsigned integer"))?;
                self.telemetry.seed = Some(seed);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.input_width == 0 || self.input_height == 0 {
            return Err(anyhow!(
                "input size {}x{} must be non-zero",
                self.input_width,
                self.input_height
            ));
        }
        self.normalization.validate()?;
        if !self.clip_limit.is_finite() {
            return Err(anyhow!("enhancement clip_limit must be finite"));
        }
        let p = self.telemetry.hazard_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(anyhow!(
                "telemetry hazard_probability must be within [0, 1], got {}",
                p
            ));
        }
        if !self.telemetry.base_longitude.is_finite() || !self.telemetry.base_latitude.is_finite()
        {
            return Err(anyhow!("telemetry base coordinate must be finite"));
        }
        if let Some(digest) = self.model.sha256.as_mut() {
            let trimmed = digest.trim().to_ascii_lowercase();
            if trimmed.len() != 64 || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(anyhow!("model sha256 must be 64 hex characters"));
            }
            *digest = trimmed;
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            target_width: self.input_width,
            target_height: self.input_height,
            normalization: self.normalization,
            enhancement: EnhancementParams {
                clip_limit: self.clip_limit,
                ..EnhancementParams::default()
            },
        }
    }

    pub fn telemetry_stubs(&self) -> TelemetryStubs {
        TelemetryStubs::new(
            LocationStub {
                base: Location {
                    longitude: self.telemetry.base_longitude,
                    latitude: self.telemetry.base_latitude,
                },
            },
            HazardStub::new(self.telemetry.hazard_probability),
            self.telemetry.seed,
        )
    }
}

fn read_config_file(path: &Path) -> Result<Night2DayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() -> Result<()> {
        let cfg = Night2DayConfig::from_toml_str("")?;
        assert_eq!(cfg.model.packaged_path, PathBuf::from(DEFAULT_MODEL_PATH));
        assert_eq!(cfg.model.cache_dir, PathBuf::from(DEFAULT_MODEL_CACHE_DIR));
        assert_eq!((cfg.input_width, cfg.input_height), (240, 240));
        assert_eq!(cfg.clip_limit, 2.0);
        assert_eq!(cfg.inference_timeout, None);
        assert_eq!(cfg.telemetry.hazard_probability, 0.3);
        assert_eq!(cfg.pipeline_settings(), PipelineSettings::default());
        Ok(())
    }

    #[test]
    fn sections_override_defaults() -> Result<()> {
        let cfg = Night2DayConfig::from_toml_str(
            r#"
            [model]
            sha256 = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"

            [normalization]
            mean = [0.5, 0.25, 0.125]

            [inference]
            timeout_ms = 250

            [telemetry]
            hazard_probability = 0.0
            seed = 9
            "#,
        )?;
        assert_eq!(
            cfg.model.sha256.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(cfg.normalization.mean, [0.5, 0.25, 0.125]);
        assert_eq!(cfg.normalization.std, [1.0; 3]);
        assert_eq!(cfg.inference_timeout, Some(Duration::from_millis(250)));
        assert_eq!(cfg.telemetry.seed, Some(9));
        Ok(())
    }

    #[test]
    fn zero_timeout_means_none() -> Result<()> {
        let cfg = Night2DayConfig::from_toml_str("[inference]\ntimeout_ms = 0\n")?;
        assert_eq!(cfg.inference_timeout, None);
        Ok(())
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(Night2DayConfig::from_toml_str("[input]\nwidth = 0\n").is_err());
        assert!(Night2DayConfig::from_toml_str("[normalization]\nstd = [1.0, 0.0, 1.0]\n").is_err());
        assert!(Night2DayConfig::from_toml_str("[telemetry]\nhazard_probability = 1.5\n").is_err());
        assert!(Night2DayConfig::from_toml_str("[model]\nsha256 = \"abc\"\n").is_err());
        assert!(Night2DayConfig::from_toml_str("[unknown]\nkey = 1\n").is_err());
    }
}
