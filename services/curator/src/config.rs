//! Configuration management for the clip curation pipeline.
//!
//! Configuration is layered with the `config` crate: the run file named on
//! the command line, then `CURATOR_`-prefixed environment variables, then
//! explicit CLI overrides.

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a curation run.
#[derive(Debug, Clone, Deserialize)]
pub struct CuratorConfig {
    /// Shard source configuration
    pub data: DataConfig,

    /// Windowing and filter thresholds
    #[serde(default)]
    pub clips: ClipsConfig,

    /// Decode and downsampling configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Curated store configuration
    pub output: OutputConfig,

    /// Subject detector configuration
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the raw recordings come from.
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Dataset repository identifier on the hub
    pub dataset_name: String,

    /// Cap on the number of videos the shard source emits
    #[serde(default = "default_max_videos")]
    pub max_videos: u32,

    /// Ordered shard paths inside the dataset
    #[serde(default = "default_shards")]
    pub shards: Vec<String>,

    /// Local staging directory for downloaded shards
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Hub base URL
    #[serde(default = "default_hub_endpoint")]
    pub hub_endpoint: String,

    /// Dataset revision (branch, tag or commit)
    #[serde(default = "default_revision")]
    pub revision: String,

    /// Read shards from this directory instead of the hub
    #[serde(default)]
    pub local_root: Option<PathBuf>,

    /// Per-attempt timeout for a shard download in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Attempts per shard before it is skipped
    #[serde(default = "default_max_fetch_attempts")]
    pub max_fetch_attempts: u32,

    /// Base delay between download attempts in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Maximum delay between download attempts in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

/// Windowing parameters and quality thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct ClipsConfig {
    /// Clip length in seconds
    #[serde(default = "default_target_duration")]
    pub target_duration: f64,

    /// Offset between consecutive window starts in seconds
    #[serde(default = "default_stride")]
    pub stride: f64,

    /// Minimum motion score in [0, 1]
    #[serde(default = "default_min_motion_score")]
    pub min_motion_score: f64,

    /// Minimum hand visibility score in [0, 1]
    #[serde(default = "default_min_hand_visibility")]
    pub min_hand_visibility: f64,
}

/// Decode and downsampling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Temporal subsampling target
    #[serde(default = "default_target_fps")]
    pub target_fps: f64,

    /// Spatial resize target as [height, width]
    #[serde(default = "default_target_resolution")]
    pub target_resolution: [u32; 2],

    /// Videos decoded and scored concurrently
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// ffmpeg executable
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// ffprobe executable
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

/// Curated store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Root directory for clip tensors and the manifest
    pub local_dir: PathBuf,
}

/// Subject detector configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Detector implementation (skin, none)
    #[serde(default = "default_detector_kind")]
    pub kind: String,

    /// Fraction of skin pixels that counts as a visible hand
    #[serde(default = "default_min_skin_fraction")]
    pub min_skin_fraction: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_max_videos() -> u32 {
    3
}
fn default_shards() -> Vec<String> {
    (1..=3)
        .map(|n| {
            format!(
                "factory_001/workers/worker_{n:03}/factory001_worker{n:03}_part00.tar"
            )
        })
        .collect()
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/cache")
}
fn default_hub_endpoint() -> String {
    "https://huggingface.co".to_string()
}
fn default_revision() -> String {
    "main".to_string()
}
fn default_fetch_timeout() -> u64 {
    300
}
fn default_max_fetch_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_retry_max_delay_ms() -> u64 {
    30000
}
fn default_target_duration() -> f64 {
    10.0
}
fn default_stride() -> f64 {
    5.0
}
fn default_min_motion_score() -> f64 {
    0.02
}
fn default_min_hand_visibility() -> f64 {
    0.3
}
fn default_target_fps() -> f64 {
    10.0
}
fn default_target_resolution() -> [u32; 2] {
    [360, 640]
}
fn default_num_workers() -> usize {
    1
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}
fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}
fn default_detector_kind() -> String {
    "skin".to_string()
}
fn default_min_skin_fraction() -> f64 {
    0.02
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ClipsConfig {
    fn default() -> Self {
        Self {
            target_duration: default_target_duration(),
            stride: default_stride(),
            min_motion_score: default_min_motion_score(),
            min_hand_visibility: default_min_hand_visibility(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            target_resolution: default_target_resolution(),
            num_workers: default_num_workers(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            kind: default_detector_kind(),
            min_skin_fraction: default_min_skin_fraction(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl CuratorConfig {
    /// Load configuration from a run file and environment variables.
    ///
    /// Sources are applied in this order (later sources override earlier):
    /// 1. The run file at `path` (format inferred from the extension)
    /// 2. Environment variables (e.g. `CURATOR_CLIPS__STRIDE=2`)
    /// 3. `max_videos`, when given
    pub fn load(path: &Path, max_videos: Option<u32>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix("CURATOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(max_videos) = max_videos {
            builder = builder.set_override("data.max_videos", i64::from(max_videos))?;
        }

        builder.build()?.try_deserialize()
    }

    /// Parse configuration from an in-memory YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.data.dataset_name.trim().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "data.dataset_name".to_string(),
            ));
        }

        if self.data.max_videos == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "data.max_videos".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.data.shards.is_empty() {
            return Err(ConfigValidationError::MissingField("data.shards".to_string()));
        }

        if self.output.local_dir.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "output.local_dir".to_string(),
            ));
        }

        for (field, value) in [
            ("clips.target_duration", self.clips.target_duration),
            ("clips.stride", self.clips.stride),
            ("processing.target_fps", self.processing.target_fps),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigValidationError::InvalidValue {
                    field: field.to_string(),
                    message: "must be greater than 0".to_string(),
                });
            }
        }

        for (field, value) in [
            ("clips.min_motion_score", self.clips.min_motion_score),
            ("clips.min_hand_visibility", self.clips.min_hand_visibility),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigValidationError::InvalidValue {
                    field: field.to_string(),
                    message: "threshold must lie in [0, 1]".to_string(),
                });
            }
        }

        if self.processing.target_resolution.contains(&0) {
            return Err(ConfigValidationError::InvalidValue {
                field: "processing.target_resolution".to_string(),
                message: "dimensions must be greater than 0".to_string(),
            });
        }

        if self.processing.num_workers == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "processing.num_workers".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if !matches!(self.detector.kind.as_str(), "skin" | "none") {
            return Err(ConfigValidationError::InvalidValue {
                field: "detector.kind".to_string(),
                message: format!("unknown detector '{}'", self.detector.kind),
            });
        }

        if !(self.detector.min_skin_fraction > 0.0 && self.detector.min_skin_fraction <= 1.0) {
            return Err(ConfigValidationError::InvalidValue {
                field: "detector.min_skin_fraction".to_string(),
                message: "must lie in (0, 1]".to_string(),
            });
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigValidationError::InvalidValue {
                field: "logging.format".to_string(),
                message: format!("unknown format '{}'", self.logging.format),
            });
        }

        Ok(())
    }
}

impl DataConfig {
    /// Get the per-attempt download timeout as Duration.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Get base retry delay as Duration.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Get maximum retry delay as Duration.
    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

impl ProcessingConfig {
    pub fn target_height(&self) -> u32 {
        self.target_resolution[0]
    }

    pub fn target_width(&self) -> u32 {
        self.target_resolution[1]
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
