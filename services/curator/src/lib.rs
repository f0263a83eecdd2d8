//! Egoclip Curator
//!
//! Turns long-form egocentric factory recordings into short, quality-filtered
//! clips for robot-learning datasets.
//!
//! ## Architecture
//!
//! ```text
//! Dataset hub / local mirror
//!        │ shard archives (tar: video + json per sample)
//!        ▼
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ Shard        │───▶│ Window       │───▶│ Quality      │───▶│ Clip         │
//! │ Source       │    │ Extractor    │    │ Filter       │    │ Store        │
//! └──────────────┘    └──────────────┘    └──────────────┘    └──────────────┘
//!   VideoRecord         Clip (T×H×W×3)      motion +            clip_XXXX.npy
//!   capped stream       sliding windows     hand visibility     clips_manifest.json
//! ```
//!
//! The [`pipeline::Pipeline`] drives one streaming pass. At most one video's
//! frames are decoded at a time per worker; only retained clips reach disk,
//! and the manifest is written once when the run completes.

pub mod archive;
pub mod clip_store;
pub mod config;
pub mod decoder;
pub mod detector;
pub mod fetcher;
pub mod manifest;
pub mod motion;
pub mod npy;
pub mod pipeline;
pub mod quality_filter;
pub mod record;
pub mod shard_source;
pub mod validate;
pub mod window_extractor;

pub use clip_store::{ClipStore, StoreError};
pub use config::CuratorConfig;
pub use decoder::{DecodeError, DecodedVideo, FfmpegDecoder, VideoDecoder};
pub use detector::{Detection, NullDetector, SkinToneDetector, SubjectDetector};
pub use fetcher::{FetchError, HubFetcher, LocalFetcher, ShardFetcher};
pub use manifest::{Manifest, ManifestEntry};
pub use pipeline::{Pipeline, PipelineError, RunSummary};
pub use quality_filter::{FilterDecision, FilterOutcome, QualityFilter, QualityPolicy, QualityScores};
pub use record::{Clip, SourceMetadata, VideoRecord};
pub use shard_source::{EmissionCounter, ShardSource};
pub use validate::{validate_dataset, DatasetReport, ValidationError};
pub use window_extractor::{WindowConfig, WindowExtractor};
