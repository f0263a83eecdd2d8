//! Structural checks on a produced dataset directory.
//!
//! Two layouts are recognized: an exported episode dataset carrying
//! `meta/info.json`, and a curated clip directory carrying
//! `clips_manifest.json`.

use crate::manifest::{resolve_frames_path, Manifest, ManifestError, MANIFEST_FILE_NAME};
use crate::npy;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors found while validating a dataset.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Dataset path does not exist: {0}")]
    NotFound(PathBuf),

    #[error("No metadata file found in {0}")]
    NoMetadata(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    InvalidJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("{clip_id}: tensor shape {found:?} does not match manifest shape {expected:?}")]
    TensorShape {
        clip_id: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// What a successful validation found.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetReport {
    Episodes {
        total_episodes: u64,
        total_frames: u64,
        fps: f64,
    },
    Clips {
        clips: usize,
        total_frames: usize,
    },
}

impl fmt::Display for DatasetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetReport::Episodes {
                total_episodes,
                total_frames,
                fps,
            } => {
                writeln!(f, "Valid episode dataset")?;
                writeln!(f, "  Episodes: {}", total_episodes)?;
                writeln!(f, "  Frames: {}", total_frames)?;
                write!(f, "  FPS: {}", fps)
            }
            DatasetReport::Clips {
                clips,
                total_frames,
            } => {
                writeln!(f, "Valid clip dataset")?;
                writeln!(f, "  Clips: {}", clips)?;
                write!(f, "  Frames: {}", total_frames)
            }
        }
    }
}

/// Validate the dataset rooted at `path`.
pub fn validate_dataset(path: &Path) -> Result<DatasetReport, ValidationError> {
    if !path.is_dir() {
        return Err(ValidationError::NotFound(path.to_path_buf()));
    }

    let info_path = path.join("meta").join("info.json");
    if info_path.is_file() {
        debug!(path = %info_path.display(), "Validating episode metadata");
        return validate_info(&info_path);
    }

    let manifest_path = path.join(MANIFEST_FILE_NAME);
    if manifest_path.is_file() {
        debug!(path = %manifest_path.display(), "Validating clip manifest");
        return validate_manifest(path, &manifest_path);
    }

    Err(ValidationError::NoMetadata(path.to_path_buf()))
}

fn validate_info(path: &Path) -> Result<DatasetReport, ValidationError> {
    let data = std::fs::read(path).map_err(|source| ValidationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_slice(&data).map_err(|source| {
        ValidationError::InvalidJson {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let Value::Object(info) = value else {
        return Err(invalid_field("info", "expected a JSON object"));
    };

    let total_episodes = info
        .get("total_episodes")
        .and_then(Value::as_u64)
        .ok_or_else(|| invalid_field("total_episodes", "missing or not a non-negative integer"))?;
    let total_frames = info
        .get("total_frames")
        .and_then(Value::as_u64)
        .ok_or_else(|| invalid_field("total_frames", "missing or not a non-negative integer"))?;
    let fps = info
        .get("fps")
        .and_then(Value::as_f64)
        .filter(|fps| *fps > 0.0)
        .ok_or_else(|| invalid_field("fps", "missing or not a positive number"))?;

    Ok(DatasetReport::Episodes {
        total_episodes,
        total_frames,
        fps,
    })
}

fn validate_manifest(dir: &Path, path: &Path) -> Result<DatasetReport, ValidationError> {
    let manifest = Manifest::load(path)?;
    manifest.verify(dir)?;

    let mut total_frames = 0usize;
    for entry in manifest.entries() {
        let frames_path = resolve_frames_path(dir, &entry.frames_path);

        let found = npy::read_shape(&frames_path).map_err(|source| ValidationError::Io {
            path: frames_path.clone(),
            source,
        })?;
        if found != entry.shape {
            return Err(ValidationError::TensorShape {
                clip_id: entry.clip_id.clone(),
                expected: entry.shape.clone(),
                found,
            });
        }
        total_frames += entry.num_frames;
    }

    Ok(DatasetReport::Clips {
        clips: manifest.len(),
        total_frames,
    })
}

fn invalid_field(field: &str, message: &str) -> ValidationError {
    ValidationError::InvalidField {
        field: field.to_string(),
        message: message.to_string(),
    }
}
