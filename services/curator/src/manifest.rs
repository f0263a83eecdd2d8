//! The clip manifest: authoritative index of a curated output directory.

use crate::record::{ScoreMap, SourceMetadata};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_FILE_NAME: &str = "clips_manifest.json";

/// Errors reading, writing or checking a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Manifest serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{clip_id}: frames file missing at {path}")]
    MissingFrames { clip_id: String, path: PathBuf },

    #[error("{clip_id}: num_frames {num_frames} does not match shape {shape:?}")]
    ShapeMismatch {
        clip_id: String,
        num_frames: usize,
        shape: Vec<usize>,
    },

    #[error("Duplicate clip id {0}")]
    DuplicateClipId(String),
}

/// One persisted clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub clip_id: String,
    pub start_time: f64,
    pub duration: f64,
    pub source_metadata: SourceMetadata,
    #[serde(default)]
    pub quality_scores: ScoreMap,
    pub frames_path: PathBuf,
    pub num_frames: usize,
    pub shape: Vec<usize>,
}

/// Ordered manifest entries, serialized as a JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ManifestEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let data = std::fs::read(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the whole manifest to `path`, replacing any previous file.
    ///
    /// The document goes to a sibling `.tmp` file first and is renamed into
    /// place, so readers never observe a partial manifest.
    pub fn write_atomic(&self, path: &Path) -> Result<(), ManifestError> {
        let json = serde_json::to_vec_pretty(self)?;

        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);

        let io_err = |source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        };
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)
    }

    /// Check that every entry is backed by a frames file and is
    /// self-consistent.
    ///
    /// Relative `frames_path` values are resolved against `base_dir`.
    pub fn verify(&self, base_dir: &Path) -> Result<(), ManifestError> {
        let mut seen = std::collections::HashSet::new();

        for entry in &self.entries {
            if !seen.insert(entry.clip_id.as_str()) {
                return Err(ManifestError::DuplicateClipId(entry.clip_id.clone()));
            }

            if entry.shape.first() != Some(&entry.num_frames) {
                return Err(ManifestError::ShapeMismatch {
                    clip_id: entry.clip_id.clone(),
                    num_frames: entry.num_frames,
                    shape: entry.shape.clone(),
                });
            }

            let path = resolve_frames_path(base_dir, &entry.frames_path);
            if !path.is_file() {
                return Err(ManifestError::MissingFrames {
                    clip_id: entry.clip_id.clone(),
                    path,
                });
            }
        }

        Ok(())
    }
}

/// Locate a frames file that may have been recorded relative to the working
/// directory of the run.
pub(crate) fn resolve_frames_path(base_dir: &Path, frames_path: &Path) -> PathBuf {
    if frames_path.is_absolute() || frames_path.exists() {
        return frames_path.to_path_buf();
    }
    match frames_path.file_name() {
        Some(name) => base_dir.join(name),
        None => frames_path.to_path_buf(),
    }
}
