//! Curated clip persistence.
//!
//! Each retained clip becomes one `.npy` tensor under the output directory.
//! Manifest entries accumulate in memory and the manifest is written once,
//! when the run finishes.

use crate::manifest::{Manifest, ManifestEntry, ManifestError, MANIFEST_FILE_NAME};
use crate::npy;
use crate::record::{Clip, SourceMetadata};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors persisting clips. All of them abort the run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    WriteFrames {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove stale manifest {path}: {source}")]
    ClearManifest {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Clip has no frames")]
    EmptyClip,

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
}

/// Clip identifier for the n-th persisted clip.
pub fn clip_id(index: usize) -> String {
    format!("clip_{:04}", index)
}

/// Metadata recorded when a clip carries none.
pub fn sentinel_metadata() -> SourceMetadata {
    let mut metadata = SourceMetadata::new();
    metadata.insert("factory_id".to_string(), "unknown".into());
    metadata.insert("worker_id".to_string(), "unknown".into());
    metadata
}

/// Writes clip tensors and collects the manifest.
pub struct ClipStore {
    output_dir: PathBuf,
    manifest: Manifest,
}

impl ClipStore {
    /// Open a store rooted at `output_dir`, creating it if absent.
    ///
    /// A manifest left by an earlier run is removed before any tensor is
    /// overwritten, so the directory only carries a manifest once `finish`
    /// succeeds.
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir).map_err(|source| StoreError::CreateDir {
            path: output_dir.clone(),
            source,
        })?;

        let manifest_path = output_dir.join(MANIFEST_FILE_NAME);
        let tmp_path = output_dir.join(format!("{}.tmp", MANIFEST_FILE_NAME));
        for path in [manifest_path, tmp_path] {
            remove_if_present(&path)?;
        }

        Ok(Self {
            output_dir,
            manifest: Manifest::new(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(MANIFEST_FILE_NAME)
    }

    /// Clips persisted so far.
    pub fn len(&self) -> usize {
        self.manifest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.is_empty()
    }

    /// Write one clip's tensor and record its manifest entry.
    ///
    /// The clip is consumed; its frames are released once written.
    pub fn persist(&mut self, clip: Clip) -> Result<&ManifestEntry, StoreError> {
        if clip.frames.is_empty() {
            return Err(StoreError::EmptyClip);
        }

        let clip_id = clip_id(self.manifest.len());
        let frames_path = self.output_dir.join(format!("{}.npy", clip_id));
        let shape = clip.shape();

        npy::write_u8(&frames_path, &shape, &clip.tensor_bytes()).map_err(|source| {
            StoreError::WriteFrames {
                path: frames_path.clone(),
                source,
            }
        })?;

        let source_metadata = if clip.source_metadata.is_empty() {
            sentinel_metadata()
        } else {
            clip.source_metadata
        };

        debug!(clip_id = %clip_id, path = %frames_path.display(), "Clip persisted");

        self.manifest.push(ManifestEntry {
            clip_id,
            start_time: clip.start_time,
            duration: clip.duration,
            source_metadata,
            quality_scores: clip.quality_scores.unwrap_or_default(),
            frames_path,
            num_frames: shape[0],
            shape: shape.to_vec(),
        });

        let entries = self.manifest.entries();
        Ok(&entries[entries.len() - 1])
    }

    /// Write the manifest and return its path.
    pub fn finish(self) -> Result<PathBuf, StoreError> {
        let path = self.manifest_path();
        self.manifest.write_atomic(&path)?;

        info!(
            clips = self.manifest.len(),
            output_dir = %self.output_dir.display(),
            manifest = %path.display(),
            "Manifest written"
        );
        Ok(path)
    }
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "Removed manifest from previous run");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StoreError::ClearManifest {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ScoreMap;
    use image::{Rgb, RgbImage};

    fn create_test_clip(frames: usize, metadata: SourceMetadata) -> Clip {
        let frames = (0..frames)
            .map(|i| RgbImage::from_pixel(4, 2, Rgb([i as u8, 0, 0])))
            .collect();
        let mut clip = Clip::new(frames, 4.0, 5.0, metadata);
        let mut scores = ScoreMap::new();
        scores.insert("motion".to_string(), 0.1);
        scores.insert("hand_visibility".to_string(), 0.75);
        clip.quality_scores = Some(scores);
        clip
    }

    #[test]
    fn test_clip_id_format() {
        assert_eq!(clip_id(0), "clip_0000");
        assert_eq!(clip_id(42), "clip_0042");
        assert_eq!(clip_id(9999), "clip_9999");
        assert_eq!(clip_id(10000), "clip_10000");
    }

    #[test]
    fn test_persist_and_finish() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("nested/clips");
        let mut store = ClipStore::new(&output).unwrap();

        let mut metadata = SourceMetadata::new();
        metadata.insert("worker_id".to_string(), "worker_007".into());

        store.persist(create_test_clip(12, metadata)).unwrap();
        let second = store.persist(create_test_clip(10, SourceMetadata::new())).unwrap();
        assert_eq!(second.clip_id, "clip_0001");
        assert_eq!(second.source_metadata, sentinel_metadata());

        let manifest_path = store.finish().unwrap();
        assert_eq!(manifest_path, output.join("clips_manifest.json"));

        let manifest = Manifest::load(&manifest_path).unwrap();
        assert_eq!(manifest.len(), 2);

        let first = &manifest.entries()[0];
        assert_eq!(first.clip_id, "clip_0000");
        assert_eq!(first.frames_path, output.join("clip_0000.npy"));
        assert_eq!(first.num_frames, 12);
        assert_eq!(first.shape, vec![12, 2, 4, 3]);
        assert_eq!(first.start_time, 4.0);
        assert_eq!(first.quality_scores["hand_visibility"], 0.75);
        assert_eq!(first.source_metadata["worker_id"], "worker_007");

        assert_eq!(npy::read_shape(&first.frames_path).unwrap(), vec![12, 2, 4, 3]);
        manifest.verify(&output).unwrap();
    }

    #[test]
    fn test_empty_run_writes_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClipStore::new(dir.path()).unwrap();
        let path = store.finish().unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.trim(), "[]");
    }

    #[test]
    fn test_aborted_rerun_leaves_no_manifest() {
        let dir = tempfile::tempdir().unwrap();

        let mut first = ClipStore::new(dir.path()).unwrap();
        first.persist(create_test_clip(10, SourceMetadata::new())).unwrap();
        let manifest_path = first.finish().unwrap();
        assert!(manifest_path.is_file());

        std::fs::write(dir.path().join("clips_manifest.json.tmp"), "[").unwrap();

        let mut second = ClipStore::new(dir.path()).unwrap();
        assert!(!manifest_path.exists());
        assert!(!dir.path().join("clips_manifest.json.tmp").exists());

        second.persist(create_test_clip(20, SourceMetadata::new())).unwrap();
        drop(second);

        assert!(!manifest_path.exists());
        assert_eq!(
            npy::read_shape(&dir.path().join("clip_0000.npy")).unwrap(),
            vec![20, 2, 4, 3]
        );
    }

    #[test]
    fn test_empty_clip_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ClipStore::new(dir.path()).unwrap();
        let clip = Clip::new(vec![], 0.0, 5.0, SourceMetadata::new());
        assert!(matches!(store.persist(clip), Err(StoreError::EmptyClip)));
    }

    #[test]
    fn test_unwritable_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a dir").unwrap();

        assert!(matches!(
            ClipStore::new(blocker.join("clips")),
            Err(StoreError::CreateDir { .. })
        ));
    }
}
