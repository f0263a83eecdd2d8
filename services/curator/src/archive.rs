//! Paired-member index over a tar shard.
//!
//! A shard stores each logical sample as sibling members sharing a base name
//! (`clip_007.mp4` + `clip_007.json`). Opening a shard scans member headers
//! once and records byte spans, so payloads are read one sample at a time.

use crate::record::SourceMetadata;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Extensions recognized as the video half of a sample.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov", "avi"];

/// Extension of the metadata half of a sample.
pub const METADATA_EXTENSION: &str = "json";

/// Errors opening or indexing a shard archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to open archive {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("Corrupt archive {path}: {source}")]
    Corrupt { path: PathBuf, source: io::Error },
}

/// Errors reading a single sample out of an indexed archive.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("Failed to read member of {sample}: {source}")]
    Read { sample: String, source: io::Error },

    #[error("Invalid metadata for {sample}: {message}")]
    InvalidMetadata { sample: String, message: String },
}

/// Byte span of one member's payload inside the archive file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberSpan {
    pub offset: u64,
    pub size: u64,
}

/// A complete video + metadata pair.
#[derive(Debug, Clone)]
pub struct SamplePair {
    pub name: String,
    pub video: MemberSpan,
    pub metadata: MemberSpan,
}

/// Index of complete samples in one shard, in first-seen order.
#[derive(Debug)]
pub struct ShardArchive {
    path: PathBuf,
    samples: Vec<SamplePair>,
    incomplete: usize,
}

#[derive(Default)]
struct PartialSample {
    video: Option<MemberSpan>,
    metadata: Option<MemberSpan>,
}

impl ShardArchive {
    /// Scan the archive headers and pair members by base name.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path).map_err(|source| ArchiveError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let corrupt = |source| ArchiveError::Corrupt {
            path: path.to_path_buf(),
            source,
        };

        let mut archive = tar::Archive::new(file);
        let mut order: Vec<String> = Vec::new();
        let mut partial: HashMap<String, PartialSample> = HashMap::new();

        for entry in archive.entries().map_err(corrupt)? {
            let entry = entry.map_err(corrupt)?;
            if !entry.header().entry_type().is_file() {
                continue;
            }

            let member_path = entry.path().map_err(corrupt)?.to_string_lossy().into_owned();
            let Some((base, ext)) = split_member_name(&member_path) else {
                continue;
            };

            let span = MemberSpan {
                offset: entry.raw_file_position(),
                size: entry.size(),
            };

            let sample = partial.entry(base.to_string()).or_insert_with(|| {
                order.push(base.to_string());
                PartialSample::default()
            });

            if ext == METADATA_EXTENSION {
                sample.metadata = Some(span);
            } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
                sample.video = Some(span);
            }
        }

        let mut samples = Vec::new();
        let mut incomplete = 0usize;
        for name in order {
            match partial.remove(&name) {
                Some(PartialSample {
                    video: Some(video),
                    metadata: Some(metadata),
                }) => samples.push(SamplePair {
                    name,
                    video,
                    metadata,
                }),
                Some(PartialSample {
                    video: None,
                    metadata: None,
                })
                | None => {}
                _ => incomplete += 1,
            }
        }

        debug!(
            path = %path.display(),
            samples = samples.len(),
            incomplete = incomplete,
            "Indexed shard archive"
        );

        Ok(Self {
            path: path.to_path_buf(),
            samples,
            incomplete,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Complete samples in first-seen order.
    pub fn samples(&self) -> &[SamplePair] {
        &self.samples
    }

    /// Base names that lacked either a video or a metadata member.
    pub fn incomplete(&self) -> usize {
        self.incomplete
    }

    /// Read one member payload.
    pub fn read_member(&self, span: MemberSpan) -> io::Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(span.offset))?;

        let mut buf = Vec::with_capacity(span.size as usize);
        file.take(span.size).read_to_end(&mut buf)?;
        if (buf.len() as u64) < span.size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive member truncated",
            ));
        }
        Ok(buf)
    }

    /// Read and decode both halves of a sample.
    pub fn read_sample(&self, pair: &SamplePair) -> Result<(Vec<u8>, SourceMetadata), SampleError> {
        let read_err = |source| SampleError::Read {
            sample: pair.name.clone(),
            source,
        };

        let metadata_bytes = self.read_member(pair.metadata).map_err(read_err)?;
        let metadata = parse_metadata(&metadata_bytes).map_err(|message| {
            SampleError::InvalidMetadata {
                sample: pair.name.clone(),
                message,
            }
        })?;

        let video = self.read_member(pair.video).map_err(read_err)?;
        Ok((video, metadata))
    }
}

/// Split `dir/name.ext` into (`name`, lowercase `ext`).
fn split_member_name(member_path: &str) -> Option<(&str, String)> {
    let file_name = member_path.rsplit('/').next()?;
    let (base, ext) = file_name.rsplit_once('.')?;
    if base.is_empty() || ext.is_empty() {
        return None;
    }
    Some((base, ext.to_ascii_lowercase()))
}

fn parse_metadata(bytes: &[u8]) -> Result<SourceMetadata, String> {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, found {}", json_kind(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::write_tar;
    use super::*;

    #[test]
    fn test_split_member_name() {
        assert_eq!(
            split_member_name("shard/dir/sample_01.MP4"),
            Some(("sample_01", "mp4".to_string()))
        );
        assert_eq!(
            split_member_name("a.b.json"),
            Some(("a.b", "json".to_string()))
        );
        assert_eq!(split_member_name("README"), None);
        assert_eq!(split_member_name("dir/.hidden"), None);
    }

    #[test]
    fn test_pairs_in_first_seen_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.tar");
        write_tar(
            &path,
            &[
                ("w/b.json", r#"{"worker_id": "b"}"#),
                ("w/a.mp4", "video-a"),
                ("w/b.mp4", "video-b"),
                ("w/a.json", r#"{"worker_id": "a"}"#),
            ],
        );

        let archive = ShardArchive::open(&path).unwrap();
        let names: Vec<_> = archive.samples().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(archive.incomplete(), 0);

        let (video, metadata) = archive.read_sample(&archive.samples()[1]).unwrap();
        assert_eq!(video, b"video-a");
        assert_eq!(metadata["worker_id"], "a");
    }

    #[test]
    fn test_partial_pairs_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.tar");
        write_tar(
            &path,
            &[
                ("only_video.mp4", "v"),
                ("only_meta.json", "{}"),
                ("ok.mp4", "v"),
                ("ok.json", "{}"),
                ("ok.txt", "ignored"),
            ],
        );

        let archive = ShardArchive::open(&path).unwrap();
        assert_eq!(archive.samples().len(), 1);
        assert_eq!(archive.samples()[0].name, "ok");
        assert_eq!(archive.incomplete(), 2);
    }

    #[test]
    fn test_unrelated_members_not_counted_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.tar");
        write_tar(
            &path,
            &[
                ("README.txt", "notes"),
                ("labels.cls", "0 1"),
                ("s.mp4", "v"),
                ("s.json", "{}"),
            ],
        );

        let archive = ShardArchive::open(&path).unwrap();
        assert_eq!(archive.samples().len(), 1);
        assert_eq!(archive.incomplete(), 0);
    }

    #[test]
    fn test_non_object_metadata_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.tar");
        write_tar(&path, &[("s.mp4", "v"), ("s.json", "[1, 2]")]);

        let archive = ShardArchive::open(&path).unwrap();
        let result = archive.read_sample(&archive.samples()[0]);
        assert!(matches!(result, Err(SampleError::InvalidMetadata { .. })));
    }

    #[test]
    fn test_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let result = ShardArchive::open(&dir.path().join("absent.tar"));
        assert!(matches!(result, Err(ArchiveError::Open { .. })));
    }
}
