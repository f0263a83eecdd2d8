//! Runs the whole curation pipeline against local tar shards.

use egoclip_curator::config::CuratorConfig;
use egoclip_curator::decoder::{DecodeError, DecodedVideo, VideoDecoder};
use egoclip_curator::detector::{Detection, DetectorError, NullDetector, SubjectDetector};
use egoclip_curator::fetcher::LocalFetcher;
use egoclip_curator::manifest::Manifest;
use egoclip_curator::npy;
use egoclip_curator::pipeline::Pipeline;
use egoclip_curator::validate::{validate_dataset, DatasetReport};
use image::{Rgb, RgbImage};
use std::path::Path;
use std::sync::Arc;

/// Decodes a payload of the form `"<fps>x<seconds>"` into a synthetic video
/// whose frames brighten by one level per frame.
struct SyntheticDecoder;

struct SyntheticVideo {
    fps: f64,
    frame_count: u64,
    cursor: u64,
}

impl VideoDecoder for SyntheticDecoder {
    fn open(&self, bytes: &[u8]) -> Result<Box<dyn DecodedVideo>, DecodeError> {
        let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NoVideoStream)?;
        let (fps, seconds) = text.split_once('x').ok_or(DecodeError::NoVideoStream)?;
        let fps: f64 = fps
            .parse()
            .map_err(|_| DecodeError::InvalidFrameRate(fps.to_string()))?;
        let seconds: f64 = seconds.parse().map_err(|_| DecodeError::NoVideoStream)?;

        Ok(Box::new(SyntheticVideo {
            fps,
            frame_count: (fps * seconds).round() as u64,
            cursor: 0,
        }))
    }
}

impl DecodedVideo for SyntheticVideo {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn dimensions(&self) -> (u32, u32) {
        (32, 18)
    }

    fn seek(&mut self, frame: u64) -> Result<(), DecodeError> {
        self.cursor = frame;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>, DecodeError> {
        if self.cursor >= self.frame_count {
            return Ok(None);
        }
        let value = (self.cursor % 200) as u8;
        self.cursor += 1;
        Ok(Some(RgbImage::from_pixel(32, 18, Rgb([value, value / 2, 40]))))
    }
}

/// Sees the subject only in frames brighter than a threshold.
struct BrightnessDetector(u8);

impl SubjectDetector for BrightnessDetector {
    fn detect(&self, frame: &RgbImage) -> Result<Detection, DetectorError> {
        Ok(Detection {
            detected: frame.get_pixel(0, 0).0[0] >= self.0,
            bbox: None,
        })
    }
}

fn write_shard(path: &Path, samples: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(file);
    for (name, video) in samples {
        let metadata = format!(r#"{{"factory_id": "factory_001", "sample": "{}"}}"#, name);
        for (member, data) in [
            (format!("{}.mp4", name), video.to_string()),
            (format!("{}.json", name), metadata),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, &member, data.as_bytes())
                .unwrap();
        }
    }
    builder.finish().unwrap();
}

fn create_config(root: &Path, max_videos: u32, min_visibility: f64) -> CuratorConfig {
    CuratorConfig::from_yaml_str(&format!(
        r#"
data:
  dataset_name: "org/egocentric"
  max_videos: {max_videos}
  local_root: "{shards}"
  shards:
    - "factory_001/worker_001.tar"
    - "factory_001/worker_002.tar"
    - "factory_001/worker_003.tar"
clips:
  target_duration: 5.0
  stride: 2.0
  min_motion_score: 0.005
  min_hand_visibility: {min_visibility}
processing:
  target_fps: 10
  target_resolution: [9, 16]
  num_workers: 2
output:
  local_dir: "{out}"
"#,
        max_videos = max_videos,
        min_visibility = min_visibility,
        shards = root.join("hub").display(),
        out = root.join("clips").display(),
    ))
    .unwrap()
}

fn setup_shards(root: &Path) {
    let dir = root.join("hub/factory_001");
    std::fs::create_dir_all(&dir).unwrap();
    write_shard(&dir.join("worker_001.tar"), &[("v1", "30x12"), ("v2", "30x4")]);
    // worker_002 is missing from the mirror and must be skipped.
    write_shard(&dir.join("worker_003.tar"), &[("v3", "30x9"), ("v4", "not a video")]);
}

fn create_pipeline(config: CuratorConfig, detector: Arc<dyn SubjectDetector>) -> Pipeline {
    let root = config.data.local_root.clone().unwrap();
    Pipeline::new(
        config,
        Arc::new(LocalFetcher::new(root)),
        Arc::new(SyntheticDecoder),
        detector,
    )
}

#[tokio::test]
async fn test_end_to_end_run() {
    let dir = tempfile::tempdir().unwrap();
    setup_shards(dir.path());
    let config = create_config(dir.path(), 100, 0.3);

    let summary = create_pipeline(config, Arc::new(NullDetector))
        .run_until(std::future::pending())
        .await
        .unwrap();

    // v1: 12s → starts 0,2,4,6. v2: 4s → none. v3: 9s → starts 0,2,4. v4: undecodable.
    assert_eq!(summary.videos_sampled, 4);
    assert_eq!(summary.videos_failed, 1);
    assert_eq!(summary.clips_extracted, 7);
    assert_eq!(summary.clips_retained, 7);
    assert_eq!(summary.shards_fetched, 2);
    assert_eq!(summary.shards_skipped, 1);

    let manifest = Manifest::load(&summary.manifest_path).unwrap();
    assert_eq!(manifest.len() as u64, summary.clips_retained);

    let starts: Vec<f64> = manifest.entries().iter().map(|e| e.start_time).collect();
    assert_eq!(starts, vec![0.0, 2.0, 4.0, 6.0, 0.0, 2.0, 4.0]);

    for entry in manifest.entries() {
        assert!(entry.frames_path.is_file(), "{} missing", entry.clip_id);
        assert_eq!(entry.shape, vec![50, 9, 16, 3]);
        assert_eq!(npy::read_shape(&entry.frames_path).unwrap(), entry.shape);
        assert_eq!(entry.source_metadata["factory_id"], "factory_001");
        for score in entry.quality_scores.values() {
            assert!((0.0..=1.0).contains(score));
        }
    }
    assert_eq!(manifest.entries()[4].source_metadata["sample"], "v3");

    assert_eq!(
        validate_dataset(&dir.path().join("clips")).unwrap(),
        DatasetReport::Clips {
            clips: 7,
            total_frames: 350
        }
    );
}

#[tokio::test]
async fn test_max_videos_stops_before_later_shards() {
    let dir = tempfile::tempdir().unwrap();
    setup_shards(dir.path());
    let config = create_config(dir.path(), 1, 0.3);

    let summary = create_pipeline(config, Arc::new(NullDetector))
        .run_until(std::future::pending())
        .await
        .unwrap();

    assert_eq!(summary.videos_sampled, 1);
    assert_eq!(summary.shards_fetched, 1);
    assert_eq!(summary.shards_skipped, 0);
    assert_eq!(summary.clips_retained, 4);
}

#[tokio::test]
async fn test_visibility_threshold_filters_clips() {
    let dir = tempfile::tempdir().unwrap();
    setup_shards(dir.path());

    // Frame value is the native index modulo 200, so the first window of each
    // video is mostly below the detector threshold.
    let strict = create_config(dir.path(), 100, 0.9);
    let summary = create_pipeline(strict, Arc::new(BrightnessDetector(100)))
        .run_until(std::future::pending())
        .await
        .unwrap();
    assert!(summary.clips_retained < summary.clips_extracted);
    assert_eq!(
        summary.clips_retained + summary.clips_rejected,
        summary.clips_extracted
    );

    let manifest = Manifest::load(&summary.manifest_path).unwrap();
    assert_eq!(manifest.len() as u64, summary.clips_retained);
    for entry in manifest.entries() {
        assert!(entry.quality_scores["hand_visibility"] >= 0.9);
    }
}
