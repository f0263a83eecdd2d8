//! Records flowing through the curation pipeline.
//!
//! A [`VideoRecord`] is one raw recording pulled from a shard. The window
//! extractor turns it into [`Clip`]s, the quality filter scores them once,
//! and the clip store persists the survivors.

use bytes::Bytes;
use image::RgbImage;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Open key/value metadata carried alongside a recording.
pub type SourceMetadata = Map<String, Value>;

/// Quality signal name → score in [0, 1].
pub type ScoreMap = BTreeMap<String, f64>;

/// One paired video + metadata sample from a shard.
#[derive(Debug, Clone)]
pub struct VideoRecord {
    /// Raw encoded video payload
    pub bytes: Bytes,

    /// Companion metadata (factory/worker/duration fields, schema not fixed)
    pub metadata: SourceMetadata,

    /// Strictly increasing emission index within a run
    pub sample_id: u64,

    /// Position of the originating shard in the configured shard list
    pub shard_index: usize,

    /// Base name of the sample inside its archive
    pub sample_name: String,
}

/// A fixed-duration window of frames cut from one recording.
#[derive(Debug, Clone)]
pub struct Clip {
    /// Ordered frames, all of the same resolution
    pub frames: Vec<RgbImage>,

    /// Seconds from the start of the source video
    pub start_time: f64,

    /// Window length in seconds
    pub duration: f64,

    /// Copy of the originating record's metadata
    pub source_metadata: SourceMetadata,

    /// Set once by the quality filter on retention
    pub quality_scores: Option<ScoreMap>,
}

impl Clip {
    pub fn new(
        frames: Vec<RgbImage>,
        start_time: f64,
        duration: f64,
        source_metadata: SourceMetadata,
    ) -> Self {
        Self {
            frames,
            start_time,
            duration,
            source_metadata,
            quality_scores: None,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Tensor shape as `[T, H, W, C]`.
    pub fn shape(&self) -> [usize; 4] {
        let (width, height) = self
            .frames
            .first()
            .map(|f| f.dimensions())
            .unwrap_or((0, 0));
        [self.frames.len(), height as usize, width as usize, 3]
    }

    /// Frames as one contiguous row-major `T×H×W×3` buffer.
    pub fn tensor_bytes(&self) -> Vec<u8> {
        let [t, h, w, c] = self.shape();
        let mut data = Vec::with_capacity(t * h * w * c);
        for frame in &self.frames {
            data.extend_from_slice(frame.as_raw());
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_clip_shape() {
        let frames = vec![RgbImage::from_pixel(4, 2, Rgb([1, 2, 3])); 5];
        let clip = Clip::new(frames, 2.0, 5.0, SourceMetadata::new());

        assert_eq!(clip.shape(), [5, 2, 4, 3]);
        assert_eq!(clip.num_frames(), 5);
        assert!(clip.quality_scores.is_none());
    }

    #[test]
    fn test_tensor_bytes_frame_major() {
        let frames = vec![
            RgbImage::from_pixel(1, 1, Rgb([1, 2, 3])),
            RgbImage::from_pixel(1, 1, Rgb([4, 5, 6])),
        ];
        let clip = Clip::new(frames, 0.0, 1.0, SourceMetadata::new());

        assert_eq!(clip.tensor_bytes(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_empty_clip_shape() {
        let clip = Clip::new(vec![], 0.0, 1.0, SourceMetadata::new());
        assert_eq!(clip.shape(), [0, 0, 0, 3]);
    }
}
