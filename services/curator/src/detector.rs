//! Subject detection for the hand-visibility score.
//!
//! The pipeline only asks one question of a detector: is the tracked subject
//! visible in this frame? Detectors are stateless per call.

use crate::config::DetectorConfig;
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Every n-th clip frame is shown to the detector.
pub const DETECTOR_SAMPLE_STRIDE: usize = 3;

const SKIN_CB_RANGE: (f32, f32) = (77.0, 127.0);
const SKIN_CR_RANGE: (f32, f32) = (133.0, 173.0);

/// Errors raised by a detector on a single frame.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Invalid input frame: {0}")]
    InvalidInput(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Unknown detector kind: {0}")]
    UnknownKind(String),
}

/// Result of running a detector on one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub detected: bool,

    /// Normalized `[x0, y0, x1, y1]` box around the subject
    pub bbox: Option<[f32; 4]>,
}

impl Detection {
    pub fn none() -> Self {
        Self {
            detected: false,
            bbox: None,
        }
    }
}

/// External collaborator deciding whether the subject is visible.
#[cfg_attr(test, mockall::automock)]
pub trait SubjectDetector: Send + Sync {
    fn detect(&self, frame: &RgbImage) -> Result<Detection, DetectorError>;
}

/// Build the detector named in the configuration.
pub fn detector_from_config(
    config: &DetectorConfig,
) -> Result<Arc<dyn SubjectDetector>, DetectorError> {
    match config.kind.as_str() {
        "skin" => Ok(Arc::new(SkinToneDetector::new(config.min_skin_fraction))),
        "none" => Ok(Arc::new(NullDetector)),
        other => Err(DetectorError::UnknownKind(other.to_string())),
    }
}

/// Per-clip detector tally.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Visibility {
    pub frames_with_subject: usize,
    pub frames_sampled: usize,
}

impl Visibility {
    /// Fraction of sampled frames with a positive detection, 0 when nothing
    /// was sampled.
    pub fn score(&self) -> f64 {
        if self.frames_sampled == 0 {
            return 0.0;
        }
        self.frames_with_subject as f64 / self.frames_sampled as f64
    }
}

/// Run the detector over every [`DETECTOR_SAMPLE_STRIDE`]-th frame.
///
/// A detector failure on one frame counts as not detected.
pub fn visibility_score(detector: &dyn SubjectDetector, frames: &[RgbImage]) -> Visibility {
    let mut visibility = Visibility::default();

    for (index, frame) in frames.iter().enumerate().step_by(DETECTOR_SAMPLE_STRIDE) {
        visibility.frames_sampled += 1;
        match detector.detect(frame) {
            Ok(detection) if detection.detected => visibility.frames_with_subject += 1,
            Ok(_) => {}
            Err(e) => warn!(frame = index, error = %e, "Detector failed on frame"),
        }
    }

    visibility
}

/// Skin-pixel classifier in YCbCr space.
///
/// A frame is a positive detection when the share of skin-colored pixels
/// reaches `min_fraction`.
#[derive(Debug, Clone)]
pub struct SkinToneDetector {
    min_fraction: f64,
}

impl SkinToneDetector {
    pub fn new(min_fraction: f64) -> Self {
        Self { min_fraction }
    }

    fn is_skin(pixel: [u8; 3]) -> bool {
        let (r, g, b) = (pixel[0] as f32, pixel[1] as f32, pixel[2] as f32);
        let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
        let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;

        (SKIN_CB_RANGE.0..=SKIN_CB_RANGE.1).contains(&cb)
            && (SKIN_CR_RANGE.0..=SKIN_CR_RANGE.1).contains(&cr)
    }
}

impl SubjectDetector for SkinToneDetector {
    fn detect(&self, frame: &RgbImage) -> Result<Detection, DetectorError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectorError::InvalidInput("empty frame".to_string()));
        }

        let mut skin = 0u64;
        let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0u32, 0u32);
        for (x, y, pixel) in frame.enumerate_pixels() {
            if Self::is_skin(pixel.0) {
                skin += 1;
                x0 = x0.min(x);
                y0 = y0.min(y);
                x1 = x1.max(x);
                y1 = y1.max(y);
            }
        }

        let fraction = skin as f64 / (width as u64 * height as u64) as f64;
        if skin == 0 || fraction < self.min_fraction {
            return Ok(Detection::none());
        }

        Ok(Detection {
            detected: true,
            bbox: Some([
                x0 as f32 / width as f32,
                y0 as f32 / height as f32,
                (x1 + 1) as f32 / width as f32,
                (y1 + 1) as f32 / height as f32,
            ]),
        })
    }
}

/// Reports every frame as containing the subject.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDetector;

impl SubjectDetector for NullDetector {
    fn detect(&self, _frame: &RgbImage) -> Result<Detection, DetectorError> {
        Ok(Detection {
            detected: true,
            bbox: None,
        })
    }
}
