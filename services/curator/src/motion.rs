//! Frame-difference motion scoring.

use image::imageops::{self, FilterType};
use image::RgbImage;

/// Spatial size frames are reduced to before differencing.
pub const MOTION_SAMPLE_SIZE: (u32, u32) = (160, 90);

/// Every n-th frame of the clip takes part in the score.
pub const MOTION_TEMPORAL_STRIDE: usize = 2;

/// Scores how much a clip changes between frames, in [0, 1].
///
/// Frames are subsampled in time, shrunk to [`MOTION_SAMPLE_SIZE`], reduced
/// to single-channel intensity (the unweighted channel mean, so channel order
/// does not matter), and the mean absolute difference of each consecutive
/// pair is averaged and normalized by 255.
#[derive(Debug, Clone)]
pub struct MotionScorer {
    sample_size: (u32, u32),
    temporal_stride: usize,
}

impl MotionScorer {
    pub fn new() -> Self {
        Self {
            sample_size: MOTION_SAMPLE_SIZE,
            temporal_stride: MOTION_TEMPORAL_STRIDE,
        }
    }

    pub fn score(&self, frames: &[RgbImage]) -> f64 {
        if frames.len() < 2 {
            return 0.0;
        }

        let intensities: Vec<Vec<f64>> = frames
            .iter()
            .step_by(self.temporal_stride)
            .map(|frame| self.intensity(frame))
            .collect();

        let diffs: Vec<f64> = intensities
            .windows(2)
            .map(|pair| mean_abs_diff(&pair[0], &pair[1]))
            .collect();

        if diffs.is_empty() {
            return 0.0;
        }

        let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
        (mean / 255.0).clamp(0.0, 1.0)
    }

    fn intensity(&self, frame: &RgbImage) -> Vec<f64> {
        let (width, height) = self.sample_size;
        let small = if frame.dimensions() == (width, height) {
            frame.clone()
        } else {
            imageops::resize(frame, width, height, FilterType::Triangle)
        };

        small
            .pixels()
            .map(|p| (p[0] as f64 + p[1] as f64 + p[2] as f64) / 3.0)
            .collect()
    }
}

impl Default for MotionScorer {
    fn default() -> Self {
        Self::new()
    }
}

fn mean_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let total: f64 = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum();
    total / a.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(value: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(32, 18, Rgb(value))
    }

    #[test]
    fn test_identical_frames_score_zero() {
        let frames = vec![solid([90, 120, 200]); 12];
        assert_eq!(MotionScorer::new().score(&frames), 0.0);
    }

    #[test]
    fn test_constant_delta_scores_k_over_255() {
        let k = 51u8;
        // With a temporal stride of 2 the middle frame is skipped.
        let frames = vec![solid([10, 10, 10]), solid([200, 0, 7]), solid([10 + k, 10 + k, 10 + k])];

        let score = MotionScorer::new().score(&frames);
        assert!((score - k as f64 / 255.0).abs() < 1e-9, "score={}", score);
    }

    #[test]
    fn test_scales_linearly_with_delta() {
        let scorer = MotionScorer::new();
        let small = scorer.score(&[solid([100; 3]), solid([0; 3]), solid([110; 3])]);
        let large = scorer.score(&[solid([100; 3]), solid([0; 3]), solid([120; 3])]);
        assert!((large - 2.0 * small).abs() < 1e-9);
    }

    #[test]
    fn test_channel_order_invariant() {
        let scorer = MotionScorer::new();
        let rgb = vec![solid([10, 80, 200]), solid([0; 3]), solid([60, 20, 140])];
        let bgr: Vec<RgbImage> = rgb
            .iter()
            .map(|f| {
                let mut swapped = f.clone();
                for p in swapped.pixels_mut() {
                    p.0.swap(0, 2);
                }
                swapped
            })
            .collect();

        assert_eq!(scorer.score(&rgb), scorer.score(&bgr));
    }

    #[test]
    fn test_fewer_than_two_frames() {
        let scorer = MotionScorer::new();
        assert_eq!(scorer.score(&[]), 0.0);
        assert_eq!(scorer.score(&[solid([255; 3])]), 0.0);
    }

    #[test]
    fn test_averages_across_pairs() {
        // Retained frames 0, 2, 4: pair deltas 30 and 0.
        let frames = vec![
            solid([0; 3]),
            solid([0; 3]),
            solid([30; 3]),
            solid([0; 3]),
            solid([30; 3]),
        ];
        let score = MotionScorer::new().score(&frames);
        assert!((score - 15.0 / 255.0).abs() < 1e-9);
    }
}
