//! Sliding-window clip extraction.
//!
//! One recording yields a lazy sequence of fixed-duration windows starting at
//! `0, stride, 2·stride, …`. Each window is temporally subsampled toward the
//! target frame rate and every kept frame is resized before it is buffered.

use crate::config::CuratorConfig;
use crate::decoder::{DecodeError, DecodedVideo, VideoDecoder};
use crate::record::{Clip, SourceMetadata};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::sync::Arc;
use tracing::{debug, warn};

/// Windows retaining fewer frames than this are dropped.
pub const MIN_CLIP_FRAMES: usize = 10;

/// Tolerance on the `start + duration <= total` window test.
const WINDOW_EPSILON: f64 = 1e-9;

/// Windowing and downsampling parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    pub target_duration: f64,
    pub stride: f64,
    pub target_fps: f64,
    pub target_width: u32,
    pub target_height: u32,
}

impl From<&CuratorConfig> for WindowConfig {
    fn from(config: &CuratorConfig) -> Self {
        Self {
            target_duration: config.clips.target_duration,
            stride: config.clips.stride,
            target_fps: config.processing.target_fps,
            target_width: config.processing.target_width(),
            target_height: config.processing.target_height(),
        }
    }
}

/// Start times of every window that fits inside `total_duration`.
pub fn window_starts(total_duration: f64, target_duration: f64, stride: f64) -> Vec<f64> {
    if !(stride > 0.0) || !(target_duration > 0.0) {
        return Vec::new();
    }

    let mut starts = Vec::new();
    let mut index = 0u64;
    loop {
        let start = index as f64 * stride;
        if start + target_duration > total_duration + WINDOW_EPSILON {
            break;
        }
        starts.push(start);
        index += 1;
    }
    starts
}

/// Native frames skipped between kept frames.
pub fn frame_step(native_fps: f64, target_fps: f64) -> u64 {
    ((native_fps / target_fps).round() as u64).max(1)
}

/// Cuts recordings into clips.
pub struct WindowExtractor {
    config: WindowConfig,
    decoder: Arc<dyn VideoDecoder>,
}

impl WindowExtractor {
    pub fn new(config: WindowConfig, decoder: Arc<dyn VideoDecoder>) -> Self {
        Self { config, decoder }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Open a recording and plan its windows.
    ///
    /// A video that cannot be opened yields a [`DecodeError`]; the caller
    /// treats it as producing zero clips.
    pub fn extract(
        &self,
        bytes: &[u8],
        metadata: &SourceMetadata,
    ) -> Result<ClipWindows, DecodeError> {
        let video = self.decoder.open(bytes)?;
        let fps = video.fps();
        if !(fps > 0.0) {
            return Err(DecodeError::InvalidFrameRate(fps.to_string()));
        }

        let total_duration = video.duration();
        let starts = window_starts(
            total_duration,
            self.config.target_duration,
            self.config.stride,
        );

        debug!(
            fps = fps,
            total_duration = total_duration,
            windows = starts.len(),
            "Planned clip windows"
        );

        Ok(ClipWindows {
            frames_per_window: (self.config.target_duration * fps).round() as u64,
            frame_step: frame_step(fps, self.config.target_fps),
            video,
            config: self.config,
            metadata: metadata.clone(),
            starts,
            next: 0,
            dropped: 0,
        })
    }
}

/// Lazy sequence of clips from one recording.
pub struct ClipWindows {
    video: Box<dyn DecodedVideo>,
    config: WindowConfig,
    metadata: SourceMetadata,
    starts: Vec<f64>,
    next: usize,
    dropped: usize,
    frames_per_window: u64,
    frame_step: u64,
}

impl ClipWindows {
    /// Number of windows planned for this recording.
    pub fn window_count(&self) -> usize {
        self.starts.len()
    }

    /// Windows skipped so far for having too few decodable frames.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn extract_window(&mut self, start_time: f64) -> Result<Option<Clip>, DecodeError> {
        let start_frame = (start_time * self.video.fps()).round() as u64;
        self.video.seek(start_frame)?;

        let mut frames = Vec::new();
        for i in 0..self.frames_per_window {
            let Some(frame) = self.video.read_frame()? else {
                break;
            };
            if i % self.frame_step == 0 {
                frames.push(resize_frame(
                    frame,
                    self.config.target_width,
                    self.config.target_height,
                ));
            }
        }

        if frames.len() < MIN_CLIP_FRAMES {
            debug!(
                start_time = start_time,
                frames = frames.len(),
                "Window too short, dropped"
            );
            return Ok(None);
        }

        Ok(Some(Clip::new(
            frames,
            start_time,
            self.config.target_duration,
            self.metadata.clone(),
        )))
    }
}

impl Iterator for ClipWindows {
    type Item = Clip;

    fn next(&mut self) -> Option<Clip> {
        while self.next < self.starts.len() {
            let start_time = self.starts[self.next];
            self.next += 1;

            match self.extract_window(start_time) {
                Ok(Some(clip)) => return Some(clip),
                Ok(None) => self.dropped += 1,
                Err(e) => {
                    self.dropped += 1;
                    warn!(start_time = start_time, error = %e, "Window decode failed");
                }
            }
        }
        None
    }
}

fn resize_frame(frame: RgbImage, width: u32, height: u32) -> RgbImage {
    if frame.dimensions() == (width, height) {
        return frame;
    }
    imageops::resize(&frame, width, height, FilterType::Triangle)
}
