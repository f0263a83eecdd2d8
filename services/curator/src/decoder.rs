//! Video decoding.
//!
//! The window extractor only needs a decoder that reports native fps and
//! frame count, seeks by frame index and reads RGB frames sequentially.
//! [`FfmpegDecoder`] satisfies that contract with `ffprobe` for stream
//! properties and an `ffmpeg` child process piping raw `rgb24` frames.

use crate::config::ProcessingConfig;
use image::RgbImage;
use serde::Deserialize;
use std::io::{self, Read, Write};
use std::process::{Child, ChildStdout, Command, Stdio};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, trace};

/// Errors that can occur while opening or reading a video.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to run {tool}: {source}")]
    Spawn { tool: String, source: io::Error },

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("No video stream found")]
    NoVideoStream,

    #[error("Invalid frame rate: {0}")]
    InvalidFrameRate(String),

    #[error("Corrupt frame: {0}")]
    CorruptFrame(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Collaborator that opens an encoded video payload.
pub trait VideoDecoder: Send + Sync {
    fn open(&self, bytes: &[u8]) -> Result<Box<dyn DecodedVideo>, DecodeError>;
}

/// An opened video with random access by frame index.
pub trait DecodedVideo: Send {
    /// Native frame rate.
    fn fps(&self) -> f64;

    /// Total number of frames in the stream.
    fn frame_count(&self) -> u64;

    /// Native `(width, height)`.
    fn dimensions(&self) -> (u32, u32);

    /// Position the read cursor at `frame`.
    fn seek(&mut self, frame: u64) -> Result<(), DecodeError>;

    /// Read the frame under the cursor, `None` at end of stream.
    fn read_frame(&mut self) -> Result<Option<RgbImage>, DecodeError>;

    /// Duration in seconds (`frame_count / fps`).
    fn duration(&self) -> f64 {
        if self.fps() > 0.0 {
            self.frame_count() as f64 / self.fps()
        } else {
            0.0
        }
    }
}

/// Decoder backed by the `ffmpeg` and `ffprobe` executables.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegDecoder {
    pub fn new(config: &ProcessingConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
        }
    }

    /// Check that both executables run.
    pub fn ensure_available(&self) -> Result<(), DecodeError> {
        for tool in [&self.ffmpeg, &self.ffprobe] {
            let out = Command::new(tool)
                .arg("-version")
                .output()
                .map_err(|source| DecodeError::Spawn {
                    tool: tool.clone(),
                    source,
                })?;
            if !out.status.success() {
                return Err(DecodeError::Probe(format!(
                    "{} returned {} on -version",
                    tool, out.status
                )));
            }
        }
        Ok(())
    }

    fn probe(&self, file: &NamedTempFile) -> Result<StreamInfo, DecodeError> {
        let out = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-count_packets",
                "-show_entries",
                "stream=width,height,avg_frame_rate,r_frame_rate,nb_frames,nb_read_packets,duration",
                "-of",
                "json",
            ])
            .arg(file.path())
            .output()
            .map_err(|source| DecodeError::Spawn {
                tool: self.ffprobe.clone(),
                source,
            })?;

        if !out.status.success() {
            return Err(DecodeError::Probe(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ));
        }

        StreamInfo::from_probe_json(&out.stdout)
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn open(&self, bytes: &[u8]) -> Result<Box<dyn DecodedVideo>, DecodeError> {
        let mut file = tempfile::Builder::new()
            .prefix("egoclip-")
            .suffix(".mp4")
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;

        let info = self.probe(&file)?;
        debug!(
            fps = info.fps,
            frames = info.frame_count,
            width = info.width,
            height = info.height,
            "Opened video"
        );

        Ok(Box::new(FfmpegVideo {
            file,
            ffmpeg: self.ffmpeg.clone(),
            info,
            start_frame: 0,
            child: None,
            stdout: None,
        }))
    }
}

/// Stream properties reported by `ffprobe`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub fps: f64,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
    duration: Option<String>,
}

impl StreamInfo {
    fn from_probe_json(json: &[u8]) -> Result<Self, DecodeError> {
        let probe: ProbeOutput =
            serde_json::from_slice(json).map_err(|e| DecodeError::Probe(e.to_string()))?;
        let stream = probe.streams.into_iter().next().ok_or(DecodeError::NoVideoStream)?;

        let (width, height) = match (stream.width, stream.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => return Err(DecodeError::NoVideoStream),
        };

        let fps = [&stream.avg_frame_rate, &stream.r_frame_rate]
            .into_iter()
            .flatten()
            .filter_map(|rate| parse_rate(rate))
            .next()
            .ok_or_else(|| {
                DecodeError::InvalidFrameRate(
                    stream
                        .avg_frame_rate
                        .clone()
                        .or(stream.r_frame_rate.clone())
                        .unwrap_or_default(),
                )
            })?;

        let parse_count = |v: &Option<String>| {
            v.as_deref()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|&n| n > 0)
        };
        let frame_count = parse_count(&stream.nb_frames)
            .or_else(|| parse_count(&stream.nb_read_packets))
            .or_else(|| {
                stream
                    .duration
                    .as_deref()
                    .and_then(|d| d.parse::<f64>().ok())
                    .map(|d| (d * fps).round() as u64)
            })
            .unwrap_or(0);

        Ok(Self {
            fps,
            frame_count,
            width,
            height,
        })
    }
}

/// Parse an ffprobe rate such as `30000/1001` or `25`.
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

/// A video staged in a temporary file and read through `ffmpeg`.
struct FfmpegVideo {
    file: NamedTempFile,
    ffmpeg: String,
    info: StreamInfo,
    start_frame: u64,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
}

impl FfmpegVideo {
    fn frame_bytes(&self) -> usize {
        self.info.width as usize * self.info.height as usize * 3
    }

    fn spawn_reader(&mut self) -> Result<(), DecodeError> {
        let start_secs = self.start_frame as f64 / self.info.fps;
        trace!(start_frame = self.start_frame, start_secs, "Starting ffmpeg reader");

        let mut child = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .arg("-ss")
            .arg(format!("{:.6}", start_secs))
            .arg("-i")
            .arg(self.file.path())
            .args(["-an", "-sn", "-vsync", "passthrough"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| DecodeError::Spawn {
                tool: self.ffmpeg.clone(),
                source,
            })?;

        self.stdout = child.stdout.take();
        self.child = Some(child);
        Ok(())
    }

    fn stop_reader(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl DecodedVideo for FfmpegVideo {
    fn fps(&self) -> f64 {
        self.info.fps
    }

    fn frame_count(&self) -> u64 {
        self.info.frame_count
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }

    fn seek(&mut self, frame: u64) -> Result<(), DecodeError> {
        self.stop_reader();
        self.start_frame = frame;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>, DecodeError> {
        if self.child.is_none() {
            self.spawn_reader()?;
        }

        let frame_bytes = self.frame_bytes();
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; frame_bytes];
        let n = read_exact_or_eof(stdout, &mut buf)?;
        if n < frame_bytes {
            // End of stream, or a trailing partial frame from a truncated file.
            self.stdout = None;
            return Ok(None);
        }

        RgbImage::from_raw(self.info.width, self.info.height, buf)
            .map(Some)
            .ok_or_else(|| DecodeError::CorruptFrame("frame buffer size mismatch".to_string()))
    }
}

impl Drop for FfmpegVideo {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

/// Fill `buf` unless the reader ends first; returns bytes read.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
