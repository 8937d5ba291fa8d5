/// Shared types for the video digest pipeline
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Frame rate assumed when the container does not report a usable one
pub const FALLBACK_FRAME_RATE: f64 = 24.0;

/// Processing errors shared by the media crates
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("No video stream found")]
    NoVideoStream,

    #[error("No audio stream found")]
    NoAudioStream,

    #[error("Corrupted file: {0}")]
    CorruptedFile(String),

    #[error("FFmpeg error: {0}")]
    FFmpegError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    ImageError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<image::ImageError> for ProcessingError {
    fn from(err: image::ImageError) -> Self {
        ProcessingError::ImageError(err.to_string())
    }
}

/// Result type for processing operations
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// One analysis request.
///
/// Built once per file by the caller (usually from a container probe) and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoJob {
    /// Correlation id used in log spans
    pub id: Uuid,
    pub path: PathBuf,
    /// Frames per second; always positive
    pub frame_rate: f64,
    /// Duration in seconds as reported by the container (0.0 when unknown)
    pub duration_estimate: f64,
    /// Whether the probe saw an audio stream, if a probe was run
    pub has_audio_hint: Option<bool>,
}

impl VideoJob {
    /// Create a job, replacing a missing or non-finite frame rate with
    /// [`FALLBACK_FRAME_RATE`]
    pub fn new(path: impl Into<PathBuf>, frame_rate: f64, duration_estimate: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            frame_rate: sanitize_frame_rate(frame_rate),
            duration_estimate: if duration_estimate.is_finite() && duration_estimate > 0.0 {
                duration_estimate
            } else {
                0.0
            },
            has_audio_hint: None,
        }
    }

    pub fn with_audio_hint(mut self, has_audio: bool) -> Self {
        self.has_audio_hint = Some(has_audio);
        self
    }

    /// File name used in the report header
    pub fn file_name(&self) -> String {
        display_name(&self.path)
    }
}

/// Final path component, or the whole path when there is none
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Frame rate to use for timestamp math
pub fn sanitize_frame_rate(frame_rate: f64) -> f64 {
    if frame_rate.is_finite() && frame_rate > 0.0 {
        frame_rate
    } else {
        FALLBACK_FRAME_RATE
    }
}

/// Whole seconds, truncated toward zero. Negative and non-finite input map to 0.
pub fn truncate_seconds(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds.trunc() as u64
    } else {
        0
    }
}

/// A frame chosen by the sampler for captioning
#[derive(Debug, Clone)]
pub struct SampledFrame {
    /// Capture time truncated to whole seconds
    pub timestamp_seconds: u64,
    /// Exact capture time, `frame_index / frame_rate`
    pub time_seconds: f64,
    pub image: RgbImage,
}

impl SampledFrame {
    pub fn new(time_seconds: f64, image: RgbImage) -> Self {
        Self {
            timestamp_seconds: truncate_seconds(time_seconds),
            time_seconds,
            image,
        }
    }
}

/// Sampled frames captioned together, in capture order
#[derive(Debug, Clone, Default)]
pub struct FrameBatch {
    pub frames: Vec<SampledFrame>,
}

impl FrameBatch {
    pub fn new(frames: Vec<SampledFrame>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn timestamps(&self) -> Vec<u64> {
        self.frames.iter().map(|f| f.timestamp_seconds).collect()
    }
}

/// Description of one sampled frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caption {
    pub timestamp_seconds: u64,
    pub text: String,
}

/// One span of recognized speech
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_seconds: u64,
    pub end_seconds: u64,
    pub text: String,
}
