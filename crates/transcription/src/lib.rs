//! Speech transcription for the audio branch
//!
//! [`AudioTranscriber`] turns a video file into an [`AudioSection`]: it pulls
//! the audio track into a scoped WAV, drops non-speech with WebRTC VAD, runs
//! the speech capability and truncates segment times to whole seconds. It
//! never returns an error; every failure becomes [`AudioSection::Failed`].

mod transcriber;
pub mod vad;
mod whisper;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use video_digest_common::{ProcessingError, TranscriptSegment};

pub use transcriber::AudioTranscriber;
pub use vad::{VadConfig, VoiceFilter};
pub use whisper::{WhisperConfig, WhisperTranscriber};

/// Report line for a video without an audio track
pub const NO_AUDIO_MARKER: &str = "(no audio track)";

/// Report line when speech recognition found nothing to say
pub const EMPTY_TRANSCRIPT_MARKER: &str = "(transcript empty)";

/// Sample rate expected by the speech capability
pub const SPEECH_SAMPLE_RATE: u32 = 16000;

/// Transcription errors
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("Failed to load model: {0}")]
    ModelLoadError(String),

    #[error("Failed to load audio: {0}")]
    AudioLoadError(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Whisper context error: {0}")]
    ContextError(String),

    #[error("Voice activity detection failed: {0}")]
    VadError(String),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),
}

pub type Result<T> = std::result::Result<T, TranscriptionError>;

/// A recognized span with exact times in seconds
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Per-request decoding hints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechOptions {
    /// ISO 639-1 code; `None` lets the model detect the language
    pub language: Option<String>,
    /// Text that primes the decoder (vocabulary, punctuation style)
    pub initial_prompt: Option<String>,
}

/// Speech capability: mono 16kHz samples in, timed segments out
pub trait SpeechTranscriber: Send + Sync {
    fn transcribe(&self, samples: &[f32], options: &SpeechOptions) -> Result<Vec<SpeechSegment>>;
}

/// Audio part of a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum AudioSection {
    Transcript(Vec<TranscriptSegment>),
    /// Audio was present but no speech was recognized
    Empty,
    NoAudioTrack,
    Failed(String),
}

impl AudioSection {
    pub fn segments(&self) -> &[TranscriptSegment] {
        match self {
            AudioSection::Transcript(segments) => segments,
            _ => &[],
        }
    }

    /// The single line shown instead of segments, if any
    pub fn marker(&self) -> Option<String> {
        match self {
            AudioSection::Transcript(_) => None,
            AudioSection::Empty => Some(EMPTY_TRANSCRIPT_MARKER.to_string()),
            AudioSection::NoAudioTrack => Some(NO_AUDIO_MARKER.to_string()),
            AudioSection::Failed(reason) => Some(format!("(audio transcription failed: {reason})")),
        }
    }
}
