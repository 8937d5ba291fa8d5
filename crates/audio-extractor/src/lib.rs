//! Audio track extraction
//!
//! Pulls the audio track of a video into a scoped temporary WAV file
//! (16kHz mono PCM by default) that is removed when the handle drops,
//! whether or not the transcription that reads it succeeds.

pub mod wav;

use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempPath;
use tracing::debug;
use video_digest_common::{ProcessingError, Result};
use video_digest_decoder::init_ffmpeg;

pub use wav::{load_wav_samples, AudioSamples};

/// Audio extraction configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Target sample rate (16000 for speech models)
    pub sample_rate: u32,
    /// Number of channels (1 for mono)
    pub channels: u8,
    /// Apply EBU R128 normalization to -23 LUFS
    pub normalize: bool,
    /// Directory for the scratch WAV (system temp dir when unset)
    pub scratch_dir: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            normalize: false,
            scratch_dir: None,
        }
    }
}

impl AudioConfig {
    /// 16kHz mono PCM with loudness normalization
    #[must_use]
    pub fn for_speech() -> Self {
        Self {
            normalize: true,
            ..Self::default()
        }
    }
}

/// Extracted audio that lives for as long as this handle does
#[derive(Debug)]
pub struct ScopedAudioFile {
    path: TempPath,
}

impl ScopedAudioFile {
    /// Create an empty scratch WAV in `dir`
    pub fn create_in(dir: &Path) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("video-digest-audio-")
            .suffix(".wav")
            .tempfile_in(dir)?;
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now, reporting failures instead of swallowing them on drop
    pub fn remove(self) -> Result<()> {
        self.path.close().map_err(ProcessingError::IoError)
    }
}

/// Source of a video's audio track
pub trait AudioTrackExtractor: Send + Sync {
    /// Extract the audio track, or return `Ok(None)` when the file has none
    fn extract(&self, input_path: &Path) -> Result<Option<ScopedAudioFile>>;
}

/// Check if a file has an audio stream
///
/// # Errors
/// Returns error if file cannot be opened
pub fn has_audio_stream(input_path: &Path) -> Result<bool> {
    init_ffmpeg()?;
    let ictx = ffmpeg::format::input(&input_path)
        .map_err(|e| ProcessingError::FFmpegError(format!("Failed to open input file: {e}")))?;
    Ok(ictx.streams().best(ffmpeg::media::Type::Audio).is_some())
}

/// Extracts audio with the FFmpeg CLI
#[derive(Debug, Clone, Default)]
pub struct FfmpegAudioExtractor {
    config: AudioConfig,
}

impl FfmpegAudioExtractor {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    fn scratch_file(&self) -> Result<ScopedAudioFile> {
        match &self.config.scratch_dir {
            Some(dir) => ScopedAudioFile::create_in(dir),
            None => ScopedAudioFile::create_in(&std::env::temp_dir()),
        }
    }
}

impl AudioTrackExtractor for FfmpegAudioExtractor {
    fn extract(&self, input_path: &Path) -> Result<Option<ScopedAudioFile>> {
        if !has_audio_stream(input_path)? {
            debug!(path = %input_path.display(), "No audio stream");
            return Ok(None);
        }

        // The guard is created before FFmpeg runs so every error path below removes it
        let scratch = self.scratch_file()?;
        extract_audio_ffmpeg_cli(input_path, scratch.path(), &self.config)?;

        Ok(Some(scratch))
    }
}

fn build_ffmpeg_command(input_path: &Path, output_path: &Path, config: &AudioConfig) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-loglevel")
        .arg("error")
        .arg("-i")
        .arg(input_path)
        .arg("-vn") // No video
        .arg("-acodec")
        .arg("pcm_s16le")
        .arg("-ar")
        .arg(config.sample_rate.to_string())
        .arg("-ac")
        .arg(config.channels.to_string());

    if config.normalize {
        cmd.arg("-af").arg("loudnorm=I=-23:LRA=7:TP=-2");
    }

    cmd.arg("-y") // Overwrite the scratch file
        .arg(output_path);
    cmd
}

fn extract_audio_ffmpeg_cli(input_path: &Path, output_path: &Path, config: &AudioConfig) -> Result<()> {
    let output = build_ffmpeg_command(input_path, output_path, config)
        .output()
        .map_err(|e| ProcessingError::FFmpegError(format!("Failed to execute FFmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProcessingError::FFmpegError(format!(
            "FFmpeg failed: {}",
            stderr.trim()
        )));
    }

    let written = std::fs::metadata(output_path).map(|m| m.len()).unwrap_or(0);
    if written == 0 {
        return Err(ProcessingError::FFmpegError(
            "Output file was not written".to_string(),
        ));
    }

    debug!(
        input = %input_path.display(),
        output = %output_path.display(),
        bytes = written,
        "Extracted audio track"
    );
    Ok(())
}
