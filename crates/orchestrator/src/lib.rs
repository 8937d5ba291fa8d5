//! Video analysis orchestrator
//!
//! Runs one analysis per video. Models are loaded once through the shared
//! [`ModelLifecycle`]; after that each video runs two independent blocking
//! units on tokio's blocking pool:
//!
//! - visual: decode, sample, and caption batches inline on one thread
//! - audio: extract the track, filter silence, transcribe
//!
//! A failure in one unit degrades only its own section of the [`Report`].
//! A failed model load fails the whole analysis before either unit starts.

pub mod config;
pub mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, info, info_span, warn, Instrument};

use video_digest_audio_extractor::{AudioConfig, AudioTrackExtractor, FfmpegAudioExtractor};
use video_digest_caption::{BatchCaptioner, BatchFailure, BatchOutcome};
use video_digest_common::{Caption, Result as ProcessingResult, VideoJob, FALLBACK_FRAME_RATE};
use video_digest_decoder::{probe_job, DecodedFrame, FfmpegFrameOpener, FrameOpener, FrameSource};
use video_digest_lifecycle::{Capabilities, LifecycleError, ModelLifecycle};
use video_digest_sampler::{sample_frames, SamplerConfig};
use video_digest_transcription::{AudioSection, AudioTranscriber, VoiceFilter};

pub use config::{AnalysisConfig, DigestConfig};
pub use report::{AnalysisStats, Report};

/// Errors that fail a whole analysis
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Model loading failed: {0}")]
    ModelLoad(#[from] LifecycleError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Task failed: {0}")]
    Join(String),
}

/// Coordinates the visual and audio units for each video
pub struct Orchestrator {
    lifecycle: Arc<ModelLifecycle>,
    config: AnalysisConfig,
    frames: Arc<dyn FrameOpener>,
    audio: Arc<dyn AudioTrackExtractor>,
}

impl Orchestrator {
    /// Orchestrator decoding and extracting with ffmpeg
    pub fn new(lifecycle: Arc<ModelLifecycle>, config: AnalysisConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self {
            lifecycle,
            config,
            frames: Arc::new(FfmpegFrameOpener),
            audio: Arc::new(FfmpegAudioExtractor::new(AudioConfig::for_speech())),
        })
    }

    pub fn with_frame_opener(mut self, frames: Arc<dyn FrameOpener>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_audio_extractor(mut self, audio: Arc<dyn AudioTrackExtractor>) -> Self {
        self.audio = audio;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &Arc<ModelLifecycle> {
        &self.lifecycle
    }

    /// Probe `path` and analyze it.
    ///
    /// Models are loaded before probing. A file that cannot be probed is still
    /// analyzed with a fallback frame rate and no audio hint; the visual unit
    /// then reports why it could not open the video.
    pub async fn analyze_path(&self, path: impl Into<PathBuf>) -> Result<Report, AnalysisError> {
        self.load_capabilities().await?;

        let path = path.into();
        let job = tokio::task::spawn_blocking(move || match probe_job(&path) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Probe failed, using defaults");
                VideoJob::new(path, FALLBACK_FRAME_RATE, 0.0)
            }
        })
        .await
        .map_err(|e| AnalysisError::Join(format!("probe {}", join_reason(&e))))?;
        self.analyze(job).await
    }

    /// Analyze one video.
    ///
    /// Returns `Err` only when the models cannot be loaded. Decode, caption
    /// and transcription failures are reported inside the [`Report`].
    pub async fn analyze(&self, job: VideoJob) -> Result<Report, AnalysisError> {
        let span = info_span!("analyze", job_id = %job.id, file = %job.file_name());
        self.run(job).instrument(span).await
    }

    async fn load_capabilities(&self) -> Result<Arc<Capabilities>, AnalysisError> {
        let lifecycle = Arc::clone(&self.lifecycle);
        let capabilities = tokio::task::spawn_blocking(move || lifecycle.ensure_loaded())
            .await
            .map_err(|e| AnalysisError::Join(format!("model loading {}", join_reason(&e))))??;
        Ok(capabilities)
    }

    async fn run(&self, job: VideoJob) -> Result<Report, AnalysisError> {
        let capabilities = self.load_capabilities().await?;

        let job = Arc::new(job);
        info!(frame_rate = job.frame_rate, duration = job.duration_estimate, "Starting analysis");

        let visual = {
            let job = Arc::clone(&job);
            let frames = Arc::clone(&self.frames);
            let captioner = BatchCaptioner::new(Arc::clone(&capabilities.vision))
                .with_instruction(self.config.caption_instruction.clone())
                .with_max_pixels(self.config.max_pixels_per_frame);
            let sampler = self.config.sampler_config();
            let span = info_span!("visual");
            tokio::task::spawn_blocking(move || {
                let _entered = span.enter();
                run_visual(&job, frames.as_ref(), &captioner, &sampler)
            })
        };

        let audio = {
            let path = job.path.clone();
            let has_audio_hint = job.has_audio_hint;
            let transcriber = AudioTranscriber::new(Arc::clone(&self.audio), Arc::clone(&capabilities.speech))
                .with_options(self.config.speech_options())
                .with_voice_filter(self.config.voice_activity.clone().map(VoiceFilter::new));
            let span = info_span!("audio");
            tokio::task::spawn_blocking(move || {
                let _entered = span.enter();
                run_audio(&path, has_audio_hint, &transcriber)
            })
        };

        let (visual, audio) = tokio::join!(visual, audio);

        let visual = visual.unwrap_or_else(|e| {
            warn!(error = %e, "Visual unit did not complete");
            VisualBranch::aborted(format!("visual analysis {}", join_reason(&e)))
        });
        let (audio, audio_ms) = audio.unwrap_or_else(|e| {
            warn!(error = %e, "Audio unit did not complete");
            (AudioSection::Failed(format!("audio task {}", join_reason(&e))), 0)
        });

        let stats = AnalysisStats {
            frames_decoded: visual.frames_decoded,
            frames_sampled: visual.frames_sampled,
            batches: visual.batches,
            failed_batches: visual.failures,
            substituted_captions: visual.substituted,
            visual_error: visual.error,
            visual_ms: visual.elapsed_ms,
            audio_ms,
        };
        info!(
            captions = visual.captions.len(),
            failed_batches = stats.failed_batches.len(),
            segments = audio.segments().len(),
            visual_ms = stats.visual_ms,
            audio_ms = stats.audio_ms,
            "Analysis finished"
        );

        Ok(Report {
            job_id: job.id,
            file_name: job.file_name(),
            captions: visual.captions,
            audio,
            stats,
        })
    }
}

fn join_reason(error: &JoinError) -> &'static str {
    if error.is_panic() {
        "panicked"
    } else {
        "was cancelled"
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// What the visual unit produced, including partial work before an error
#[derive(Debug, Default)]
struct VisualBranch {
    captions: Vec<Caption>,
    failures: Vec<BatchFailure>,
    substituted: usize,
    frames_decoded: u64,
    frames_sampled: u64,
    batches: u64,
    error: Option<String>,
    elapsed_ms: u64,
}

impl VisualBranch {
    fn aborted(reason: String) -> Self {
        Self {
            error: Some(reason),
            ..Self::default()
        }
    }

    fn absorb(&mut self, outcome: BatchOutcome) {
        match outcome {
            BatchOutcome::Complete(captions) => self.captions.extend(captions),
            BatchOutcome::Partial { captions, substituted } => {
                self.substituted += substituted.len();
                self.captions.extend(captions);
            }
            BatchOutcome::Failed(failure) => self.failures.push(failure),
        }
    }
}

/// Counts decoded frames so the count survives a mid-stream error
struct CountingSource<'a, S: FrameSource + ?Sized> {
    inner: &'a mut S,
    decoded: u64,
}

impl<S: FrameSource + ?Sized> FrameSource for CountingSource<'_, S> {
    fn frame_rate(&self) -> f64 {
        self.inner.frame_rate()
    }

    fn for_each_frame(
        &mut self,
        visit: &mut dyn FnMut(DecodedFrame) -> ProcessingResult<()>,
    ) -> ProcessingResult<u64> {
        let decoded = &mut self.decoded;
        self.inner.for_each_frame(&mut |frame| {
            *decoded += 1;
            visit(frame)
        })
    }
}

fn run_visual(
    job: &VideoJob,
    frames: &dyn FrameOpener,
    captioner: &BatchCaptioner,
    sampler: &SamplerConfig,
) -> VisualBranch {
    let start = Instant::now();
    let mut branch = VisualBranch::default();

    let mut source = match frames.open(job) {
        Ok(source) => source,
        Err(e) => {
            warn!(error = %e, "Could not open video stream");
            branch.error = Some(e.to_string());
            branch.elapsed_ms = elapsed_ms(start);
            return branch;
        }
    };

    let mut counted = CountingSource {
        inner: source.as_mut(),
        decoded: 0,
    };
    let result = sample_frames(&mut counted, sampler, |batch| {
        branch.batches += 1;
        branch.frames_sampled += batch.len() as u64;
        branch.absorb(captioner.caption(batch));
        Ok(())
    });
    branch.frames_decoded = counted.decoded;

    if let Err(e) = result {
        warn!(
            error = %e,
            captions_kept = branch.captions.len(),
            "Visual analysis stopped early"
        );
        branch.error = Some(e.to_string());
    }
    branch.elapsed_ms = elapsed_ms(start);
    branch
}

fn run_audio(path: &Path, has_audio_hint: Option<bool>, transcriber: &AudioTranscriber) -> (AudioSection, u64) {
    let start = Instant::now();
    let section = if has_audio_hint == Some(false) {
        debug!("Probe found no audio stream");
        AudioSection::NoAudioTrack
    } else {
        transcriber.transcribe(path)
    };
    (section, elapsed_ms(start))
}
