use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use video_digest_audio_extractor::{load_wav_samples, AudioTrackExtractor};
use video_digest_common::{truncate_seconds, TranscriptSegment};

use crate::vad::{silence_outside, VoiceFilter};
use crate::{
    AudioSection, Result, SpeechOptions, SpeechSegment, SpeechTranscriber, TranscriptionError,
    SPEECH_SAMPLE_RATE,
};

/// Produces the audio section of a report for one video
#[derive(Clone)]
pub struct AudioTranscriber {
    extractor: Arc<dyn AudioTrackExtractor>,
    speech: Arc<dyn SpeechTranscriber>,
    options: SpeechOptions,
    voice_filter: Option<VoiceFilter>,
}

impl AudioTranscriber {
    pub fn new(extractor: Arc<dyn AudioTrackExtractor>, speech: Arc<dyn SpeechTranscriber>) -> Self {
        Self {
            extractor,
            speech,
            options: SpeechOptions::default(),
            voice_filter: Some(VoiceFilter::default()),
        }
    }

    pub fn with_options(mut self, options: SpeechOptions) -> Self {
        self.options = options;
        self
    }

    /// `None` sends the whole track to the model
    pub fn with_voice_filter(mut self, voice_filter: Option<VoiceFilter>) -> Self {
        self.voice_filter = voice_filter;
        self
    }

    /// Transcribe the audio track of `video_path`. Never fails.
    pub fn transcribe(&self, video_path: &Path) -> AudioSection {
        let start = Instant::now();

        let audio = match self.extractor.extract(video_path) {
            Ok(Some(audio)) => audio,
            Ok(None) => {
                info!(path = %video_path.display(), "No audio track");
                return AudioSection::NoAudioTrack;
            }
            Err(e) => {
                warn!(path = %video_path.display(), error = %e, "Audio extraction failed");
                return AudioSection::Failed(format!("audio extraction failed: {e}"));
            }
        };

        let result = self.transcribe_wav(audio.path());
        let scratch = audio.path().to_path_buf();
        if let Err(e) = audio.remove() {
            warn!(path = %scratch.display(), error = %e, "Failed to remove scratch audio");
        }

        let section = match result {
            Ok(segments) if segments.is_empty() => AudioSection::Empty,
            Ok(segments) => AudioSection::Transcript(segments),
            Err(e) => {
                warn!(path = %video_path.display(), error = %e, "Transcription failed");
                AudioSection::Failed(e.to_string())
            }
        };

        info!(
            segments = section.segments().len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Audio branch finished"
        );
        section
    }

    fn transcribe_wav(&self, wav_path: &Path) -> Result<Vec<TranscriptSegment>> {
        let audio = load_wav_samples(wav_path)?;
        if audio.sample_rate != SPEECH_SAMPLE_RATE {
            return Err(TranscriptionError::AudioLoadError(format!(
                "Expected {SPEECH_SAMPLE_RATE}Hz sample rate, got {}Hz",
                audio.sample_rate
            )));
        }
        if audio.samples.is_empty() {
            return Ok(Vec::new());
        }

        let samples = match &self.voice_filter {
            Some(filter) => {
                let ranges = filter.speech_ranges(&audio.samples, audio.sample_rate)?;
                if ranges.is_empty() {
                    debug!("No speech detected, skipping model");
                    return Ok(Vec::new());
                }
                silence_outside(&audio.samples, &ranges)
            }
            None => audio.samples,
        };

        let speech = Arc::clone(&self.speech);
        let options = &self.options;
        let raw = panic::catch_unwind(AssertUnwindSafe(|| speech.transcribe(&samples, options)))
            .map_err(|_| TranscriptionError::TranscriptionFailed("speech model panicked".to_string()))??;

        Ok(to_transcript(raw))
    }
}

/// Trim text, drop empty segments, truncate times and order by start
fn to_transcript(raw: Vec<SpeechSegment>) -> Vec<TranscriptSegment> {
    let mut segments: Vec<TranscriptSegment> = raw
        .into_iter()
        .filter_map(|segment| {
            let text = segment.text.trim();
            if text.is_empty() {
                return None;
            }
            let start_seconds = truncate_seconds(segment.start);
            Some(TranscriptSegment {
                start_seconds,
                end_seconds: truncate_seconds(segment.end).max(start_seconds),
                text: text.to_string(),
            })
        })
        .collect();
    segments.sort_by_key(|s| s.start_seconds);
    segments
}
