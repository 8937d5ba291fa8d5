/// Audio branch behaviour with scripted extractors and speech models
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use video_digest_audio_extractor::{AudioTrackExtractor, ScopedAudioFile};
use video_digest_common::{ProcessingError, Result as ProcessingResult, TranscriptSegment};
use video_digest_transcription::{
    AudioSection, AudioTranscriber, Result, SpeechOptions, SpeechSegment, SpeechTranscriber,
    TranscriptionError, EMPTY_TRANSCRIPT_MARKER, NO_AUDIO_MARKER,
};

enum Track {
    None,
    Tone { seconds: f32 },
    Silence { seconds: f32 },
    Broken,
}

struct FakeExtractor {
    dir: PathBuf,
    track: Track,
    created: Mutex<Vec<PathBuf>>,
}

impl FakeExtractor {
    fn new(dir: &Path, track: Track) -> Self {
        Self {
            dir: dir.to_path_buf(),
            track,
            created: Mutex::new(Vec::new()),
        }
    }

    fn write(&self, samples: impl Iterator<Item = i16>) -> ProcessingResult<ScopedAudioFile> {
        let file = ScopedAudioFile::create_in(&self.dir)?;
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(file.path(), spec)
            .map_err(|e| ProcessingError::Other(e.to_string()))?;
        for s in samples {
            writer
                .write_sample(s)
                .map_err(|e| ProcessingError::Other(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| ProcessingError::Other(e.to_string()))?;
        self.created.lock().unwrap().push(file.path().to_path_buf());
        Ok(file)
    }

    fn all_removed(&self) -> bool {
        self.created.lock().unwrap().iter().all(|p| !p.exists())
    }
}

impl AudioTrackExtractor for FakeExtractor {
    fn extract(&self, _input: &Path) -> ProcessingResult<Option<ScopedAudioFile>> {
        match self.track {
            Track::None => Ok(None),
            Track::Broken => Err(ProcessingError::FFmpegError("decoder exploded".to_string())),
            Track::Silence { seconds } => {
                let n = (seconds * 16000.0) as usize;
                self.write(std::iter::repeat(0i16).take(n)).map(Some)
            }
            Track::Tone { seconds } => {
                let n = (seconds * 16000.0) as usize;
                self.write((0..n).map(|i| {
                    let t = i as f32 / 16000.0;
                    ((t * 440.0 * std::f32::consts::TAU).sin() * 12000.0) as i16
                }))
                .map(Some)
            }
        }
    }
}

struct ScriptedSpeech {
    response: Mutex<Option<Result<Vec<SpeechSegment>>>>,
    calls: AtomicUsize,
    seen_options: Mutex<Option<SpeechOptions>>,
}

impl ScriptedSpeech {
    fn new(response: Result<Vec<SpeechSegment>>) -> Self {
        Self {
            response: Mutex::new(Some(response)),
            calls: AtomicUsize::new(0),
            seen_options: Mutex::new(None),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SpeechTranscriber for ScriptedSpeech {
    fn transcribe(&self, samples: &[f32], options: &SpeechOptions) -> Result<Vec<SpeechSegment>> {
        assert!(!samples.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.seen_options.lock().unwrap() = Some(options.clone());
        self.response
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

fn segment(start: f64, end: f64, text: &str) -> SpeechSegment {
    SpeechSegment {
        start,
        end,
        text: text.to_string(),
    }
}

#[test]
fn test_no_audio_track_skips_model() {
    let dir = tempfile::tempdir().unwrap();
    let speech = Arc::new(ScriptedSpeech::new(Ok(vec![segment(0.0, 1.0, "never")])));
    let transcriber = AudioTranscriber::new(
        Arc::new(FakeExtractor::new(dir.path(), Track::None)),
        speech.clone(),
    );

    let section = transcriber.transcribe(Path::new("silent_film.mp4"));
    assert_eq!(section, AudioSection::NoAudioTrack);
    assert_eq!(section.marker().as_deref(), Some(NO_AUDIO_MARKER));
    assert_eq!(speech.calls(), 0);
}

#[test]
fn test_transcript_segments_truncated_and_scratch_removed() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(FakeExtractor::new(dir.path(), Track::Tone { seconds: 2.0 }));
    let speech = Arc::new(ScriptedSpeech::new(Ok(vec![
        segment(0.0, 1.6, "hello there"),
        segment(1.6, 2.0, "general"),
    ])));
    let options = SpeechOptions {
        language: Some("en".to_string()),
        initial_prompt: Some("A conversation.".to_string()),
    };
    let transcriber = AudioTranscriber::new(extractor.clone(), speech.clone())
        .with_options(options.clone())
        .with_voice_filter(None);

    let section = transcriber.transcribe(Path::new("talk.mp4"));
    assert_eq!(
        section.segments(),
        &[
            TranscriptSegment {
                start_seconds: 0,
                end_seconds: 1,
                text: "hello there".to_string()
            },
            TranscriptSegment {
                start_seconds: 1,
                end_seconds: 2,
                text: "general".to_string()
            },
        ]
    );
    assert_eq!(speech.seen_options.lock().unwrap().as_ref(), Some(&options));
    assert!(extractor.all_removed());
}

#[test]
fn test_model_error_becomes_failure_marker() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(FakeExtractor::new(dir.path(), Track::Tone { seconds: 1.0 }));
    let speech = Arc::new(ScriptedSpeech::new(Err(TranscriptionError::TranscriptionFailed(
        "model crashed".to_string(),
    ))));
    let transcriber = AudioTranscriber::new(extractor.clone(), speech).with_voice_filter(None);

    let section = transcriber.transcribe(Path::new("talk.mp4"));
    match &section {
        AudioSection::Failed(reason) => assert!(reason.contains("model crashed")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(section.marker().unwrap().starts_with("(audio transcription failed"));
    assert!(extractor.all_removed());
}

#[test]
fn test_extraction_error_becomes_failure_marker() {
    let dir = tempfile::tempdir().unwrap();
    let speech = Arc::new(ScriptedSpeech::new(Ok(Vec::new())));
    let transcriber = AudioTranscriber::new(
        Arc::new(FakeExtractor::new(dir.path(), Track::Broken)),
        speech.clone(),
    );

    let section = transcriber.transcribe(Path::new("broken.mp4"));
    assert!(matches!(section, AudioSection::Failed(ref r) if r.contains("decoder exploded")));
    assert_eq!(speech.calls(), 0);
}

#[test]
fn test_no_recognized_speech_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let speech = Arc::new(ScriptedSpeech::new(Ok(vec![segment(0.0, 1.0, "  ")])));
    let transcriber = AudioTranscriber::new(
        Arc::new(FakeExtractor::new(dir.path(), Track::Tone { seconds: 1.0 })),
        speech,
    )
    .with_voice_filter(None);

    let section = transcriber.transcribe(Path::new("music.mp4"));
    assert_eq!(section, AudioSection::Empty);
    assert_eq!(section.marker().as_deref(), Some(EMPTY_TRANSCRIPT_MARKER));
}

#[test]
fn test_silence_filtered_before_model() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Arc::new(FakeExtractor::new(dir.path(), Track::Silence { seconds: 3.0 }));
    let speech = Arc::new(ScriptedSpeech::new(Ok(vec![segment(0.0, 3.0, "hallucination")])));
    let transcriber = AudioTranscriber::new(extractor.clone(), speech.clone());

    let section = transcriber.transcribe(Path::new("quiet.mp4"));
    assert_eq!(section, AudioSection::Empty);
    assert_eq!(speech.calls(), 0);
    assert!(extractor.all_removed());
}
