//! The per-video report and its text rendering

use serde::Serialize;
use std::fmt;
use uuid::Uuid;
use video_digest_caption::BatchFailure;
use video_digest_common::Caption;
use video_digest_transcription::AudioSection;

pub const REPORT_TITLE: &str = "# Video Analysis Report";
pub const VISUAL_HEADER: &str = "## 1. Visual Summary";
pub const AUDIO_HEADER: &str = "## 2. Audio Transcript";

/// Counters and timings collected while analyzing one video
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisStats {
    pub frames_decoded: u64,
    pub frames_sampled: u64,
    pub batches: u64,
    pub failed_batches: Vec<BatchFailure>,
    /// Captions that carry the placeholder instead of a model description
    pub substituted_captions: usize,
    /// Why the visual branch stopped early, if it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_error: Option<String>,
    pub visual_ms: u64,
    pub audio_ms: u64,
}

/// Result of analyzing one video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub job_id: Uuid,
    pub file_name: String,
    /// Ordered by timestamp
    pub captions: Vec<Caption>,
    pub audio: AudioSection,
    pub stats: AnalysisStats,
}

impl Report {
    /// Human-readable report.
    ///
    /// ```text
    /// # Video Analysis Report
    /// File: clip.mp4
    ///
    /// ## 1. Visual Summary
    /// [0s]: a kitchen with a window
    ///
    /// ## 2. Audio Transcript
    /// [0s->2s] hello there
    /// ```
    pub fn render(&self) -> String {
        self.to_string()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{REPORT_TITLE}")?;
        writeln!(f, "File: {}", self.file_name)?;
        writeln!(f)?;
        writeln!(f, "{VISUAL_HEADER}")?;
        for caption in &self.captions {
            writeln!(f, "[{}s]: {}", caption.timestamp_seconds, caption.text)?;
        }
        writeln!(f)?;
        writeln!(f, "{AUDIO_HEADER}")?;
        if let Some(marker) = self.audio.marker() {
            return writeln!(f, "{marker}");
        }
        for segment in self.audio.segments() {
            writeln!(
                f,
                "[{}s->{}s] {}",
                segment.start_seconds, segment.end_seconds, segment.text
            )?;
        }
        Ok(())
    }
}
