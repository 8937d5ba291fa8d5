//! Voice activity filtering before speech recognition
//!
//! Speech regions are found with WebRTC VAD on fixed frames, short pauses are
//! bridged, and everything outside the regions is silenced. Silencing instead
//! of cutting keeps model timestamps on the original timeline.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;
use webrtc_vad::{SampleRate, Vad, VadMode};

use crate::{Result, TranscriptionError};

/// VAD configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// 0 (least aggressive) to 3 (most aggressive)
    pub aggressiveness: u8,
    /// 10, 20 or 30
    pub frame_duration_ms: usize,
    /// Pauses shorter than this stay inside one speech region
    pub min_silence_ms: usize,
    /// Regions shorter than this are dropped
    pub min_speech_ms: usize,
    /// Context kept on both sides of a region
    pub speech_pad_ms: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            aggressiveness: 2,
            frame_duration_ms: 30,
            min_silence_ms: 500,
            min_speech_ms: 250,
            speech_pad_ms: 400,
        }
    }
}

/// Finds speech regions and silences the rest
#[derive(Debug, Clone, Default)]
pub struct VoiceFilter {
    config: VadConfig,
}

impl VoiceFilter {
    pub fn new(config: VadConfig) -> Self {
        Self { config }
    }

    /// Sample ranges containing speech, sorted and non-overlapping
    pub fn speech_ranges(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<Range<usize>>> {
        let vad_sample_rate = match sample_rate {
            8000 => SampleRate::Rate8kHz,
            16000 => SampleRate::Rate16kHz,
            32000 => SampleRate::Rate32kHz,
            48000 => SampleRate::Rate48kHz,
            _ => {
                return Err(TranscriptionError::VadError(format!(
                    "Unsupported sample rate: {sample_rate}Hz"
                )))
            }
        };
        if !matches!(self.config.frame_duration_ms, 10 | 20 | 30) {
            return Err(TranscriptionError::VadError(format!(
                "Unsupported frame duration: {}ms",
                self.config.frame_duration_ms
            )));
        }

        let vad_mode = match self.config.aggressiveness {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            _ => VadMode::VeryAggressive,
        };

        let mut vad = Vad::new_with_rate_and_mode(vad_sample_rate, vad_mode);
        let frame_size = sample_rate as usize * self.config.frame_duration_ms / 1000;
        let samples_i16: Vec<i16> = samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();

        let flags: Vec<bool> = samples_i16
            .chunks_exact(frame_size)
            .map(|frame| vad.is_voice_segment(frame).unwrap_or(false))
            .collect();

        let ms_to_samples = |ms: usize| sample_rate as usize * ms / 1000;
        let ranges = ranges_from_flags(
            &flags,
            frame_size,
            samples.len(),
            ms_to_samples(self.config.min_silence_ms),
            ms_to_samples(self.config.min_speech_ms),
            ms_to_samples(self.config.speech_pad_ms),
        );

        debug!(
            frames = flags.len(),
            voiced = flags.iter().filter(|&&v| v).count(),
            regions = ranges.len(),
            "VAD finished"
        );
        Ok(ranges)
    }
}

/// Turn per-frame voice flags into padded sample ranges.
///
/// Gaps shorter than `min_silence` are bridged, regions shorter than
/// `min_speech` dropped, and the survivors padded by `pad` and clipped to
/// `total_len`. Overlapping ranges after padding are merged.
pub fn ranges_from_flags(
    flags: &[bool],
    frame_size: usize,
    total_len: usize,
    min_silence: usize,
    min_speech: usize,
    pad: usize,
) -> Vec<Range<usize>> {
    let mut raw: Vec<Range<usize>> = Vec::new();
    let mut current: Option<usize> = None;
    for (idx, &voiced) in flags.iter().enumerate() {
        let frame_start = idx * frame_size;
        match (voiced, current) {
            (true, None) => current = Some(frame_start),
            (false, Some(start)) => {
                raw.push(start..frame_start);
                current = None;
            }
            _ => {}
        }
    }
    if let Some(start) = current {
        raw.push(start..(flags.len() * frame_size).min(total_len));
    }

    let mut bridged: Vec<Range<usize>> = Vec::with_capacity(raw.len());
    for range in raw {
        match bridged.last_mut() {
            Some(last) if range.start - last.end < min_silence => last.end = range.end,
            _ => bridged.push(range),
        }
    }

    let mut padded: Vec<Range<usize>> = Vec::with_capacity(bridged.len());
    for range in bridged.into_iter().filter(|r| r.len() >= min_speech) {
        let range = range.start.saturating_sub(pad)..(range.end + pad).min(total_len);
        match padded.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => padded.push(range),
        }
    }
    padded
}

/// Copy of `samples` with everything outside `ranges` set to zero
pub fn silence_outside(samples: &[f32], ranges: &[Range<usize>]) -> Vec<f32> {
    let mut masked = vec![0.0f32; samples.len()];
    for range in ranges {
        let end = range.end.min(samples.len());
        if range.start < end {
            masked[range.start..end].copy_from_slice(&samples[range.start..end]);
        }
    }
    masked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VadConfig::default();
        assert_eq!(config.min_silence_ms, 500);
        assert_eq!(config.frame_duration_ms, 30);
    }

    #[test]
    fn test_short_gaps_are_bridged() {
        // frame_size 10: voiced 0-30, gap 30-50, voiced 50-80
        let flags = [true, true, true, false, false, true, true, true];
        let ranges = ranges_from_flags(&flags, 10, 80, 30, 0, 0);
        assert_eq!(ranges, vec![0..80]);

        let ranges = ranges_from_flags(&flags, 10, 80, 20, 0, 0);
        assert_eq!(ranges, vec![0..30, 50..80]);
    }

    #[test]
    fn test_short_regions_dropped_and_padding_clipped() {
        let flags = [false, true, false, false, false, true, true, true, true, false];
        let ranges = ranges_from_flags(&flags, 10, 95, 10, 30, 15);
        assert_eq!(ranges, vec![35..95]);
    }

    #[test]
    fn test_padding_merges_neighbours() {
        let flags = [true, true, false, false, false, true, true];
        let ranges = ranges_from_flags(&flags, 10, 70, 10, 0, 15);
        assert_eq!(ranges, vec![0..70]);
    }

    #[test]
    fn test_no_voice() {
        assert!(ranges_from_flags(&[false; 20], 10, 200, 50, 0, 10).is_empty());
    }

    #[test]
    fn test_silence_outside() {
        let samples = [0.5f32; 6];
        let masked = silence_outside(&samples, &[1..3, 5..9]);
        assert_eq!(masked, vec![0.0, 0.5, 0.5, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_digital_silence_has_no_speech() {
        let filter = VoiceFilter::default();
        let ranges = filter.speech_ranges(&vec![0.0; 16000 * 2], 16000).unwrap();
        assert!(ranges.is_empty());
    }

    #[test]
    fn test_unsupported_sample_rate() {
        let filter = VoiceFilter::default();
        assert!(matches!(
            filter.speech_ranges(&[0.0; 100], 22050),
            Err(TranscriptionError::VadError(_))
        ));
    }
}
