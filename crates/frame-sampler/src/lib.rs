//! Adaptive frame sampling
//!
//! Decides which decoded frames are worth captioning. A frame is selected when
//! it differs enough from the last selected frame (scene change) or when too
//! much time has passed since the last selection, and never sooner than
//! `min_interval` after it.
//!
//! # Selection rule
//! For a frame at `t = frame_index / frame_rate`:
//! - `t - last < min_interval`: skipped without scoring
//! - first frame: always selected
//! - `score > scene_change_threshold` or `t - last >= max_interval`: selected
//!
//! The score is the mean absolute difference of 64x64 grayscale downsamples,
//! on the 0-255 scale.
//!
//! # Example
//! ```no_run
//! use video_digest_decoder::FfmpegFrameSource;
//! use video_digest_sampler::{sample_frames, SamplerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut source = FfmpegFrameSource::new("video.mp4", 25.0);
//! let stats = sample_frames(&mut source, &SamplerConfig::default(), |batch| {
//!     println!("batch of {} frames at {:?}", batch.len(), batch.timestamps());
//!     Ok(())
//! })?;
//! println!("sampled {} of {} frames", stats.frames_sampled, stats.frames_decoded);
//! # Ok(())
//! # }
//! ```

pub mod batcher;
pub mod score;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use video_digest_common::{FrameBatch, ProcessingError, Result, SampledFrame};
use video_digest_decoder::{DecodedFrame, FrameSource};

pub use batcher::FrameBatcher;
pub use score::{change_score, downsample_gray};

/// Errors specific to sampler configuration
#[derive(Error, Debug, PartialEq)]
pub enum SamplerConfigError {
    #[error("min_interval must be finite and >= 0, got {0}")]
    MinInterval(f64),

    #[error("max_interval must be > 0 and >= min_interval ({min}), got {max}")]
    MaxInterval { min: f64, max: f64 },

    #[error("scene_change_threshold must be within 0-255, got {0}")]
    Threshold(f64),

    #[error("batch_size must be at least 1")]
    BatchSize,

    #[error("downsample_size must be at least 1")]
    DownsampleSize,
}

impl From<SamplerConfigError> for ProcessingError {
    fn from(err: SamplerConfigError) -> Self {
        ProcessingError::InvalidConfig(err.to_string())
    }
}

/// Configuration for adaptive sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Minimum seconds between two selected frames
    /// Default: 2.0
    pub min_interval: f64,

    /// Maximum seconds without a selection; a frame is forced once this elapses
    /// Default: 8.0
    pub max_interval: f64,

    /// Mean absolute grayscale difference (0-255) above which a frame counts
    /// as a scene change
    /// Default: 30.0
    pub scene_change_threshold: f64,

    /// Frames captioned per model call
    /// Default: 4
    pub batch_size: usize,

    /// Side of the square grayscale thumbnail used for scoring
    /// Default: 64
    pub downsample_size: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            min_interval: 2.0,
            max_interval: 8.0,
            scene_change_threshold: 30.0,
            batch_size: 4,
            downsample_size: 64,
        }
    }
}

impl SamplerConfig {
    /// Check ranges before a run starts
    pub fn validate(&self) -> std::result::Result<(), SamplerConfigError> {
        if !self.min_interval.is_finite() || self.min_interval < 0.0 {
            return Err(SamplerConfigError::MinInterval(self.min_interval));
        }
        if !self.max_interval.is_finite()
            || self.max_interval <= 0.0
            || self.max_interval < self.min_interval
        {
            return Err(SamplerConfigError::MaxInterval {
                min: self.min_interval,
                max: self.max_interval,
            });
        }
        if !(0.0..=255.0).contains(&self.scene_change_threshold) {
            return Err(SamplerConfigError::Threshold(self.scene_change_threshold));
        }
        if self.batch_size == 0 {
            return Err(SamplerConfigError::BatchSize);
        }
        if self.downsample_size == 0 {
            return Err(SamplerConfigError::DownsampleSize);
        }
        Ok(())
    }
}

/// Why a frame was selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    FirstFrame,
    SceneChange,
    IntervalElapsed,
}

/// Mutable per-job sampling state
#[derive(Debug, Default)]
pub struct SamplingState {
    /// Time of the last selected frame; `None` before the first selection
    pub last_analyzed_time: Option<f64>,
    pub previous_downsampled_gray: Option<image::GrayImage>,
    /// Frames observed so far
    pub frame_index: u64,
}

/// Applies the selection rule to a stream of frames
#[derive(Debug)]
pub struct AdaptiveSampler {
    config: SamplerConfig,
    state: SamplingState,
}

impl AdaptiveSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            state: SamplingState::default(),
        }
    }

    pub fn state(&self) -> &SamplingState {
        &self.state
    }

    /// Decide on one frame at time `time_seconds`.
    ///
    /// Returns the reason when the frame is selected. Frames must be observed
    /// in capture order.
    pub fn observe(&mut self, time_seconds: f64, image: &image::RgbImage) -> Option<SelectionReason> {
        self.state.frame_index += 1;

        let elapsed = self
            .state
            .last_analyzed_time
            .map_or(f64::INFINITY, |last| time_seconds - last);
        if elapsed < self.config.min_interval {
            return None;
        }

        let gray = downsample_gray(image, self.config.downsample_size);
        let reason = match &self.state.previous_downsampled_gray {
            None => Some(SelectionReason::FirstFrame),
            Some(previous) => {
                let score = change_score(previous, &gray);
                if score > self.config.scene_change_threshold {
                    debug!(t = time_seconds, score, "Scene change");
                    Some(SelectionReason::SceneChange)
                } else if elapsed >= self.config.max_interval {
                    Some(SelectionReason::IntervalElapsed)
                } else {
                    None
                }
            }
        };

        if reason.is_some() {
            self.state.last_analyzed_time = Some(time_seconds);
            self.state.previous_downsampled_gray = Some(gray);
        }
        reason
    }

    /// Observe a decoded frame and return it as a [`SampledFrame`] when selected
    pub fn sample(&mut self, frame: DecodedFrame) -> Option<(SampledFrame, SelectionReason)> {
        let reason = self.observe(frame.time_seconds, &frame.image)?;
        Some((SampledFrame::new(frame.time_seconds, frame.image), reason))
    }
}

/// Counters for one sampling run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerStats {
    pub frames_decoded: u64,
    pub frames_sampled: u64,
    pub scene_changes: u64,
    pub interval_selections: u64,
    pub batches: u64,
}

/// Drive `source` to the end, handing each full batch to `on_batch` as soon as
/// it fills and the remainder after the last frame.
///
/// `on_batch` runs on the decoding thread; decoding resumes only after it
/// returns. An error from `on_batch` aborts the run. A source error stops
/// decoding, but frames already selected are still delivered before the
/// error is returned.
pub fn sample_frames<S, F>(source: &mut S, config: &SamplerConfig, mut on_batch: F) -> Result<SamplerStats>
where
    S: FrameSource + ?Sized,
    F: FnMut(FrameBatch) -> Result<()>,
{
    config.validate()?;

    let mut sampler = AdaptiveSampler::new(config.clone());
    let mut batcher = FrameBatcher::new(config.batch_size);
    let mut stats = SamplerStats::default();
    let mut delivery_failed = false;

    let decoded = source.for_each_frame(&mut |frame| {
        let Some((sampled, reason)) = sampler.sample(frame) else {
            return Ok(());
        };
        stats.frames_sampled += 1;
        match reason {
            SelectionReason::SceneChange => stats.scene_changes += 1,
            SelectionReason::IntervalElapsed => stats.interval_selections += 1,
            SelectionReason::FirstFrame => {}
        }
        if let Some(batch) = batcher.push(sampled) {
            stats.batches += 1;
            on_batch(batch).inspect_err(|_| delivery_failed = true)?;
        }
        Ok(())
    });
    let decoded = match decoded {
        Err(e) if delivery_failed => return Err(e),
        other => other,
    };

    if let Some(batch) = batcher.finish() {
        stats.batches += 1;
        on_batch(batch)?;
    }
    stats.frames_decoded = match decoded {
        Ok(count) => count,
        Err(e) => {
            warn!(error = %e, sampled = stats.frames_sampled, "Decoding stopped early");
            return Err(e);
        }
    };

    info!(
        decoded = stats.frames_decoded,
        sampled = stats.frames_sampled,
        scene_changes = stats.scene_changes,
        batches = stats.batches,
        "Sampling finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(value: u8) -> RgbImage {
        RgbImage::from_pixel(32, 32, Rgb([value, value, value]))
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = SamplerConfig::default();
        assert_eq!(config.min_interval, 2.0);
        assert_eq!(config.batch_size, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let bad_max = SamplerConfig {
            min_interval: 5.0,
            max_interval: 3.0,
            ..SamplerConfig::default()
        };
        assert!(matches!(
            bad_max.validate(),
            Err(SamplerConfigError::MaxInterval { .. })
        ));

        let bad_threshold = SamplerConfig {
            scene_change_threshold: 300.0,
            ..SamplerConfig::default()
        };
        assert_eq!(
            bad_threshold.validate(),
            Err(SamplerConfigError::Threshold(300.0))
        );

        let bad_batch = SamplerConfig {
            batch_size: 0,
            ..SamplerConfig::default()
        };
        assert_eq!(bad_batch.validate(), Err(SamplerConfigError::BatchSize));

        let bad_min = SamplerConfig {
            min_interval: -1.0,
            ..SamplerConfig::default()
        };
        assert_eq!(bad_min.validate(), Err(SamplerConfigError::MinInterval(-1.0)));
    }

    #[test]
    fn test_first_frame_forced() {
        let mut sampler = AdaptiveSampler::new(SamplerConfig::default());
        assert_eq!(sampler.observe(0.0, &solid(10)), Some(SelectionReason::FirstFrame));
        assert_eq!(sampler.state().last_analyzed_time, Some(0.0));
        assert!(sampler.state().previous_downsampled_gray.is_some());
    }

    #[test]
    fn test_min_interval_blocks_scene_change() {
        let mut sampler = AdaptiveSampler::new(SamplerConfig::default());
        sampler.observe(0.0, &solid(0));
        assert_eq!(sampler.observe(1.0, &solid(255)), None);
        assert_eq!(sampler.observe(2.0, &solid(255)), Some(SelectionReason::SceneChange));
    }

    #[test]
    fn test_max_interval_forces_selection() {
        let mut sampler = AdaptiveSampler::new(SamplerConfig::default());
        sampler.observe(0.0, &solid(50));
        assert_eq!(sampler.observe(7.9, &solid(50)), None);
        assert_eq!(
            sampler.observe(8.0, &solid(50)),
            Some(SelectionReason::IntervalElapsed)
        );
        assert_eq!(sampler.state().last_analyzed_time, Some(8.0));
    }

    #[test]
    fn test_score_equal_to_threshold_is_not_a_change() {
        let config = SamplerConfig {
            scene_change_threshold: 30.0,
            ..SamplerConfig::default()
        };
        let mut sampler = AdaptiveSampler::new(config);
        sampler.observe(0.0, &solid(100));
        assert_eq!(sampler.observe(3.0, &solid(130)), None);
        assert_eq!(sampler.observe(4.0, &solid(131)), Some(SelectionReason::SceneChange));
    }

    #[test]
    fn test_snapshot_tracks_last_selection_not_last_frame() {
        let mut sampler = AdaptiveSampler::new(SamplerConfig::default());
        sampler.observe(0.0, &solid(0));
        // Gradual drift below the threshold between consecutive frames still
        // accumulates against the stored snapshot
        assert_eq!(sampler.observe(2.0, &solid(20)), None);
        assert_eq!(sampler.observe(3.0, &solid(40)), Some(SelectionReason::SceneChange));
    }

    #[test]
    fn test_frame_index_counts_every_observation() {
        let mut sampler = AdaptiveSampler::new(SamplerConfig::default());
        for i in 0..5 {
            sampler.observe(f64::from(i) * 0.5, &solid(0));
        }
        assert_eq!(sampler.state().frame_index, 5);
    }
}
