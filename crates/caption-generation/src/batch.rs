use image::imageops::{self, FilterType};
use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use video_digest_common::{Caption, FrameBatch};

use crate::{VisionCaptioner, DEFAULT_CAPTION_INSTRUCTION, DEFAULT_MAX_PIXELS_PER_FRAME, UNRECOGNIZED_PLACEHOLDER};

/// A batch that produced no captions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Timestamps of the frames that were lost
    pub timestamps: Vec<u64>,
    pub reason: String,
}

/// Result of captioning one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every frame got a model description
    Complete(Vec<Caption>),
    /// Every frame got a caption, but those at `substituted` (batch positions)
    /// carry the placeholder
    Partial {
        captions: Vec<Caption>,
        substituted: Vec<usize>,
    },
    /// The model call failed; the batch contributes nothing
    Failed(BatchFailure),
}

impl BatchOutcome {
    pub fn captions(&self) -> &[Caption] {
        match self {
            BatchOutcome::Complete(captions) | BatchOutcome::Partial { captions, .. } => captions,
            BatchOutcome::Failed(_) => &[],
        }
    }

    pub fn into_captions(self) -> Vec<Caption> {
        match self {
            BatchOutcome::Complete(captions) | BatchOutcome::Partial { captions, .. } => captions,
            BatchOutcome::Failed(_) => Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BatchOutcome::Failed(_))
    }
}

/// Captions frame batches through a shared [`VisionCaptioner`]
#[derive(Clone)]
pub struct BatchCaptioner {
    captioner: Arc<dyn VisionCaptioner>,
    instruction: String,
    max_pixels_per_frame: u64,
}

impl BatchCaptioner {
    pub fn new(captioner: Arc<dyn VisionCaptioner>) -> Self {
        Self {
            captioner,
            instruction: DEFAULT_CAPTION_INSTRUCTION.to_string(),
            max_pixels_per_frame: DEFAULT_MAX_PIXELS_PER_FRAME,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_max_pixels(mut self, max_pixels_per_frame: u64) -> Self {
        self.max_pixels_per_frame = max_pixels_per_frame;
        self
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Caption every frame of `batch` with a single model call
    pub fn caption(&self, batch: FrameBatch) -> BatchOutcome {
        if batch.is_empty() {
            return BatchOutcome::Complete(Vec::new());
        }

        let timestamps = batch.timestamps();
        let max_pixels = self.max_pixels_per_frame;
        let images: Vec<RgbImage> = batch
            .frames
            .into_par_iter()
            .map(|frame| fit_to_max_pixels(frame.image, max_pixels))
            .collect();

        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.captioner.caption_batch(&images, &self.instruction)
        }));

        let texts = match result {
            Ok(Ok(texts)) => texts,
            Ok(Err(e)) => {
                warn!(timestamps = ?timestamps, error = %e, "Caption batch failed");
                return BatchOutcome::Failed(BatchFailure {
                    timestamps,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(timestamps = ?timestamps, "Captioner panicked");
                return BatchOutcome::Failed(BatchFailure {
                    timestamps,
                    reason: "captioner panicked".to_string(),
                });
            }
        };

        if texts.len() != timestamps.len() {
            warn!(
                expected = timestamps.len(),
                received = texts.len(),
                "Caption count does not match batch size"
            );
        }

        let mut substituted = Vec::new();
        let captions: Vec<Caption> = timestamps
            .iter()
            .enumerate()
            .map(|(position, &timestamp_seconds)| {
                let text = texts
                    .get(position)
                    .map(|raw| normalize_caption_text(raw))
                    .filter(|text| !text.is_empty())
                    .unwrap_or_else(|| {
                        substituted.push(position);
                        UNRECOGNIZED_PLACEHOLDER.to_string()
                    });
                Caption {
                    timestamp_seconds,
                    text,
                }
            })
            .collect();

        debug!(
            frames = captions.len(),
            substituted = substituted.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Captioned batch"
        );

        if substituted.is_empty() {
            BatchOutcome::Complete(captions)
        } else {
            BatchOutcome::Partial {
                captions,
                substituted,
            }
        }
    }
}

/// Collapse line breaks and runs of whitespace into single spaces
pub fn normalize_caption_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Downscale `image`, keeping its aspect ratio, so that it has at most
/// `max_pixels` pixels. Images already within the bound are returned as is.
pub fn fit_to_max_pixels(image: RgbImage, max_pixels: u64) -> RgbImage {
    let (width, height) = image.dimensions();
    let pixels = u64::from(width) * u64::from(height);
    if max_pixels == 0 || pixels <= max_pixels {
        return image;
    }

    let scale = (max_pixels as f64 / pixels as f64).sqrt();
    let mut new_width = ((f64::from(width) * scale).floor() as u32).max(1);
    let mut new_height = ((f64::from(height) * scale).floor() as u32).max(1);
    // Floor on both sides can still land one row over on awkward ratios
    while u64::from(new_width) * u64::from(new_height) > max_pixels && new_width > 1 && new_height > 1 {
        if new_width >= new_height {
            new_width -= 1;
        } else {
            new_height -= 1;
        }
    }

    imageops::resize(&image, new_width, new_height, FilterType::Triangle)
}
