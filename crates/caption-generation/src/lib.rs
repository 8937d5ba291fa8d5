//! Batched frame captioning
//!
//! Sampled frames are described by a vision-language capability, one model
//! call per batch. [`BatchCaptioner`] bounds frame resolution, sends the fixed
//! instruction, substitutes a placeholder for empty outputs and reports the
//! result as a typed [`BatchOutcome`] so the caller decides whether to go on.
//!
//! The capability itself sits behind the [`VisionCaptioner`] trait. The
//! bundled implementation, [`OnnxVisionCaptioner`], runs a BLIP-style
//! encoder-decoder exported to ONNX with batched greedy decoding.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use video_digest_caption::{BatchCaptioner, OnnxCaptionConfig, OnnxVisionCaptioner};
//! use video_digest_common::{FrameBatch, SampledFrame};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let model = OnnxVisionCaptioner::load(
//!     "models/caption/blip.onnx",
//!     "models/caption/tokenizer.json",
//!     OnnxCaptionConfig::default(),
//! )?;
//! let captioner = BatchCaptioner::new(Arc::new(model));
//!
//! let frame = SampledFrame::new(0.0, image::open("frame.jpg")?.to_rgb8());
//! let outcome = captioner.caption(FrameBatch::new(vec![frame]));
//! for caption in outcome.captions() {
//!     println!("[{}s]: {}", caption.timestamp_seconds, caption.text);
//! }
//! # Ok(())
//! # }
//! ```

mod batch;
mod onnx;

use image::RgbImage;
use thiserror::Error;
use video_digest_common::ProcessingError;

pub use batch::{
    fit_to_max_pixels, normalize_caption_text, BatchCaptioner, BatchFailure, BatchOutcome,
};
pub use onnx::{OnnxCaptionConfig, OnnxVisionCaptioner};

/// Instruction sent with every batch
pub const DEFAULT_CAPTION_INSTRUCTION: &str = "Describe what is visible in this frame objectively and concisely. \
Do not speculate about anything that is not shown. If the content is unclear, say that it is unclear.";

/// Text used when the model returns nothing for a frame
pub const UNRECOGNIZED_PLACEHOLDER: &str = "content not recognized";

/// Default bound on pixels per frame sent to the model (768x768)
pub const DEFAULT_MAX_PIXELS_PER_FRAME: u64 = 768 * 768;

/// Errors that can occur during caption generation
#[derive(Error, Debug)]
pub enum CaptionError {
    #[error("Failed to load caption model: {0}")]
    ModelLoad(String),

    #[error("ONNX Runtime error: {0}")]
    Runtime(String),

    #[error("Image processing error: {0}")]
    ImageError(String),

    #[error("Invalid model output: {0}")]
    InvalidOutput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<CaptionError> for ProcessingError {
    fn from(err: CaptionError) -> Self {
        ProcessingError::Other(err.to_string())
    }
}

/// Vision-language capability: one description per image, positionally aligned
///
/// Implementations are shared across threads. A returned vector shorter than
/// `images` is tolerated by [`BatchCaptioner`]; missing positions receive the
/// placeholder.
pub trait VisionCaptioner: Send + Sync {
    fn caption_batch(&self, images: &[RgbImage], instruction: &str) -> Result<Vec<String>, CaptionError>;
}
