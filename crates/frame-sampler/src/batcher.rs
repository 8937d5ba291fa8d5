//! Accumulates sampled frames into fixed-size batches

use video_digest_common::{FrameBatch, SampledFrame};

/// Emits a batch every `batch_size` frames; [`FrameBatcher::finish`] flushes the rest
#[derive(Debug)]
pub struct FrameBatcher {
    batch_size: usize,
    pending: Vec<SampledFrame>,
}

impl FrameBatcher {
    /// `batch_size` of 0 is treated as 1
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            pending: Vec::with_capacity(batch_size),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, frame: SampledFrame) -> Option<FrameBatch> {
        self.pending.push(frame);
        if self.pending.len() >= self.batch_size {
            let frames = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
            Some(FrameBatch::new(frames))
        } else {
            None
        }
    }

    /// Remaining frames as a partial batch, if any
    pub fn finish(&mut self) -> Option<FrameBatch> {
        if self.pending.is_empty() {
            None
        } else {
            Some(FrameBatch::new(std::mem::take(&mut self.pending)))
        }
    }
}
