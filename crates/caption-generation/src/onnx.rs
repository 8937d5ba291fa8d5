//! BLIP-style captioning through ONNX Runtime
//!
//! The exported graph takes `pixel_values` `[batch, 3, size, size]`,
//! `input_ids` and `attention_mask` `[batch, seq]` and returns `logits`
//! `[batch, seq, vocab]`. Decoding is greedy and runs the whole batch through
//! each step together.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array2, Array4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::{CaptionError, VisionCaptioner};

// ImageNet statistics used by BLIP's image processor
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Configuration for the ONNX captioner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnnxCaptionConfig {
    /// Input image size (384 for BLIP)
    pub input_size: u32,
    /// Maximum tokens generated per frame
    pub max_new_tokens: usize,
    /// Intra-op threads for the session
    pub intra_threads: usize,
    /// Feed the instruction to the decoder as a text prefix. Disable for
    /// captioning models that were not trained to follow prompts.
    pub condition_on_instruction: bool,
}

impl Default for OnnxCaptionConfig {
    fn default() -> Self {
        Self {
            input_size: 384,
            max_new_tokens: 128,
            intra_threads: 1,
            condition_on_instruction: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SpecialTokens {
    bos: u32,
    eos: u32,
    pad: u32,
}

/// Vision-language captioner backed by an ONNX session
pub struct OnnxVisionCaptioner {
    tokenizer: Tokenizer,
    // Session::run needs exclusive access
    session: Mutex<Session>,
    tokens: SpecialTokens,
    config: OnnxCaptionConfig,
}

impl OnnxVisionCaptioner {
    /// Load tokenizer and ONNX session
    ///
    /// # Errors
    /// Returns error if either file is missing or cannot be loaded
    pub fn load(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        config: OnnxCaptionConfig,
    ) -> Result<Self, CaptionError> {
        let model_path = model_path.as_ref();
        let tokenizer_path = tokenizer_path.as_ref();

        if config.input_size == 0 || config.max_new_tokens == 0 {
            return Err(CaptionError::InvalidConfig(
                "input_size and max_new_tokens must be positive".to_string(),
            ));
        }
        if !model_path.exists() {
            return Err(CaptionError::ModelLoad(format!(
                "Model file not found: {}",
                model_path.display()
            )));
        }

        info!("Loading tokenizer from {:?}", tokenizer_path);
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| CaptionError::ModelLoad(format!("Failed to load tokenizer: {e}")))?;

        info!(
            "Loading ONNX model from {:?} ({} intra-op threads)",
            model_path, config.intra_threads
        );
        let session = Session::builder()
            .map_err(|e| CaptionError::ModelLoad(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| CaptionError::ModelLoad(e.to_string()))?
            .with_intra_threads(config.intra_threads.max(1))
            .map_err(|e| CaptionError::ModelLoad(e.to_string()))?
            .with_memory_pattern(true)
            .map_err(|e| CaptionError::ModelLoad(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| CaptionError::ModelLoad(e.to_string()))?;

        // BERT vocabulary ids as fallbacks
        let tokens = SpecialTokens {
            bos: tokenizer.token_to_id("[CLS]").unwrap_or(101),
            eos: tokenizer.token_to_id("[SEP]").unwrap_or(102),
            pad: tokenizer.token_to_id("[PAD]").unwrap_or(0),
        };
        debug!(
            "Special tokens: BOS={}, EOS={}, PAD={}",
            tokens.bos, tokens.eos, tokens.pad
        );

        Ok(Self {
            tokenizer,
            session: Mutex::new(session),
            tokens,
            config,
        })
    }

    fn prompt_ids(&self, instruction: &str) -> Result<Vec<i64>, CaptionError> {
        let mut ids = vec![i64::from(self.tokens.bos)];
        if self.config.condition_on_instruction && !instruction.trim().is_empty() {
            let encoding = self
                .tokenizer
                .encode(instruction, false)
                .map_err(|e| CaptionError::InvalidConfig(format!("Failed to tokenize instruction: {e}")))?;
            ids.extend(encoding.get_ids().iter().map(|&id| i64::from(id)));
        }
        Ok(ids)
    }

    fn generate_greedy(
        &self,
        pixel_values: &Array4<f32>,
        prompt: &[i64],
    ) -> Result<Vec<Vec<u32>>, CaptionError> {
        let batch_size = pixel_values.shape()[0];
        let mut decoder = GreedyBatch::new(batch_size, prompt, self.tokens);

        let mut session = self
            .session
            .lock()
            .map_err(|_| CaptionError::Runtime("Caption session lock poisoned".to_string()))?;

        for step in 0..self.config.max_new_tokens {
            let (input_ids, attention_mask) = decoder.inputs()?;
            let seq_len = input_ids.shape()[1];

            let pixel_values_tensor = Value::from_array(pixel_values.clone())
                .map_err(|e| CaptionError::InvalidOutput(format!("Failed to create pixel_values tensor: {e}")))?;
            let input_ids_tensor = Value::from_array(input_ids)
                .map_err(|e| CaptionError::InvalidOutput(format!("Failed to create input_ids tensor: {e}")))?;
            let attention_mask_tensor = Value::from_array(attention_mask)
                .map_err(|e| CaptionError::InvalidOutput(format!("Failed to create attention_mask tensor: {e}")))?;

            let outputs = session
                .run(ort::inputs![
                    "pixel_values" => pixel_values_tensor,
                    "input_ids" => input_ids_tensor,
                    "attention_mask" => attention_mask_tensor,
                ])
                .map_err(|e| CaptionError::Runtime(e.to_string()))?;

            let (logits_shape, logits_data) = outputs["logits"]
                .try_extract_tensor::<f32>()
                .map_err(|e| CaptionError::InvalidOutput(format!("Failed to extract logits: {e}")))?;

            if logits_shape.len() != 3
                || logits_shape[0] as usize != batch_size
                || logits_shape[1] as usize != seq_len
            {
                return Err(CaptionError::InvalidOutput(format!(
                    "Invalid logits shape: {logits_shape:?}"
                )));
            }
            let vocab_size = logits_shape[2] as usize;

            let next_tokens = (0..batch_size)
                .map(|row| {
                    last_position_logits(logits_data, row, seq_len, vocab_size)
                        .and_then(argmax)
                        .map(|id| id as u32)
                        .ok_or_else(|| CaptionError::InvalidOutput("No valid token found".to_string()))
                })
                .collect::<Result<Vec<u32>, _>>()?;

            if decoder.advance(&next_tokens) {
                debug!("All rows finished after {} steps", step + 1);
                break;
            }
        }

        Ok(decoder.into_generated())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, CaptionError> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| CaptionError::InvalidOutput(format!("Failed to decode tokens: {e}")))
    }
}

impl VisionCaptioner for OnnxVisionCaptioner {
    fn caption_batch(&self, images: &[RgbImage], instruction: &str) -> Result<Vec<String>, CaptionError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let pixel_values = preprocess_batch(images, self.config.input_size)?;
        let prompt = self.prompt_ids(instruction)?;
        let generated = self.generate_greedy(&pixel_values, &prompt)?;

        generated.iter().map(|ids| self.decode(ids)).collect()
    }
}

/// Per-row decoding state for batched greedy generation.
///
/// All rows share the prompt and grow in lockstep; rows that emitted EOS are
/// padded until every row is done.
#[derive(Debug)]
struct GreedyBatch {
    sequences: Vec<Vec<i64>>,
    generated: Vec<Vec<u32>>,
    finished: Vec<bool>,
    tokens: SpecialTokens,
}

impl GreedyBatch {
    fn new(batch_size: usize, prompt: &[i64], tokens: SpecialTokens) -> Self {
        Self {
            sequences: vec![prompt.to_vec(); batch_size],
            generated: vec![Vec::new(); batch_size],
            finished: vec![false; batch_size],
            tokens,
        }
    }

    fn inputs(&self) -> Result<(Array2<i64>, Array2<i64>), CaptionError> {
        let rows = self.sequences.len();
        let seq_len = self.sequences.first().map_or(0, Vec::len);
        let flat: Vec<i64> = self.sequences.iter().flatten().copied().collect();

        let input_ids = Array2::from_shape_vec((rows, seq_len), flat)
            .map_err(|e| CaptionError::InvalidOutput(format!("Failed to create input_ids array: {e}")))?;
        let attention_mask = Array2::from_elem((rows, seq_len), 1i64);
        Ok((input_ids, attention_mask))
    }

    /// Append one token per row. Returns true once every row has finished.
    fn advance(&mut self, next_tokens: &[u32]) -> bool {
        for (row, &token) in next_tokens.iter().enumerate() {
            if self.finished[row] || token == self.tokens.eos {
                self.finished[row] = true;
                self.sequences[row].push(i64::from(self.tokens.pad));
            } else {
                self.generated[row].push(token);
                self.sequences[row].push(i64::from(token));
            }
        }
        self.finished.iter().all(|&done| done)
    }

    fn into_generated(self) -> Vec<Vec<u32>> {
        self.generated
    }
}

fn last_position_logits(logits: &[f32], row: usize, seq_len: usize, vocab_size: usize) -> Option<&[f32]> {
    if seq_len == 0 || vocab_size == 0 {
        return None;
    }
    let offset = (row * seq_len + seq_len - 1) * vocab_size;
    logits.get(offset..offset + vocab_size)
}

fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(idx, _)| idx)
}

/// Resize and normalize to CHW
fn preprocess_image(image: &RgbImage, size: u32) -> Vec<f32> {
    let resized = if image.dimensions() == (size, size) {
        image.clone()
    } else {
        imageops::resize(image, size, size, FilterType::Triangle)
    };

    let plane = (size * size) as usize;
    let mut chw = vec![0.0f32; plane * 3];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let idx = (y * size + x) as usize;
        for c in 0..3 {
            chw[c * plane + idx] = (f32::from(pixel[c]) / 255.0 - MEAN[c]) / STD[c];
        }
    }
    chw
}

/// Preprocess a batch in parallel into `[batch, 3, size, size]`
fn preprocess_batch(images: &[RgbImage], size: u32) -> Result<Array4<f32>, CaptionError> {
    let per_image: Vec<Vec<f32>> = images
        .par_iter()
        .map(|image| preprocess_image(image, size))
        .collect();
    let flat: Vec<f32> = per_image.into_iter().flatten().collect();

    let side = size as usize;
    Array4::from_shape_vec((images.len(), 3, side, side), flat)
        .map_err(|e| CaptionError::ImageError(format!("Failed to build pixel tensor: {e}")))
}
