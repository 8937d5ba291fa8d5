//! whisper.cpp speech capability

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::{Result, SpeechOptions, SpeechSegment, SpeechTranscriber, TranscriptionError};

/// Decoding configuration for whisper.cpp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    /// Beam size (1 = greedy)
    pub beam_size: u8,
    /// Sampling temperature (0.0 = deterministic)
    pub temperature: f32,
    /// Segments whose no-speech probability exceeds this are discarded
    pub no_speech_threshold: f32,
    /// Inference threads
    pub threads: usize,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            beam_size: 5,
            temperature: 0.0,
            no_speech_threshold: 0.6,
            threads: 4,
        }
    }
}

impl WhisperConfig {
    pub fn validate(&self) -> Result<()> {
        if self.beam_size == 0 || self.beam_size > 10 {
            return Err(TranscriptionError::ModelLoadError(
                "beam_size must be between 1 and 10".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(TranscriptionError::ModelLoadError(
                "temperature must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Speech capability backed by a whisper.cpp model
pub struct WhisperTranscriber {
    // whisper.cpp state creation is not safe to run concurrently on one context
    context: Mutex<WhisperContext>,
    config: WhisperConfig,
}

impl WhisperTranscriber {
    /// Load a ggml model file
    pub fn load(model_path: &Path, config: WhisperConfig) -> Result<Self> {
        config.validate()?;
        if !model_path.exists() {
            return Err(TranscriptionError::ModelLoadError(format!(
                "Model file not found: {}",
                model_path.display()
            )));
        }

        info!(
            "Loading Whisper model from {} ({} threads)",
            model_path.display(),
            config.threads
        );
        let context = WhisperContext::new_with_params(
            model_path.to_str().ok_or_else(|| {
                TranscriptionError::ModelLoadError("Invalid path encoding".to_string())
            })?,
            WhisperContextParameters::default(),
        )
        .map_err(|e| TranscriptionError::ModelLoadError(e.to_string()))?;

        Ok(Self {
            context: Mutex::new(context),
            config,
        })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

fn build_params<'a>(config: &WhisperConfig, options: &'a SpeechOptions) -> FullParams<'a, 'a> {
    let strategy = if config.beam_size > 1 {
        SamplingStrategy::BeamSearch {
            beam_size: i32::from(config.beam_size),
            patience: 1.0,
        }
    } else {
        SamplingStrategy::Greedy { best_of: 1 }
    };

    let mut params = FullParams::new(strategy);
    params.set_n_threads(config.threads.max(1) as i32);
    params.set_language(Some(options.language.as_deref().unwrap_or("auto")));
    params.set_translate(false);
    params.set_temperature(config.temperature);
    if let Some(prompt) = options.initial_prompt.as_deref() {
        params.set_initial_prompt(prompt);
    }
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params
}

impl SpeechTranscriber for WhisperTranscriber {
    fn transcribe(&self, samples: &[f32], options: &SpeechOptions) -> Result<Vec<SpeechSegment>> {
        let context = self
            .context
            .lock()
            .map_err(|_| TranscriptionError::ContextError("Whisper context lock poisoned".to_string()))?;
        let mut state = context
            .create_state()
            .map_err(|e| TranscriptionError::ContextError(e.to_string()))?;

        let params = build_params(&self.config, options);
        state
            .full(params, samples)
            .map_err(|e| TranscriptionError::TranscriptionFailed(e.to_string()))?;

        let mut segments = Vec::new();
        let mut skipped = 0usize;
        for segment in state.as_iter() {
            if segment.no_speech_probability() > self.config.no_speech_threshold {
                skipped += 1;
                continue;
            }
            // whisper.cpp timestamps are in 10ms units
            segments.push(SpeechSegment {
                start: segment.start_timestamp() as f64 / 100.0,
                end: segment.end_timestamp() as f64 / 100.0,
                text: segment.to_string().trim().to_string(),
            });
        }

        debug!(segments = segments.len(), skipped, "Whisper finished");
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = WhisperConfig::default();
        assert_eq!(config.beam_size, 5);
        assert_eq!(config.temperature, 0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = WhisperConfig {
            beam_size: 0,
            ..WhisperConfig::default()
        };
        assert!(config.validate().is_err());

        let config = WhisperConfig {
            temperature: 1.5,
            ..WhisperConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_model() {
        let result = WhisperTranscriber::load(
            Path::new("/nonexistent/ggml-base.bin"),
            WhisperConfig::default(),
        );
        assert!(matches!(result, Err(TranscriptionError::ModelLoadError(_))));
    }
}
