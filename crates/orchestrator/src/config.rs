//! Analysis configuration and the YAML file that carries it

use serde::{Deserialize, Serialize};
use std::path::Path;
use video_digest_caption::{DEFAULT_CAPTION_INSTRUCTION, DEFAULT_MAX_PIXELS_PER_FRAME};
use video_digest_lifecycle::LifecycleConfig;
use video_digest_sampler::SamplerConfig;
use video_digest_transcription::{SpeechOptions, VadConfig};

use crate::AnalysisError;

/// Smallest frame the captioner accepts (one 28x28 vision patch grid)
pub const MIN_PIXELS_PER_FRAME: u64 = 28 * 28;

/// Per-request analysis parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Seconds; no two captioned frames are closer than this
    pub min_interval: f64,
    /// Seconds; a frame is captioned at least this often
    pub max_interval: f64,
    /// Frames per captioning call
    pub batch_size: usize,
    /// Frames above this pixel count are downscaled before captioning
    pub max_pixels_per_frame: u64,
    /// Mean grayscale difference (0-255) that counts as a scene change
    pub scene_change_threshold: f64,
    /// ISO 639-1 language of the speech, `None` to auto-detect
    pub audio_language_hint: Option<String>,
    /// Side of the grayscale thumbnail used for change detection
    pub downsample_size: u32,
    pub caption_instruction: String,
    /// Decoder priming text for speech recognition
    pub initial_prompt: Option<String>,
    /// `None` disables voice activity filtering
    pub voice_activity: Option<VadConfig>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let sampler = SamplerConfig::default();
        Self {
            min_interval: sampler.min_interval,
            max_interval: sampler.max_interval,
            batch_size: sampler.batch_size,
            max_pixels_per_frame: DEFAULT_MAX_PIXELS_PER_FRAME,
            scene_change_threshold: sampler.scene_change_threshold,
            audio_language_hint: None,
            downsample_size: sampler.downsample_size,
            caption_instruction: DEFAULT_CAPTION_INSTRUCTION.to_string(),
            initial_prompt: None,
            voice_activity: Some(VadConfig::default()),
        }
    }
}

impl AnalysisConfig {
    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            min_interval: self.min_interval,
            max_interval: self.max_interval,
            scene_change_threshold: self.scene_change_threshold,
            batch_size: self.batch_size,
            downsample_size: self.downsample_size,
        }
    }

    pub fn speech_options(&self) -> SpeechOptions {
        SpeechOptions {
            language: self
                .audio_language_hint
                .as_ref()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
            initial_prompt: self.initial_prompt.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        self.sampler_config()
            .validate()
            .map_err(|e| AnalysisError::InvalidConfig(e.to_string()))?;
        if self.max_pixels_per_frame < MIN_PIXELS_PER_FRAME {
            return Err(AnalysisError::InvalidConfig(format!(
                "max_pixels_per_frame must be at least {MIN_PIXELS_PER_FRAME}, got {}",
                self.max_pixels_per_frame
            )));
        }
        if self.caption_instruction.trim().is_empty() {
            return Err(AnalysisError::InvalidConfig(
                "caption_instruction must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Contents of a configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub analysis: AnalysisConfig,
    pub models: LifecycleConfig,
}

impl DigestConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, AnalysisError> {
        serde_yaml::from_str(yaml).map_err(|e| AnalysisError::InvalidConfig(format!("Invalid YAML: {e}")))
    }

    /// Read a YAML file and apply environment overrides
    pub fn load(path: &Path) -> Result<Self, AnalysisError> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            AnalysisError::InvalidConfig(format!("Failed to read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_yaml_str(&yaml)?;
        config.models.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.models.apply_env_overrides();
        config
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        self.analysis.validate()?;
        self.models
            .validate()
            .map_err(|e| AnalysisError::InvalidConfig(e.to_string()))
    }

    pub fn to_yaml(&self) -> Result<String, AnalysisError> {
        serde_yaml::to_string(self).map_err(|e| AnalysisError::InvalidConfig(e.to_string()))
    }
}
