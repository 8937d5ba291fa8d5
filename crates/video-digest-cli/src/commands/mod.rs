pub mod analyze;
pub mod config;

use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;
use video_digest_orchestrator::DigestConfig;

/// Settings shared by every command.
///
/// Precedence: flags, then `VIDEO_DIGEST_THREADS`, then the YAML file, then
/// built-in defaults.
#[derive(Args, Debug, Clone)]
pub struct SettingsArgs {
    /// YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Minimum seconds between captioned frames
    #[arg(long, value_name = "SECONDS")]
    pub min_interval: Option<f64>,

    /// Maximum seconds without a captioned frame
    #[arg(long, value_name = "SECONDS")]
    pub max_interval: Option<f64>,

    /// Frames per captioning call
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Scene change threshold (mean gray difference, 0-255)
    #[arg(long, value_name = "X")]
    pub threshold: Option<f64>,

    /// Spoken language (ISO 639-1); auto-detected when omitted
    #[arg(long, value_name = "LANG")]
    pub language: Option<String>,

    /// Total inference threads
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,
}

impl SettingsArgs {
    /// Merge file, environment and flags into a validated configuration
    pub fn resolve(&self) -> Result<DigestConfig> {
        let mut config = match &self.config {
            Some(path) => DigestConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => DigestConfig::from_env(),
        };
        self.apply(&mut config);
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn apply(&self, config: &mut DigestConfig) {
        let analysis = &mut config.analysis;
        if let Some(v) = self.min_interval {
            analysis.min_interval = v;
        }
        if let Some(v) = self.max_interval {
            analysis.max_interval = v;
        }
        if let Some(v) = self.batch_size {
            analysis.batch_size = v;
        }
        if let Some(v) = self.threshold {
            analysis.scene_change_threshold = v;
        }
        if let Some(v) = &self.language {
            analysis.audio_language_hint = Some(v.clone());
        }
        if let Some(v) = self.threads {
            config.models.threads = Some(v);
        }
    }
}
