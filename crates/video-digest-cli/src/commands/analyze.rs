//! Analyze one video

use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use video_digest_lifecycle::ModelLifecycle;
use video_digest_orchestrator::Orchestrator;

use super::SettingsArgs;

#[derive(Args)]
pub struct AnalyzeCommand {
    /// Input video file
    #[arg(value_name = "VIDEO")]
    input: PathBuf,

    #[command(flatten)]
    settings: SettingsArgs,

    /// Print the report as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Write the report to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

impl AnalyzeCommand {
    pub async fn execute(self) -> Result<()> {
        let start = Instant::now();

        if !self.input.exists() {
            anyhow::bail!("Input file does not exist: {}", self.input.display());
        }

        let config = self.settings.resolve()?;
        let lifecycle = Arc::new(ModelLifecycle::new(config.models));
        let orchestrator = Orchestrator::new(lifecycle, config.analysis)?;

        let report = orchestrator
            .analyze_path(&self.input)
            .await
            .with_context(|| format!("Failed to analyze {}", self.input.display()))?;

        let rendered = if self.json {
            report.to_json().context("Failed to serialize report")?
        } else {
            report.render()
        };

        match &self.output {
            Some(path) => {
                std::fs::write(path, &rendered)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!(path = %path.display(), "Report written");
            }
            None => print!("{rendered}"),
        }

        info!(
            captions = report.captions.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Done"
        );
        Ok(())
    }
}
