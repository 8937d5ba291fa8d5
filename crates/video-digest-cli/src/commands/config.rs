//! Print the effective configuration

use anyhow::Result;
use clap::Args;
use video_digest_orchestrator::DigestConfig;

use super::SettingsArgs;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(flatten)]
    settings: SettingsArgs,
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        let config = self.settings.resolve()?;
        print!("{}", config.to_yaml()?);
        print!("{}", model_files(&config));
        Ok(())
    }
}

/// YAML comment block naming the weight files loaded after precision is applied
fn model_files(config: &DigestConfig) -> String {
    format!(
        "# Model files loaded at startup:\n\
         #   vision: {}\n\
         #   speech: {}\n",
        config.models.resolved_vision_model().display(),
        config.models.resolved_speech_model().display()
    )
}
