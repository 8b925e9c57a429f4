use std::path::PathBuf;

use clap::Args;

use flowfs::{ConfigError, FuseConfig};

#[derive(Args, Debug, Clone)]
pub struct InitConfig {
    /// Where to write the config (defaults to --config, then ~/.flowfs/config.toml)
    #[arg(long)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitConfigError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for InitConfig {
    type Error = InitConfigError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let path = self.path.clone().unwrap_or_else(|| ctx.config_path.clone());
        FuseConfig::default().write(&path)?;
        Ok(format!("wrote default config to {}", path.display()))
    }
}
