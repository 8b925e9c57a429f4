use std::path::PathBuf;

use clap::Args;

use flowfs::process::{graceful_shutdown_blocker, init_logging};
use flowfs::{run_mount, ConfigError, FuseConfig, MountError};

#[derive(Args, Debug, Clone)]
pub struct Mount {
    /// Override the mount point from the config
    #[arg(long)]
    pub mount_point: Option<PathBuf>,

    /// Mount read-only regardless of the config
    #[arg(long)]
    pub read_only: bool,

    /// Directory for log files (overrides [log] dir)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum MountOpError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("mount error: {0}")]
    Mount(#[from] MountError),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Mount {
    type Error = MountOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = FuseConfig::load(&ctx.config_path)?;
        if let Some(mount_point) = &self.mount_point {
            config.fuse.mount_point = mount_point.clone();
        }
        if self.read_only {
            config.fuse.read_only = true;
        }
        if let Some(log_dir) = &self.log_dir {
            config.log.dir = Some(log_dir.clone());
        }

        let _guards = init_logging(&config.log)?;
        tracing::info!(config = ?ctx.config_path, "loaded config");

        let (signal_handle, _shutdown_tx, shutdown_rx) = graceful_shutdown_blocker()?;
        run_mount(&config, shutdown_rx).await?;
        signal_handle.abort();

        Ok(format!(
            "unmounted {}",
            config.fuse.mount_point.display()
        ))
    }
}
