pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "flowfs")]
#[command(version, about = "Mount a storage backend through a block-caching FUSE client")]
pub struct Args {
    /// Path to the config file (defaults to ~/.flowfs/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
