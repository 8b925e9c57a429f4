// Client modules
pub mod config;
pub mod fs;
pub mod mount;
pub mod process;

pub use config::{ConfigError, FuseConfig, FuseSection, LogConfig};
pub use fs::{BlockReader, FlowFs, FsOptions, InodeTable};
pub use mount::{run_mount, MountError};
