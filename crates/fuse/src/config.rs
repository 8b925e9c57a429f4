//! Client configuration file (`config.toml`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use flowfs_cache::CacheConfig;
use flowfs_ufs::UfsConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const APP_NAME: &str = "flowfs";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("config file already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mount section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuseSection {
    /// Directory the filesystem is mounted on
    #[serde(default = "default_mount_point")]
    pub mount_point: PathBuf,
    /// Name shown in the mount table
    #[serde(default = "default_fs_name")]
    pub fs_name: String,
    /// Let users other than the mounting one see the filesystem
    #[serde(default)]
    pub allow_other: bool,
    #[serde(default)]
    pub read_only: bool,
    /// Unmount when the process exits
    #[serde(default = "default_true")]
    pub auto_unmount: bool,
    /// How long the kernel may cache name lookups
    #[serde(default = "default_timeout_secs")]
    pub entry_timeout_secs: u64,
    /// How long the kernel may cache attributes
    #[serde(default = "default_timeout_secs")]
    pub attr_timeout_secs: u64,
}

fn default_mount_point() -> PathBuf {
    PathBuf::from("./mock")
}

fn default_fs_name() -> String {
    APP_NAME.to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    1
}

impl Default for FuseSection {
    fn default() -> Self {
        Self {
            mount_point: default_mount_point(),
            fs_name: default_fs_name(),
            allow_other: false,
            read_only: false,
            auto_unmount: true,
            entry_timeout_secs: default_timeout_secs(),
            attr_timeout_secs: default_timeout_secs(),
        }
    }
}

impl FuseSection {
    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_timeout_secs)
    }

    pub fn attr_ttl(&self) -> Duration {
        Duration::from_secs(self.attr_timeout_secs)
    }
}

/// Logging section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default level; `RUST_LOG` still overrides per target
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for daily rolling log files (stdout only if not set)
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

impl LogConfig {
    pub fn level(&self) -> Result<tracing::Level, ConfigError> {
        self.level
            .parse()
            .map_err(|_| ConfigError::InvalidLogLevel(self.level.clone()))
    }
}

/// Everything the client reads at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuseConfig {
    #[serde(default)]
    pub fuse: FuseSection,
    /// Storage the mount fronts
    pub backend: UfsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for FuseConfig {
    fn default() -> Self {
        Self {
            fuse: FuseSection::default(),
            backend: UfsConfig::Local {
                path: PathBuf::from("./data"),
            },
            cache: CacheConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl FuseConfig {
    /// Default config location (`~/.flowfs/config.toml`, or the working
    /// directory when there is no home).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(format!(".{}", APP_NAME)))
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_FILE_NAME)
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let config: FuseConfig = toml::from_str(&contents)?;
        config.log.level()?;
        Ok(config)
    }

    /// Write this config to `path`, refusing to clobber an existing file.
    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}
