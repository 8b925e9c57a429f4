//! Cache section of the client configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::capacity::{CapacityProbe, DfProbe, DirUsageProbe};
use crate::disk::{DiskCache, DiskCacheConfig};
use crate::error::Result;
use crate::memory::{MemoryCache, MemoryCacheConfig};
use crate::tiered::TieredCache;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Bytes per cached block; 0 turns caching off entirely
    #[serde(default)]
    pub block_size: u64,
    /// Number of blocks kept in memory; 0 disables the memory tier
    #[serde(default)]
    pub memory_size: u64,
    /// Time-to-live of memory blocks in seconds
    #[serde(default = "default_memory_expire_secs")]
    pub memory_expire_secs: u64,
    /// Disk cache root; an empty path disables the disk tier
    #[serde(default = "default_disk_cache_path")]
    pub disk_cache_path: PathBuf,
    /// Time-to-live of disk entries in seconds
    #[serde(default = "default_disk_expire_secs")]
    pub disk_expire_secs: u64,
    /// Permission bits for cached files
    #[serde(default)]
    pub file_mode: Option<u32>,
    /// Period of the disk reclamation loop in seconds
    #[serde(default = "default_clean_interval_secs")]
    pub clean_interval_secs: u64,
    /// Static disk budget; when unset the budget follows `df`
    #[serde(default)]
    pub capacity_bytes: Option<u64>,
}

fn default_memory_expire_secs() -> u64 {
    100
}

fn default_disk_cache_path() -> PathBuf {
    PathBuf::from("./cache_dir")
}

fn default_disk_expire_secs() -> u64 {
    15 * 60
}

fn default_clean_interval_secs() -> u64 {
    10
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_size: 0,
            memory_size: 0,
            memory_expire_secs: default_memory_expire_secs(),
            disk_cache_path: default_disk_cache_path(),
            disk_expire_secs: default_disk_expire_secs(),
            file_mode: None,
            clean_interval_secs: default_clean_interval_secs(),
            capacity_bytes: None,
        }
    }
}

impl CacheConfig {
    pub fn is_enabled(&self) -> bool {
        self.block_size > 0
    }

    pub fn memory_config(&self) -> MemoryCacheConfig {
        MemoryCacheConfig {
            block_size: self.block_size,
            max_blocks: self.memory_size,
            expire: Duration::from_secs(self.memory_expire_secs),
        }
    }

    /// Disk tier settings, or `None` when no cache path is configured.
    pub fn disk_config(&self) -> Option<DiskCacheConfig> {
        if self.disk_cache_path.as_os_str().is_empty() {
            return None;
        }
        let mut config = DiskCacheConfig::new(
            self.disk_cache_path.clone(),
            Duration::from_secs(self.disk_expire_secs),
        )
        .with_clean_interval(Duration::from_secs(self.clean_interval_secs));
        config.mode = self.file_mode;
        Some(config)
    }

    /// Build the configured tiers.
    ///
    /// Fails when the disk tier is misconfigured (for example rooted at `/`),
    /// since that is a defect in the configuration rather than a transient
    /// condition.
    pub async fn build(&self) -> Result<TieredCache> {
        if !self.is_enabled() {
            info!("block size is 0, caching disabled");
            return Ok(TieredCache::disabled());
        }

        let memory = MemoryCache::new(self.memory_config());

        let disk = match self.disk_config() {
            Some(config) => {
                let probe: Arc<dyn CapacityProbe> = match self.capacity_bytes {
                    Some(capacity) => Arc::new(DirUsageProbe::new(capacity)),
                    None => Arc::new(DfProbe::new()),
                };
                Some(DiskCache::with_probe(config, probe).await?)
            }
            None => None,
        };

        info!(
            block_size = self.block_size,
            memory = memory.is_some(),
            disk = disk.is_some(),
            "cache tiers configured"
        );
        Ok(TieredCache::new(memory, disk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::error::CacheError;
    use crate::store::CacheStore;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: CacheConfig = toml::from_str("").unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.memory_expire_secs, 100);
        assert_eq!(config.disk_expire_secs, 900);
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_parse_cache_section() {
        let config: CacheConfig = toml::from_str(
            r#"
            block_size = 4096
            memory_size = 256
            disk_cache_path = "/var/cache/flowfs"
            disk_expire_secs = 60
            file_mode = 384
            "#,
        )
        .unwrap();

        assert!(config.is_enabled());
        assert_eq!(config.memory_config().capacity_bytes(), 4096 * 256);

        let disk = config.disk_config().unwrap();
        assert_eq!(disk.dir, PathBuf::from("/var/cache/flowfs"));
        assert_eq!(disk.expire, Duration::from_secs(60));
        assert_eq!(disk.mode, Some(0o600));
    }

    #[test]
    fn test_empty_disk_path_disables_disk() {
        let config = CacheConfig {
            disk_cache_path: PathBuf::new(),
            ..CacheConfig::default()
        };
        assert!(config.disk_config().is_none());
    }

    #[tokio::test]
    async fn test_build_disabled() {
        let cache = CacheConfig::default().build().await.unwrap();
        assert!(!cache.is_enabled());
    }

    #[tokio::test]
    async fn test_build_both_tiers() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            block_size: 1024,
            memory_size: 8,
            disk_cache_path: temp_dir.path().join("cache"),
            capacity_bytes: Some(1024 * 1024),
            ..CacheConfig::default()
        };

        let cache = config.build().await.unwrap();
        assert!(cache.memory().is_some());
        let disk = cache.disk().unwrap();
        assert_eq!(disk.capacity().capacity_bytes, 1024 * 1024);
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_build_with_huge_memory_expiry() {
        let config = CacheConfig {
            block_size: 64,
            memory_size: 4,
            memory_expire_secs: 100_000_000_000,
            disk_cache_path: PathBuf::new(),
            ..CacheConfig::default()
        };

        let cache = config.build().await.unwrap();
        cache.save("long_0", Bytes::from_static(b"lived")).await;
        assert!(cache.load("long_0").await.is_some());
    }

    #[tokio::test]
    async fn test_build_rejects_root_disk_path() {
        let config = CacheConfig {
            block_size: 1024,
            disk_cache_path: PathBuf::from("/"),
            ..CacheConfig::default()
        };
        assert!(matches!(config.build().await, Err(CacheError::InvalidConfig(_))));
    }
}
