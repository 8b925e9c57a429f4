//! Memory tier for hot block-sized payloads
//!
//! Uses moka for concurrent caching with TTL and size-based eviction. The
//! budget is `block_size * max_blocks` bytes, weighed by payload length.
//! A full tier makes room by evicting its least recently used blocks, so a
//! new save always lands.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tracing::debug;

use crate::entry::{CacheEntry, FAR_FUTURE};
use crate::store::{CacheStore, Payload};

/// Configuration for the memory tier
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Size of one cached block in bytes
    pub block_size: u64,
    /// Number of blocks the tier may hold
    pub max_blocks: u64,
    /// Time-to-live for cached blocks
    pub expire: Duration,
}

impl MemoryCacheConfig {
    pub fn capacity_bytes(&self) -> u64 {
        self.block_size.saturating_mul(self.max_blocks)
    }
}

#[derive(Debug, Clone)]
struct Block {
    data: Bytes,
    entry: CacheEntry,
}

/// In-process block cache implementing the [`CacheStore`] contract
pub struct MemoryCache {
    blocks: Cache<String, Block>,
    block_size: u64,
    capacity: u64,
    expire: Duration,
}

impl MemoryCache {
    /// Create the memory tier, or `None` when it is configured off.
    ///
    /// A zero block size or a zero block count disables the tier.
    pub fn new(config: MemoryCacheConfig) -> Option<Self> {
        let capacity = config.capacity_bytes();
        if capacity == 0 {
            debug!("memory cache disabled");
            return None;
        }

        // moka rejects a time-to-live beyond a thousand years
        let expire = config.expire.min(FAR_FUTURE);
        let blocks = Cache::builder()
            .max_capacity(capacity)
            .weigher(|_key: &String, block: &Block| -> u32 {
                block.data.len().try_into().unwrap_or(u32::MAX)
            })
            .eviction_policy(EvictionPolicy::lru())
            .time_to_live(expire)
            .build();

        Some(Self {
            blocks,
            block_size: config.block_size,
            capacity,
            expire,
        })
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Total byte budget of the tier
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    /// Approximate bytes held; exact after [`CacheStore::clean`]
    pub fn used_bytes(&self) -> u64 {
        self.blocks.weighted_size()
    }

    /// Approximate number of blocks held; exact after [`CacheStore::clean`]
    pub fn len(&self) -> u64 {
        self.blocks.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn load(&self, key: &str) -> Option<Payload> {
        let block = self.blocks.get(key)?;
        if block.entry.is_expired() {
            debug!(key, "memory cache entry expired");
            self.blocks.invalidate(key);
            return None;
        }
        Some(Payload::from_bytes(block.data))
    }

    async fn save(&self, key: &str, payload: Bytes) {
        let size = payload.len() as u64;
        if size > self.capacity {
            debug!(key, size, capacity = self.capacity, "payload exceeds memory cache budget");
            return;
        }

        // make room from expired and least recently used blocks
        if self.blocks.weighted_size().saturating_add(size) > self.capacity {
            self.blocks.run_pending_tasks();
        }

        let block = Block {
            data: payload,
            entry: CacheEntry::new(size, self.expire),
        };
        self.blocks.insert(key.to_string(), block);
    }

    async fn delete(&self, key: &str) {
        self.blocks.invalidate(key);
    }

    async fn clean(&self) {
        self.blocks.run_pending_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(block_size: u64, max_blocks: u64) -> MemoryCacheConfig {
        MemoryCacheConfig {
            block_size,
            max_blocks,
            expire: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_disabled_when_zero() {
        assert!(MemoryCache::new(config(0, 100)).is_none());
        assert!(MemoryCache::new(config(4096, 0)).is_none());
        assert!(MemoryCache::new(config(4096, 1)).is_some());
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let cache = MemoryCache::new(config(16, 4)).unwrap();

        assert!(cache.load("a_0").await.is_none());

        cache.save("a_0", Bytes::from_static(b"block zero")).await;
        let bytes = cache.load("a_0").await.unwrap().into_bytes().await.unwrap();
        assert_eq!(&bytes[..], b"block zero");

        cache.delete("a_0").await;
        assert!(cache.load("a_0").await.is_none());

        // deleting twice is fine
        cache.delete("a_0").await;
    }

    #[tokio::test]
    async fn test_rejects_oversized_payload() {
        let cache = MemoryCache::new(config(8, 2)).unwrap();
        assert_eq!(cache.capacity_bytes(), 16);

        cache.save("big", Bytes::from(vec![0u8; 17])).await;
        assert!(cache.load("big").await.is_none());

        cache.save("fits", Bytes::from(vec![0u8; 16])).await;
        assert!(cache.load("fits").await.is_some());
    }

    #[tokio::test]
    async fn test_stays_within_budget() {
        let cache = MemoryCache::new(config(10, 3)).unwrap();

        for i in 0..20 {
            cache.save(&format!("k_{}", i), Bytes::from(vec![i as u8; 10])).await;
        }
        cache.clean().await;

        assert!(cache.used_bytes() <= cache.capacity_bytes());
        assert!(cache.len() <= 3);
    }

    #[tokio::test]
    async fn test_full_tier_evicts_oldest_block() {
        let cache = MemoryCache::new(config(10, 2)).unwrap();

        cache.save("a_0", Bytes::from(vec![1u8; 10])).await;
        cache.save("b_0", Bytes::from(vec![2u8; 10])).await;
        cache.clean().await;

        cache.save("c_0", Bytes::from(vec![3u8; 10])).await;
        cache.clean().await;

        assert!(cache.load("a_0").await.is_none());
        assert!(cache.load("b_0").await.is_some());
        let newest = cache.load("c_0").await.unwrap().into_bytes().await.unwrap();
        assert_eq!(newest, Bytes::from(vec![3u8; 10]));
    }

    #[tokio::test]
    async fn test_huge_expiry_is_clamped() {
        let cache = MemoryCache::new(MemoryCacheConfig {
            block_size: 16,
            max_blocks: 4,
            expire: Duration::from_secs(100_000_000_000),
        })
        .unwrap();

        cache.save("forever", Bytes::from_static(b"kept")).await;
        assert!(cache.load("forever").await.is_some());
    }

    #[tokio::test]
    async fn test_memory_expiry() {
        let cache = MemoryCache::new(MemoryCacheConfig {
            block_size: 16,
            max_blocks: 4,
            expire: Duration::from_millis(50),
        })
        .unwrap();

        cache.save("short", Bytes::from_static(b"lived")).await;
        assert!(cache.load("short").await.is_some());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.load("short").await.is_none());

        cache.clean().await;
        assert!(cache.is_empty());
    }
}
