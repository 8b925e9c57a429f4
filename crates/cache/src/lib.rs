//! Block cache for the flowfs FUSE client
//!
//! This crate provides the caching layer that sits between filesystem
//! operations and the underlying storage backend. Every tier implements the
//! same [`CacheStore`] contract, so callers never care which medium holds the
//! bytes.
//!
//! # Tiers
//!
//! - [`DiskCache`]: payloads on local disk under a budget probed from the
//!   hosting filesystem, atomic write-then-rename commits and a background
//!   reclamation loop
//! - [`MemoryCache`]: hot block-sized payloads in process memory
//! - [`TieredCache`]: memory, then disk, promoting disk hits into memory
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use flowfs_cache::{CacheStore, DiskCache, DiskCacheConfig};
//!
//! # async fn example() -> Result<(), flowfs_cache::CacheError> {
//! let config = DiskCacheConfig::new("/var/cache/flowfs", Duration::from_secs(900));
//! let cache = DiskCache::new(config).await?;
//!
//! cache.save("data/train.csv_0", Bytes::from_static(b"hello")).await;
//! if let Some(payload) = cache.load("data/train.csv_0").await {
//!     let bytes = payload.into_bytes().await?;
//!     assert_eq!(&bytes[..], b"hello");
//! }
//! # Ok(())
//! # }
//! ```

mod capacity;
mod config;
mod disk;
mod entry;
mod error;
mod key;
mod memory;
mod store;
mod tiered;
mod walk;

pub use capacity::{parse_df_output, Capacity, CapacityProbe, DfProbe, DirUsageProbe, FixedCapacity};
pub use config::CacheConfig;
pub use disk::{DiskCache, DiskCacheConfig, CACHE_DIR};
pub use entry::CacheEntry;
pub use error::{CacheError, Result};
pub use key::{block_key, is_valid_key, TEMP_SUFFIX};
pub use memory::{MemoryCache, MemoryCacheConfig};
pub use store::{CacheStore, Payload};
pub use tiered::TieredCache;
