//! Block-aligned reads through the cache.
//!
//! A file is cut into `block_size` blocks keyed `<path>_<index>`. A read
//! loads every block it touches from the cache and falls back to the backend
//! handle on a miss, saving what it fetched. Only blocks of the expected
//! length are trusted or stored, so a file that grew or shrank since a block
//! was cached never serves the stale length.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use flowfs_cache::{block_key, CacheStore};
use flowfs_ufs::{FileHandle, Result};
use tracing::{debug, trace};

#[derive(Clone)]
pub struct BlockReader {
    cache: Arc<dyn CacheStore>,
    block_size: u64,
}

impl BlockReader {
    /// `block_size` of 0 bypasses the cache.
    pub fn new(cache: Arc<dyn CacheStore>, block_size: u64) -> Self {
        Self { cache, block_size }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn is_caching(&self) -> bool {
        self.block_size > 0
    }

    /// Read `size` bytes at `offset` of a file currently `file_size` long.
    pub async fn read(
        &self,
        path: &str,
        file_size: u64,
        handle: &mut dyn FileHandle,
        offset: u64,
        size: u32,
    ) -> Result<Bytes> {
        if !self.is_caching() {
            return handle.read(offset, size as usize).await;
        }

        let end = offset.saturating_add(size as u64).min(file_size);
        if offset >= end {
            return Ok(Bytes::new());
        }

        let bs = self.block_size;
        let mut out = BytesMut::with_capacity((end - offset) as usize);
        for index in offset / bs..=(end - 1) / bs {
            let block_start = index * bs;
            let expected = bs.min(file_size - block_start);
            let block = self.block(path, index, block_start, expected, handle).await?;

            let from = offset.saturating_sub(block_start) as usize;
            let to = ((end - block_start) as usize).min(block.len());
            if from >= to {
                // backend returned less than its size promised
                break;
            }
            out.extend_from_slice(&block[from..to]);
        }
        Ok(out.freeze())
    }

    async fn block(
        &self,
        path: &str,
        index: u64,
        block_start: u64,
        expected: u64,
        handle: &mut dyn FileHandle,
    ) -> Result<Bytes> {
        let key = block_key(path, index);

        if let Some(payload) = self.cache.load(&key).await {
            match payload.into_bytes().await {
                Ok(bytes) if bytes.len() as u64 == expected => {
                    trace!(key = %key, "block cache hit");
                    return Ok(bytes);
                }
                Ok(bytes) => {
                    debug!(key = %key, cached = bytes.len(), expected, "dropping block of stale length");
                    self.cache.delete(&key).await;
                }
                Err(e) => {
                    debug!(key = %key, error = %e, "failed to read cached block");
                    self.cache.delete(&key).await;
                }
            }
        }

        let bytes = handle.read(block_start, expected as usize).await?;
        if bytes.len() as u64 == expected {
            self.cache.save(&key, bytes.clone()).await;
        }
        Ok(bytes)
    }

    /// Drop every cached block of a file `size` bytes long.
    pub async fn invalidate(&self, path: &str, size: u64) {
        self.invalidate_range(path, 0, size.max(1)).await;
    }

    /// Drop the cached blocks overlapping `offset..offset + len`.
    pub async fn invalidate_range(&self, path: &str, offset: u64, len: u64) {
        if !self.is_caching() || len == 0 {
            return;
        }
        let last = offset.saturating_add(len - 1) / self.block_size;
        for index in offset / self.block_size..=last {
            self.cache.delete(&block_key(path, index)).await;
        }
    }
}

impl std::fmt::Debug for BlockReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockReader")
            .field("block_size", &self.block_size)
            .finish()
    }
}
