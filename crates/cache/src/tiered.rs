use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::disk::DiskCache;
use crate::memory::MemoryCache;
use crate::store::{CacheStore, Payload};

/// Memory-then-disk lookup chain.
///
/// A disk hit small enough to fit one memory block is promoted into the
/// memory tier. Saves go to every enabled tier; a payload larger than one
/// block skips the memory tier. With no tier enabled every load misses.
#[derive(Default)]
pub struct TieredCache {
    memory: Option<MemoryCache>,
    disk: Option<DiskCache>,
}

impl TieredCache {
    pub fn new(memory: Option<MemoryCache>, disk: Option<DiskCache>) -> Self {
        Self { memory, disk }
    }

    /// A chain with no tiers: every load misses, every save is dropped.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> Option<&MemoryCache> {
        self.memory.as_ref()
    }

    pub fn disk(&self) -> Option<&DiskCache> {
        self.disk.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.memory.is_some() || self.disk.is_some()
    }

    /// Stop background work owned by the tiers.
    pub async fn shutdown(&self) {
        if let Some(disk) = &self.disk {
            disk.shutdown().await;
        }
    }

    fn fits_memory_block(memory: &MemoryCache, size: u64) -> bool {
        size <= memory.block_size()
    }
}

#[async_trait]
impl CacheStore for TieredCache {
    async fn load(&self, key: &str) -> Option<Payload> {
        if let Some(memory) = &self.memory {
            if let Some(payload) = memory.load(key).await {
                return Some(payload);
            }
        }

        let disk = self.disk.as_ref()?;
        let payload = disk.load(key).await?;

        let memory = match &self.memory {
            Some(memory) => memory,
            None => return Some(payload),
        };
        let promotable = disk
            .entry(key)
            .is_some_and(|entry| Self::fits_memory_block(memory, entry.size));
        if !promotable {
            return Some(payload);
        }

        match payload.into_bytes().await {
            Ok(bytes) => {
                debug!(key, size = bytes.len(), "promoting disk cache hit into memory");
                memory.save(key, bytes.clone()).await;
                Some(Payload::from_bytes(bytes))
            }
            Err(e) => {
                debug!(key, error = %e, "failed to read cached payload from disk");
                None
            }
        }
    }

    async fn save(&self, key: &str, payload: Bytes) {
        if let Some(memory) = &self.memory {
            if Self::fits_memory_block(memory, payload.len() as u64) {
                memory.save(key, payload.clone()).await;
            }
        }
        if let Some(disk) = &self.disk {
            disk.save(key, payload).await;
        }
    }

    async fn delete(&self, key: &str) {
        if let Some(memory) = &self.memory {
            memory.delete(key).await;
        }
        if let Some(disk) = &self.disk {
            disk.delete(key).await;
        }
    }

    async fn clean(&self) {
        if let Some(memory) = &self.memory {
            memory.clean().await;
        }
        if let Some(disk) = &self.disk {
            disk.clean().await;
        }
    }
}
