//! The contract every cache tier implements.

use std::io::{self, Cursor};
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

/// A cached payload handed back by [`CacheStore::load`].
///
/// Memory tiers return the bytes they hold, the disk tier returns the open
/// backing file so large payloads can be streamed.
#[derive(Debug)]
pub enum Payload {
    Memory(Cursor<Bytes>),
    File(tokio::fs::File),
}

impl Payload {
    pub fn from_bytes(bytes: Bytes) -> Self {
        Payload::Memory(Cursor::new(bytes))
    }

    /// Read whatever is left of the payload into a single buffer.
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        match self {
            Payload::Memory(cursor) => {
                let position = cursor.position() as usize;
                let bytes = cursor.into_inner();
                Ok(bytes.slice(position.min(bytes.len())..))
            }
            Payload::File(mut file) => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl AsyncRead for Payload {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Payload::Memory(cursor) => Pin::new(cursor).poll_read(cx, buf),
            Payload::File(file) => Pin::new(file).poll_read(cx, buf),
        }
    }
}

/// Uniform load/save/delete/clean contract shared by all tiers.
///
/// None of these operations fail from the caller's point of view. A cache
/// that cannot serve or store a payload degrades to a miss or a no-op, and
/// the filesystem layer falls back to the underlying backend.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up `key`. Absent, expired and unreadable entries are all misses.
    async fn load(&self, key: &str) -> Option<Payload>;

    /// Store `payload` under `key`, overwriting any previous value.
    ///
    /// Silently skipped when the tier has no room even after reclaiming.
    async fn save(&self, key: &str, payload: Bytes);

    /// Forget `key`. Removal from the medium happens in the background.
    async fn delete(&self, key: &str);

    /// Reclaim expired entries and stray artifacts, refresh capacity.
    async fn clean(&self);
}
