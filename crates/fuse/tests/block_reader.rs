//! Block reader against a real disk tier and a local backend

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use flowfs::BlockReader;
use flowfs_cache::{CacheStore, DiskCache, DiskCacheConfig, FixedCapacity, TieredCache};
use flowfs_ufs::{FileHandle, LocalFileSystem, UnderFileSystem};

const BLOCK: u64 = 8;
const GIB: u64 = 1024 * 1024 * 1024;

/// Counts backend reads so cache hits can be told apart from misses.
struct CountingHandle {
    inner: Box<dyn FileHandle>,
    reads: Arc<AtomicUsize>,
}

#[async_trait]
impl FileHandle for CountingHandle {
    async fn read(&mut self, offset: u64, size: usize) -> flowfs_ufs::Result<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(offset, size).await
    }

    async fn write(&mut self, offset: u64, data: &[u8]) -> flowfs_ufs::Result<usize> {
        self.inner.write(offset, data).await
    }

    async fn truncate(&mut self, size: u64) -> flowfs_ufs::Result<()> {
        self.inner.truncate(size).await
    }

    async fn flush(&mut self) -> flowfs_ufs::Result<()> {
        self.inner.flush().await
    }

    async fn release(&mut self) -> flowfs_ufs::Result<()> {
        self.inner.release().await
    }
}

struct Fixture {
    ufs: LocalFileSystem,
    cache: Arc<TieredCache>,
    reader: BlockReader,
    _temp: tempfile::TempDir,
}

async fn setup() -> Fixture {
    let temp = tempfile::tempdir().unwrap();
    let ufs = LocalFileSystem::new(temp.path().join("backend")).await.unwrap();

    let probe = Arc::new(FixedCapacity::new(GIB, 0));
    let disk = DiskCache::with_probe(
        DiskCacheConfig::new(temp.path().join("cache"), Duration::from_secs(60)),
        probe,
    )
    .await
    .unwrap();
    let cache = Arc::new(TieredCache::new(None, Some(disk)));
    let reader = BlockReader::new(cache.clone(), BLOCK);

    Fixture {
        ufs,
        cache,
        reader,
        _temp: temp,
    }
}

async fn put(ufs: &LocalFileSystem, path: &str, data: &[u8]) {
    let mut handle = ufs.create(path, 0o644).await.unwrap();
    handle.write(0, data).await.unwrap();
    handle.release().await.unwrap();
}

async fn counting(ufs: &LocalFileSystem, path: &str) -> (CountingHandle, Arc<AtomicUsize>) {
    let reads = Arc::new(AtomicUsize::new(0));
    let handle = CountingHandle {
        inner: ufs.open(path, false).await.unwrap(),
        reads: reads.clone(),
    };
    (handle, reads)
}

#[tokio::test]
async fn test_second_read_is_served_from_cache() {
    let fx = setup().await;
    let data = b"block-0 block-1 tail";
    put(&fx.ufs, "/f.txt", data).await;
    let size = data.len() as u64;

    let (mut handle, reads) = counting(&fx.ufs, "/f.txt").await;
    let first = fx.reader.read("/f.txt", size, &mut handle, 0, 64).await.unwrap();
    assert_eq!(&first[..], data);
    assert_eq!(reads.load(Ordering::SeqCst), 3);

    let second = fx.reader.read("/f.txt", size, &mut handle, 2, 10).await.unwrap();
    assert_eq!(&second[..], &data[2..12]);
    assert_eq!(reads.load(Ordering::SeqCst), 3);

    let disk = fx.cache.disk().unwrap();
    assert!(disk.entry("f.txt_0").is_some());
    assert!(disk.entry("f.txt_2").is_some());

    fx.cache.shutdown().await;
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let fx = setup().await;
    put(&fx.ufs, "/g", b"aaaaaaaabbbbbbbb").await;

    let (mut handle, reads) = counting(&fx.ufs, "/g").await;
    fx.reader.read("/g", 16, &mut handle, 0, 16).await.unwrap();
    assert_eq!(reads.load(Ordering::SeqCst), 2);

    put(&fx.ufs, "/g", b"ccccccccdddddddd").await;
    fx.reader.invalidate_range("/g", 9, 1).await;

    let (mut handle, reads) = counting(&fx.ufs, "/g").await;
    let data = fx.reader.read("/g", 16, &mut handle, 0, 16).await.unwrap();
    // block 0 still cached, block 1 refetched
    assert_eq!(&data[..], b"aaaaaaaadddddddd");
    assert_eq!(reads.load(Ordering::SeqCst), 1);

    fx.reader.invalidate("/g", 16).await;
    assert!(fx.cache.load("g_0").await.is_none());
    assert!(fx.cache.load("g_1").await.is_none());

    fx.cache.shutdown().await;
}

#[tokio::test]
async fn test_zero_block_size_bypasses_cache() {
    let fx = setup().await;
    put(&fx.ufs, "/h", b"uncached").await;

    let reader = BlockReader::new(fx.cache.clone(), 0);
    let (mut handle, reads) = counting(&fx.ufs, "/h").await;
    let data = reader.read("/h", 8, &mut handle, 2, 4).await.unwrap();
    assert_eq!(&data[..], b"cach");
    assert_eq!(reads.load(Ordering::SeqCst), 1);
    assert!(fx.cache.load("h_0").await.is_none());

    reader.invalidate("/h", 8).await;
    fx.cache.shutdown().await;
}

#[tokio::test]
async fn test_short_backend_read_is_not_cached() {
    let fx = setup().await;
    put(&fx.ufs, "/short", b"1234").await;

    // size claims more than the backend holds
    let (mut handle, _) = counting(&fx.ufs, "/short").await;
    let data = fx.reader.read("/short", 12, &mut handle, 0, 12).await.unwrap();
    assert_eq!(&data[..], b"1234");
    assert!(fx.cache.load("short_0").await.is_none());

    fx.cache.shutdown().await;
}
