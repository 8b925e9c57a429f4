//! Disk tier: cached payloads as files under a reserved directory.
//!
//! Payloads live at `<root>/datacache/<key>`. A save writes `<path>.tmp`,
//! syncs it and renames it into place, so readers never see a partially
//! written payload and a crash leaves at worst a stray temp file. The entry
//! table is updated only after the rename succeeds.
//!
//! A background task calls [`CacheStore::clean`] on a fixed interval. Clean
//! drops expired entries, sweeps files the table no longer knows about and
//! re-probes the hosting filesystem's capacity.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::capacity::{Capacity, CapacityProbe, DfProbe};
use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use crate::key::{is_valid_key, TEMP_SUFFIX};
use crate::store::{CacheStore, Payload};
use crate::walk::walk_files;

/// Name of the reserved subdirectory holding payloads.
pub const CACHE_DIR: &str = "datacache";

/// Default period of the background reclamation loop.
pub const DEFAULT_CLEAN_INTERVAL: Duration = Duration::from_secs(10);

/// Untracked files younger than this may belong to a save that has not
/// committed its entry yet.
const SWEEP_GRACE: Duration = Duration::from_secs(60);

/// Configuration for a [`DiskCache`].
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    /// Cache root; payloads go under `<dir>/datacache`
    pub dir: PathBuf,
    /// Permission bits for payload files (unix only)
    pub mode: Option<u32>,
    /// Time-to-live of every entry
    pub expire: Duration,
    /// Period of the background clean loop
    pub clean_interval: Duration,
}

impl DiskCacheConfig {
    pub fn new(dir: impl Into<PathBuf>, expire: Duration) -> Self {
        Self {
            dir: dir.into(),
            mode: None,
            expire,
            clean_interval: DEFAULT_CLEAN_INTERVAL,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_clean_interval(mut self, interval: Duration) -> Self {
        self.clean_interval = interval;
        self
    }

    /// Reject roots that would have the cache scan or wipe a whole filesystem.
    fn validate(&self) -> Result<()> {
        if self.dir.as_os_str().is_empty() {
            return Err(CacheError::InvalidConfig(
                "disk cache directory is empty".to_string(),
            ));
        }
        if self.dir.parent().is_none() {
            return Err(CacheError::InvalidConfig(format!(
                "disk cache directory {} is a filesystem root",
                self.dir.display()
            )));
        }
        if self.clean_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "disk cache clean interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Entry table and capacity estimate, guarded together.
#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, CacheEntry>,
    /// Keys with a save between its first write and its metadata commit
    pending: HashMap<String, usize>,
    capacity: Capacity,
}

impl State {
    /// Whether the payload file of `key` is owned by an entry or a running save.
    fn claims(&self, key: &str) -> bool {
        self.entries.contains_key(key) || self.pending.contains_key(key)
    }

    fn begin_save(&mut self, key: &str) {
        *self.pending.entry(key.to_string()).or_insert(0) += 1;
    }

    fn end_save(&mut self, key: &str) {
        if let Some(count) = self.pending.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.pending.remove(key);
            }
        }
    }
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    data_dir: PathBuf,
    mode: Option<u32>,
    expire: Duration,
    probe: Arc<dyn CapacityProbe>,
    state: Arc<RwLock<State>>,
}

/// Handle on the background reclamation task.
#[derive(Debug)]
struct Reclaimer {
    shutdown_tx: watch::Sender<()>,
    handle: JoinHandle<()>,
}

/// Capacity-bounded, TTL-aware cache of payload files on local disk.
#[derive(Debug)]
pub struct DiskCache {
    inner: Arc<Inner>,
    reclaimer: Mutex<Option<Reclaimer>>,
}

impl DiskCache {
    /// Create a disk cache whose budget is probed with `df`.
    ///
    /// Must be called from within a tokio runtime; the reclamation loop is
    /// spawned onto it.
    pub async fn new(config: DiskCacheConfig) -> Result<Self> {
        Self::with_probe(config, Arc::new(DfProbe::new())).await
    }

    /// Create a disk cache with a custom capacity probe.
    pub async fn with_probe(config: DiskCacheConfig, probe: Arc<dyn CapacityProbe>) -> Result<Self> {
        config.validate()?;

        fs::create_dir_all(&config.dir).await?;
        let data_dir = config.dir.join(CACHE_DIR);

        let inner = Arc::new(Inner {
            root: config.dir.clone(),
            data_dir,
            mode: config.mode,
            expire: config.expire,
            probe,
            state: Arc::new(RwLock::new(State::default())),
        });
        inner.refresh_capacity().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let handle = tokio::spawn(reclaim_loop(
            Arc::downgrade(&inner),
            config.clean_interval,
            shutdown_rx,
        ));

        info!(
            dir = %config.dir.display(),
            expire = ?config.expire,
            capacity = inner.capacity().capacity_bytes,
            "disk cache ready"
        );

        Ok(Self {
            inner,
            reclaimer: Mutex::new(Some(Reclaimer {
                shutdown_tx,
                handle,
            })),
        })
    }

    /// Stop the reclamation loop and wait for it to finish.
    ///
    /// The cache stays usable; only periodic cleaning stops. Calling this
    /// more than once is harmless.
    pub async fn shutdown(&self) {
        let reclaimer = self.reclaimer.lock().take();
        if let Some(Reclaimer {
            shutdown_tx,
            handle,
        }) = reclaimer
        {
            let _ = shutdown_tx.send(());
            if let Err(e) = handle.await {
                warn!(error = %e, "disk cache reclaimer did not stop cleanly");
            }
        }
    }

    /// Cache root directory.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Path of the payload file for `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.inner.cache_path(key)
    }

    /// Current capacity estimate.
    pub fn capacity(&self) -> Capacity {
        self.inner.capacity()
    }

    /// Entry for `key`, expired or not.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.inner.state.read().entries.get(key).copied()
    }

    /// Number of tracked entries, including expired ones not yet cleaned.
    pub fn len(&self) -> usize {
        self.inner.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for DiskCache {
    async fn load(&self, key: &str) -> Option<Payload> {
        self.inner.load(key).await
    }

    async fn save(&self, key: &str, payload: Bytes) {
        self.inner.save(key, payload).await
    }

    async fn delete(&self, key: &str) {
        self.inner.delete(key)
    }

    async fn clean(&self) {
        self.inner.clean().await
    }
}

impl Inner {
    fn cache_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(key)
    }

    /// Inverse of [`Inner::cache_path`].
    fn key_from_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.data_dir).ok()?;
        relative.to_str().map(str::to_string)
    }

    fn capacity(&self) -> Capacity {
        self.state.read().capacity
    }

    fn is_live(&self, key: &str) -> bool {
        match self.state.read().entries.get(key) {
            Some(entry) if entry.is_expired() => {
                debug!(key, "disk cache entry expired");
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    async fn load(&self, key: &str) -> Option<Payload> {
        if !is_valid_key(key) || !self.is_live(key) {
            return None;
        }

        let path = self.cache_path(key);
        match fs::File::open(&path).await {
            Ok(file) => Some(Payload::File(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(key, path = %path.display(), "disk cache entry without payload");
                None
            }
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "failed to open cached payload");
                None
            }
        }
    }

    async fn save(&self, key: &str, payload: Bytes) {
        if !is_valid_key(key) {
            debug!(key, "refusing to cache invalid key");
            return;
        }

        let size = payload.len() as u64;
        if !self.capacity().fits(size) {
            self.clean().await;
            if !self.capacity().fits(size) {
                debug!(key, size, capacity = ?self.capacity(), "disk cache full, skipping save");
                return;
            }
        }

        let path = self.cache_path(key);
        self.state.write().begin_save(key);
        let result = self.write_atomic(&path, &payload).await;

        {
            let mut state = self.state.write();
            state.end_save(key);
            if let Err(e) = result {
                warn!(key, path = %path.display(), error = %e, "failed to save cache payload");
                return;
            }
            if let Some(previous) = state
                .entries
                .insert(key.to_string(), CacheEntry::new(size, self.expire))
            {
                state.capacity.used_bytes = state.capacity.used_bytes.saturating_sub(previous.size);
            }
            state.capacity.used_bytes = state.capacity.used_bytes.saturating_add(size);
        }
        debug!(key, size, "disk cache save succeeded");
    }

    /// Write `payload` next to `path` and rename it into place.
    ///
    /// The temp file never outlives a failed attempt.
    async fn write_atomic(&self, path: &Path, payload: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = temp_path(path);
        let result = self.write_then_rename(&tmp, path, payload).await;
        if result.is_err() {
            if let Err(e) = fs::remove_file(&tmp).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %tmp.display(), error = %e, "failed to remove temp file");
                }
            }
        }
        result
    }

    async fn write_then_rename(&self, tmp: &Path, path: &Path, payload: &[u8]) -> io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            if let Some(mode) = self.mode {
                options.mode(mode);
            }
        }

        let mut file = options.open(tmp).await?;
        file.write_all(payload).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(tmp, path).await
    }

    fn delete(&self, key: &str) {
        let removed = {
            let mut state = self.state.write();
            let removed = state.entries.remove(key);
            if let Some(entry) = &removed {
                state.capacity.used_bytes = state.capacity.used_bytes.saturating_sub(entry.size);
            }
            removed
        };

        if removed.is_some() && is_valid_key(key) {
            self.remove_payload(key);
        }
    }

    /// Remove the payload file for `key` without waiting for it.
    ///
    /// The removal is skipped when the key was saved again in the meantime.
    /// The check and the unlink share one read lock, and a save must take
    /// the write lock to register itself before touching the file.
    fn remove_payload(&self, key: &str) {
        let path = self.cache_path(key);
        let key = key.to_string();
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            let state = state.read();
            if state.claims(&key) {
                debug!(key = %key, "payload reclaimed by a newer save, keeping it");
                return;
            }
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(path = %path.display(), error = %e, "failed to remove cached payload");
                }
            }
        });
    }

    async fn clean(&self) {
        // 1. drop expired entries
        let expired: Vec<String> = {
            let mut state = self.state.write();
            let now = Instant::now();
            let expired: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_expired_at(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                if let Some(entry) = state.entries.remove(key) {
                    state.capacity.used_bytes = state.capacity.used_bytes.saturating_sub(entry.size);
                }
            }
            expired
        };
        for key in &expired {
            self.remove_payload(key);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "expired disk cache entries removed");
        }

        // 2. sweep files the table does not know about
        self.sweep_orphans().await;

        self.refresh_capacity().await;
    }

    async fn sweep_orphans(&self) {
        let files = match walk_files(&self.data_dir).await {
            Ok(files) => files,
            Err(e) => {
                warn!(dir = %self.data_dir.display(), error = %e, "failed to walk disk cache");
                return;
            }
        };

        let mut removed = 0usize;
        for (path, metadata) in files {
            // a save renames its payload into place before committing the entry
            if !is_settled(&metadata) {
                continue;
            }
            if !path.to_string_lossy().ends_with(TEMP_SUFFIX) {
                // names no key can produce are always orphans
                if let Some(key) = self.key_from_path(&path) {
                    if self.state.read().claims(&key) {
                        continue;
                    }
                }
            }

            debug!(path = %path.display(), "removing orphaned cache file");
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove orphaned cache file"),
            }
        }

        if removed > 0 {
            debug!(count = removed, "orphaned disk cache files removed");
        }
    }

    async fn refresh_capacity(&self) {
        match self.probe.probe(&self.root).await {
            Ok(capacity) => {
                self.state.write().capacity = capacity;
                debug!(
                    dir = %self.root.display(),
                    capacity = capacity.capacity_bytes,
                    used = capacity.used_bytes,
                    "disk cache capacity refreshed"
                );
            }
            Err(e) => {
                warn!(
                    dir = %self.root.display(),
                    error = %e,
                    "capacity probe failed, keeping previous estimate"
                );
            }
        }
    }
}

async fn reclaim_loop(inner: Weak<Inner>, interval: Duration, mut shutdown_rx: watch::Receiver<()>) {
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            // fires on an explicit shutdown and when the cache is dropped
            _ = shutdown_rx.changed() => break,
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.clean().await;
    }

    debug!("disk cache reclaimer stopped");
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TEMP_SUFFIX);
    PathBuf::from(tmp)
}

fn is_settled(metadata: &std::fs::Metadata) -> bool {
    metadata
        .modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age >= SWEEP_GRACE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::FixedCapacity;

    const GIB: u64 = 1024 * 1024 * 1024;

    async fn disk_cache(dir: &Path, expire: Duration) -> DiskCache {
        let config = DiskCacheConfig::new(dir, expire);
        DiskCache::with_probe(config, Arc::new(FixedCapacity::new(GIB, 0)))
            .await
            .unwrap()
    }

    #[test]
    fn test_temp_path() {
        assert_eq!(
            temp_path(Path::new("/cache/datacache/a/b_0")),
            PathBuf::from("/cache/datacache/a/b_0.tmp")
        );
    }

    #[tokio::test]
    async fn test_key_path_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = disk_cache(temp_dir.path(), Duration::from_secs(60)).await;

        for key in ["a", "dir/file_0", "deep/er/path_12"] {
            let path = cache.path_for(key);
            assert!(path.starts_with(temp_dir.path().join(CACHE_DIR)));
            assert_eq!(cache.inner.key_from_path(&path).as_deref(), Some(key));
        }
        assert_eq!(cache.inner.key_from_path(Path::new("/elsewhere/x")), None);
    }

    #[tokio::test]
    async fn test_rejects_misconfigured_root() {
        for dir in ["", "/"] {
            let config = DiskCacheConfig::new(dir, Duration::from_secs(60));
            let result = DiskCache::with_probe(config, Arc::new(FixedCapacity::new(GIB, 0))).await;
            assert!(matches!(result, Err(CacheError::InvalidConfig(_))), "{:?} accepted", dir);
        }
    }

    #[tokio::test]
    async fn test_rejects_zero_clean_interval() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = DiskCacheConfig::new(temp_dir.path(), Duration::from_secs(60))
            .with_clean_interval(Duration::ZERO);
        let result = DiskCache::with_probe(config, Arc::new(FixedCapacity::new(GIB, 0))).await;
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_creates_root_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("nested/cache");
        let cache = disk_cache(&root, Duration::from_secs(60)).await;
        assert!(root.is_dir());
        assert_eq!(cache.root(), root.as_path());
    }

    #[tokio::test]
    async fn test_save_tracks_usage() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = disk_cache(temp_dir.path(), Duration::from_secs(60)).await;

        cache.save("k", Bytes::from(vec![1u8; 100])).await;
        assert_eq!(cache.capacity().used_bytes, 100);

        // overwriting replaces the previous size
        cache.save("k", Bytes::from(vec![1u8; 40])).await;
        assert_eq!(cache.capacity().used_bytes, 40);
        assert_eq!(cache.entry("k").unwrap().size, 40);

        cache.delete("k").await;
        assert_eq!(cache.capacity().used_bytes, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_mode_applied() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().unwrap();
        let config = DiskCacheConfig::new(temp_dir.path(), Duration::from_secs(60)).with_mode(0o600);
        let cache = DiskCache::with_probe(config, Arc::new(FixedCapacity::new(GIB, 0)))
            .await
            .unwrap();

        cache.save("moded", Bytes::from_static(b"x")).await;
        let metadata = std::fs::metadata(cache.path_for("moded")).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_shutdown_stops_reclaimer() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = disk_cache(temp_dir.path(), Duration::from_secs(60)).await;

        cache.shutdown().await;
        assert!(cache.reclaimer.lock().is_none());
        // second call is a no-op
        cache.shutdown().await;

        // the cache keeps serving after the loop is gone
        cache.save("after", Bytes::from_static(b"still here")).await;
        assert!(cache.load("after").await.is_some());
    }

    #[tokio::test]
    async fn test_delete_then_save_keeps_fresh_payload() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = disk_cache(temp_dir.path(), Duration::from_secs(60)).await;

        for round in 0..50u8 {
            cache.save("churn_0", Bytes::from(vec![round; 8])).await;
            cache.delete("churn_0").await;
            cache.save("churn_0", Bytes::from(vec![round; 16])).await;
        }
        // let the detached removals run
        tokio::time::sleep(Duration::from_millis(200)).await;

        let payload = cache.load("churn_0").await.unwrap().into_bytes().await.unwrap();
        assert_eq!(payload, Bytes::from(vec![49u8; 16]));
        assert!(cache.inner.state.read().pending.is_empty());
        assert_eq!(cache.capacity().used_bytes, 16);
    }
}
