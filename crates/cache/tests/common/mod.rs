//! Shared helpers for cache integration tests
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use flowfs_cache::{DiskCache, DiskCacheConfig, FixedCapacity};
use tempfile::TempDir;

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Set up a disk cache with a roomy fixed budget in a fresh temp dir
pub async fn setup_disk_cache(expire: Duration) -> (DiskCache, Arc<FixedCapacity>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let probe = Arc::new(FixedCapacity::new(GIB, 0));
    let config = DiskCacheConfig::new(temp_dir.path().join("cache"), expire);
    let cache = DiskCache::with_probe(config, probe.clone()).await.unwrap();
    (cache, probe, temp_dir)
}

/// Wait until a background removal of `path` has happened
pub async fn wait_for_removal(path: &Path) -> bool {
    for _ in 0..100 {
        if !path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    !path.exists()
}

pub fn temp_file_for(path: &Path) -> std::path::PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(flowfs_cache::TEMP_SUFFIX);
    tmp.into()
}

/// Age a file past the sweep grace period so clean treats it as settled
pub fn backdate(path: &Path) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(10 * 60))
        .unwrap();
}
