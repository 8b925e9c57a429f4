//! Capacity probing for the disk tier.
//!
//! The disk tier never keeps an exact ledger of its usage. It periodically
//! asks a [`CapacityProbe`] how big the hosting filesystem is and how much of
//! it is used, and gates saves on that estimate. Whatever else shares the
//! filesystem eats into the budget, so the cache yields space under external
//! pressure.

use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;

use crate::error::{CacheError, Result};
use crate::walk::walk_files;

/// Default time allowed for `df` to answer.
const DF_TIMEOUT: Duration = Duration::from_secs(10);

/// Snapshot of how much room a tier has.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capacity {
    pub capacity_bytes: u64,
    pub used_bytes: u64,
}

impl Capacity {
    pub fn new(capacity_bytes: u64, used_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            used_bytes,
        }
    }

    /// Whether `size` more bytes fit strictly below the capacity.
    pub fn fits(&self, size: u64) -> bool {
        self.used_bytes.saturating_add(size) < self.capacity_bytes
    }

    pub fn available_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.used_bytes)
    }
}

/// Source of capacity estimates for a cache directory.
#[async_trait]
pub trait CapacityProbe: Debug + Send + Sync {
    async fn probe(&self, dir: &Path) -> Result<Capacity>;
}

/// Probe backed by the `df` utility.
#[derive(Debug, Clone)]
pub struct DfProbe {
    timeout: Duration,
}

impl DfProbe {
    pub fn new() -> Self {
        Self {
            timeout: DF_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for DfProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapacityProbe for DfProbe {
    async fn probe(&self, dir: &Path) -> Result<Capacity> {
        // -P keeps every filesystem on a single line
        let mut command = Command::new("df");
        command.arg("-P").arg("-k").arg(dir).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                CacheError::Probe(format!(
                    "df {} timed out after {:?}",
                    dir.display(),
                    self.timeout
                ))
            })??;

        if !output.status.success() {
            return Err(CacheError::Probe(format!(
                "df {} exited with {}: {}",
                dir.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_df_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse the tabular report printed by `df -k`.
///
/// The header row is skipped; the first data row must carry at least six
/// columns (`filesystem total-KB used-KB available capacity mountpoint`).
/// Sizes are reported in kilobytes and scaled to bytes.
pub fn parse_df_output(output: &str) -> Result<Capacity> {
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("Filesystem") {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            continue;
        }

        let total = parse_kilobytes(fields[1])?;
        let used = parse_kilobytes(fields[2])?;
        return Ok(Capacity::new(
            total.saturating_mul(1024),
            used.saturating_mul(1024),
        ));
    }

    Err(CacheError::Probe("no filesystem row in df output".to_string()))
}

fn parse_kilobytes(field: &str) -> Result<u64> {
    field
        .parse::<u64>()
        .map_err(|e| CacheError::Probe(format!("parse {:?} failed: {}", field, e)))
}

/// A fixed, settable capacity.
///
/// Used by tests that need deterministic numbers and by the disk tier when
/// the filesystem cannot be probed at all.
#[derive(Debug, Default)]
pub struct FixedCapacity {
    capacity: Mutex<Capacity>,
}

impl FixedCapacity {
    pub fn new(capacity_bytes: u64, used_bytes: u64) -> Self {
        Self {
            capacity: Mutex::new(Capacity::new(capacity_bytes, used_bytes)),
        }
    }

    pub fn set(&self, capacity_bytes: u64, used_bytes: u64) {
        *self.capacity.lock() = Capacity::new(capacity_bytes, used_bytes);
    }

    pub fn get(&self) -> Capacity {
        *self.capacity.lock()
    }
}

#[async_trait]
impl CapacityProbe for FixedCapacity {
    async fn probe(&self, _dir: &Path) -> Result<Capacity> {
        Ok(self.get())
    }
}

/// A static byte budget whose usage is the total size of the files under the
/// cache directory.
#[derive(Debug, Clone)]
pub struct DirUsageProbe {
    capacity_bytes: u64,
}

impl DirUsageProbe {
    pub fn new(capacity_bytes: u64) -> Self {
        Self { capacity_bytes }
    }
}

#[async_trait]
impl CapacityProbe for DirUsageProbe {
    async fn probe(&self, dir: &Path) -> Result<Capacity> {
        let used = walk_files(dir)
            .await?
            .iter()
            .map(|(_, metadata)| metadata.len())
            .sum();
        Ok(Capacity::new(self.capacity_bytes, used))
    }
}
