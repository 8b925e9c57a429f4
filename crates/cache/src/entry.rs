use std::time::{Duration, Instant};

/// Upper bound used when `now + ttl` does not fit in an `Instant`.
pub(crate) const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Metadata a tier keeps for every cached key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    /// Payload size in bytes
    pub size: u64,
    /// Point in time after which the entry is stale
    pub expires_at: Instant,
}

impl CacheEntry {
    /// Create an entry for a payload of `size` bytes living for `ttl`.
    pub fn new(size: u64, ttl: Duration) -> Self {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        Self { size, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}
