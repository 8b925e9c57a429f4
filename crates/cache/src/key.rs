//! Cache key helpers.
//!
//! Keys are opaque identity strings. The disk tier maps them onto relative
//! paths, so a key must stay inside the cache directory and must not collide
//! with the temp files written during a save.

/// Suffix appended to a payload path while it is being written.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Build the cache key for block `index` of the file at `path`.
///
/// The leading `/` of absolute filesystem paths is dropped so the key maps to
/// a relative location under the cache root.
pub fn block_key(path: &str, index: u64) -> String {
    format!("{}_{}", path.trim_start_matches('/'), index)
}

/// Whether `key` can be stored by every tier.
pub fn is_valid_key(key: &str) -> bool {
    if key.is_empty() || key.ends_with(TEMP_SUFFIX) {
        return false;
    }
    // every segment must survive a path round trip unchanged
    key.split('/')
        .all(|part| !part.is_empty() && part != "." && part != "..")
}
