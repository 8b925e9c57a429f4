use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, UfsError};

/// Attributes of a file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Last path component (`/` for the root)
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    /// Permission bits
    pub mode: u32,
    /// Modification time, seconds since the epoch
    pub mtime: i64,
}

/// An open file on a backend.
#[async_trait]
pub trait FileHandle: Send + Sync {
    /// Read up to `size` bytes at `offset`. Short reads only happen at EOF.
    async fn read(&mut self, offset: u64, size: usize) -> Result<Bytes>;

    /// Write `data` at `offset`, returning the number of bytes written.
    async fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize>;

    /// Resize the file through this handle, zero-filling growth.
    async fn truncate(&mut self, size: u64) -> Result<()>;

    /// Make written data visible to other readers of the backend.
    async fn flush(&mut self) -> Result<()>;

    /// Flush and give up the handle.
    async fn release(&mut self) -> Result<()>;
}

/// A storage backend the FUSE client fronts.
#[async_trait]
pub trait UnderFileSystem: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    async fn get_attr(&self, path: &str) -> Result<FileInfo>;

    async fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>>;

    async fn mkdir(&self, path: &str, mode: u32) -> Result<()>;

    /// Create (or truncate) a file and open it for writing.
    async fn create(&self, path: &str, mode: u32) -> Result<Box<dyn FileHandle>>;

    async fn open(&self, path: &str, writable: bool) -> Result<Box<dyn FileHandle>>;

    async fn unlink(&self, path: &str) -> Result<()>;

    async fn rmdir(&self, path: &str) -> Result<()>;

    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    async fn truncate(&self, path: &str, size: u64) -> Result<()>;
}

/// Normalize a mount path into its relative components.
///
/// `/a//b/` becomes `["a", "b"]` and the root becomes an empty list. `.` is
/// dropped; `..` is rejected so no path can leave the backend root.
pub fn normalize(path: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => return Err(UfsError::InvalidPath(path.to_string())),
            part => parts.push(part),
        }
    }
    Ok(parts)
}
