//! Backend over object storage (S3/MinIO/local filesystem/memory).
//!
//! Object stores have no directories. A file `/a/b` is the object `a/b`; a
//! directory exists when any object lives under its prefix. `mkdir` writes
//! an empty marker object so empty directories survive.
//!
//! Writable handles buffer the whole object and upload it on flush.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore};
use tracing::debug;

use crate::error::{Result, UfsError};
use crate::ufs::{normalize, FileHandle, FileInfo, UnderFileSystem};

/// Marker object that keeps an otherwise empty directory alive.
const DIR_MARKER: &str = ".flowfs_dir";

const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// Serves files stored as objects.
#[derive(Debug, Clone)]
pub struct ObjectFileSystem {
    name: String,
    inner: Arc<dyn ObjectStore>,
}

impl ObjectFileSystem {
    pub fn new(name: impl Into<String>, inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    fn object_path(parts: &[&str]) -> ObjectPath {
        ObjectPath::from(parts.join("/"))
    }

    fn marker_path(parts: &[&str]) -> ObjectPath {
        let mut marker = parts.to_vec();
        marker.push(DIR_MARKER);
        Self::object_path(&marker)
    }

    fn dir_info(name: &str) -> FileInfo {
        FileInfo {
            name: name.to_string(),
            size: 0,
            is_dir: true,
            mode: DIR_MODE,
            mtime: 0,
        }
    }

    fn file_info(meta: &ObjectMeta) -> FileInfo {
        FileInfo {
            name: meta.location.filename().unwrap_or_default().to_string(),
            size: meta.size as u64,
            is_dir: false,
            mode: FILE_MODE,
            mtime: meta.last_modified.timestamp(),
        }
    }

    async fn head(&self, location: &ObjectPath) -> Result<Option<ObjectMeta>> {
        match self.inner.head(location).await {
            Ok(meta) => Ok(Some(meta)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_dir(&self, parts: &[&str]) -> Result<bool> {
        if parts.is_empty() {
            return Ok(true);
        }
        let prefix = Self::object_path(parts);
        let mut stream = self.inner.list(Some(&prefix));
        Ok(stream.try_next().await?.is_some())
    }

    async fn stat(&self, path: &str, parts: &[&str]) -> Result<FileInfo> {
        if parts.is_empty() {
            return Ok(Self::dir_info("/"));
        }
        if let Some(meta) = self.head(&Self::object_path(parts)).await? {
            return Ok(Self::file_info(&meta));
        }
        if self.is_dir(parts).await? {
            return Ok(Self::dir_info(parts[parts.len() - 1]));
        }
        Err(UfsError::NotFound(path.to_string()))
    }

    async fn ensure_parent_dir(&self, path: &str, parts: &[&str]) -> Result<()> {
        if parts.len() <= 1 {
            return Ok(());
        }
        let parent = &parts[..parts.len() - 1];
        if self.head(&Self::object_path(parent)).await?.is_some() {
            return Err(UfsError::NotADirectory(path.to_string()));
        }
        if !self.is_dir(parent).await? {
            return Err(UfsError::NotFound(path.to_string()));
        }
        Ok(())
    }

    async fn read_all(&self, location: &ObjectPath) -> Result<Vec<u8>> {
        let result = self.inner.get(location).await?;
        Ok(result.bytes().await?.to_vec())
    }

    async fn delete_quiet(&self, location: &ObjectPath) -> Result<()> {
        // the object may already be gone
        match self.inner.delete(location).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl UnderFileSystem for ObjectFileSystem {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_attr(&self, path: &str) -> Result<FileInfo> {
        let parts = normalize(path)?;
        self.stat(path, &parts).await
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>> {
        let parts = normalize(path)?;
        if !self.stat(path, &parts).await?.is_dir {
            return Err(UfsError::NotADirectory(path.to_string()));
        }

        let prefix = (!parts.is_empty()).then(|| Self::object_path(&parts));
        let listing = self.inner.list_with_delimiter(prefix.as_ref()).await?;

        let mut entries: Vec<FileInfo> = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.filename().map(Self::dir_info))
            .chain(
                listing
                    .objects
                    .iter()
                    .filter(|meta| meta.location.filename() != Some(DIR_MARKER))
                    .map(Self::file_info),
            )
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn mkdir(&self, path: &str, _mode: u32) -> Result<()> {
        let parts = normalize(path)?;
        if parts.is_empty() || self.stat(path, &parts).await.is_ok() {
            return Err(UfsError::AlreadyExists(path.to_string()));
        }
        self.ensure_parent_dir(path, &parts).await?;
        self.inner
            .put(&Self::marker_path(&parts), Bytes::new().into())
            .await?;
        Ok(())
    }

    async fn create(&self, path: &str, _mode: u32) -> Result<Box<dyn FileHandle>> {
        let parts = normalize(path)?;
        if parts.is_empty() || self.is_dir(&parts).await? {
            return Err(UfsError::IsADirectory(path.to_string()));
        }
        self.ensure_parent_dir(path, &parts).await?;

        let location = Self::object_path(&parts);
        self.inner.put(&location, Bytes::new().into()).await?;
        Ok(Box::new(ObjectHandle {
            inner: self.inner.clone(),
            location,
            size: 0,
            buffer: Some(Vec::new()),
            dirty: false,
        }))
    }

    async fn open(&self, path: &str, writable: bool) -> Result<Box<dyn FileHandle>> {
        let parts = normalize(path)?;
        let location = Self::object_path(&parts);
        let meta = if parts.is_empty() {
            None
        } else {
            self.head(&location).await?
        };
        let Some(meta) = meta else {
            if self.is_dir(&parts).await? {
                return Err(UfsError::IsADirectory(path.to_string()));
            }
            return Err(UfsError::NotFound(path.to_string()));
        };

        let buffer = if writable {
            Some(self.read_all(&location).await?)
        } else {
            None
        };
        Ok(Box::new(ObjectHandle {
            inner: self.inner.clone(),
            location,
            size: meta.size,
            buffer,
            dirty: false,
        }))
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        let parts = normalize(path)?;
        let location = Self::object_path(&parts);
        if parts.is_empty() || self.head(&location).await?.is_none() {
            if self.is_dir(&parts).await? {
                return Err(UfsError::IsADirectory(path.to_string()));
            }
            return Err(UfsError::NotFound(path.to_string()));
        }
        self.inner.delete(&location).await?;
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        let parts = normalize(path)?;
        if parts.is_empty() {
            return Err(UfsError::InvalidPath(path.to_string()));
        }
        if !self.stat(path, &parts).await?.is_dir {
            return Err(UfsError::NotADirectory(path.to_string()));
        }

        let marker = Self::marker_path(&parts);
        let prefix = Self::object_path(&parts);
        let children: Vec<ObjectMeta> = self.inner.list(Some(&prefix)).try_collect().await?;
        if children.iter().any(|meta| meta.location != marker) {
            return Err(UfsError::DirectoryNotEmpty(path.to_string()));
        }
        self.delete_quiet(&marker).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source_parts = normalize(from)?;
        let target_parts = normalize(to)?;
        if source_parts.is_empty() || target_parts.is_empty() {
            return Err(UfsError::InvalidPath(from.to_string()));
        }
        let source = Self::object_path(&source_parts);
        let target = Self::object_path(&target_parts);
        self.ensure_parent_dir(to, &target_parts).await?;

        if self.head(&source).await?.is_some() {
            self.inner.copy(&source, &target).await?;
            self.inner.delete(&source).await?;
            return Ok(());
        }

        // directory: move every object under the prefix
        let children: Vec<ObjectMeta> = self.inner.list(Some(&source)).try_collect().await?;
        if children.is_empty() {
            return Err(UfsError::NotFound(from.to_string()));
        }
        let source_prefix = format!("{}/", source);
        for meta in children {
            let suffix = meta
                .location
                .as_ref()
                .strip_prefix(&source_prefix)
                .unwrap_or_default();
            let destination = ObjectPath::from(format!("{}/{}", target, suffix));
            self.inner.copy(&meta.location, &destination).await?;
            self.inner.delete(&meta.location).await?;
        }
        debug!(from = %from, to = %to, "renamed directory prefix");
        Ok(())
    }

    async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        let parts = normalize(path)?;
        let location = Self::object_path(&parts);
        if parts.is_empty() || self.head(&location).await?.is_none() {
            return Err(UfsError::NotFound(path.to_string()));
        }
        let mut data = self.read_all(&location).await?;
        data.resize(size as usize, 0);
        self.inner.put(&location, Bytes::from(data).into()).await?;
        Ok(())
    }
}

struct ObjectHandle {
    inner: Arc<dyn ObjectStore>,
    location: ObjectPath,
    /// Object size at open time; only meaningful for read-only handles
    size: usize,
    /// Whole-object buffer of a writable handle
    buffer: Option<Vec<u8>>,
    dirty: bool,
}

#[async_trait]
impl FileHandle for ObjectHandle {
    async fn read(&mut self, offset: u64, size: usize) -> Result<Bytes> {
        let offset = offset as usize;
        if let Some(buffer) = &self.buffer {
            let start = offset.min(buffer.len());
            let end = offset.saturating_add(size).min(buffer.len());
            return Ok(Bytes::copy_from_slice(&buffer[start..end]));
        }

        let end = offset.saturating_add(size).min(self.size);
        if offset >= end {
            return Ok(Bytes::new());
        }
        Ok(self.inner.get_range(&self.location, offset..end).await?)
    }

    async fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        let buffer = self
            .buffer
            .as_mut()
            .ok_or_else(|| UfsError::ReadOnly(self.location.to_string()))?;
        let offset = offset as usize;
        let end = offset + data.len();
        if buffer.len() < end {
            buffer.resize(end, 0);
        }
        buffer[offset..end].copy_from_slice(data);
        self.dirty = true;
        Ok(data.len())
    }

    async fn truncate(&mut self, size: u64) -> Result<()> {
        let buffer = self
            .buffer
            .as_mut()
            .ok_or_else(|| UfsError::ReadOnly(self.location.to_string()))?;
        buffer.resize(size as usize, 0);
        self.dirty = true;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(buffer) = &self.buffer {
            self.inner
                .put(&self.location, Bytes::from(buffer.clone()).into())
                .await?;
            self.size = buffer.len();
        }
        self.dirty = false;
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        self.flush().await
    }
}
