//! Backend over a directory on a locally mounted filesystem.

use std::io::{self, SeekFrom};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{Result, UfsError};
use crate::ufs::{normalize, FileHandle, FileInfo, UnderFileSystem};

/// Serves a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    /// Open (creating if needed) a backend rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for part in normalize(path)? {
            resolved.push(part);
        }
        Ok(resolved)
    }
}

fn map_io(path: &str, err: io::Error) -> UfsError {
    match err.kind() {
        io::ErrorKind::NotFound => UfsError::NotFound(path.to_string()),
        io::ErrorKind::AlreadyExists => UfsError::AlreadyExists(path.to_string()),
        _ => UfsError::Io(err),
    }
}

fn file_info(name: String, meta: &std::fs::Metadata) -> FileInfo {
    FileInfo {
        name,
        size: if meta.is_dir() { 0 } else { meta.len() },
        is_dir: meta.is_dir(),
        mode: meta.permissions().mode() & 0o7777,
        mtime: meta.mtime(),
    }
}

fn last_component(path: &str) -> String {
    path.rsplit('/')
        .find(|part| !part.is_empty())
        .unwrap_or("/")
        .to_string()
}

#[async_trait]
impl UnderFileSystem for LocalFileSystem {
    fn name(&self) -> &str {
        "local"
    }

    async fn get_attr(&self, path: &str) -> Result<FileInfo> {
        let local = self.resolve(path)?;
        let meta = fs::metadata(&local).await.map_err(|e| map_io(path, e))?;
        Ok(file_info(last_component(path), &meta))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>> {
        let local = self.resolve(path)?;
        let meta = fs::metadata(&local).await.map_err(|e| map_io(path, e))?;
        if !meta.is_dir() {
            return Err(UfsError::NotADirectory(path.to_string()));
        }

        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&local).await.map_err(|e| map_io(path, e))?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // entries can vanish between listing and stat
            match entry.metadata().await {
                Ok(meta) => entries.push(file_info(name, &meta)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        let local = self.resolve(path)?;
        let mut builder = fs::DirBuilder::new();
        builder.mode(mode);
        builder.create(&local).await.map_err(|e| map_io(path, e))
    }

    async fn create(&self, path: &str, mode: u32) -> Result<Box<dyn FileHandle>> {
        let local = self.resolve(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&local)
            .await
            .map_err(|e| map_io(path, e))?;
        Ok(Box::new(LocalHandle::new(path, file, true)))
    }

    async fn open(&self, path: &str, writable: bool) -> Result<Box<dyn FileHandle>> {
        let local = self.resolve(path)?;
        let meta = fs::metadata(&local).await.map_err(|e| map_io(path, e))?;
        if meta.is_dir() {
            return Err(UfsError::IsADirectory(path.to_string()));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&local)
            .await
            .map_err(|e| map_io(path, e))?;
        Ok(Box::new(LocalHandle::new(path, file, writable)))
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        let local = self.resolve(path)?;
        fs::remove_file(&local).await.map_err(|e| map_io(path, e))
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        let local = self.resolve(path)?;
        fs::remove_dir(&local).await.map_err(|e| map_io(path, e))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        fs::rename(&source, &target).await.map_err(|e| map_io(from, e))
    }

    async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        let local = self.resolve(path)?;
        let file = OpenOptions::new()
            .write(true)
            .open(&local)
            .await
            .map_err(|e| map_io(path, e))?;
        file.set_len(size).await?;
        Ok(())
    }
}

struct LocalHandle {
    path: String,
    file: File,
    writable: bool,
}

impl LocalHandle {
    fn new(path: &str, file: File, writable: bool) -> Self {
        Self {
            path: path.to_string(),
            file,
            writable,
        }
    }
}

#[async_trait]
impl FileHandle for LocalHandle {
    async fn read(&mut self, offset: u64, size: usize) -> Result<Bytes> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = BytesMut::zeroed(size);
        let mut filled = 0;
        while filled < size {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf.freeze())
    }

    async fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(UfsError::ReadOnly(self.path.clone()));
        }
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        Ok(data.len())
    }

    async fn truncate(&mut self, size: u64) -> Result<()> {
        if !self.writable {
            return Err(UfsError::ReadOnly(self.path.clone()));
        }
        self.file.set_len(size).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.writable {
            self.file.flush().await?;
        }
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        self.flush().await
    }
}
