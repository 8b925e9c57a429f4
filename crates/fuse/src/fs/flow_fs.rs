//! FUSE filesystem implementation for flowfs
//!
//! Implements the fuser::Filesystem trait on top of an [`UnderFileSystem`].
//! Reads through read-only handles go through the [`BlockReader`]; writes go
//! straight to the backend handle and drop the blocks they touch.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use flowfs_ufs::{FileHandle, FileInfo, UfsError, UnderFileSystem};
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use tokio::runtime::Handle;

use crate::config::FuseSection;
use crate::fs::inode_table::InodeTable;
use crate::fs::reader::BlockReader;

type FsResult<T> = std::result::Result<T, c_int>;

/// Behaviour toggles taken from the `[fuse]` config section.
#[derive(Debug, Clone)]
pub struct FsOptions {
    pub read_only: bool,
    pub entry_ttl: Duration,
    pub attr_ttl: Duration,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            entry_ttl: Duration::from_secs(1),
            attr_ttl: Duration::from_secs(1),
        }
    }
}

impl From<&FuseSection> for FsOptions {
    fn from(section: &FuseSection) -> Self {
        Self {
            read_only: section.read_only,
            entry_ttl: section.entry_ttl(),
            attr_ttl: section.attr_ttl(),
        }
    }
}

/// An open file handle
struct OpenFile {
    path: String,
    handle: Box<dyn FileHandle>,
    writable: bool,
    /// Size seen at open, grown by writes through this handle
    size: u64,
}

/// FUSE filesystem fronting a backend
pub struct FlowFs {
    /// Tokio runtime handle for async operations
    rt: Handle,
    ufs: Arc<dyn UnderFileSystem>,
    reader: BlockReader,
    inodes: InodeTable,
    open_files: HashMap<u64, OpenFile>,
    next_fh: u64,
    options: FsOptions,
    uid: u32,
    gid: u32,
}

/// Log a backend failure and turn it into the errno for the kernel.
fn errno(op: &str, path: &str, err: UfsError) -> c_int {
    match err {
        UfsError::NotFound(_) | UfsError::AlreadyExists(_) | UfsError::DirectoryNotEmpty(_) => {
            tracing::debug!(op, path, error = %err, "fuse request failed");
        }
        _ => tracing::warn!(op, path, error = %err, "fuse request failed"),
    }
    err.errno()
}

impl FlowFs {
    /// Block size reported to the kernel
    const BLOCK_SIZE: u32 = 512;

    pub fn new(
        rt: Handle,
        ufs: Arc<dyn UnderFileSystem>,
        reader: BlockReader,
        options: FsOptions,
    ) -> Self {
        Self {
            rt,
            ufs,
            reader,
            inodes: InodeTable::new(),
            open_files: HashMap::new(),
            next_fh: 1,
            options,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn next_handle(&mut self) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        fh
    }

    fn make_attr(&self, ino: u64, info: &FileInfo) -> FileAttr {
        let kind = if info.is_dir {
            FileType::Directory
        } else {
            FileType::RegularFile
        };
        let mtime = UNIX_EPOCH + Duration::from_secs(info.mtime.max(0) as u64);

        FileAttr {
            ino,
            size: info.size,
            blocks: info.size.div_ceil(Self::BLOCK_SIZE as u64),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind,
            perm: (info.mode & 0o7777) as u16,
            nlink: if info.is_dir { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: Self::BLOCK_SIZE,
            flags: 0,
        }
    }

    fn check_writable(&self) -> FsResult<()> {
        if self.options.read_only {
            return Err(libc::EROFS);
        }
        Ok(())
    }

    fn path_of(&self, ino: u64) -> FsResult<String> {
        self.inodes
            .get_path(ino)
            .map(str::to_string)
            .ok_or(libc::ENOENT)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> FsResult<String> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        let parent_path = self.path_of(parent)?;
        Ok(InodeTable::join(&parent_path, name))
    }

    fn open_file(&mut self, fh: u64) -> FsResult<&mut OpenFile> {
        self.open_files.get_mut(&fh).ok_or(libc::EBADF)
    }

    /// Backend attributes, with sizes still buffered in open handles applied.
    async fn stat(&self, path: &str) -> FsResult<FileInfo> {
        let mut info = self
            .ufs
            .get_attr(path)
            .await
            .map_err(|e| errno("getattr", path, e))?;
        let buffered = self
            .open_files
            .values()
            .filter(|file| file.writable && file.path == path)
            .map(|file| file.size)
            .max();
        if let Some(size) = buffered {
            info.size = info.size.max(size);
        }
        Ok(info)
    }

    async fn do_lookup(&mut self, parent: u64, name: &OsStr) -> FsResult<FileAttr> {
        let path = self.child_path(parent, name)?;
        let info = self.stat(&path).await?;
        let ino = self.inodes.get_or_create(&path);
        Ok(self.make_attr(ino, &info))
    }

    async fn do_getattr(&mut self, ino: u64) -> FsResult<FileAttr> {
        let path = self.path_of(ino)?;
        let info = self.stat(&path).await?;
        Ok(self.make_attr(ino, &info))
    }

    async fn do_truncate(&mut self, ino: u64, size: u64, fh: Option<u64>) -> FsResult<FileAttr> {
        self.check_writable()?;
        let path = self.path_of(ino)?;
        let info = self.stat(&path).await?;
        if info.is_dir {
            return Err(libc::EISDIR);
        }

        let through_handle = fh.and_then(|fh| self.open_files.get_mut(&fh).filter(|f| f.writable));
        match through_handle {
            Some(file) => {
                file.handle
                    .truncate(size)
                    .await
                    .map_err(|e| errno("truncate", &path, e))?;
                file.size = size;
            }
            None => {
                self.ufs
                    .truncate(&path, size)
                    .await
                    .map_err(|e| errno("truncate", &path, e))?;
                for file in self.open_files.values_mut() {
                    if file.writable && file.path == path {
                        file.size = size;
                    }
                }
            }
        }

        self.reader.invalidate(&path, info.size.max(size)).await;
        let info = self.stat(&path).await?;
        Ok(self.make_attr(ino, &FileInfo { size, ..info }))
    }

    async fn do_readdir(&mut self, ino: u64) -> FsResult<Vec<(u64, FileType, String)>> {
        let path = self.path_of(ino)?;
        let entries = self
            .ufs
            .read_dir(&path)
            .await
            .map_err(|e| errno("readdir", &path, e))?;

        let mut all_entries: Vec<(u64, FileType, String)> = Vec::with_capacity(entries.len() + 2);
        all_entries.push((ino, FileType::Directory, ".".to_string()));
        let parent_ino = if ino == InodeTable::ROOT_INODE {
            ino
        } else {
            self.inodes.get_or_create(&InodeTable::parent_path(&path))
        };
        all_entries.push((parent_ino, FileType::Directory, "..".to_string()));

        for entry in entries {
            let entry_ino = self.inodes.get_or_create(&InodeTable::join(&path, &entry.name));
            let kind = if entry.is_dir {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            all_entries.push((entry_ino, kind, entry.name));
        }
        Ok(all_entries)
    }

    async fn do_mkdir(&mut self, parent: u64, name: &OsStr, mode: u32) -> FsResult<FileAttr> {
        self.check_writable()?;
        let path = self.child_path(parent, name)?;
        self.ufs
            .mkdir(&path, mode)
            .await
            .map_err(|e| errno("mkdir", &path, e))?;
        let info = self.stat(&path).await?;
        let ino = self.inodes.get_or_create(&path);
        Ok(self.make_attr(ino, &info))
    }

    async fn do_create(&mut self, parent: u64, name: &OsStr, mode: u32) -> FsResult<(FileAttr, u64)> {
        self.check_writable()?;
        let path = self.child_path(parent, name)?;

        // blocks of a file being replaced
        if let Ok(old) = self.ufs.get_attr(&path).await {
            self.reader.invalidate(&path, old.size).await;
        }

        let handle = self
            .ufs
            .create(&path, mode)
            .await
            .map_err(|e| errno("create", &path, e))?;
        let info = self.stat(&path).await?;
        let ino = self.inodes.get_or_create(&path);
        let fh = self.next_handle();
        self.open_files.insert(
            fh,
            OpenFile {
                path,
                handle,
                writable: true,
                size: 0,
            },
        );
        Ok((self.make_attr(ino, &info), fh))
    }

    async fn do_open(&mut self, ino: u64, flags: i32) -> FsResult<u64> {
        let path = self.path_of(ino)?;
        let writable = flags & libc::O_ACCMODE != libc::O_RDONLY;
        if writable {
            self.check_writable()?;
        }

        let info = self.stat(&path).await?;
        if info.is_dir {
            return Err(libc::EISDIR);
        }

        let mut size = info.size;
        if writable && flags & libc::O_TRUNC != 0 {
            self.ufs
                .truncate(&path, 0)
                .await
                .map_err(|e| errno("open", &path, e))?;
            self.reader.invalidate(&path, size).await;
            size = 0;
        }

        let handle = self
            .ufs
            .open(&path, writable)
            .await
            .map_err(|e| errno("open", &path, e))?;
        let fh = self.next_handle();
        self.open_files.insert(
            fh,
            OpenFile {
                path,
                handle,
                writable,
                size,
            },
        );
        Ok(fh)
    }

    async fn do_read(&mut self, fh: u64, offset: i64, size: u32) -> FsResult<Bytes> {
        let offset = u64::try_from(offset).map_err(|_| libc::EINVAL)?;
        let file = self.open_files.get_mut(&fh).ok_or(libc::EBADF)?;

        // a writable handle may hold data the cache has never seen
        let result = if file.writable {
            file.handle.read(offset, size as usize).await
        } else {
            self.reader
                .read(&file.path, file.size, file.handle.as_mut(), offset, size)
                .await
        };
        result.map_err(|e| errno("read", &file.path, e))
    }

    async fn do_write(&mut self, fh: u64, offset: i64, data: &[u8]) -> FsResult<u32> {
        self.check_writable()?;
        let offset = u64::try_from(offset).map_err(|_| libc::EINVAL)?;
        let file = self.open_files.get_mut(&fh).ok_or(libc::EBADF)?;
        if !file.writable {
            return Err(libc::EBADF);
        }

        let written = file
            .handle
            .write(offset, data)
            .await
            .map_err(|e| errno("write", &file.path, e))?;
        file.size = file.size.max(offset + written as u64);
        self.reader
            .invalidate_range(&file.path, offset, written as u64)
            .await;
        Ok(written as u32)
    }

    async fn do_flush(&mut self, fh: u64) -> FsResult<()> {
        let file = self.open_file(fh)?;
        if !file.writable {
            return Ok(());
        }
        let path = file.path.clone();
        file.handle
            .flush()
            .await
            .map_err(|e| errno("flush", &path, e))
    }

    async fn do_release(&mut self, fh: u64) -> FsResult<()> {
        let Some(mut file) = self.open_files.remove(&fh) else {
            return Err(libc::EBADF);
        };
        file.handle
            .release()
            .await
            .map_err(|e| errno("release", &file.path, e))
    }

    async fn do_unlink(&mut self, parent: u64, name: &OsStr) -> FsResult<()> {
        self.check_writable()?;
        let path = self.child_path(parent, name)?;
        let info = self.stat(&path).await?;
        if info.is_dir {
            return Err(libc::EISDIR);
        }
        self.ufs
            .unlink(&path)
            .await
            .map_err(|e| errno("unlink", &path, e))?;
        self.reader.invalidate(&path, info.size).await;
        self.inodes.remove_path(&path);
        Ok(())
    }

    async fn do_rmdir(&mut self, parent: u64, name: &OsStr) -> FsResult<()> {
        self.check_writable()?;
        let path = self.child_path(parent, name)?;
        self.ufs
            .rmdir(&path)
            .await
            .map_err(|e| errno("rmdir", &path, e))?;
        self.inodes.remove_path(&path);
        Ok(())
    }

    async fn do_rename(
        &mut self,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
    ) -> FsResult<()> {
        self.check_writable()?;
        let old_path = self.child_path(parent, name)?;
        let new_path = self.child_path(newparent, newname)?;

        let source = self.stat(&old_path).await?;
        let replaced = self.ufs.get_attr(&new_path).await.ok();

        self.ufs
            .rename(&old_path, &new_path)
            .await
            .map_err(|e| errno("rename", &old_path, e))?;

        if !source.is_dir {
            self.reader.invalidate(&old_path, source.size).await;
        }
        if let Some(replaced) = replaced.filter(|info| !info.is_dir) {
            self.reader.invalidate(&new_path, replaced.size).await;
        }

        self.inodes.rename(&old_path, &new_path);
        let prefix = format!("{}/", old_path);
        for file in self.open_files.values_mut() {
            if file.path == old_path || file.path.starts_with(&prefix) {
                file.path = format!("{}{}", new_path, &file.path[old_path.len()..]);
            }
        }
        Ok(())
    }
}

impl Filesystem for FlowFs {
    fn init(
        &mut self,
        _req: &Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), c_int> {
        tracing::info!(
            backend = self.ufs.name(),
            block_size = self.reader.block_size(),
            read_only = self.options.read_only,
            "FUSE filesystem initialized"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!(open_files = self.open_files.len(), "FUSE filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let rt = self.rt.clone();
        match rt.block_on(self.do_lookup(parent, name)) {
            Ok(attr) => reply.entry(&self.options.entry_ttl, &attr, 0),
            Err(e) => reply.error(e),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let rt = self.rt.clone();
        match rt.block_on(self.do_getattr(ino)) {
            Ok(attr) => reply.attr(&self.options.attr_ttl, &attr),
            Err(e) => reply.error(e),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let rt = self.rt.clone();
        // only size changes reach the backend
        let result = match size {
            Some(size) => rt.block_on(self.do_truncate(ino, size, fh)),
            None => rt.block_on(self.do_getattr(ino)),
        };
        match result {
            Ok(attr) => reply.attr(&self.options.attr_ttl, &attr),
            Err(e) => reply.error(e),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let rt = self.rt.clone();
        let entries = match rt.block_on(self.do_readdir(ino)) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let rt = self.rt.clone();
        match rt.block_on(self.do_mkdir(parent, name, mode & !umask)) {
            Ok(attr) => reply.entry(&self.options.entry_ttl, &attr, 0),
            Err(e) => reply.error(e),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let rt = self.rt.clone();
        match rt.block_on(self.do_create(parent, name, mode & !umask)) {
            Ok((attr, fh)) => reply.created(&self.options.entry_ttl, &attr, 0, fh, flags as u32),
            Err(e) => reply.error(e),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let rt = self.rt.clone();
        match rt.block_on(self.do_open(ino, flags)) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let rt = self.rt.clone();
        match rt.block_on(self.do_read(fh, offset, size)) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let rt = self.rt.clone();
        match rt.block_on(self.do_write(fh, offset, data)) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(e),
        }
    }

    fn flush(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        let rt = self.rt.clone();
        match rt.block_on(self.do_flush(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let rt = self.rt.clone();
        match rt.block_on(self.do_release(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let rt = self.rt.clone();
        match rt.block_on(self.do_unlink(parent, name)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let rt = self.rt.clone();
        match rt.block_on(self.do_rmdir(parent, name)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let rt = self.rt.clone();
        match rt.block_on(self.do_rename(parent, name, newparent, newname)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use flowfs_cache::{CacheStore, MemoryCache, MemoryCacheConfig, TieredCache};
    use flowfs_ufs::UfsConfig;

    use super::*;

    const BLOCK: u64 = 4;

    struct Fixture {
        fs: FlowFs,
        cache: Arc<TieredCache>,
    }

    async fn setup(options: FsOptions) -> Fixture {
        let ufs = UfsConfig::Memory.build().await.unwrap();
        let memory = MemoryCache::new(MemoryCacheConfig {
            block_size: BLOCK,
            max_blocks: 64,
            expire: Duration::from_secs(60),
        });
        let cache = Arc::new(TieredCache::new(memory, None));
        let reader = BlockReader::new(cache.clone(), BLOCK);
        let fs = FlowFs::new(Handle::current(), ufs, reader, options);
        Fixture { fs, cache }
    }

    async fn write_file(fs: &mut FlowFs, name: &str, data: &[u8]) -> u64 {
        let (attr, fh) = fs
            .do_create(InodeTable::ROOT_INODE, OsStr::new(name), 0o644)
            .await
            .unwrap();
        fs.do_write(fh, 0, data).await.unwrap();
        fs.do_flush(fh).await.unwrap();
        fs.do_release(fh).await.unwrap();
        attr.ino
    }

    async fn read_all(fs: &mut FlowFs, ino: u64, offset: i64, size: u32) -> Bytes {
        let fh = fs.do_open(ino, libc::O_RDONLY).await.unwrap();
        let data = fs.do_read(fh, offset, size).await.unwrap();
        fs.do_release(fh).await.unwrap();
        data
    }

    #[tokio::test]
    async fn test_read_populates_block_cache() {
        let Fixture { mut fs, cache } = setup(FsOptions::default()).await;
        let ino = write_file(&mut fs, "data.bin", b"0123456789").await;

        let attr = fs.do_getattr(ino).await.unwrap();
        assert_eq!(attr.size, 10);
        assert_eq!(attr.kind, FileType::RegularFile);

        assert_eq!(&read_all(&mut fs, ino, 3, 5).await[..], b"34567");

        // blocks 0..=1 were touched; block 2 was not
        assert!(cache.load("data.bin_0").await.is_some());
        assert!(cache.load("data.bin_1").await.is_some());
        assert!(cache.load("data.bin_2").await.is_none());

        // short tail block, read past EOF
        assert_eq!(&read_all(&mut fs, ino, 8, 100).await[..], b"89");
        assert!(cache.load("data.bin_2").await.is_some());
        assert!(read_all(&mut fs, ino, 10, 4).await.is_empty());
    }

    #[tokio::test]
    async fn test_write_invalidates_cached_blocks() {
        let Fixture { mut fs, cache } = setup(FsOptions::default()).await;
        let ino = write_file(&mut fs, "f", b"aaaabbbb").await;
        assert_eq!(&read_all(&mut fs, ino, 0, 8).await[..], b"aaaabbbb");

        let fh = fs.do_open(ino, libc::O_RDWR).await.unwrap();
        fs.do_write(fh, 4, b"cc").await.unwrap();
        assert!(cache.load("f_0").await.is_some());
        assert!(cache.load("f_1").await.is_none());
        fs.do_flush(fh).await.unwrap();
        fs.do_release(fh).await.unwrap();

        assert_eq!(&read_all(&mut fs, ino, 0, 8).await[..], b"aaaaccbb");
    }

    #[tokio::test]
    async fn test_growth_rejects_short_cached_tail() {
        let Fixture { mut fs, .. } = setup(FsOptions::default()).await;
        let ino = write_file(&mut fs, "grow", b"abcdef").await;
        assert_eq!(&read_all(&mut fs, ino, 0, 16).await[..], b"abcdef");

        // rewrite the whole file behind the cache's back, same path
        let mut handle = fs.ufs.open("/grow", true).await.unwrap();
        handle.write(6, b"gh").await.unwrap();
        handle.release().await.unwrap();

        assert_eq!(&read_all(&mut fs, ino, 0, 16).await[..], b"abcdefgh");
    }

    #[tokio::test]
    async fn test_truncate_and_unlink_drop_blocks() {
        let Fixture { mut fs, cache } = setup(FsOptions::default()).await;
        let ino = write_file(&mut fs, "t", b"12345678").await;
        read_all(&mut fs, ino, 0, 8).await;

        let attr = fs.do_truncate(ino, 2, None).await.unwrap();
        assert_eq!(attr.size, 2);
        assert!(cache.load("t_0").await.is_none());
        assert_eq!(&read_all(&mut fs, ino, 0, 8).await[..], b"12");

        fs.do_unlink(InodeTable::ROOT_INODE, OsStr::new("t"))
            .await
            .unwrap();
        assert!(cache.load("t_0").await.is_none());
        assert_eq!(fs.do_getattr(ino).await.unwrap_err(), libc::ENOENT);
        assert_eq!(
            fs.do_lookup(InodeTable::ROOT_INODE, OsStr::new("t"))
                .await
                .unwrap_err(),
            libc::ENOENT
        );
    }

    #[tokio::test]
    async fn test_directories_and_rename() {
        let Fixture { mut fs, .. } = setup(FsOptions::default()).await;
        let dir = fs
            .do_mkdir(InodeTable::ROOT_INODE, OsStr::new("docs"), 0o755)
            .await
            .unwrap();
        assert_eq!(dir.kind, FileType::Directory);

        let (file, fh) = fs
            .do_create(dir.ino, OsStr::new("a.txt"), 0o644)
            .await
            .unwrap();
        fs.do_write(fh, 0, b"hi").await.unwrap();
        fs.do_release(fh).await.unwrap();

        let names: Vec<String> = fs
            .do_readdir(dir.ino)
            .await
            .unwrap()
            .into_iter()
            .map(|(_, _, name)| name)
            .collect();
        assert_eq!(names, vec![".", "..", "a.txt"]);

        assert_eq!(
            fs.do_rmdir(InodeTable::ROOT_INODE, OsStr::new("docs"))
                .await
                .unwrap_err(),
            libc::ENOTEMPTY
        );

        fs.do_rename(
            InodeTable::ROOT_INODE,
            OsStr::new("docs"),
            InodeTable::ROOT_INODE,
            OsStr::new("papers"),
        )
        .await
        .unwrap();

        // inode numbers survive the move
        assert_eq!(fs.inodes.get_path(file.ino), Some("/papers/a.txt"));
        assert_eq!(&read_all(&mut fs, file.ino, 0, 8).await[..], b"hi");
    }

    #[tokio::test]
    async fn test_read_only_mount_rejects_mutation() {
        let options = FsOptions {
            read_only: true,
            ..FsOptions::default()
        };
        let Fixture { mut fs, .. } = setup(options).await;

        assert_eq!(
            fs.do_create(InodeTable::ROOT_INODE, OsStr::new("x"), 0o644)
                .await
                .unwrap_err(),
            libc::EROFS
        );
        assert_eq!(
            fs.do_mkdir(InodeTable::ROOT_INODE, OsStr::new("d"), 0o755)
                .await
                .unwrap_err(),
            libc::EROFS
        );
        assert_eq!(
            fs.do_open(InodeTable::ROOT_INODE, libc::O_RDONLY)
                .await
                .unwrap_err(),
            libc::EISDIR
        );
    }

    #[tokio::test]
    async fn test_unknown_handles() {
        let Fixture { mut fs, .. } = setup(FsOptions::default()).await;
        assert_eq!(fs.do_read(42, 0, 1).await.unwrap_err(), libc::EBADF);
        assert_eq!(fs.do_release(42).await.unwrap_err(), libc::EBADF);
        assert_eq!(fs.do_getattr(999).await.unwrap_err(), libc::ENOENT);
    }
}
