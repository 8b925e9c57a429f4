//! Inode to path mapping for the FUSE filesystem
//!
//! The kernel names files by inode; backends name them by path. Paths here
//! are absolute within the mount (`/`, `/a/b`).

use std::collections::HashMap;

/// Bidirectional mapping between inodes and paths
#[derive(Debug)]
pub struct InodeTable {
    path_to_inode: HashMap<String, u64>,
    inode_to_path: HashMap<u64, String>,
    next_inode: u64,
}

impl InodeTable {
    pub const ROOT_INODE: u64 = fuser::FUSE_ROOT_ID;

    /// Create a new inode table with the root directory at inode 1
    pub fn new() -> Self {
        let mut table = Self {
            path_to_inode: HashMap::new(),
            inode_to_path: HashMap::new(),
            next_inode: Self::ROOT_INODE + 1,
        };
        table.path_to_inode.insert("/".to_string(), Self::ROOT_INODE);
        table.inode_to_path.insert(Self::ROOT_INODE, "/".to_string());
        table
    }

    /// Get inode for a path, allocating one if it has none yet
    pub fn get_or_create(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.path_to_inode.get(path) {
            return ino;
        }

        let ino = self.next_inode;
        self.next_inode += 1;
        self.path_to_inode.insert(path.to_string(), ino);
        self.inode_to_path.insert(ino, path.to_string());
        ino
    }

    pub fn get_inode(&self, path: &str) -> Option<u64> {
        self.path_to_inode.get(path).copied()
    }

    pub fn get_path(&self, inode: u64) -> Option<&str> {
        self.inode_to_path.get(&inode).map(String::as_str)
    }

    /// Forget a deleted path
    pub fn remove_path(&mut self, path: &str) {
        if let Some(ino) = self.path_to_inode.remove(path) {
            self.inode_to_path.remove(&ino);
        }
    }

    /// Move a path and everything below it, keeping inode numbers
    pub fn rename(&mut self, from: &str, to: &str) {
        // the target is replaced
        self.remove_path(to);

        let prefix = format!("{}/", from);
        let moved: Vec<(String, u64)> = self
            .path_to_inode
            .iter()
            .filter(|(path, _)| path.as_str() == from || path.starts_with(&prefix))
            .map(|(path, &ino)| (path.clone(), ino))
            .collect();

        for (old, ino) in moved {
            let new = format!("{}{}", to, &old[from.len()..]);
            self.path_to_inode.remove(&old);
            self.path_to_inode.insert(new.clone(), ino);
            self.inode_to_path.insert(ino, new);
        }
    }

    pub fn len(&self) -> usize {
        self.inode_to_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inode_to_path.is_empty()
    }

    /// Path of a child entry
    pub fn join(parent: &str, name: &str) -> String {
        if parent == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", parent, name)
        }
    }

    /// Parent of a path (`/` for top-level entries and the root)
    pub fn parent_path(path: &str) -> String {
        match path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => path[..idx].to_string(),
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_preallocated() {
        let table = InodeTable::new();
        assert_eq!(table.get_path(InodeTable::ROOT_INODE), Some("/"));
        assert_eq!(table.get_inode("/"), Some(InodeTable::ROOT_INODE));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let mut table = InodeTable::new();
        let a = table.get_or_create("/a");
        let b = table.get_or_create("/b");
        assert_ne!(a, b);
        assert_eq!(table.get_or_create("/a"), a);
        assert_eq!(table.get_path(b), Some("/b"));

        table.remove_path("/a");
        assert_eq!(table.get_path(a), None);
        assert_eq!(table.get_inode("/a"), None);
    }

    #[test]
    fn test_rename_moves_descendants() {
        let mut table = InodeTable::new();
        let dir = table.get_or_create("/dir");
        let child = table.get_or_create("/dir/child");
        let sibling = table.get_or_create("/dirt");
        let replaced = table.get_or_create("/new");

        table.rename("/dir", "/new");

        assert_eq!(table.get_path(dir), Some("/new"));
        assert_eq!(table.get_path(child), Some("/new/child"));
        assert_eq!(table.get_path(sibling), Some("/dirt"));
        assert_eq!(table.get_path(replaced), None);
        assert_eq!(table.get_inode("/dir/child"), None);
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(InodeTable::join("/", "a"), "/a");
        assert_eq!(InodeTable::join("/a", "b"), "/a/b");
        assert_eq!(InodeTable::parent_path("/a/b"), "/a");
        assert_eq!(InodeTable::parent_path("/a"), "/");
        assert_eq!(InodeTable::parent_path("/"), "/");
    }
}
