//! Underlying filesystems for flowfs
//!
//! The FUSE client reads and writes through an [`UnderFileSystem`]; the block
//! cache only ever stores what one of these backends returned.
//!
//! # Backends
//!
//! - [`LocalFileSystem`]: a directory on a locally mounted filesystem
//! - [`ObjectFileSystem`]: object storage (S3/MinIO/local/in-memory) with
//!   directories emulated by key prefixes
//!
//! Paths handed to a backend are absolute within the mount (`/`, `/a/b`).

mod config;
mod error;
mod local;
mod object;
mod ufs;

pub use config::UfsConfig;
pub use error::{Result, UfsError};
pub use local::LocalFileSystem;
pub use object::ObjectFileSystem;
pub use ufs::{normalize, FileHandle, FileInfo, UnderFileSystem};
