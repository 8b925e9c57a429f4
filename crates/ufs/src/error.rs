//! Error types for underlying filesystems.

/// Errors that can occur when talking to a backend.
#[derive(Debug, thiserror::Error)]
pub enum UfsError {
    /// Path does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A path component is not a directory
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// File operation on a directory
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory still has children
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Path escapes the backend root or is otherwise malformed
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Write through a handle opened read-only
    #[error("handle is read-only: {0}")]
    ReadOnly(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Object storage error
    #[error("object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl UfsError {
    /// errno reported to the kernel for this error.
    pub fn errno(&self) -> i32 {
        match self {
            UfsError::NotFound(_) => libc::ENOENT,
            UfsError::AlreadyExists(_) => libc::EEXIST,
            UfsError::NotADirectory(_) => libc::ENOTDIR,
            UfsError::IsADirectory(_) => libc::EISDIR,
            UfsError::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
            UfsError::InvalidPath(_) => libc::EINVAL,
            UfsError::ReadOnly(_) => libc::EBADF,
            UfsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            UfsError::ObjectStore(object_store::Error::NotFound { .. }) => libc::ENOENT,
            UfsError::ObjectStore(object_store::Error::AlreadyExists { .. }) => libc::EEXIST,
            UfsError::ObjectStore(_) => libc::EIO,
            UfsError::InvalidConfig(_) => libc::EINVAL,
        }
    }
}

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, UfsError>;
