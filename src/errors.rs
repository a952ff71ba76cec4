use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result of filesystem operations.
pub type Result<T> = std::result::Result<T, FsError>;

/// Errors produced by filesystem operations.
///
/// Variants carry the path (or paths) the operation was working on when it
/// failed, so the message alone is enough to locate the problem.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("no such file or directory '{}'", .0.display())]
    NotFound(PathBuf),
    #[error("file already exists at '{}'", .0.display())]
    AlreadyExists(PathBuf),
    #[error("'{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("'{}' is a directory", .0.display())]
    IsADirectory(PathBuf),
    #[error("directory '{}' is not empty", .0.display())]
    DirectoryNotEmpty(PathBuf),
    #[error("invalid argument involving '{}'", .0.display())]
    InvalidArgument(PathBuf),
    #[error("circular symlinks at '{}'", .0.display())]
    TooManySymlinks(PathBuf),
    #[error("file at '{}' is not reachable from a root", .0.display())]
    NotMounted(PathBuf),
    #[error("filesystem is read-only")]
    ReadOnlyFs,
    #[error("i/o error at '{}'", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    /// Wraps a host I/O error, lifting well-known kinds into their own
    /// variants so callers can match on them like on virtual-tree errors.
    pub(crate) fn io(path: impl AsRef<std::path::Path>, err: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(path),
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path),
            io::ErrorKind::NotADirectory => FsError::NotADirectory(path),
            io::ErrorKind::IsADirectory => FsError::IsADirectory(path),
            io::ErrorKind::DirectoryNotEmpty => FsError::DirectoryNotEmpty(path),
            io::ErrorKind::InvalidInput => FsError::InvalidArgument(path),
            io::ErrorKind::ReadOnlyFilesystem => FsError::ReadOnlyFs,
            #[cfg(unix)]
            _ if err.raw_os_error() == Some(libc::ELOOP) => FsError::TooManySymlinks(path),
            _ => FsError::Io { path, source: err },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_kinds_are_lifted() {
        let err = FsError::io("/foo", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, FsError::NotFound(p) if p == PathBuf::from("/foo")));

        let err = FsError::io("/foo", io::Error::from(io::ErrorKind::AlreadyExists));
        assert!(matches!(err, FsError::AlreadyExists(_)));

        let err = FsError::io("/foo", io::Error::other("boom"));
        assert!(matches!(err, FsError::Io { .. }));
    }
}
