//! Error type for VFS operations.
//!
//! Every operation reports a [`FsError`], a closed set of POSIX-equivalent
//! kinds. Metadata-service and data-engine failures pass through unchanged, so
//! an adapter can always recover the errno with [`FsError::to_errno`].

use std::io;

use thiserror::Error;

/// Errno reported for a missing extended attribute.
#[cfg(target_os = "linux")]
pub const ENOATTR: i32 = libc::ENODATA;
/// Errno reported for a missing extended attribute.
#[cfg(not(target_os = "linux"))]
pub const ENOATTR: i32 = libc::ENOATTR;

/// Errors returned by the VFS layer and its backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    /// Missing path component or name (ENOENT).
    #[error("no such file or directory")]
    NotFound,

    /// Missing extended attribute (ENODATA / ENOATTR).
    #[error("no such attribute")]
    NoAttribute,

    /// Target name is already taken (EEXIST).
    #[error("file exists")]
    AlreadyExists,

    /// A directory was required (ENOTDIR).
    #[error("not a directory")]
    NotADirectory,

    /// A non-directory was required (EISDIR).
    #[error("is a directory")]
    IsADirectory,

    /// rmdir on a populated directory (ENOTEMPTY).
    #[error("directory not empty")]
    NotEmpty,

    /// Mode bits deny the access (EACCES).
    #[error("permission denied")]
    PermissionDenied,

    /// Caller is not privileged for the operation (EPERM).
    #[error("operation not permitted")]
    NotPermitted,

    /// Malformed request (EINVAL).
    #[error("invalid argument")]
    InvalidArgument,

    /// Symlink expansion revisited an inode (ELOOP).
    #[error("too many levels of symbolic links")]
    SymlinkLoop,

    /// The backend cannot serve this request (ENOTSUP).
    #[error("operation not supported")]
    NotSupported,

    /// Symlink points outside this filesystem (ENOTSUP).
    ///
    /// The raw link target is kept so the caller can resolve it by other means.
    #[error("symlink target {target:?} is outside the filesystem")]
    ExternalSymlink {
        /// Link target as stored in the symlink.
        target: String,
    },

    /// Transient condition, the call should be repeated (EAGAIN).
    #[error("resource temporarily unavailable")]
    TryAgain,

    /// Operation on a closed handle (EBADF).
    #[error("bad file handle")]
    BadHandle,

    /// Backend I/O failure (EIO).
    #[error("input/output error")]
    Io,

    /// Any other errno reported by a backend.
    #[error("errno {0}")]
    Errno(i32),
}

/// Result alias for VFS operations.
pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    /// Converts this error to a POSIX errno value.
    pub fn to_errno(&self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::NoAttribute => ENOATTR,
            Self::AlreadyExists => libc::EEXIST,
            Self::NotADirectory => libc::ENOTDIR,
            Self::IsADirectory => libc::EISDIR,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::PermissionDenied => libc::EACCES,
            Self::NotPermitted => libc::EPERM,
            Self::InvalidArgument => libc::EINVAL,
            Self::SymlinkLoop => libc::ELOOP,
            Self::NotSupported | Self::ExternalSymlink { .. } => libc::ENOTSUP,
            Self::TryAgain => libc::EAGAIN,
            Self::BadHandle => libc::EBADF,
            Self::Io => libc::EIO,
            Self::Errno(code) => *code,
        }
    }

    /// Maps a POSIX errno to the matching kind.
    pub fn from_errno(code: i32) -> Self {
        match code {
            libc::ENOENT => Self::NotFound,
            ENOATTR => Self::NoAttribute,
            libc::EEXIST => Self::AlreadyExists,
            libc::ENOTDIR => Self::NotADirectory,
            libc::EISDIR => Self::IsADirectory,
            libc::ENOTEMPTY => Self::NotEmpty,
            libc::EACCES => Self::PermissionDenied,
            libc::EPERM => Self::NotPermitted,
            libc::EINVAL => Self::InvalidArgument,
            libc::ELOOP => Self::SymlinkLoop,
            libc::ENOTSUP => Self::NotSupported,
            libc::EAGAIN => Self::TryAgain,
            libc::EBADF => Self::BadHandle,
            libc::EIO => Self::Io,
            other => Self::Errno(other),
        }
    }

    /// True for the not-found family (missing name or missing xattr).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound | Self::NoAttribute)
    }

    /// True for the not-supported family, including external symlinks.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported | Self::ExternalSymlink { .. })
    }

    /// True when the call may succeed if repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TryAgain)
    }
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => Self::from_errno(code),
            None => match err.kind() {
                io::ErrorKind::NotFound => Self::NotFound,
                io::ErrorKind::AlreadyExists => Self::AlreadyExists,
                io::ErrorKind::PermissionDenied => Self::PermissionDenied,
                io::ErrorKind::InvalidInput => Self::InvalidArgument,
                io::ErrorKind::Unsupported => Self::NotSupported,
                io::ErrorKind::WouldBlock => Self::TryAgain,
                _ => Self::Io,
            },
        }
    }
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> Self {
        io::Error::from_raw_os_error(err.to_errno())
    }
}
