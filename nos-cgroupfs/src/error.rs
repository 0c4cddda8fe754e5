//! cgroup file system error types

use core::fmt;

/// POSIX error numbers surfaced to the file dispatch layer
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const EBADF: i32 = 9;
    pub const EACCES: i32 = 13;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const EXDEV: i32 = 18;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const ENOSPC: i32 = 28;
    pub const EMLINK: i32 = 31;
    pub const ENOTEMPTY: i32 = 39;
    pub const EOVERFLOW: i32 = 75;
}

/// cgroup file system error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgrpError {
    /// Parent is not a cgroup directory
    NotDirectory,
    /// Plain removal of a cgroup directory
    IsDirectory,
    /// Name not bound, or lost a race with a concurrent delete/rename
    NotFound,
    /// Name already bound in the directory (also returned for "..")
    AlreadyExists,
    /// Access check failed or the name contains a path separator
    PermissionDenied,
    /// Directory entry allocation failed
    NoSpace,
    /// Node and directory belong to different mounts
    CrossDevice,
    /// Link count is already at `MAX_LINK`
    TooManyLinks,
    /// Malformed request (e.g. deleting ".")
    InvalidArgument,
    /// Timestamp does not fit a 32-bit time_t
    Overflow,
    /// Node handle does not belong to the directory's mount
    BadFileDescriptor,
    /// Directory still contains child groups
    NotEmpty,
    /// Target is in use (e.g. the mount root)
    Busy,
}

impl CgrpError {
    /// Convert to a POSIX error number
    pub fn to_errno(&self) -> i32 {
        match self {
            CgrpError::NotDirectory => errno::ENOTDIR,
            CgrpError::IsDirectory => errno::EISDIR,
            CgrpError::NotFound => errno::ENOENT,
            CgrpError::AlreadyExists => errno::EEXIST,
            CgrpError::PermissionDenied => errno::EACCES,
            CgrpError::NoSpace => errno::ENOSPC,
            CgrpError::CrossDevice => errno::EXDEV,
            CgrpError::TooManyLinks => errno::EMLINK,
            CgrpError::InvalidArgument => errno::EINVAL,
            CgrpError::Overflow => errno::EOVERFLOW,
            CgrpError::BadFileDescriptor => errno::EBADF,
            CgrpError::NotEmpty => errno::ENOTEMPTY,
            CgrpError::Busy => errno::EBUSY,
        }
    }

    /// Short human readable description
    pub fn description(&self) -> &'static str {
        match self {
            CgrpError::NotDirectory => "Not a directory",
            CgrpError::IsDirectory => "Is a directory",
            CgrpError::NotFound => "No such file or directory",
            CgrpError::AlreadyExists => "File exists",
            CgrpError::PermissionDenied => "Permission denied",
            CgrpError::NoSpace => "No space left on device",
            CgrpError::CrossDevice => "Cross-device link",
            CgrpError::TooManyLinks => "Too many links",
            CgrpError::InvalidArgument => "Invalid argument",
            CgrpError::Overflow => "Value too large for defined data type",
            CgrpError::BadFileDescriptor => "Bad file descriptor",
            CgrpError::NotEmpty => "Directory not empty",
            CgrpError::Busy => "Device or resource busy",
        }
    }
}

impl fmt::Display for CgrpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (errno {})", self.description(), self.to_errno())
    }
}

pub type CgrpResult<T> = Result<T, CgrpError>;
