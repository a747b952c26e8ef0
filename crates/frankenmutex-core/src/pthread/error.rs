//! Error type shared by the mutex and mutex-attribute operations.

use frankenmutex_membrane::AllocError;
use thiserror::Error;

use crate::errno;

/// Failure of a mutex or mutex-attribute operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum MutexError {
    /// Null/empty handle, destroyed object, or an unrecognized type/mode value.
    #[error("invalid argument")]
    InvalidArgument,
    /// The backing record could not be allocated.
    #[error("out of memory")]
    OutOfMemory,
    /// Process-shared mutexes are not available.
    #[error("process-shared mutexes are not supported")]
    NotSupported,
    /// The mutex is held, or its slot is momentarily in use (`try_lock`).
    #[error("mutex is busy")]
    Busy,
    /// The calling thread does not own the mutex.
    #[error("calling thread does not own the mutex")]
    PermissionDenied,
    /// An error-checking mutex was relocked by its owner.
    #[error("relock of an error-checking mutex by its owner")]
    Deadlock,
}

impl MutexError {
    /// POSIX errno value for this error.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument => errno::EINVAL,
            Self::OutOfMemory => errno::ENOMEM,
            Self::NotSupported => errno::ENOSYS,
            Self::Busy => errno::EBUSY,
            Self::PermissionDenied => errno::EPERM,
            Self::Deadlock => errno::EDEADLK,
        }
    }

    /// Inverse of [`MutexError::errno`]; `None` for 0 and unknown codes.
    #[must_use]
    pub const fn from_errno(code: i32) -> Option<Self> {
        match code {
            errno::EINVAL => Some(Self::InvalidArgument),
            errno::ENOMEM => Some(Self::OutOfMemory),
            errno::ENOSYS => Some(Self::NotSupported),
            errno::EBUSY => Some(Self::Busy),
            errno::EPERM => Some(Self::PermissionDenied),
            errno::EDEADLK => Some(Self::Deadlock),
            _ => None,
        }
    }
}

impl From<AllocError> for MutexError {
    fn from(_: AllocError) -> Self {
        Self::OutOfMemory
    }
}

/// Collapse a unit result into a C-style status code (0 on success).
#[must_use]
pub fn errno_result(result: Result<(), MutexError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => err.errno(),
    }
}
