//! Kernel error taxonomy
//!
//! Every fallible kernel operation returns [`Result`]. The system-call layer
//! is the only place these are flattened into numeric codes, see
//! [`Error::code`].

use thiserror::Error;

/// Errors reported by kernel operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Error {
    /// Index or handle does not resolve to a live object
    #[error("capability or object not found")]
    NotFound,

    /// Capability exists but is the wrong variant for the operation
    #[error("capability type mismatch")]
    TypeMismatch,

    /// Requested right not held
    #[error("permission denied")]
    PermissionDenied,

    /// No free slot, no extension budget, or no untyped space left
    #[error("resource exhausted")]
    Exhausted,

    /// Object is not in the state the operation requires
    #[error("illegal state for operation")]
    IllegalState,

    /// Malformed size, alignment, level or encoding
    #[error("illegal argument")]
    IllegalArgument,

    /// A non-blocking IPC operation found no partner
    #[error("operation would block")]
    WouldBlock,

    /// Placeholder for destructors and copy semantics that are not defined yet
    #[error("not implemented")]
    NotImplemented,
}

/// Result type for kernel operations
pub type Result<T> = core::result::Result<T, Error>;

/// Code returned to user space when an operation succeeds
pub const SUCCESS: u64 = 0;

impl Error {
    /// Stable numeric code handed back to user space
    pub const fn code(self) -> u64 {
        match self {
            Error::NotFound => 1,
            Error::TypeMismatch => 2,
            Error::PermissionDenied => 3,
            Error::Exhausted => 4,
            Error::IllegalState => 5,
            Error::IllegalArgument => 6,
            Error::WouldBlock => 7,
            Error::NotImplemented => 8,
        }
    }

    /// Inverse of [`Error::code`]. `SUCCESS` and unknown codes give `None`.
    pub const fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            1 => Error::NotFound,
            2 => Error::TypeMismatch,
            3 => Error::PermissionDenied,
            4 => Error::Exhausted,
            5 => Error::IllegalState,
            6 => Error::IllegalArgument,
            7 => Error::WouldBlock,
            8 => Error::NotImplemented,
            _ => return None,
        })
    }
}
