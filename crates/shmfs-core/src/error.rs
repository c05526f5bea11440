// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for shmfs core

use std::collections::TryReserveError;

/// Core filesystem error type
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("out of memory")]
    NoMemory,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("buffer overflow")]
    BufferOverflow,
    #[error("not supported")]
    NotSupported,
    #[error("bad cookie")]
    BadCookie,
}

impl FsError {
    /// POSIX errno equivalent, for adapters that speak the C interface.
    pub fn to_errno(self) -> i32 {
        match self {
            FsError::NoMemory => libc::ENOMEM,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::DirectoryNotEmpty => libc::ENOTEMPTY,
            FsError::BufferOverflow => libc::EOVERFLOW,
            FsError::NotSupported => libc::ENOTSUP,
            FsError::BadCookie => libc::EBADF,
        }
    }
}

impl From<TryReserveError> for FsError {
    fn from(_: TryReserveError) -> Self {
        FsError::NoMemory
    }
}

pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_matches_posix() {
        assert_eq!(FsError::NotFound.to_errno(), libc::ENOENT);
        assert_eq!(FsError::DirectoryNotEmpty.to_errno(), libc::ENOTEMPTY);
        assert_eq!(FsError::BufferOverflow.to_errno(), libc::EOVERFLOW);
        assert_eq!(FsError::BadCookie.to_errno(), libc::EBADF);
    }

    #[test]
    fn failed_reservation_is_no_memory() {
        let mut v: Vec<u8> = Vec::new();
        let err = v.try_reserve_exact(usize::MAX).unwrap_err();
        assert_eq!(FsError::from(err), FsError::NoMemory);
    }
}
