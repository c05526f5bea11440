// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Byte storage strategies for regular file content

mod flat;
mod paged;

use std::sync::Arc;

pub use flat::{FlatBuffer, FlatStore};
pub use paged::PagedStore;

use crate::config::ContentStoreKind;
use crate::error::{FsError, FsResult};

/// Storage for the bytes of one regular file.
///
/// Implementations synchronize internally so the volume can run I/O after
/// releasing its own lock. Reads past the logical size return fewer bytes
/// (possibly zero); holes below the logical size read as zeros.
pub trait ContentStore: Send + Sync {
    /// Logical size in bytes
    fn size(&self) -> u64;
    /// Make room for `size` bytes without changing the logical size
    fn ensure_capacity(&self, size: u64) -> FsResult<()>;
    fn read(&self, offset: u64, buf: &mut [u8]) -> FsResult<usize>;
    fn write(&self, offset: u64, data: &[u8]) -> FsResult<usize>;
    /// Write at the current logical end, returning the offset used
    fn append(&self, data: &[u8]) -> FsResult<(u64, usize)>;
    /// Set the logical size; growth reads back as zeros
    fn resize(&self, new_size: u64) -> FsResult<()>;
    /// Bytes of backing memory currently held
    fn allocated_bytes(&self) -> u64;
}

pub fn new_store(kind: &ContentStoreKind) -> Arc<dyn ContentStore> {
    match *kind {
        ContentStoreKind::Flat => Arc::new(FlatStore::new()),
        ContentStoreKind::Paged { page_size } => Arc::new(PagedStore::new(page_size)),
    }
}

/// Validate a caller-supplied position.
pub(crate) fn checked_offset(pos: i64) -> FsResult<u64> {
    if pos < 0 {
        return Err(FsError::InvalidArgument);
    }
    Ok(pos as u64)
}

/// Validate a write of `len` bytes at `pos`. `None` means the write is a
/// silent no-op: either nothing to write, or `pos + len` leaves the signed
/// offset range.
pub(crate) fn write_offset(pos: i64, len: usize) -> FsResult<Option<u64>> {
    let offset = checked_offset(pos)?;
    if len == 0 {
        return Ok(None);
    }
    match i64::try_from(len).ok().and_then(|len| pos.checked_add(len)) {
        Some(end) if end > 0 => Ok(Some(offset)),
        _ => Ok(None),
    }
}

/// Convert a byte count into an in-memory length.
pub(crate) fn to_len(size: u64) -> FsResult<usize> {
    usize::try_from(size)
        .ok()
        .filter(|&len| len <= isize::MAX as usize)
        .ok_or(FsError::NoMemory)
}
