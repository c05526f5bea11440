// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Contiguous growable byte buffer

use parking_lot::Mutex;

use super::{to_len, ContentStore};
use crate::error::{FsError, FsResult};

/// Logical size plus a zero-initialized allocation that grows to 1.5x the
/// requested size and is never shrunk.
#[derive(Debug, Default, Clone)]
pub struct FlatBuffer {
    data: Vec<u8>,
    size: usize,
}

impl FlatBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.size]
    }

    pub fn ensure_capacity(&mut self, size: usize) -> FsResult<()> {
        if self.data.len() >= size {
            return Ok(());
        }
        let target = size.checked_add(size / 2).unwrap_or(size);
        self.data.try_reserve_exact(target - self.data.len())?;
        self.data.resize(target, 0);
        Ok(())
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) -> usize {
        if offset >= self.size {
            return 0;
        }
        let n = buf.len().min(self.size - offset);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        n
    }

    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> FsResult<usize> {
        let end = offset.checked_add(bytes.len()).ok_or(FsError::NoMemory)?;
        self.ensure_capacity(end)?;
        if offset > self.size {
            // Truncation keeps stale bytes in the allocation.
            self.data[self.size..offset].fill(0);
        }
        self.data[offset..end].copy_from_slice(bytes);
        self.size = self.size.max(end);
        Ok(bytes.len())
    }

    pub fn resize(&mut self, new_size: usize) -> FsResult<()> {
        if new_size > self.size {
            self.ensure_capacity(new_size)?;
            self.data[self.size..new_size].fill(0);
        }
        self.size = new_size;
        Ok(())
    }
}

/// [`ContentStore`] over a single [`FlatBuffer`].
#[derive(Debug, Default)]
pub struct FlatStore {
    buffer: Mutex<FlatBuffer>,
}

impl FlatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentStore for FlatStore {
    fn size(&self) -> u64 {
        self.buffer.lock().len() as u64
    }

    fn ensure_capacity(&self, size: u64) -> FsResult<()> {
        self.buffer.lock().ensure_capacity(to_len(size)?)
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        let buffer = self.buffer.lock();
        match usize::try_from(offset) {
            Ok(offset) => Ok(buffer.read(offset, buf)),
            Err(_) => Ok(0),
        }
    }

    fn write(&self, offset: u64, data: &[u8]) -> FsResult<usize> {
        let end = to_len(offset.saturating_add(data.len() as u64))?;
        self.buffer.lock().write(end - data.len(), data)
    }

    fn append(&self, data: &[u8]) -> FsResult<(u64, usize)> {
        let mut buffer = self.buffer.lock();
        let offset = buffer.len();
        let written = buffer.write(offset, data)?;
        Ok((offset as u64, written))
    }

    fn resize(&self, new_size: u64) -> FsResult<()> {
        self.buffer.lock().resize(to_len(new_size)?)
    }

    fn allocated_bytes(&self) -> u64 {
        self.buffer.lock().capacity() as u64
    }
}
