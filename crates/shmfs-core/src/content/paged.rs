// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Page-granular content store.
//!
//! Pages live in an ordered map keyed by page index. An I/O call runs in
//! three phases: it takes every page it touches out of the map under the
//! page-set lock (marking them busy), copies bytes with the lock released,
//! then puts the pages back and wakes anyone waiting on them. Pages are
//! taken in ascending index order, so two callers never wait on each other
//! in a cycle.

use std::collections::BTreeMap;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::trace;

use super::ContentStore;
use crate::error::{FsError, FsResult};

#[derive(Debug, Default)]
struct PageSet {
    /// `None` while a caller holds the page.
    pages: BTreeMap<u64, Option<Box<[u8]>>>,
    size: u64,
}

enum Held {
    Page {
        index: u64,
        data: Box<[u8]>,
        fresh: bool,
    },
    Hole {
        index: u64,
    },
}

impl Held {
    fn index(&self) -> u64 {
        match self {
            Held::Page { index, .. } | Held::Hole { index } => *index,
        }
    }
}

pub struct PagedStore {
    page_size: usize,
    state: Mutex<PageSet>,
    page_released: Condvar,
}

impl std::fmt::Debug for PagedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedStore")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

fn zeroed_page(page_size: usize) -> FsResult<Box<[u8]>> {
    let mut page = Vec::new();
    page.try_reserve_exact(page_size)?;
    page.resize(page_size, 0);
    Ok(page.into_boxed_slice())
}

impl PagedStore {
    /// `page_size` must be a non-zero power of two.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            state: Mutex::new(PageSet::default()),
            page_released: Condvar::new(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages currently allocated.
    pub fn page_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    fn page_span(&self, offset: u64, len: usize) -> (u64, u64) {
        let page_size = self.page_size as u64;
        let last_byte = offset + len as u64 - 1;
        (offset / page_size, last_byte / page_size)
    }

    /// Take pages `first..=last` out of the map. With `allocate`, missing
    /// pages are created zero-filled; otherwise they come back as holes.
    fn get_pages(
        &self,
        state: &mut MutexGuard<'_, PageSet>,
        first: u64,
        last: u64,
        allocate: bool,
    ) -> FsResult<Vec<Held>> {
        let mut held = Vec::new();
        for index in first..=last {
            loop {
                match state.pages.get_mut(&index).map(Option::take) {
                    Some(Some(data)) => {
                        held.push(Held::Page {
                            index,
                            data,
                            fresh: false,
                        });
                        break;
                    }
                    Some(None) => self.page_released.wait(state),
                    None if allocate => match zeroed_page(self.page_size) {
                        Ok(data) => {
                            state.pages.insert(index, None);
                            held.push(Held::Page {
                                index,
                                data,
                                fresh: true,
                            });
                            break;
                        }
                        Err(err) => {
                            self.put_pages(state, held, false);
                            return Err(err);
                        }
                    },
                    None => {
                        held.push(Held::Hole { index });
                        break;
                    }
                }
            }
        }
        Ok(held)
    }

    /// Return held pages. Fresh pages are kept only when `success`.
    fn put_pages(&self, state: &mut PageSet, held: Vec<Held>, success: bool) {
        for page in held {
            if let Held::Page { index, data, fresh } = page {
                if fresh && !success {
                    state.pages.remove(&index);
                } else {
                    state.pages.insert(index, Some(data));
                }
            }
        }
        self.page_released.notify_all();
    }

    fn copy_out(&self, held: &[Held], offset: u64, buf: &mut [u8]) {
        let page_size = self.page_size as u64;
        let end = offset + buf.len() as u64;
        for page in held {
            let page_start = page.index() * page_size;
            let from = offset.max(page_start);
            let to = end.min(page_start + page_size);
            let dst = &mut buf[(from - offset) as usize..(to - offset) as usize];
            match page {
                Held::Page { data, .. } => dst.copy_from_slice(
                    &data[(from - page_start) as usize..(to - page_start) as usize],
                ),
                Held::Hole { .. } => dst.fill(0),
            }
        }
    }

    fn copy_in(&self, held: &mut [Held], offset: u64, bytes: &[u8]) {
        let page_size = self.page_size as u64;
        let end = offset + bytes.len() as u64;
        for page in held {
            let page_start = page.index() * page_size;
            let from = offset.max(page_start);
            let to = end.min(page_start + page_size);
            if let Held::Page { data, .. } = page {
                data[(from - page_start) as usize..(to - page_start) as usize]
                    .copy_from_slice(&bytes[(from - offset) as usize..(to - offset) as usize]);
            }
        }
    }

    /// Write `bytes` at `offset`, or at the logical end when `offset` is None.
    fn write_at(&self, offset: Option<u64>, bytes: &[u8]) -> FsResult<(u64, usize)> {
        let mut state = self.state.lock();
        let offset = offset.unwrap_or(state.size);
        if bytes.is_empty() {
            return Ok((offset, 0));
        }
        let end = offset
            .checked_add(bytes.len() as u64)
            .ok_or(FsError::InvalidArgument)?;
        let (first, last) = self.page_span(offset, bytes.len());
        let mut held = self.get_pages(&mut state, first, last, true)?;
        // Every page is held, nothing below can fail.
        state.size = state.size.max(end);
        drop(state);

        self.copy_in(&mut held, offset, bytes);

        let mut state = self.state.lock();
        self.put_pages(&mut state, held, true);
        Ok((offset, bytes.len()))
    }
}

impl ContentStore for PagedStore {
    fn size(&self) -> u64 {
        self.state.lock().size
    }

    fn ensure_capacity(&self, _size: u64) -> FsResult<()> {
        // Pages are allocated on first write.
        Ok(())
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        let mut state = self.state.lock();
        if offset >= state.size || buf.is_empty() {
            return Ok(0);
        }
        let len = (state.size - offset).min(buf.len() as u64) as usize;
        let (first, last) = self.page_span(offset, len);
        let held = self.get_pages(&mut state, first, last, false)?;
        drop(state);

        self.copy_out(&held, offset, &mut buf[..len]);

        let mut state = self.state.lock();
        self.put_pages(&mut state, held, true);
        Ok(len)
    }

    fn write(&self, offset: u64, data: &[u8]) -> FsResult<usize> {
        self.write_at(Some(offset), data).map(|(_, written)| written)
    }

    fn append(&self, data: &[u8]) -> FsResult<(u64, usize)> {
        self.write_at(None, data)
    }

    fn resize(&self, new_size: u64) -> FsResult<()> {
        let page_size = self.page_size as u64;
        let boundary = new_size / page_size;
        let mut state = self.state.lock();
        while state.pages.range(boundary..).any(|(_, slot)| slot.is_none()) {
            self.page_released.wait(&mut state);
        }
        if new_size < state.size {
            let dropped = state.pages.split_off(&new_size.div_ceil(page_size));
            trace!(new_size, dropped = dropped.len(), "paged store shrunk");
            let tail = (new_size % page_size) as usize;
            if tail != 0 {
                if let Some(Some(page)) = state.pages.get_mut(&boundary) {
                    page[tail..].fill(0);
                }
            }
        }
        state.size = new_size;
        Ok(())
    }

    fn allocated_bytes(&self) -> u64 {
        self.state.lock().pages.len() as u64 * self.page_size as u64
    }
}
