// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Regular files: open cookies and content I/O.
//!
//! The volume lock is held only to resolve a cookie to its content store
//! and again to stamp timestamps afterwards; the byte copy itself runs
//! against the store's own synchronization.

use std::sync::Arc;

use tracing::trace;

use crate::content::{checked_offset, write_offset, ContentStore};
use crate::error::{FsError, FsResult};
use crate::types::{FileCookie, NodeId, OpenMode, StatMask, Timespec};
use crate::volume::{Volume, VolumeState};

pub(crate) struct FileHandle {
    pub(crate) node: NodeId,
    pub(crate) mode: OpenMode,
}

/// Result of [`Volume::create`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Created {
    pub node: NodeId,
    /// False when an existing file was opened instead
    pub is_new: bool,
    pub cookie: FileCookie,
}

impl VolumeState {
    /// Open any node kind; only regular files honour `TRUNCATE`.
    pub(crate) fn open_file(&mut self, node: NodeId, mode: OpenMode) -> FsResult<FileCookie> {
        let truncated = match self.node(node)?.content() {
            Ok(content) if mode.contains(OpenMode::TRUNCATE) => {
                content.resize(0)?;
                true
            }
            _ => false,
        };
        let cookie = FileCookie(self.next_cookie());
        let target = self.node_mut(node)?;
        target.acquire_ref();
        if truncated {
            let now = Timespec::now();
            target.times.mtime = now;
            target.times.ctime = now;
        }
        self.files.insert(cookie, FileHandle { node, mode });
        if truncated {
            self.stat_changed(
                node,
                StatMask::SIZE | StatMask::MODIFICATION_TIME | StatMask::CHANGE_TIME,
            );
        }
        Ok(cookie)
    }

    fn file_content(
        &self,
        cookie: FileCookie,
    ) -> FsResult<(NodeId, OpenMode, Arc<dyn ContentStore>)> {
        let handle = self.files.get(&cookie).ok_or(FsError::BadCookie)?;
        let content = self.node(handle.node)?.content()?.clone();
        Ok((handle.node, handle.mode, content))
    }

    fn close_file(&mut self, cookie: FileCookie) -> FsResult<()> {
        let handle = self.files.remove(&cookie).ok_or(FsError::BadCookie)?;
        self.release(handle.node)
    }

    fn stamp_io(&mut self, node: NodeId, fields: StatMask) {
        let now = Timespec::now();
        if let Ok(target) = self.node_mut(node) {
            if fields.contains(StatMask::ACCESS_TIME) {
                target.times.atime = now;
            }
            if fields.contains(StatMask::MODIFICATION_TIME) {
                target.times.mtime = now;
                target.times.ctime = now;
            }
            self.stat_changed(node, fields);
        }
    }
}

impl Volume {
    /// Create a regular file in `dir` and open it. An existing file is
    /// opened instead unless `EXCLUSIVE` is set.
    pub fn create(
        &self,
        dir: NodeId,
        name: &str,
        mode: OpenMode,
        perms: u32,
    ) -> FsResult<Created> {
        trace!(volume = self.id().0, %dir, name, ?mode, perms, "create");
        self.with_state(|state| {
            let (node, is_new) = state.create_file(dir, name, mode, perms)?;
            let cookie = state.open_file(node, mode)?;
            Ok(Created {
                node,
                is_new,
                cookie,
            })
        })
    }

    pub fn open(&self, node: NodeId, mode: OpenMode) -> FsResult<FileCookie> {
        trace!(volume = self.id().0, %node, ?mode, "open");
        self.with_state(|state| state.open_file(node, mode))
    }

    /// Read at `pos`. Returns fewer bytes than requested at end of file.
    pub fn read(&self, cookie: FileCookie, pos: i64, buf: &mut [u8]) -> FsResult<usize> {
        trace!(volume = self.id().0, ?cookie, pos, len = buf.len(), "read");
        let offset = checked_offset(pos)?;
        let (node, _, content) = self.with_state(|state| state.file_content(cookie))?;
        let read = content.read(offset, buf)?;
        self.with_state(|state| {
            state.stamp_io(node, StatMask::ACCESS_TIME);
            Ok(())
        })?;
        Ok(read)
    }

    /// Write at `pos`, or at end of file for cookies opened with `APPEND`.
    /// Empty writes and writes whose end leaves the offset range do nothing.
    pub fn write(&self, cookie: FileCookie, pos: i64, buf: &[u8]) -> FsResult<usize> {
        trace!(volume = self.id().0, ?cookie, pos, len = buf.len(), "write");
        let offset = write_offset(pos, buf.len())?;
        let (node, mode, content) = self.with_state(|state| state.file_content(cookie))?;
        let before = content.size();
        let written = if mode.contains(OpenMode::APPEND) {
            if buf.is_empty() {
                0
            } else {
                content.append(buf)?.1
            }
        } else {
            match offset {
                Some(offset) => content.write(offset, buf)?,
                None => 0,
            }
        };
        if written == 0 {
            return Ok(0);
        }

        let mut fields = StatMask::MODIFICATION_TIME | StatMask::CHANGE_TIME;
        if content.size() > before {
            fields |= StatMask::SIZE;
        }
        self.with_state(|state| {
            state.stamp_io(node, fields);
            Ok(())
        })?;
        Ok(written)
    }

    /// Close the cookie and drop its pin on the node.
    pub fn close(&self, cookie: FileCookie) -> FsResult<()> {
        trace!(volume = self.id().0, ?cookie, "close");
        self.with_state(|state| state.close_file(cookie))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContentStoreKind, MountParams, VolumeConfig};
    use crate::events::{EventKind, MockEventSink};
    use crate::vnode::DetachedVnodeTable;

    fn create_test_volume(content: ContentStoreKind) -> Volume {
        let config = VolumeConfig {
            content,
            ..VolumeConfig::default()
        };
        Volume::mount(config, MountParams::default(), Arc::new(DetachedVnodeTable)).unwrap()
    }

    fn rw() -> OpenMode {
        OpenMode::READ | OpenMode::WRITE
    }

    #[test]
    fn create_write_read() {
        let volume = create_test_volume(ContentStoreKind::Flat);
        let root = volume.root_id();
        let created = volume.create(root, "f.txt", rw(), 0o644).unwrap();
        assert!(created.is_new);
        assert_eq!(volume.write(created.cookie, 0, b"hello").unwrap(), 5);

        let mut buf = [0u8; 16];
        assert_eq!(volume.read(created.cookie, 0, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(volume.read(created.cookie, 5, &mut buf).unwrap(), 0);
        assert_eq!(volume.read_stat(created.node).unwrap().size, 5);
        volume.close(created.cookie).unwrap();
    }

    #[test]
    fn create_existing_opens_it() {
        let volume = create_test_volume(ContentStoreKind::Flat);
        let root = volume.root_id();
        let first = volume.create(root, "f", rw(), 0o644).unwrap();
        volume.write(first.cookie, 0, b"data").unwrap();

        let second = volume.create(root, "f", rw(), 0o600).unwrap();
        assert!(!second.is_new);
        assert_eq!(second.node, first.node);
        assert_eq!(volume.read_stat(first.node).unwrap().size, 4);

        let exclusive = volume.create(root, "f", rw() | OpenMode::EXCLUSIVE, 0o644);
        assert_eq!(exclusive, Err(FsError::AlreadyExists));
    }

    #[test]
    fn create_over_directory_or_dot_fails() {
        let volume = create_test_volume(ContentStoreKind::Flat);
        let root = volume.root_id();
        volume.create_dir(root, "d", 0o755).unwrap();
        assert_eq!(volume.create(root, "d", rw(), 0o644), Err(FsError::IsADirectory));
        assert_eq!(volume.create(root, ".", rw(), 0o644), Err(FsError::IsADirectory));
        assert_eq!(volume.create(root, "..", rw(), 0o644), Err(FsError::IsADirectory));
    }

    #[test]
    fn truncate_on_open_clears_content() {
        let volume = create_test_volume(ContentStoreKind::Paged { page_size: 64 });
        let root = volume.root_id();
        let created = volume.create(root, "f", rw(), 0o644).unwrap();
        volume.write(created.cookie, 0, &[1u8; 200]).unwrap();
        volume.close(created.cookie).unwrap();

        let cookie = volume.open(created.node, rw() | OpenMode::TRUNCATE).unwrap();
        assert_eq!(volume.read_stat(created.node).unwrap().size, 0);
        volume.close(cookie).unwrap();
    }

    #[test]
    fn append_mode_ignores_position() {
        let volume = create_test_volume(ContentStoreKind::Flat);
        let root = volume.root_id();
        let created = volume.create(root, "log", rw(), 0o644).unwrap();
        volume.write(created.cookie, 0, b"abc").unwrap();

        let cookie = volume.open(created.node, OpenMode::WRITE | OpenMode::APPEND).unwrap();
        volume.write(cookie, 0, b"def").unwrap();
        let mut buf = [0u8; 6];
        volume.read(created.cookie, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn offset_policy() {
        let volume = create_test_volume(ContentStoreKind::Flat);
        let root = volume.root_id();
        let created = volume.create(root, "f", rw(), 0o644).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(
            volume.read(created.cookie, -1, &mut buf),
            Err(FsError::InvalidArgument)
        );
        assert_eq!(
            volume.write(created.cookie, -1, b"x"),
            Err(FsError::InvalidArgument)
        );
        assert_eq!(volume.write(created.cookie, i64::MAX, b"xy").unwrap(), 0);
        assert_eq!(volume.write(created.cookie, 10, b"").unwrap(), 0);
        assert_eq!(volume.read_stat(created.node).unwrap().size, 0);
    }

    #[test]
    fn io_on_directory_is_not_supported() {
        let volume = create_test_volume(ContentStoreKind::Flat);
        let root = volume.root_id();
        let cookie = volume.open(root, OpenMode::READ).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(volume.read(cookie, 0, &mut buf), Err(FsError::NotSupported));
        assert_eq!(volume.write(cookie, 0, b"x"), Err(FsError::NotSupported));
        volume.close(cookie).unwrap();
    }

    #[test]
    fn closed_cookie_is_bad() {
        let volume = create_test_volume(ContentStoreKind::Flat);
        let root = volume.root_id();
        let created = volume.create(root, "f", rw(), 0o644).unwrap();
        volume.close(created.cookie).unwrap();
        assert_eq!(volume.close(created.cookie), Err(FsError::BadCookie));
        let mut buf = [0u8; 1];
        assert_eq!(
            volume.read(created.cookie, 0, &mut buf),
            Err(FsError::BadCookie)
        );
    }

    #[test]
    fn write_reports_size_change() {
        let volume = create_test_volume(ContentStoreKind::Flat);
        let root = volume.root_id();
        let created = volume.create(root, "f", rw(), 0o644).unwrap();
        let node = created.node;

        let mut sink = MockEventSink::new();
        sink.expect_on_event()
            .withf(move |evt| {
                matches!(evt, EventKind::StatChanged { node: n, fields, dir: Some(_), .. }
                    if *n == node && fields.contains(StatMask::SIZE))
            })
            .times(1)
            .return_const(());
        sink.expect_on_event()
            .withf(move |evt| {
                matches!(evt, EventKind::StatChanged { node: n, fields, .. }
                    if *n == node && !fields.contains(StatMask::SIZE))
            })
            .times(1)
            .return_const(());
        volume.subscribe_events(Arc::new(sink));

        volume.write(created.cookie, 0, b"grow").unwrap();
        volume.write(created.cookie, 0, b"over").unwrap();
    }
}
