// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Named, typed attributes attached to any node.
//!
//! Attributes live in a per-node index and follow the same create, open,
//! remove and rename rules as directory entries. Attribute cookies refer to
//! the attribute by name, so I/O through a cookie whose attribute has since
//! been removed or renamed fails with `NotFound`.

use tracing::trace;

use crate::content::{checked_offset, to_len, write_offset, FlatBuffer};
use crate::error::{FsError, FsResult};
use crate::events::{AttributeCause, EventKind};
use crate::index::Cursor;
use crate::types::{
    AttrCookie, AttrDirCookie, AttrStat, DirEntry, NodeId, OpenMode, StatMask, Timespec,
    MAX_NAME_LEN,
};
use crate::volume::{Volume, VolumeState};

#[derive(Debug, Clone, Default)]
pub(crate) struct Attribute {
    pub(crate) type_code: u32,
    pub(crate) data: FlatBuffer,
}

impl Attribute {
    fn new(type_code: u32) -> Self {
        Self {
            type_code,
            data: FlatBuffer::new(),
        }
    }

    fn stat(&self) -> AttrStat {
        AttrStat {
            type_code: self.type_code,
            size: self.data.len() as u64,
        }
    }
}

pub(crate) struct AttrHandle {
    pub(crate) node: NodeId,
    pub(crate) name: String,
    pub(crate) mode: OpenMode,
}

pub(crate) struct AttrIterator {
    pub(crate) node: NodeId,
    pub(crate) cursor: Cursor<String>,
}

fn validate_attr_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains('\0') {
        return Err(FsError::InvalidArgument);
    }
    Ok(())
}

impl VolumeState {
    fn attribute_changed(&mut self, node: NodeId, name: &str, cause: AttributeCause) {
        if let Ok(target) = self.node_mut(node) {
            target.times.ctime = Timespec::now();
        }
        self.emit(EventKind::AttributeChanged {
            volume: self.volume,
            node,
            name: name.to_string(),
            cause,
        });
    }

    fn attr_handle(&self, cookie: AttrCookie) -> FsResult<(NodeId, String, OpenMode)> {
        let handle = self.attrs.get(&cookie).ok_or(FsError::BadCookie)?;
        Ok((handle.node, handle.name.clone(), handle.mode))
    }

    fn attribute(&self, node: NodeId, name: &str) -> FsResult<&Attribute> {
        self.node(node)?
            .attributes
            .find(name)
            .ok_or(FsError::NotFound)
    }

    fn attribute_mut(&mut self, node: NodeId, name: &str) -> FsResult<&mut Attribute> {
        self.node_mut(node)?
            .attributes
            .find_mut(name)
            .ok_or(FsError::NotFound)
    }

    fn pin_attr(&mut self, node: NodeId, name: &str, mode: OpenMode) -> FsResult<AttrCookie> {
        self.acquire(node)?;
        let cookie = AttrCookie(self.next_cookie());
        self.attrs.insert(
            cookie,
            AttrHandle {
                node,
                name: name.to_string(),
                mode,
            },
        );
        Ok(cookie)
    }

    pub(crate) fn create_attr(
        &mut self,
        node: NodeId,
        name: &str,
        type_code: u32,
        mode: OpenMode,
    ) -> FsResult<AttrCookie> {
        validate_attr_name(name)?;
        let target = self.node_mut(node)?;
        let cause = match target.attributes.find_mut(name) {
            Some(_) if mode.contains(OpenMode::EXCLUSIVE) => return Err(FsError::AlreadyExists),
            Some(attr) => {
                let retyped = attr.type_code != type_code;
                attr.type_code = type_code;
                if mode.contains(OpenMode::TRUNCATE) && !attr.data.is_empty() {
                    attr.data.resize(0)?;
                    Some(AttributeCause::Changed)
                } else if retyped {
                    Some(AttributeCause::Changed)
                } else {
                    None
                }
            }
            None => {
                target
                    .attributes
                    .insert(name.to_string(), Attribute::new(type_code))?;
                Some(AttributeCause::Created)
            }
        };
        let cookie = self.pin_attr(node, name, mode)?;
        if let Some(cause) = cause {
            self.attribute_changed(node, name, cause);
        }
        Ok(cookie)
    }

    pub(crate) fn open_attr(
        &mut self,
        node: NodeId,
        name: &str,
        mode: OpenMode,
    ) -> FsResult<AttrCookie> {
        validate_attr_name(name)?;
        let attr = self.attribute_mut(node, name)?;
        let truncated = mode.contains(OpenMode::TRUNCATE) && !attr.data.is_empty();
        if truncated {
            attr.data.resize(0)?;
        }
        let cookie = self.pin_attr(node, name, mode)?;
        if truncated {
            self.attribute_changed(node, name, AttributeCause::Changed);
        }
        Ok(cookie)
    }

    pub(crate) fn read_attr(
        &self,
        cookie: AttrCookie,
        pos: i64,
        buf: &mut [u8],
    ) -> FsResult<usize> {
        let offset = checked_offset(pos)?;
        let (node, name, _) = self.attr_handle(cookie)?;
        let attr = self.attribute(node, &name)?;
        Ok(usize::try_from(offset).map_or(0, |offset| attr.data.read(offset, buf)))
    }

    pub(crate) fn write_attr(
        &mut self,
        cookie: AttrCookie,
        pos: i64,
        buf: &[u8],
    ) -> FsResult<usize> {
        let offset = write_offset(pos, buf.len())?;
        let (node, name, mode) = self.attr_handle(cookie)?;
        let attr = self.attribute_mut(node, &name)?;
        let offset = if mode.contains(OpenMode::APPEND) && !buf.is_empty() {
            attr.data.len() as u64
        } else {
            match offset {
                Some(offset) => offset,
                None => return Ok(0),
            }
        };
        let end = to_len(offset.saturating_add(buf.len() as u64))?;
        let written = attr.data.write(end - buf.len(), buf)?;
        self.attribute_changed(node, &name, AttributeCause::Changed);
        Ok(written)
    }

    pub(crate) fn read_attr_stat(&self, cookie: AttrCookie) -> FsResult<AttrStat> {
        let (node, name, _) = self.attr_handle(cookie)?;
        Ok(self.attribute(node, &name)?.stat())
    }

    /// Only the size is writable; growth reads back as zeros.
    pub(crate) fn write_attr_stat(
        &mut self,
        cookie: AttrCookie,
        stat: &AttrStat,
        mask: StatMask,
    ) -> FsResult<()> {
        let (node, name, _) = self.attr_handle(cookie)?;
        let attr = self.attribute_mut(node, &name)?;
        if mask.contains(StatMask::SIZE) {
            attr.data.resize(to_len(stat.size)?)?;
            self.attribute_changed(node, &name, AttributeCause::Changed);
        }
        Ok(())
    }

    pub(crate) fn close_attr(&mut self, cookie: AttrCookie) -> FsResult<()> {
        let handle = self.attrs.remove(&cookie).ok_or(FsError::BadCookie)?;
        self.release(handle.node)
    }

    /// Take `name` out of `node`'s attribute index, moving any listing
    /// cursor that points at it on to the next attribute.
    fn detach_attr(&mut self, node: NodeId, name: &str) -> FsResult<Attribute> {
        let target = self.nodes.find_mut(&node).ok_or(FsError::NotFound)?;
        let attr = target.attributes.remove(name).ok_or(FsError::NotFound)?;
        let key = name.to_string();
        for cookie in &target.attr_iterators {
            if let Some(it) = self.attr_dirs.get_mut(cookie) {
                it.cursor.entry_removed(&target.attributes, &key);
            }
        }
        Ok(attr)
    }

    pub(crate) fn remove_attr(&mut self, node: NodeId, name: &str) -> FsResult<()> {
        validate_attr_name(name)?;
        self.detach_attr(node, name)?;
        self.attribute_changed(node, name, AttributeCause::Removed);
        Ok(())
    }

    /// Move an attribute, replacing any attribute already at the destination.
    pub(crate) fn rename_attr(
        &mut self,
        from_node: NodeId,
        from_name: &str,
        to_node: NodeId,
        to_name: &str,
    ) -> FsResult<()> {
        validate_attr_name(from_name)?;
        validate_attr_name(to_name)?;
        self.node(to_node)?;
        self.attribute(from_node, from_name)?;
        if from_node == to_node && from_name == to_name {
            return Ok(());
        }

        let attr = self.detach_attr(from_node, from_name)?;
        let target = self.node_mut(to_node)?;
        target.attributes.remove(to_name);
        target.attributes.insert(to_name.to_string(), attr)?;
        self.attribute_changed(from_node, from_name, AttributeCause::Removed);
        self.attribute_changed(to_node, to_name, AttributeCause::Created);
        Ok(())
    }

    pub(crate) fn open_attr_dir(&mut self, node: NodeId) -> FsResult<AttrDirCookie> {
        self.acquire(node)?;
        let cookie = AttrDirCookie(self.next_cookie());
        self.node_mut(node)?.attr_iterators.push(cookie);
        self.attr_dirs.insert(
            cookie,
            AttrIterator {
                node,
                cursor: Cursor::Start,
            },
        );
        Ok(cookie)
    }

    pub(crate) fn read_attr_dir(
        &mut self,
        cookie: AttrDirCookie,
        buffer_size: usize,
        max_entries: usize,
    ) -> FsResult<Vec<DirEntry>> {
        let volume = self.volume;
        let it = self.attr_dirs.get_mut(&cookie).ok_or(FsError::BadCookie)?;
        let node = self.nodes.find(&it.node).ok_or(FsError::NotFound)?;

        let mut entries = Vec::new();
        let mut remaining = buffer_size;
        while entries.len() < max_entries {
            it.cursor.settle(&node.attributes);
            let Some((name, _)) = it.cursor.get(&node.attributes) else {
                break;
            };
            let reclen = DirEntry::record_len(name);
            if reclen > remaining {
                if entries.is_empty() {
                    return Err(FsError::BufferOverflow);
                }
                break;
            }
            remaining -= reclen;
            entries.push(DirEntry {
                dev: volume,
                ino: node.id,
                name: name.clone(),
                reclen: reclen as u16,
            });
            it.cursor.advance(&node.attributes);
        }
        Ok(entries)
    }

    pub(crate) fn rewind_attr_dir(&mut self, cookie: AttrDirCookie) -> FsResult<()> {
        let it = self.attr_dirs.get_mut(&cookie).ok_or(FsError::BadCookie)?;
        it.cursor = Cursor::Start;
        Ok(())
    }

    pub(crate) fn close_attr_dir(&mut self, cookie: AttrDirCookie) -> FsResult<()> {
        let it = self.attr_dirs.remove(&cookie).ok_or(FsError::BadCookie)?;
        if let Ok(node) = self.node_mut(it.node) {
            node.attr_iterators.retain(|c| *c != cookie);
        }
        self.release(it.node)
    }

    /// Replace an attribute's type and contents in one step.
    pub(crate) fn set_attr(
        &mut self,
        node: NodeId,
        name: &str,
        type_code: u32,
        data: &[u8],
    ) -> FsResult<()> {
        validate_attr_name(name)?;
        let mut value = Attribute::new(type_code);
        value.data.write(0, data)?;
        let target = self.node_mut(node)?;
        let cause = match target.attributes.find_mut(name) {
            Some(attr) => {
                *attr = value;
                AttributeCause::Changed
            }
            None => {
                target.attributes.insert(name.to_string(), value)?;
                AttributeCause::Created
            }
        };
        self.attribute_changed(node, name, cause);
        Ok(())
    }
}

impl Volume {
    /// Create an attribute, or open the existing one unless `EXCLUSIVE`.
    pub fn create_attr(
        &self,
        node: NodeId,
        name: &str,
        type_code: u32,
        mode: OpenMode,
    ) -> FsResult<AttrCookie> {
        trace!(volume = self.id().0, %node, name, type_code, ?mode, "create_attr");
        self.with_state(|state| state.create_attr(node, name, type_code, mode))
    }

    pub fn open_attr(&self, node: NodeId, name: &str, mode: OpenMode) -> FsResult<AttrCookie> {
        trace!(volume = self.id().0, %node, name, ?mode, "open_attr");
        self.with_state(|state| state.open_attr(node, name, mode))
    }

    pub fn read_attr(&self, cookie: AttrCookie, pos: i64, buf: &mut [u8]) -> FsResult<usize> {
        trace!(volume = self.id().0, ?cookie, pos, len = buf.len(), "read_attr");
        self.with_state(|state| state.read_attr(cookie, pos, buf))
    }

    pub fn write_attr(&self, cookie: AttrCookie, pos: i64, buf: &[u8]) -> FsResult<usize> {
        trace!(volume = self.id().0, ?cookie, pos, len = buf.len(), "write_attr");
        self.with_state(|state| state.write_attr(cookie, pos, buf))
    }

    pub fn read_attr_stat(&self, cookie: AttrCookie) -> FsResult<AttrStat> {
        trace!(volume = self.id().0, ?cookie, "read_attr_stat");
        self.with_state(|state| state.read_attr_stat(cookie))
    }

    pub fn write_attr_stat(
        &self,
        cookie: AttrCookie,
        stat: &AttrStat,
        mask: StatMask,
    ) -> FsResult<()> {
        trace!(volume = self.id().0, ?cookie, ?mask, "write_attr_stat");
        self.with_state(|state| state.write_attr_stat(cookie, stat, mask))
    }

    pub fn close_attr(&self, cookie: AttrCookie) -> FsResult<()> {
        trace!(volume = self.id().0, ?cookie, "close_attr");
        self.with_state(|state| state.close_attr(cookie))
    }

    pub fn remove_attr(&self, node: NodeId, name: &str) -> FsResult<()> {
        trace!(volume = self.id().0, %node, name, "remove_attr");
        self.with_state(|state| state.remove_attr(node, name))
    }

    pub fn rename_attr(
        &self,
        from_node: NodeId,
        from_name: &str,
        to_node: NodeId,
        to_name: &str,
    ) -> FsResult<()> {
        trace!(
            volume = self.id().0,
            %from_node,
            from_name,
            %to_node,
            to_name,
            "rename_attr"
        );
        self.with_state(|state| state.rename_attr(from_node, from_name, to_node, to_name))
    }

    pub fn open_attr_dir(&self, node: NodeId) -> FsResult<AttrDirCookie> {
        trace!(volume = self.id().0, %node, "open_attr_dir");
        self.with_state(|state| state.open_attr_dir(node))
    }

    pub fn read_attr_dir(
        &self,
        cookie: AttrDirCookie,
        buffer_size: usize,
        max_entries: usize,
    ) -> FsResult<Vec<DirEntry>> {
        trace!(volume = self.id().0, ?cookie, buffer_size, max_entries, "read_attr_dir");
        self.with_state(|state| state.read_attr_dir(cookie, buffer_size, max_entries))
    }

    pub fn rewind_attr_dir(&self, cookie: AttrDirCookie) -> FsResult<()> {
        trace!(volume = self.id().0, ?cookie, "rewind_attr_dir");
        self.with_state(|state| state.rewind_attr_dir(cookie))
    }

    pub fn close_attr_dir(&self, cookie: AttrDirCookie) -> FsResult<()> {
        trace!(volume = self.id().0, ?cookie, "close_attr_dir");
        self.with_state(|state| state.close_attr_dir(cookie))
    }

    /// Create or overwrite an attribute with `data`.
    pub fn set_attr(&self, node: NodeId, name: &str, type_code: u32, data: &[u8]) -> FsResult<()> {
        trace!(volume = self.id().0, %node, name, type_code, len = data.len(), "set_attr");
        self.with_state(|state| state.set_attr(node, name, type_code, data))
    }

    /// Type code and full contents of an attribute.
    pub fn get_attr(&self, node: NodeId, name: &str) -> FsResult<(u32, Vec<u8>)> {
        trace!(volume = self.id().0, %node, name, "get_attr");
        self.with_state(|state| {
            validate_attr_name(name)?;
            let attr = state.attribute(node, name)?;
            let mut data = Vec::new();
            data.try_reserve_exact(attr.data.len())?;
            data.extend_from_slice(attr.data.as_slice());
            Ok((attr.type_code, data))
        })
    }
}
