// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Directory operations: name lookup, entry creation and removal, rename,
//! and listing.

use tracing::{trace, warn};

use crate::content::new_store;
use crate::error::{FsError, FsResult};
use crate::events::EventKind;
use crate::index::{Cursor, OrderedIndex};
use crate::node::{Directory, Node, Payload};
use crate::types::{DirCookie, DirEntry, NodeId, OpenMode, Timespec, MAX_NAME_LEN};
use crate::volume::{Volume, VolumeState};

/// Where a listing cursor stands: the synthetic `.` and `..` entries come
/// first, then the child index in name order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DirPosition {
    Dot,
    DotDot,
    Children(Cursor<String>),
}

impl DirPosition {
    fn advance(&mut self, has_parent: bool, children: &OrderedIndex<String, NodeId>) {
        match *self {
            DirPosition::Dot if has_parent => *self = DirPosition::DotDot,
            DirPosition::Dot | DirPosition::DotDot => {
                *self = DirPosition::Children(Cursor::Start)
            }
            DirPosition::Children(ref mut cursor) => cursor.advance(children),
        }
    }
}

pub(crate) struct DirIterator {
    pub(crate) dir: NodeId,
    pub(crate) pos: DirPosition,
}

pub(crate) fn validate_entry_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains('\0') || name.contains('/')
    {
        return Err(FsError::InvalidArgument);
    }
    Ok(())
}

fn is_reserved(name: &str) -> bool {
    name == "." || name == ".."
}

impl VolumeState {
    pub(crate) fn lookup(&self, dir: NodeId, name: &str) -> FsResult<NodeId> {
        validate_entry_name(name)?;
        let node = self.node(dir)?;
        let children = &node.dir()?.children;
        match name {
            "." => Ok(dir),
            ".." => node.parent.ok_or(FsError::NotFound),
            _ => children.find(name).copied().ok_or(FsError::NotFound),
        }
    }

    /// `dir` as a directory that new entries may be linked into. A directory
    /// that has been removed but is still held open is not one.
    pub(crate) fn linked_dir(&self, dir: NodeId) -> FsResult<&Directory> {
        let node = self.node(dir)?;
        let children = node.dir()?;
        if node.parent.is_none() && dir != self.root {
            return Err(FsError::NotFound);
        }
        Ok(children)
    }

    /// Register `node` and link it under `dir`. Callers have already checked
    /// that the name is free.
    pub(crate) fn link_new(&mut self, dir: NodeId, node: Node) -> FsResult<NodeId> {
        let name = node.name.clone();
        let id = self.register(node)?;
        let linked = self
            .node_mut(dir)
            .and_then(|parent| parent.dir_mut())
            .and_then(|parent| parent.children.insert(name.clone(), id));
        if let Err(err) = linked {
            self.release(id)?;
            return Err(err);
        }
        self.init_timestamps(dir, id, Timespec::now());
        self.emit(EventKind::EntryCreated {
            volume: self.volume,
            dir,
            name,
            node: id,
        });
        Ok(id)
    }

    /// Create a regular file, or return the existing one. The flag is true
    /// when a new node was made.
    pub(crate) fn create_file(
        &mut self,
        dir: NodeId,
        name: &str,
        mode: OpenMode,
        perms: u32,
    ) -> FsResult<(NodeId, bool)> {
        validate_entry_name(name)?;
        let children = &self.linked_dir(dir)?.children;
        if is_reserved(name) {
            return Err(FsError::IsADirectory);
        }
        if let Some(&existing) = children.find(name) {
            if self.node(existing)?.is_dir() {
                return Err(FsError::IsADirectory);
            }
            if mode.contains(OpenMode::EXCLUSIVE) {
                return Err(FsError::AlreadyExists);
            }
            return Ok((existing, false));
        }
        let content = new_store(&self.content);
        let node = self.new_node(name, dir, perms, Payload::File(content));
        Ok((self.link_new(dir, node)?, true))
    }

    pub(crate) fn create_dir(&mut self, dir: NodeId, name: &str, perms: u32) -> FsResult<NodeId> {
        validate_entry_name(name)?;
        let children = &self.linked_dir(dir)?.children;
        if is_reserved(name) || children.contains(name) {
            return Err(FsError::AlreadyExists);
        }
        let node = self.new_node(name, dir, perms, Payload::directory());
        self.link_new(dir, node)
    }

    fn child(&self, dir: NodeId, name: &str) -> FsResult<NodeId> {
        validate_entry_name(name)?;
        self.node(dir)?
            .dir()?
            .children
            .find(name)
            .copied()
            .ok_or(FsError::NotFound)
    }

    /// Take `name` out of `dir`'s child index, moving any listing cursor
    /// that points at it on to the next entry.
    fn detach_child(&mut self, dir: NodeId, name: &str) -> FsResult<NodeId> {
        let parent = self
            .nodes
            .find_mut(&dir)
            .ok_or(FsError::NotFound)?
            .dir_mut()?;
        let child = parent.children.remove(name).ok_or(FsError::NotFound)?;
        let key = name.to_string();
        for cookie in &parent.iterators {
            if let Some(DirIterator {
                pos: DirPosition::Children(cursor),
                ..
            }) = self.dirs.get_mut(cookie)
            {
                cursor.entry_removed(&parent.children, &key);
            }
        }
        if let Some(node) = self.nodes.find_mut(&child) {
            node.parent = None;
        }
        Ok(child)
    }

    /// Remove an entry from the namespace and drop the link reference.
    fn remove_entry(&mut self, dir: NodeId, name: &str) -> FsResult<NodeId> {
        let child = self.detach_child(dir, name)?;
        self.touch_dir(dir, Timespec::now());
        self.emit(EventKind::EntryRemoved {
            volume: self.volume,
            dir,
            name: name.to_string(),
            node: child,
        });
        self.evict(child);
        self.release(child)?;
        Ok(child)
    }

    pub(crate) fn unlink(&mut self, dir: NodeId, name: &str) -> FsResult<NodeId> {
        let child = self.child(dir, name)?;
        if self.node(child)?.is_dir() {
            return Err(FsError::IsADirectory);
        }
        self.remove_entry(dir, name)
    }

    pub(crate) fn remove_dir(&mut self, dir: NodeId, name: &str) -> FsResult<NodeId> {
        let child = self.child(dir, name)?;
        if !self.node(child)?.dir()?.children.is_empty() {
            return Err(FsError::DirectoryNotEmpty);
        }
        self.remove_entry(dir, name)
    }

    /// Walk parent links from `node` up to the root. The walk is bounded by
    /// the node count; a chain that does not end counts as a match.
    fn is_ancestor_or_self(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        for _ in 0..=self.nodes.len() {
            if node == ancestor {
                return true;
            }
            match self.nodes.find(&node).and_then(|n| n.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
        warn!(volume = self.volume.0, %node, "parent chain does not reach the root");
        true
    }

    pub(crate) fn rename(
        &mut self,
        from_dir: NodeId,
        from_name: &str,
        to_dir: NodeId,
        to_name: &str,
    ) -> FsResult<NodeId> {
        validate_entry_name(from_name)?;
        validate_entry_name(to_name)?;
        if is_reserved(from_name) || is_reserved(to_name) {
            return Err(FsError::InvalidArgument);
        }
        let existing = self.linked_dir(to_dir)?.children.find(to_name).copied();
        let source = self.child(from_dir, from_name)?;
        if from_dir == to_dir && from_name == to_name {
            return Ok(source);
        }
        if self.node(source)?.is_dir() && self.is_ancestor_or_self(source, to_dir) {
            return Err(FsError::InvalidArgument);
        }
        if let Some(existing) = existing {
            if let Ok(target) = self.node(existing)?.dir() {
                if !target.children.is_empty() {
                    return Err(FsError::DirectoryNotEmpty);
                }
            }
        }

        if existing.is_some() {
            self.remove_entry(to_dir, to_name)?;
        }
        self.detach_child(from_dir, from_name)?;
        let now = Timespec::now();
        let node = self.node_mut(source)?;
        node.name = to_name.to_string();
        node.parent = Some(to_dir);
        node.times.ctime = now;
        self.node_mut(to_dir)?
            .dir_mut()?
            .children
            .insert(to_name.to_string(), source)?;
        self.touch_dir(from_dir, now);
        self.touch_dir(to_dir, now);
        self.emit(EventKind::EntryMoved {
            volume: self.volume,
            from_dir,
            from_name: from_name.to_string(),
            to_dir,
            to_name: to_name.to_string(),
            node: source,
        });
        Ok(source)
    }

    pub(crate) fn open_dir(&mut self, dir: NodeId) -> FsResult<DirCookie> {
        self.node(dir)?.dir()?;
        let cookie = DirCookie(self.next_cookie());
        let node = self.node_mut(dir)?;
        node.dir_mut()?.iterators.push(cookie);
        node.acquire_ref();
        self.dirs.insert(
            cookie,
            DirIterator {
                dir,
                pos: DirPosition::Dot,
            },
        );
        Ok(cookie)
    }

    pub(crate) fn read_dir(
        &mut self,
        cookie: DirCookie,
        buffer_size: usize,
        max_entries: usize,
    ) -> FsResult<Vec<DirEntry>> {
        let volume = self.volume;
        let it = self.dirs.get_mut(&cookie).ok_or(FsError::BadCookie)?;
        let node = self.nodes.find(&it.dir).ok_or(FsError::NotFound)?;
        let children = &node.dir()?.children;
        let has_parent = node.parent.is_some();

        let mut entries = Vec::new();
        let mut remaining = buffer_size;
        while entries.len() < max_entries {
            let current = match &mut it.pos {
                DirPosition::Dot => Some((".", node.id)),
                DirPosition::DotDot => node.parent.map(|parent| ("..", parent)),
                DirPosition::Children(cursor) => {
                    cursor.settle(children);
                    match cursor.get(children) {
                        Some((name, id)) => Some((name.as_str(), *id)),
                        None => break,
                    }
                }
            };
            // `..` disappears when the directory is unlinked mid-listing.
            let Some((name, ino)) = current else {
                it.pos.advance(has_parent, children);
                continue;
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
                ino,
                name: name.to_string(),
                reclen: reclen as u16,
            });
            it.pos.advance(has_parent, children);
        }
        Ok(entries)
    }

    pub(crate) fn rewind_dir(&mut self, cookie: DirCookie) -> FsResult<()> {
        let it = self.dirs.get_mut(&cookie).ok_or(FsError::BadCookie)?;
        it.pos = DirPosition::Dot;
        Ok(())
    }

    pub(crate) fn close_dir(&mut self, cookie: DirCookie) -> FsResult<()> {
        let it = self.dirs.remove(&cookie).ok_or(FsError::BadCookie)?;
        if let Ok(dir) = self.node_mut(it.dir).and_then(|node| node.dir_mut()) {
            dir.iterators.retain(|c| *c != cookie);
        }
        self.release(it.dir)
    }
}

impl Volume {
    /// Resolve `name` inside `dir`. `.` and `..` resolve to the directory
    /// itself and its parent.
    pub fn lookup(&self, dir: NodeId, name: &str) -> FsResult<NodeId> {
        trace!(volume = self.id().0, %dir, name, "lookup");
        self.with_state(|state| state.lookup(dir, name))
    }

    pub fn create_dir(&self, dir: NodeId, name: &str, perms: u32) -> FsResult<NodeId> {
        trace!(volume = self.id().0, %dir, name, perms, "create_dir");
        self.with_state(|state| state.create_dir(dir, name, perms))
    }

    pub fn unlink(&self, dir: NodeId, name: &str) -> FsResult<()> {
        trace!(volume = self.id().0, %dir, name, "unlink");
        self.with_state(|state| state.unlink(dir, name).map(|_| ()))
    }

    pub fn remove_dir(&self, dir: NodeId, name: &str) -> FsResult<()> {
        trace!(volume = self.id().0, %dir, name, "remove_dir");
        self.with_state(|state| state.remove_dir(dir, name).map(|_| ()))
    }

    /// Move `from_name` in `from_dir` to `to_name` in `to_dir`, replacing an
    /// existing destination under the unlink or rmdir rules.
    pub fn rename(
        &self,
        from_dir: NodeId,
        from_name: &str,
        to_dir: NodeId,
        to_name: &str,
    ) -> FsResult<()> {
        trace!(
            volume = self.id().0,
            %from_dir,
            from_name,
            %to_dir,
            to_name,
            "rename"
        );
        self.with_state(|state| state.rename(from_dir, from_name, to_dir, to_name).map(|_| ()))
    }

    pub fn open_dir(&self, dir: NodeId) -> FsResult<DirCookie> {
        trace!(volume = self.id().0, %dir, "open_dir");
        self.with_state(|state| state.open_dir(dir))
    }

    /// Return as many entries as fit in `buffer_size` bytes, at most
    /// `max_entries`. Fails with `BufferOverflow` only when not even one
    /// entry fits.
    pub fn read_dir(
        &self,
        cookie: DirCookie,
        buffer_size: usize,
        max_entries: usize,
    ) -> FsResult<Vec<DirEntry>> {
        trace!(volume = self.id().0, ?cookie, buffer_size, max_entries, "read_dir");
        self.with_state(|state| state.read_dir(cookie, buffer_size, max_entries))
    }

    pub fn rewind_dir(&self, cookie: DirCookie) -> FsResult<()> {
        trace!(volume = self.id().0, ?cookie, "rewind_dir");
        self.with_state(|state| state.rewind_dir(cookie))
    }

    pub fn close_dir(&self, cookie: DirCookie) -> FsResult<()> {
        trace!(volume = self.id().0, ?cookie, "close_dir");
        self.with_state(|state| state.close_dir(cookie))
    }
}
