// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Nodes of the namespace tree.
//!
//! Nodes live in the volume's id index and refer to one another by
//! [`NodeId`] only: a directory's child index maps names to ids, and a
//! node's `parent` is a navigational id, never an owning reference.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::attr::Attribute;
use crate::content::ContentStore;
use crate::error::{FsError, FsResult};
use crate::index::OrderedIndex;
use crate::types::{
    AttrDirCookie, DirCookie, FileTimes, NodeId, NodeKind, Stat, StatMask, Timespec, VolumeId,
    S_IUMSK,
};

pub(crate) struct Directory {
    pub(crate) children: OrderedIndex<String, NodeId>,
    /// Open listing cursors over `children`
    pub(crate) iterators: Vec<DirCookie>,
}

pub(crate) enum Payload {
    Directory(Directory),
    File(Arc<dyn ContentStore>),
    Symlink(String),
}

impl Payload {
    pub(crate) fn directory() -> Self {
        Payload::Directory(Directory {
            children: OrderedIndex::new(),
            iterators: Vec::new(),
        })
    }
}

pub(crate) struct Node {
    /// Zero until registered with the volume
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) uid: u32,
    pub(crate) gid: u32,
    /// Permission bits only; type bits are added by `stat`
    pub(crate) mode: u32,
    pub(crate) times: FileTimes,
    refs: AtomicU32,
    pub(crate) attributes: OrderedIndex<String, Attribute>,
    pub(crate) attr_iterators: Vec<AttrDirCookie>,
    pub(crate) payload: Payload,
}

impl Node {
    /// A new node holding one reference, owned by whoever links it.
    pub(crate) fn new(name: &str, parent: Option<NodeId>, mode: u32, payload: Payload) -> Self {
        Self {
            id: NodeId(0),
            name: name.to_string(),
            parent,
            uid: 0,
            gid: 0,
            mode: mode & S_IUMSK,
            times: FileTimes::default(),
            refs: AtomicU32::new(1),
            attributes: OrderedIndex::new(),
            attr_iterators: Vec::new(),
            payload,
        }
    }

    pub(crate) fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub(crate) fn kind(&self) -> NodeKind {
        match self.payload {
            Payload::Directory(_) => NodeKind::Directory,
            Payload::File(_) => NodeKind::File,
            Payload::Symlink(_) => NodeKind::Symlink,
        }
    }

    pub(crate) fn is_dir(&self) -> bool {
        matches!(self.payload, Payload::Directory(_))
    }

    pub(crate) fn dir(&self) -> FsResult<&Directory> {
        match &self.payload {
            Payload::Directory(dir) => Ok(dir),
            _ => Err(FsError::NotADirectory),
        }
    }

    pub(crate) fn dir_mut(&mut self) -> FsResult<&mut Directory> {
        match &mut self.payload {
            Payload::Directory(dir) => Ok(dir),
            _ => Err(FsError::NotADirectory),
        }
    }

    /// Content store of a regular file.
    pub(crate) fn content(&self) -> FsResult<&Arc<dyn ContentStore>> {
        match &self.payload {
            Payload::File(content) => Ok(content),
            _ => Err(FsError::NotSupported),
        }
    }

    pub(crate) fn size(&self) -> u64 {
        match &self.payload {
            Payload::Directory(_) => 0,
            Payload::File(content) => content.size(),
            Payload::Symlink(target) => target.len() as u64,
        }
    }

    pub(crate) fn acquire_ref(&self) -> u32 {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one reference and return the remaining count. `None` means the
    /// count was already zero and nothing changed.
    pub(crate) fn release_ref(&self) -> Option<u32> {
        match self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| refs.checked_sub(1))
        {
            Ok(previous) => Some(previous - 1),
            Err(_) => {
                warn!(node = %self.id, name = %self.name, "release on node without references");
                None
            }
        }
    }

    pub(crate) fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn stat(&self, volume: VolumeId) -> Stat {
        Stat {
            dev: volume,
            ino: self.id,
            mode: self.mode | self.kind().type_bits(),
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            size: self.size(),
            times: self.times,
        }
    }

    /// Apply the fields of `stat` selected by `mask`. The size is applied
    /// first so a failed resize leaves the rest untouched; directories and
    /// symlinks ignore it.
    pub(crate) fn apply_stat(&mut self, stat: &Stat, mask: StatMask, now: Timespec) -> FsResult<()> {
        if mask.contains(StatMask::SIZE) {
            if let Payload::File(content) = &self.payload {
                content.resize(stat.size)?;
            }
        }
        if mask.contains(StatMask::MODE) {
            self.mode = stat.mode & S_IUMSK;
        }
        if mask.contains(StatMask::UID) {
            self.uid = stat.uid;
        }
        if mask.contains(StatMask::GID) {
            self.gid = stat.gid;
        }
        if mask.contains(StatMask::ACCESS_TIME) {
            self.times.atime = stat.times.atime;
        }
        if mask.contains(StatMask::MODIFICATION_TIME) {
            self.times.mtime = stat.times.mtime;
        }
        if mask.contains(StatMask::CREATION_TIME) {
            self.times.birthtime = stat.times.birthtime;
        }
        self.times.ctime = if mask.contains(StatMask::CHANGE_TIME) {
            stat.times.ctime
        } else {
            now
        };
        Ok(())
    }
}
