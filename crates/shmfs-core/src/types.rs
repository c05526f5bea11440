// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for shmfs

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// File type mask and type bits reported in `Stat::mode`
pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;

/// Permission bits a node stores (setuid, setgid, sticky and rwx triples)
pub const S_IUMSK: u32 = 0o7777;

/// Fixed header size of a directory record: dev, pdev, ino, pino, reclen
pub const DIRENT_NAME_OFFSET: usize = 26;
/// Longest entry or attribute name, in bytes
pub const MAX_NAME_LEN: usize = 255;

/// Node identifier, unique within a volume while the node is alive
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Volume identifier, reported as `dev` in stat and directory records
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct VolumeId(pub u32);

/// Opaque handle for an open file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileCookie(pub u64);

/// Opaque handle for an open directory iterator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DirCookie(pub u64);

/// Opaque handle for an open attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttrCookie(pub u64);

/// Opaque handle for an open attribute-directory iterator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttrDirCookie(pub u64);

/// Opaque event subscription identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Seconds and nanoseconds since the Unix epoch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: u32,
}

impl Timespec {
    pub fn now() -> Self {
        let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            sec: elapsed.as_secs() as i64,
            nsec: elapsed.subsec_nanos(),
        }
    }
}

/// File timestamps
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileTimes {
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
    pub birthtime: Timespec,
}

impl FileTimes {
    pub fn all(time: Timespec) -> Self {
        Self {
            atime: time,
            mtime: time,
            ctime: time,
            birthtime: time,
        }
    }
}

/// Node variant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Directory,
    File,
    Symlink,
}

impl NodeKind {
    /// Type bits OR-ed into `Stat::mode`.
    pub fn type_bits(self) -> u32 {
        match self {
            NodeKind::Directory => S_IFDIR,
            NodeKind::File => S_IFREG,
            NodeKind::Symlink => S_IFLNK,
        }
    }
}

/// Stat record for a node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stat {
    pub dev: VolumeId,
    pub ino: NodeId,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub times: FileTimes,
}

impl Stat {
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }
}

/// Stat record for an attribute
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttrStat {
    pub type_code: u32,
    pub size: u64,
}

/// One record produced by directory or attribute-directory listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub dev: VolumeId,
    pub ino: NodeId,
    pub name: String,
    pub reclen: u16,
}

impl DirEntry {
    /// Buffer bytes a record for `name` consumes.
    pub fn record_len(name: &str) -> usize {
        DIRENT_NAME_OFFSET + name.len() + 1
    }
}

/// Volume capacity report
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsInfo {
    pub dev: VolumeId,
    pub root: NodeId,
    pub block_size: u32,
    pub io_size: u32,
    pub total_blocks: i64,
    pub free_blocks: i64,
    pub total_nodes: i64,
    pub free_nodes: i64,
    pub volume_name: String,
}

bitflags::bitflags! {
    /// Flags accepted by `open`, `create` and the attribute open calls
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct OpenMode: u32 {
        const READ = 0x01;
        const WRITE = 0x02;
        const CREATE = 0x04;
        const EXCLUSIVE = 0x08;
        const TRUNCATE = 0x10;
        const APPEND = 0x20;
    }
}

bitflags::bitflags! {
    /// Selects the `Stat` fields a `write_stat` call applies
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct StatMask: u32 {
        const MODE = 0x01;
        const UID = 0x02;
        const GID = 0x04;
        const SIZE = 0x08;
        const ACCESS_TIME = 0x10;
        const MODIFICATION_TIME = 0x20;
        const CREATION_TIME = 0x40;
        const CHANGE_TIME = 0x80;
    }
}
