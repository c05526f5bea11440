// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! shmfs core: an in-memory namespace and content engine.
//!
//! A [`Volume`] owns a tree of directories, regular files and symbolic links,
//! each carrying stat metadata and a private set of named attributes. Every
//! operation enters through the volume, runs under its single lock, and
//! reports externally visible changes to subscribed [`EventSink`]s once the
//! lock has been released.

pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod id_alloc;
pub mod index;
pub mod types;
pub mod vnode;

mod attr;
mod dir;
mod file;
mod node;
mod symlink;
mod volume;

pub use config::{ContentStoreKind, IdRange, MountParams, VolumeConfig};
pub use error::{FsError, FsResult};
pub use events::{AttributeCause, EventKind, EventSink};
pub use file::Created;
pub use types::{
    AttrCookie, AttrDirCookie, AttrStat, DirCookie, DirEntry, FileCookie, FileTimes, FsInfo,
    NodeId, NodeKind, OpenMode, Stat, StatMask, SubscriptionId, Timespec, VolumeId,
};
pub use vnode::{DetachedVnodeTable, VnodeTable};
pub use volume::Volume;
