// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Interface to the host's vnode table.
//!
//! The host pins nodes through `Volume::get_vnode` and `Volume::put_vnode`.
//! In the other direction the volume tells the host when a node leaves the
//! namespace so any cached vnode can be evicted once its last pin drops.

use crate::types::{NodeId, VolumeId};

#[cfg_attr(test, mockall::automock)]
pub trait VnodeTable: Send + Sync {
    /// `node` was unlinked or removed. Called with the volume lock released.
    fn remove_vnode(&self, volume: VolumeId, node: NodeId);
}

/// Table for volumes driven directly, without a host vnode cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedVnodeTable;

impl VnodeTable for DetachedVnodeTable {
    fn remove_vnode(&self, _volume: VolumeId, _node: NodeId) {}
}
