// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Symbolic links

use tracing::trace;

use crate::dir::validate_entry_name;
use crate::error::{FsError, FsResult};
use crate::node::Payload;
use crate::types::NodeId;
use crate::volume::{Volume, VolumeState};

impl VolumeState {
    pub(crate) fn create_symlink(
        &mut self,
        dir: NodeId,
        name: &str,
        target: &str,
        mode: u32,
    ) -> FsResult<NodeId> {
        validate_entry_name(name)?;
        if target.contains('\0') {
            return Err(FsError::InvalidArgument);
        }
        let children = &self.linked_dir(dir)?.children;
        if name == "." || name == ".." || children.contains(name) {
            return Err(FsError::AlreadyExists);
        }
        let node = self.new_node(name, dir, mode, Payload::Symlink(target.to_string()));
        self.link_new(dir, node)
    }

    fn symlink_target(&self, node: NodeId) -> FsResult<&str> {
        match &self.node(node)?.payload {
            Payload::Symlink(target) => Ok(target),
            _ => Err(FsError::InvalidArgument),
        }
    }
}

impl Volume {
    pub fn create_symlink(
        &self,
        dir: NodeId,
        name: &str,
        target: &str,
        mode: u32,
    ) -> FsResult<NodeId> {
        trace!(volume = self.id().0, %dir, name, target, "create_symlink");
        self.with_state(|state| state.create_symlink(dir, name, target, mode))
    }

    /// Copy the link target into `buf` and return its full length, which
    /// exceeds `buf.len()` when the copy was truncated.
    pub fn read_symlink(&self, node: NodeId, buf: &mut [u8]) -> FsResult<usize> {
        trace!(volume = self.id().0, %node, len = buf.len(), "read_symlink");
        self.with_state(|state| {
            let target = state.symlink_target(node)?.as_bytes();
            let n = target.len().min(buf.len());
            buf[..n].copy_from_slice(&target[..n]);
            Ok(target.len())
        })
    }

    /// The whole link target.
    pub fn symlink_target(&self, node: NodeId) -> FsResult<String> {
        self.with_state(|state| state.symlink_target(node).map(str::to_string))
    }
}
