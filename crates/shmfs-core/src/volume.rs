// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The volume: owner of the node arena, the id allocator and the lock that
//! serializes every structural change.
//!
//! All operations that need to call each other run as methods on the locked
//! [`VolumeState`], so nothing ever takes the lock twice. Side effects that
//! leave the engine (notifications, vnode eviction) are queued on the state
//! and handed out only after the guard has been dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::attr::{AttrHandle, AttrIterator};
use crate::config::{ContentStoreKind, MountParams, VolumeConfig};
use crate::dir::DirIterator;
use crate::error::{FsError, FsResult};
use crate::events::{EventHub, EventKind, EventSink};
use crate::file::FileHandle;
use crate::id_alloc::IdAllocator;
use crate::index::OrderedIndex;
use crate::node::{Node, Payload};
use crate::types::{
    AttrCookie, AttrDirCookie, DirCookie, FileCookie, FileTimes, FsInfo, NodeId, NodeKind, Stat,
    StatMask, SubscriptionId, Timespec, VolumeId,
};
use crate::vnode::VnodeTable;

static NEXT_VOLUME_ID: AtomicU32 = AtomicU32::new(1);

/// Work queued under the lock and performed after it is released.
pub(crate) enum Deferred {
    Event(EventKind),
    RemoveVnode(NodeId),
}

/// Everything guarded by the volume lock.
pub(crate) struct VolumeState {
    pub(crate) volume: VolumeId,
    pub(crate) ids: IdAllocator,
    pub(crate) nodes: OrderedIndex<NodeId, Node>,
    pub(crate) root: NodeId,
    pub(crate) content: ContentStoreKind,
    pub(crate) uid: u32,
    pub(crate) gid: u32,
    pub(crate) files: HashMap<FileCookie, FileHandle>,
    pub(crate) dirs: HashMap<DirCookie, DirIterator>,
    pub(crate) attrs: HashMap<AttrCookie, AttrHandle>,
    pub(crate) attr_dirs: HashMap<AttrDirCookie, AttrIterator>,
    next_cookie: u64,
    pending: Vec<Deferred>,
}

impl VolumeState {
    fn new(volume: VolumeId, config: &VolumeConfig) -> Self {
        let mut ids = IdAllocator::new();
        ids.register(config.id_range.min, config.id_range.max);
        Self {
            volume,
            ids,
            nodes: OrderedIndex::new(),
            root: NodeId(0),
            content: config.content,
            uid: config.default_uid,
            gid: config.default_gid,
            files: HashMap::new(),
            dirs: HashMap::new(),
            attrs: HashMap::new(),
            attr_dirs: HashMap::new(),
            next_cookie: 1,
            pending: Vec::new(),
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> FsResult<&Node> {
        self.nodes.find(&id).ok_or(FsError::NotFound)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> FsResult<&mut Node> {
        self.nodes.find_mut(&id).ok_or(FsError::NotFound)
    }

    /// Assign an id to `node` and make it reachable by id.
    pub(crate) fn register(&mut self, mut node: Node) -> FsResult<NodeId> {
        let id = NodeId(self.ids.alloc(1).ok_or(FsError::NoMemory)?);
        node.id = id;
        debug!(volume = self.volume.0, node = %id, name = %node.name, "register node");
        if let Err(err) = self.nodes.insert(id, node) {
            self.ids.free(id.0);
            return Err(err);
        }
        Ok(id)
    }

    pub(crate) fn acquire(&self, id: NodeId) -> FsResult<u32> {
        Ok(self.node(id)?.acquire_ref())
    }

    /// Drop one reference; the node and whatever it still owns are destroyed
    /// when the count reaches zero.
    pub(crate) fn release(&mut self, id: NodeId) -> FsResult<()> {
        if self.node(id)?.release_ref() == Some(0) {
            self.destroy(id);
        }
        Ok(())
    }

    fn destroy(&mut self, id: NodeId) {
        let mut doomed = vec![id];
        while let Some(id) = doomed.pop() {
            let Some(node) = self.nodes.remove(&id) else {
                continue;
            };
            debug!(volume = self.volume.0, node = %id, name = %node.name, "destroy node");
            self.ids.free(id.0);
            if let Payload::Directory(dir) = node.payload {
                for child in dir.children.values() {
                    if let Some(child_node) = self.nodes.find_mut(child) {
                        if child_node.release_ref() == Some(0) {
                            doomed.push(*child);
                        } else {
                            // Still pinned; its parent id is about to be reused.
                            child_node.parent = None;
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn next_cookie(&mut self) -> u64 {
        let cookie = self.next_cookie;
        self.next_cookie += 1;
        cookie
    }

    pub(crate) fn emit(&mut self, event: EventKind) {
        self.pending.push(Deferred::Event(event));
    }

    pub(crate) fn evict(&mut self, node: NodeId) {
        self.pending.push(Deferred::RemoveVnode(node));
    }

    pub(crate) fn stat_changed(&mut self, node: NodeId, fields: StatMask) {
        let dir = self.nodes.find(&node).and_then(|n| n.parent);
        self.emit(EventKind::StatChanged {
            volume: self.volume,
            dir,
            node,
            fields,
        });
    }

    /// Stamp a fresh node and its new parent directory.
    pub(crate) fn init_timestamps(&mut self, dir: NodeId, node: NodeId, now: Timespec) {
        if let Some(node) = self.nodes.find_mut(&node) {
            node.times = FileTimes::all(now);
        }
        self.touch_dir(dir, now);
    }

    pub(crate) fn touch_dir(&mut self, dir: NodeId, now: Timespec) {
        if let Some(dir) = self.nodes.find_mut(&dir) {
            dir.times.mtime = now;
            dir.times.ctime = now;
        }
    }

    pub(crate) fn new_node(&self, name: &str, parent: NodeId, mode: u32, payload: Payload) -> Node {
        Node::new(name, Some(parent), mode, payload).with_owner(self.uid, self.gid)
    }

    /// Release every cookie and the root. Nodes still pinned from outside
    /// are reported and dropped with the state.
    fn teardown(&mut self) {
        let pinned: Vec<NodeId> = self
            .files
            .drain()
            .map(|(_, h)| h.node)
            .chain(self.dirs.drain().map(|(_, it)| it.dir))
            .chain(self.attrs.drain().map(|(_, h)| h.node))
            .chain(self.attr_dirs.drain().map(|(_, it)| it.node))
            .collect();
        for node in pinned {
            if let Some(pinned) = self.nodes.find_mut(&node) {
                pinned.attr_iterators.clear();
                if let Payload::Directory(dir) = &mut pinned.payload {
                    dir.iterators.clear();
                }
            }
            let _ = self.release(node);
        }
        let root = self.root;
        let _ = self.release(root);
        if !self.nodes.is_empty() {
            warn!(
                volume = self.volume.0,
                remaining = self.nodes.len(),
                "unmounting with nodes still referenced"
            );
        }
    }
}

/// A mounted in-memory volume.
pub struct Volume {
    id: VolumeId,
    config: VolumeConfig,
    state: Mutex<VolumeState>,
    events: EventHub,
    vnodes: Arc<dyn VnodeTable>,
}

impl Volume {
    /// Create a volume with an empty root directory.
    pub fn mount(
        config: VolumeConfig,
        params: MountParams,
        vnodes: Arc<dyn VnodeTable>,
    ) -> FsResult<Self> {
        config.validate()?;
        let id = VolumeId(NEXT_VOLUME_ID.fetch_add(1, Ordering::Relaxed));
        debug!(
            volume = id.0,
            device = ?params.device,
            flags = params.flags,
            args = ?params.args,
            "mounting volume"
        );

        let mut state = VolumeState::new(id, &config);
        let root = Node::new("", None, config.root_mode, Payload::directory())
            .with_owner(config.default_uid, config.default_gid);
        let root_id = state.register(root)?;
        state.root = root_id;
        if let Ok(root) = state.node_mut(root_id) {
            root.times = FileTimes::all(Timespec::now());
        }

        Ok(Self {
            id,
            events: EventHub::new(config.track_events),
            config,
            state: Mutex::new(state),
            vnodes,
        })
    }

    /// Release the root and every open cookie, then drop the volume.
    pub fn unmount(self) {
        debug!(volume = self.id.0, "unmounting volume");
        self.state.lock().teardown();
    }

    pub fn id(&self) -> VolumeId {
        self.id
    }

    pub fn root_id(&self) -> NodeId {
        self.state.lock().root
    }

    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    /// Run `f` under the volume lock, then deliver whatever it queued.
    pub(crate) fn with_state<T>(
        &self,
        f: impl FnOnce(&mut VolumeState) -> FsResult<T>,
    ) -> FsResult<T> {
        let (result, pending) = {
            let mut state = self.state.lock();
            let result = f(&mut state);
            (result, std::mem::take(&mut state.pending))
        };
        for item in pending {
            match item {
                Deferred::Event(event) => self.events.publish(&event),
                Deferred::RemoveVnode(node) => self.vnodes.remove_vnode(self.id, node),
            }
        }
        result
    }

    pub fn read_fs_info(&self) -> FsInfo {
        let block_size = i64::from(self.config.block_size);
        FsInfo {
            dev: self.id,
            root: self.root_id(),
            block_size: self.config.block_size,
            io_size: self.config.io_size,
            total_blocks: i64::MAX / block_size,
            free_blocks: i64::MAX / block_size,
            total_nodes: i64::MAX,
            free_nodes: i64::MAX,
            volume_name: self.config.volume_name.clone(),
        }
    }

    /// Every live node in id order, logged at debug level.
    pub fn list_nodes(&self) -> Vec<(NodeId, String)> {
        let state = self.state.lock();
        debug!(volume = self.id.0, count = state.nodes.len(), "list nodes");
        state
            .nodes
            .iter()
            .map(|(id, node)| {
                debug!(node = %id, name = %node.name, refs = node.ref_count(), "  node");
                (*id, node.name.clone())
            })
            .collect()
    }

    pub fn lookup_by_id(&self, node: NodeId) -> FsResult<NodeKind> {
        trace!(volume = self.id.0, %node, "lookup_by_id");
        Ok(self.state.lock().node(node)?.kind())
    }

    /// Look a node up by id and pin it in one step.
    pub fn get_vnode(&self, node: NodeId) -> FsResult<NodeKind> {
        trace!(volume = self.id.0, %node, "get_vnode");
        let state = self.state.lock();
        let found = state.node(node)?;
        found.acquire_ref();
        Ok(found.kind())
    }

    /// Release a pin taken with [`Volume::get_vnode`].
    pub fn put_vnode(&self, node: NodeId) -> FsResult<()> {
        trace!(volume = self.id.0, %node, "put_vnode");
        self.release_reference(node)
    }

    pub fn acquire_reference(&self, node: NodeId) -> FsResult<()> {
        self.state.lock().acquire(node).map(|_| ())
    }

    pub fn release_reference(&self, node: NodeId) -> FsResult<()> {
        self.with_state(|state| state.release(node))
    }

    pub fn ref_count(&self, node: NodeId) -> FsResult<u32> {
        Ok(self.state.lock().node(node)?.ref_count())
    }

    pub fn read_stat(&self, node: NodeId) -> FsResult<Stat> {
        trace!(volume = self.id.0, %node, "read_stat");
        let state = self.state.lock();
        Ok(state.node(node)?.stat(self.id))
    }

    /// Apply the fields of `stat` selected by `mask`.
    pub fn write_stat(&self, node: NodeId, stat: &Stat, mask: StatMask) -> FsResult<()> {
        trace!(volume = self.id.0, %node, ?mask, "write_stat");
        self.with_state(|state| {
            state.node_mut(node)?.apply_stat(stat, mask, Timespec::now())?;
            state.stat_changed(node, mask);
            Ok(())
        })
    }

    /// Permission probe. Mode bits are recorded but not enforced here.
    pub fn access(&self, node: NodeId, _mode: u32) -> FsResult<()> {
        trace!(volume = self.id.0, %node, "access");
        self.state.lock().node(node).map(|_| ())
    }

    /// Entry name as known by the parent; empty for the root.
    pub fn node_name(&self, node: NodeId) -> FsResult<String> {
        Ok(self.state.lock().node(node)?.name.clone())
    }

    pub fn fsync(&self, node: NodeId) -> FsResult<()> {
        trace!(volume = self.id.0, %node, "fsync");
        self.state.lock().node(node).map(|_| ())
    }

    pub fn subscribe_events(&self, sink: Arc<dyn EventSink>) -> SubscriptionId {
        self.events.subscribe(sink)
    }

    pub fn unsubscribe_events(&self, id: SubscriptionId) -> FsResult<()> {
        self.events.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MockEventSink;
    use crate::types::{S_IFDIR, S_IFMT};
    use crate::vnode::DetachedVnodeTable;

    fn create_test_volume() -> Volume {
        Volume::mount(
            VolumeConfig::default(),
            MountParams::default(),
            Arc::new(DetachedVnodeTable),
        )
        .unwrap()
    }

    #[test]
    fn mount_registers_root_directory() {
        let volume = create_test_volume();
        let root = volume.root_id();
        assert_eq!(root, NodeId(1));
        assert_eq!(volume.lookup_by_id(root).unwrap(), NodeKind::Directory);
        assert_eq!(volume.ref_count(root).unwrap(), 1);

        let stat = volume.read_stat(root).unwrap();
        assert_eq!(stat.mode & S_IFMT, S_IFDIR);
        assert_eq!(stat.mode & 0o7777, 0o755);
        assert_eq!(stat.ino, root);
        assert_eq!(stat.dev, volume.id());
        assert_eq!(volume.node_name(root).unwrap(), "");
    }

    #[test]
    fn mount_rejects_invalid_config() {
        let config = VolumeConfig {
            content: ContentStoreKind::Paged { page_size: 3 },
            ..VolumeConfig::default()
        };
        let result = Volume::mount(config, MountParams::default(), Arc::new(DetachedVnodeTable));
        assert_eq!(result.err(), Some(FsError::InvalidArgument));
    }

    #[test]
    fn volumes_get_distinct_ids() {
        let a = create_test_volume();
        let b = create_test_volume();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn fs_info_reports_unbounded_capacity() {
        let volume = create_test_volume();
        let info = volume.read_fs_info();
        assert_eq!(info.block_size, 512);
        assert_eq!(info.io_size, 4096);
        assert_eq!(info.total_blocks, i64::MAX / 512);
        assert_eq!(info.free_nodes, i64::MAX);
        assert_eq!(info.volume_name, "shmfs");
        assert_eq!(info.root, volume.root_id());
    }

    #[test]
    fn get_and_put_vnode_balance() {
        let volume = create_test_volume();
        let root = volume.root_id();
        volume.get_vnode(root).unwrap();
        assert_eq!(volume.ref_count(root).unwrap(), 2);
        volume.put_vnode(root).unwrap();
        assert_eq!(volume.ref_count(root).unwrap(), 1);
        assert_eq!(volume.get_vnode(NodeId(999)), Err(FsError::NotFound));
    }

    #[test]
    fn write_stat_notifies_with_mask() {
        let volume = create_test_volume();
        let root = volume.root_id();
        let mut sink = MockEventSink::new();
        sink.expect_on_event()
            .withf(move |evt| {
                matches!(evt, EventKind::StatChanged { dir: None, node, fields, .. }
                    if *node == root && *fields == StatMask::MODE | StatMask::UID)
            })
            .times(1)
            .return_const(());
        volume.subscribe_events(Arc::new(sink));

        let stat = Stat {
            mode: 0o40700,
            uid: 42,
            ..Stat::default()
        };
        volume
            .write_stat(root, &stat, StatMask::MODE | StatMask::UID)
            .unwrap();
        let stat = volume.read_stat(root).unwrap();
        assert_eq!(stat.mode, S_IFDIR | 0o700);
        assert_eq!(stat.uid, 42);
    }

    #[test]
    fn unmount_releases_root() {
        let volume = create_test_volume();
        volume.unmount();
    }

    #[test]
    fn exhausted_id_pool_is_no_memory() {
        let config = VolumeConfig {
            id_range: crate::config::IdRange { min: 1, max: 2 },
            ..VolumeConfig::default()
        };
        let volume =
            Volume::mount(config, MountParams::default(), Arc::new(DetachedVnodeTable)).unwrap();
        let root = volume.root_id();
        assert_eq!(volume.create_dir(root, "a", 0o755), Err(FsError::NoMemory));
        assert!(volume.lookup(root, "a").is_err());
    }
}
