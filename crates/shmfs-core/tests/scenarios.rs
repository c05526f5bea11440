// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end behavior of a mounted volume driven through its public API.

use std::sync::Arc;

use parking_lot::Mutex;
use shmfs_core::{
    AttributeCause, ContentStoreKind, DetachedVnodeTable, EventKind, EventSink, FsError,
    MountParams, NodeId, OpenMode, Stat, StatMask, Volume, VolumeConfig,
};

fn mount(content: ContentStoreKind) -> Volume {
    let config = VolumeConfig {
        content,
        ..VolumeConfig::default()
    };
    Volume::mount(config, MountParams::default(), Arc::new(DetachedVnodeTable)).unwrap()
}

fn rw() -> OpenMode {
    OpenMode::READ | OpenMode::WRITE
}

fn read_all(volume: &Volume, node: NodeId) -> Vec<u8> {
    let size = volume.read_stat(node).unwrap().size as usize;
    let cookie = volume.open(node, OpenMode::READ).unwrap();
    let mut buf = vec![0u8; size];
    let n = volume.read(cookie, 0, &mut buf).unwrap();
    volume.close(cookie).unwrap();
    buf.truncate(n);
    buf
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<EventKind>>,
}

impl EventSink for RecordingSink {
    fn on_event(&self, evt: &EventKind) {
        self.events.lock().push(evt.clone());
    }
}

#[test]
fn write_rename_then_read_back() {
    for content in [
        ContentStoreKind::Flat,
        ContentStoreKind::Paged { page_size: 4096 },
    ] {
        let volume = mount(content);
        let root = volume.root_id();
        let a = volume.create_dir(root, "a", 0o755).unwrap();
        let created = volume.create(a, "f.txt", rw(), 0o644).unwrap();
        assert!(created.is_new);
        assert_eq!(volume.write(created.cookie, 0, b"hello").unwrap(), 5);
        volume.close(created.cookie).unwrap();

        volume.rename(a, "f.txt", a, "g.txt").unwrap();
        let g = volume.lookup(a, "g.txt").unwrap();
        assert_eq!(g, created.node);
        let cookie = volume.open(g, OpenMode::READ).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(volume.read(cookie, 0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        volume.close(cookie).unwrap();
        assert_eq!(volume.lookup(a, "f.txt"), Err(FsError::NotFound));
    }
}

#[test]
fn remove_dir_after_emptying() {
    let volume = mount(ContentStoreKind::Flat);
    let root = volume.root_id();
    let a = volume.create_dir(root, "a", 0o755).unwrap();
    let created = volume.create(a, "f", rw(), 0o644).unwrap();
    volume.close(created.cookie).unwrap();

    assert_eq!(volume.remove_dir(root, "a"), Err(FsError::DirectoryNotEmpty));
    volume.unlink(a, "f").unwrap();
    volume.remove_dir(root, "a").unwrap();
}

#[test]
fn attribute_overwrite_keeps_latest_value() {
    let volume = mount(ContentStoreKind::Flat);
    let root = volume.root_id();
    let created = volume.create(root, "g.txt", rw(), 0o644).unwrap();
    volume.close(created.cookie).unwrap();

    volume.set_attr(created.node, "tag", 0, b"v1").unwrap();
    volume.set_attr(created.node, "tag", 0, b"v2").unwrap();
    let (type_code, data) = volume.get_attr(created.node, "tag").unwrap();
    assert_eq!(type_code, 0);
    assert_eq!(data, b"v2");

    let cookie = volume
        .create_attr(created.node, "tag", 0, rw() | OpenMode::TRUNCATE)
        .unwrap();
    volume.write_attr(cookie, 0, b"v3").unwrap();
    assert_eq!(volume.read_attr_stat(cookie).unwrap().size, 2);
    volume.close_attr(cookie).unwrap();
}

#[test]
fn unlinked_file_stays_usable_while_open() {
    let volume = mount(ContentStoreKind::Flat);
    let root = volume.root_id();
    let created = volume.create(root, "f", rw(), 0o644).unwrap();
    volume.write(created.cookie, 0, b"data").unwrap();

    volume.unlink(root, "f").unwrap();
    assert_eq!(volume.lookup(root, "f"), Err(FsError::NotFound));
    assert_eq!(volume.read_stat(created.node).unwrap().size, 4);

    volume.write(created.cookie, 4, b"more").unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(volume.read(created.cookie, 0, &mut buf).unwrap(), 8);
    assert_eq!(&buf, b"datamore");
    assert_eq!(volume.node_name(created.node).unwrap(), "f");

    volume.close(created.cookie).unwrap();
    assert_eq!(volume.read_stat(created.node), Err(FsError::NotFound));
}

#[test]
fn attribute_cookie_pins_node() {
    let volume = mount(ContentStoreKind::Flat);
    let root = volume.root_id();
    let dir = volume.create_dir(root, "d", 0o700).unwrap();
    let cookie = volume.create_attr(dir, "note", 1, rw()).unwrap();
    volume.remove_dir(root, "d").unwrap();

    volume.write_attr(cookie, 0, b"still here").unwrap();
    assert_eq!(volume.get_attr(dir, "note").unwrap().1, b"still here");
    volume.close_attr(cookie).unwrap();
    assert_eq!(volume.get_attr(dir, "note"), Err(FsError::NotFound));
}

#[test]
fn removing_directory_frees_its_ids_for_reuse() {
    let volume = mount(ContentStoreKind::Flat);
    let root = volume.root_id();
    let a = volume.create_dir(root, "a", 0o755).unwrap();
    volume.remove_dir(root, "a").unwrap();
    let b = volume.create_dir(root, "b", 0o755).unwrap();
    assert_eq!(a, b);
}

#[test]
fn truncate_through_write_stat_zero_fills() {
    let volume = mount(ContentStoreKind::Paged { page_size: 512 });
    let root = volume.root_id();
    let created = volume.create(root, "f", rw(), 0o644).unwrap();
    volume.write(created.cookie, 0, &[0xAA; 1000]).unwrap();
    volume.close(created.cookie).unwrap();

    let shrink = Stat {
        size: 10,
        ..Stat::default()
    };
    volume.write_stat(created.node, &shrink, StatMask::SIZE).unwrap();
    let grow = Stat {
        size: 1500,
        ..Stat::default()
    };
    volume.write_stat(created.node, &grow, StatMask::SIZE).unwrap();

    let data = read_all(&volume, created.node);
    assert_eq!(data.len(), 1500);
    assert!(data[..10].iter().all(|&b| b == 0xAA));
    assert!(data[10..].iter().all(|&b| b == 0));
}

#[test]
fn symlink_round_trip() {
    let volume = mount(ContentStoreKind::Flat);
    let root = volume.root_id();
    let link = volume.create_symlink(root, "l", "/a/b", 0o777).unwrap();
    assert_eq!(volume.lookup(root, "l").unwrap(), link);
    let mut buf = [0u8; 16];
    let n = volume.read_symlink(link, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"/a/b");
    assert!(volume.read_stat(link).unwrap().is_symlink());
}

#[test]
fn events_follow_namespace_changes() {
    let volume = mount(ContentStoreKind::Flat);
    let root = volume.root_id();
    let sink = Arc::new(RecordingSink::default());
    let id = volume.subscribe_events(sink.clone());

    let a = volume.create_dir(root, "a", 0o755).unwrap();
    volume.rename(root, "a", root, "b").unwrap();
    volume.set_attr(a, "k", 0, b"v").unwrap();
    volume.remove_dir(root, "b").unwrap();
    volume.unsubscribe_events(id).unwrap();
    volume.create_dir(root, "ignored", 0o755).unwrap();

    let events = sink.events.lock();
    assert_eq!(events.len(), 4);
    assert!(matches!(
        &events[0],
        EventKind::EntryCreated { dir, name, node, .. }
            if *dir == root && name == "a" && *node == a
    ));
    assert!(matches!(
        &events[1],
        EventKind::EntryMoved { from_name, to_name, node, .. }
            if from_name == "a" && to_name == "b" && *node == a
    ));
    assert!(matches!(
        &events[2],
        EventKind::AttributeChanged { cause: AttributeCause::Created, .. }
    ));
    assert!(matches!(
        &events[3],
        EventKind::EntryRemoved { name, node, .. } if name == "b" && *node == a
    ));
}

#[test]
fn disabled_tracking_delivers_nothing() {
    let config = VolumeConfig {
        track_events: false,
        ..VolumeConfig::default()
    };
    let volume =
        Volume::mount(config, MountParams::default(), Arc::new(DetachedVnodeTable)).unwrap();
    let sink = Arc::new(RecordingSink::default());
    volume.subscribe_events(sink.clone());
    volume.create_dir(volume.root_id(), "a", 0o755).unwrap();
    assert!(sink.events.lock().is_empty());
}

#[test]
fn list_nodes_reports_live_nodes_in_id_order() {
    let volume = mount(ContentStoreKind::Flat);
    let root = volume.root_id();
    let a = volume.create_dir(root, "a", 0o755).unwrap();
    let b = volume.create_symlink(a, "b", "x", 0o777).unwrap();
    let nodes = volume.list_nodes();
    assert_eq!(
        nodes,
        vec![(root, String::new()), (a, "a".to_string()), (b, "b".to_string())]
    );
}
