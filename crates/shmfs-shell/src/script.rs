// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path-based command interpreter over a mounted volume.
//!
//! The core only understands directory-relative names, so this is where
//! absolute paths are walked one component at a time.

use std::fmt::Write as _;

use anyhow::{anyhow, bail, Context, Result};
use shmfs_core::{DirEntry, FsResult, NodeId, OpenMode, Stat, StatMask, Volume};
use tracing::debug;

const LIST_BUFFER: usize = 4096;
const LIST_BATCH: usize = 64;

pub struct Shell {
    volume: Volume,
}

impl Shell {
    pub fn new(volume: Volume) -> Self {
        Self { volume }
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn finish(self) {
        self.volume.unmount();
    }

    /// Run one command line and return what it prints. Blank lines and
    /// `#` comments produce no output.
    pub fn run_line(&self, line: &str) -> Result<String> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(String::new());
        }
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();
        debug!(command, ?args, "run");

        match (command, args.as_slice()) {
            ("mkdir", [path]) => self.mkdir(path),
            ("touch", [path]) => self.touch(path),
            ("write", [path, ..]) => self.put(path, &text_after(line, 2), false),
            ("append", [path, ..]) => self.put(path, &text_after(line, 2), true),
            ("cat", [path]) => self.cat(path),
            ("ls", []) => self.ls("/"),
            ("ls", [path]) => self.ls(path),
            ("mv", [from, to]) => self.mv(from, to),
            ("rm", [path]) => self.rm(path),
            ("rmdir", [path]) => self.rmdir(path),
            ("stat", [path]) => self.stat(path),
            ("ln", ["-s", target, path]) => self.symlink(target, path),
            ("readlink", [path]) => self.readlink(path),
            ("truncate", [path, size]) => self.truncate(path, size),
            ("setattr", [path, name, ..]) => self.setattr(path, name, &text_after(line, 3)),
            ("getattr", [path, name]) => self.getattr(path, name),
            ("lsattr", [path]) => self.lsattr(path),
            ("rmattr", [path, name]) => self.rmattr(path, name),
            ("df", []) => Ok(self.df()),
            ("nodes", []) => Ok(self.nodes()),
            _ => Err(anyhow!("unrecognized command: {line}")),
        }
    }

    fn resolve(&self, path: &str) -> Result<NodeId> {
        let mut node = self.volume.root_id();
        for part in components(path)? {
            node = self
                .volume
                .lookup(node, part)
                .with_context(|| format!("{path}: cannot resolve {part:?}"))?;
        }
        Ok(node)
    }

    fn resolve_parent<'p>(&self, path: &'p str) -> Result<(NodeId, &'p str)> {
        let trimmed = path.trim_end_matches('/');
        let (dir, name) = trimmed
            .rsplit_once('/')
            .ok_or_else(|| anyhow!("{path}: path must be absolute"))?;
        if name.is_empty() {
            bail!("{path}: path has no final component");
        }
        let dir = if dir.is_empty() { "/" } else { dir };
        Ok((self.resolve(dir)?, name))
    }

    fn mkdir(&self, path: &str) -> Result<String> {
        let (dir, name) = self.resolve_parent(path)?;
        self.volume
            .create_dir(dir, name, 0o755)
            .with_context(|| format!("mkdir {path}"))?;
        Ok(String::new())
    }

    fn touch(&self, path: &str) -> Result<String> {
        let (dir, name) = self.resolve_parent(path)?;
        let created = self
            .volume
            .create(dir, name, OpenMode::WRITE | OpenMode::CREATE, 0o644)
            .with_context(|| format!("touch {path}"))?;
        self.volume.close(created.cookie)?;
        Ok(String::new())
    }

    fn put(&self, path: &str, text: &str, append: bool) -> Result<String> {
        let (dir, name) = self.resolve_parent(path)?;
        let mode = OpenMode::WRITE
            | OpenMode::CREATE
            | if append {
                OpenMode::APPEND
            } else {
                OpenMode::TRUNCATE
            };
        let created = self
            .volume
            .create(dir, name, mode, 0o644)
            .with_context(|| format!("open {path}"))?;
        let written = self.volume.write(created.cookie, 0, text.as_bytes());
        self.volume.close(created.cookie)?;
        written.with_context(|| format!("write {path}"))?;
        Ok(String::new())
    }

    fn cat(&self, path: &str) -> Result<String> {
        let node = self.resolve(path)?;
        let size = self.volume.read_stat(node)?.size;
        let len = usize::try_from(size).context("file too large to print")?;
        let cookie = self
            .volume
            .open(node, OpenMode::READ)
            .with_context(|| format!("cat {path}"))?;
        let mut buf = vec![0u8; len];
        let read = self.volume.read(cookie, 0, &mut buf);
        self.volume.close(cookie)?;
        let read = read.with_context(|| format!("cat {path}"))?;
        buf.truncate(read);
        Ok(format!("{}\n", String::from_utf8_lossy(&buf)))
    }

    fn ls(&self, path: &str) -> Result<String> {
        let dir = self.resolve(path)?;
        let cookie = self
            .volume
            .open_dir(dir)
            .with_context(|| format!("ls {path}"))?;
        let entries = drain_listing(|| self.volume.read_dir(cookie, LIST_BUFFER, LIST_BATCH));
        self.volume.close_dir(cookie)?;

        let mut out = String::new();
        for entry in entries? {
            if entry.name == "." || entry.name == ".." {
                continue;
            }
            let stat = self.volume.read_stat(entry.ino)?;
            let suffix = if stat.is_dir() {
                "/"
            } else if stat.is_symlink() {
                "@"
            } else {
                ""
            };
            let _ = writeln!(out, "{}{suffix}", entry.name);
        }
        Ok(out)
    }

    fn mv(&self, from: &str, to: &str) -> Result<String> {
        let (from_dir, from_name) = self.resolve_parent(from)?;
        let (to_dir, to_name) = self.resolve_parent(to)?;
        self.volume
            .rename(from_dir, from_name, to_dir, to_name)
            .with_context(|| format!("mv {from} {to}"))?;
        Ok(String::new())
    }

    fn rm(&self, path: &str) -> Result<String> {
        let (dir, name) = self.resolve_parent(path)?;
        self.volume
            .unlink(dir, name)
            .with_context(|| format!("rm {path}"))?;
        Ok(String::new())
    }

    fn rmdir(&self, path: &str) -> Result<String> {
        let (dir, name) = self.resolve_parent(path)?;
        self.volume
            .remove_dir(dir, name)
            .with_context(|| format!("rmdir {path}"))?;
        Ok(String::new())
    }

    fn stat(&self, path: &str) -> Result<String> {
        let node = self.resolve(path)?;
        let stat = self.volume.read_stat(node)?;
        Ok(format!(
            "ino={} mode={:o} nlink={} uid={} gid={} size={} mtime={}\n",
            stat.ino.0, stat.mode, stat.nlink, stat.uid, stat.gid, stat.size, stat.times.mtime.sec
        ))
    }

    fn symlink(&self, target: &str, path: &str) -> Result<String> {
        let (dir, name) = self.resolve_parent(path)?;
        self.volume
            .create_symlink(dir, name, target, 0o777)
            .with_context(|| format!("ln -s {target} {path}"))?;
        Ok(String::new())
    }

    fn readlink(&self, path: &str) -> Result<String> {
        let node = self.resolve(path)?;
        let target = self
            .volume
            .symlink_target(node)
            .with_context(|| format!("readlink {path}"))?;
        Ok(format!("{target}\n"))
    }

    fn truncate(&self, path: &str, size: &str) -> Result<String> {
        let size: u64 = size
            .parse()
            .with_context(|| format!("invalid size {size:?}"))?;
        let node = self.resolve(path)?;
        let stat = Stat {
            size,
            ..Stat::default()
        };
        self.volume
            .write_stat(node, &stat, StatMask::SIZE)
            .with_context(|| format!("truncate {path}"))?;
        Ok(String::new())
    }

    fn setattr(&self, path: &str, name: &str, value: &str) -> Result<String> {
        let node = self.resolve(path)?;
        self.volume
            .set_attr(node, name, 0, value.as_bytes())
            .with_context(|| format!("setattr {path} {name}"))?;
        Ok(String::new())
    }

    fn getattr(&self, path: &str, name: &str) -> Result<String> {
        let node = self.resolve(path)?;
        let (_, data) = self
            .volume
            .get_attr(node, name)
            .with_context(|| format!("getattr {path} {name}"))?;
        Ok(format!("{}\n", String::from_utf8_lossy(&data)))
    }

    fn lsattr(&self, path: &str) -> Result<String> {
        let node = self.resolve(path)?;
        let cookie = self
            .volume
            .open_attr_dir(node)
            .with_context(|| format!("lsattr {path}"))?;
        let entries =
            drain_listing(|| self.volume.read_attr_dir(cookie, LIST_BUFFER, LIST_BATCH));
        self.volume.close_attr_dir(cookie)?;

        let mut out = String::new();
        for entry in entries? {
            let cookie = self.volume.open_attr(node, &entry.name, OpenMode::READ)?;
            let stat = self.volume.read_attr_stat(cookie);
            self.volume.close_attr(cookie)?;
            let stat = stat?;
            let _ = writeln!(
                out,
                "{} type={} size={}",
                entry.name, stat.type_code, stat.size
            );
        }
        Ok(out)
    }

    fn rmattr(&self, path: &str, name: &str) -> Result<String> {
        let node = self.resolve(path)?;
        self.volume
            .remove_attr(node, name)
            .with_context(|| format!("rmattr {path} {name}"))?;
        Ok(String::new())
    }

    fn df(&self) -> String {
        let info = self.volume.read_fs_info();
        format!(
            "{} dev={} block_size={} io_size={} free_blocks={}\n",
            info.volume_name, info.dev.0, info.block_size, info.io_size, info.free_blocks
        )
    }

    fn nodes(&self) -> String {
        let mut out = String::new();
        for (id, name) in self.volume.list_nodes() {
            let _ = writeln!(out, "{} {name:?}", id.0);
        }
        out
    }
}

fn components(path: &str) -> Result<impl Iterator<Item = &str>> {
    if !path.starts_with('/') {
        bail!("{path}: path must be absolute");
    }
    Ok(path.split('/').filter(|part| !part.is_empty()))
}

/// The remainder of `line` after its first `skip` words, spacing preserved.
fn text_after(line: &str, skip: usize) -> String {
    let mut rest = line;
    for _ in 0..skip {
        rest = rest.trim_start();
        rest = rest.find(char::is_whitespace).map_or("", |end| &rest[end..]);
    }
    rest.trim().to_string()
}

fn drain_listing(
    mut next: impl FnMut() -> FsResult<Vec<DirEntry>>,
) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    loop {
        let batch = next()?;
        if batch.is_empty() {
            return Ok(entries);
        }
        entries.extend(batch);
    }
}
