// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Volume configuration

use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult};

/// Configuration for a single mounted volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Name reported by `read_fs_info`
    pub volume_name: String,
    /// Storage strategy for regular file content
    pub content: ContentStoreKind,
    /// Range node ids are allocated from
    pub id_range: IdRange,
    /// Deliver change notifications to subscribers
    pub track_events: bool,
    /// Permission bits of the root directory
    pub root_mode: u32,
    /// Owner recorded on newly created nodes
    pub default_uid: u32,
    pub default_gid: u32,
    pub block_size: u32,
    pub io_size: u32,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            volume_name: "shmfs".to_string(),
            content: ContentStoreKind::default(),
            id_range: IdRange::default(),
            track_events: true,
            root_mode: 0o755,
            default_uid: 0,
            default_gid: 0,
            block_size: 512,
            io_size: 4096,
        }
    }
}

impl VolumeConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn validate(&self) -> FsResult<()> {
        if let ContentStoreKind::Paged { page_size } = self.content {
            if page_size == 0 || !page_size.is_power_of_two() {
                return Err(FsError::InvalidArgument);
            }
        }
        if self.id_range.min == 0 || self.id_range.min >= self.id_range.max {
            return Err(FsError::InvalidArgument);
        }
        if self.block_size == 0 {
            return Err(FsError::InvalidArgument);
        }
        Ok(())
    }
}

/// How a regular file stores its bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentStoreKind {
    /// One contiguous growable buffer
    #[default]
    Flat,
    /// Fixed-size pages allocated lazily
    Paged {
        #[serde(default = "default_page_size")]
        page_size: usize,
    },
}

fn default_page_size() -> usize {
    4096
}

/// Half-open id range `[min, max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub min: u64,
    pub max: u64,
}

impl Default for IdRange {
    fn default() -> Self {
        Self {
            min: 1,
            max: 0x7fff_ffff,
        }
    }
}

/// Parameters handed over at mount time. The engine keeps no on-disk state,
/// so these are only acknowledged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountParams {
    pub device: Option<String>,
    pub flags: u32,
    pub args: Option<String>,
}
