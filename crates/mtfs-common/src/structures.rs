//! Filesystem structures persisted through storage backends
//!
//! Inodes, directory blocks and block metadata travel as JSON documents
//! whose field names are fixed by existing deployments. The superblock is
//! persisted with the binary layout in [`crate::layout`].

use crate::error::{Error, Result};
use crate::types::{Identifier, PoolId, VolumeId, unix_now};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// All physical replicas of one logical block
pub type RedundancyGroup = Vec<Identifier>;

/// Inode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    /// Access rights
    pub mode: u32,
    /// Owner user id
    pub uid: u32,
    /// Owner group id
    pub gid: u32,
    /// Size in bytes
    pub size: u64,
    /// Number of hard links
    #[serde(rename = "linkCount")]
    pub link_count: u32,
    /// Last access, seconds since the Unix epoch
    pub atime: u64,
    /// Redundancy groups in file content order
    #[serde(rename = "dataBlocks")]
    pub data_blocks: Vec<RedundancyGroup>,
}

impl Inode {
    /// Create an empty inode owned by `uid:gid`
    #[must_use]
    pub fn new(mode: u32, uid: u32, gid: u32) -> Self {
        Self {
            mode,
            uid,
            gid,
            ..Self::default()
        }
    }
}

impl Default for Inode {
    fn default() -> Self {
        Self {
            mode: 0,
            uid: 0,
            gid: 0,
            size: 0,
            link_count: 1,
            atime: unix_now(),
            data_blocks: Vec::new(),
        }
    }
}

/// Directory block: entry name to the replicas of its target
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DirectoryBlock {
    pub entries: BTreeMap<String, RedundancyGroup>,
}

impl<'de> Deserialize<'de> for DirectoryBlock {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        unique_entries(deserializer).map(|entries| Self { entries })
    }
}

impl DirectoryBlock {
    /// Create an empty directory block
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry, returning the previous replicas
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        replicas: RedundancyGroup,
    ) -> Option<RedundancyGroup> {
        self.entries.insert(name.into(), replicas)
    }

    /// Look up an entry
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RedundancyGroup> {
        self.entries.get(name)
    }

    /// Remove an entry
    pub fn remove(&mut self, name: &str) -> Option<RedundancyGroup> {
        self.entries.remove(name)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the block has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rejects documents that repeat an entry name instead of keeping the last one.
fn unique_entries<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, RedundancyGroup>, D::Error>
where
    D: Deserializer<'de>,
{
    struct EntriesVisitor;

    impl<'de> Visitor<'de> for EntriesVisitor {
        type Value = BTreeMap<String, RedundancyGroup>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an object mapping entry names to identifier arrays")
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = BTreeMap::new();
            while let Some((name, replicas)) = map.next_entry::<String, RedundancyGroup>()? {
                if entries.contains_key(&name) {
                    return Err(serde::de::Error::custom(format!(
                        "duplicate directory entry: {name}"
                    )));
                }
                entries.insert(name, replicas);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(EntriesVisitor)
}

/// Metadata stored alongside a block's payload
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Blocks referencing this one
    #[serde(rename = "referenceId")]
    pub references: Vec<Identifier>,
    /// Last access, seconds since the Unix epoch
    #[serde(rename = "lastAccess")]
    pub last_access: u64,
}

impl BlockInfo {
    /// Create block metadata
    #[must_use]
    pub const fn new(references: Vec<Identifier>, last_access: u64) -> Self {
        Self {
            references,
            last_access,
        }
    }
}

/// A volume: one backend instance and the parameters it was attached with
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Registered backend name
    #[serde(rename = "plName")]
    pub plugin: String,
    /// Attach parameters
    pub params: BTreeMap<String, String>,
}

impl Volume {
    /// Create a volume description
    #[must_use]
    pub fn new(plugin: impl Into<String>, params: BTreeMap<String, String>) -> Self {
        Self {
            plugin: plugin.into(),
            params,
        }
    }
}

/// A pool of volumes sharing one migration setting
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub migration: u32,
    pub volumes: BTreeMap<VolumeId, Volume>,
}

/// Root configuration and catalog record of a filesystem instance
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Superblock {
    pub inode_cache_size: u64,
    pub directory_cache_size: u64,
    pub block_cache_size: u64,
    pub block_size: u64,
    pub redundancy: u64,
    pub migration: u32,
    pub pools: BTreeMap<PoolId, Pool>,
    pub root_inodes: Vec<Identifier>,
}

impl Superblock {
    /// Look up the volume an identifier lives on
    #[must_use]
    pub fn volume(&self, pool: PoolId, volume: VolumeId) -> Option<&Volume> {
        self.pools.get(&pool)?.volumes.get(&volume)
    }

    /// Check that a backend attached as `plugin` with `params` matches the
    /// volume recorded for `(pool, volume)`.
    pub fn check_volume(
        &self,
        pool: PoolId,
        volume: VolumeId,
        plugin: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<()> {
        let recorded = self.volume(pool, volume).ok_or_else(|| {
            Error::configuration(format!("volume {volume} of pool {pool} is not in the superblock"))
        })?;

        if recorded.plugin != plugin {
            return Err(Error::configuration(format!(
                "volume {volume} of pool {pool} uses backend {}, attached as {plugin}",
                recorded.plugin
            )));
        }

        if let Some((key, value)) = recorded
            .params
            .iter()
            .find(|&(key, value)| params.get(key) != Some(value))
        {
            return Err(Error::configuration(format!(
                "volume {volume} of pool {pool} expects {key}={value}"
            )));
        }

        Ok(())
    }
}
