//! Core type definitions for MTFS
//!
//! This module defines the identifiers and tags used to address blocks
//! anywhere in the tiered storage topology.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a pool in the storage topology
pub type PoolId = u32;

/// Identifier of a volume inside a pool
pub type VolumeId = u32;

/// Address of one physical replica of one logical block
///
/// Ordering is lexicographic over `(pool, volume, id)`.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
)]
#[display("p:{pool} v:{volume} i:{id}")]
pub struct Identifier {
    /// Pool holding the replica
    #[serde(rename = "poolId")]
    pub pool: PoolId,
    /// Volume inside the pool
    #[serde(rename = "volumeId")]
    pub volume: VolumeId,
    /// Block id local to the volume's backend
    pub id: u64,
}

impl Identifier {
    /// Create a new identifier
    #[must_use]
    pub const fn new(pool: PoolId, volume: VolumeId, id: u64) -> Self {
        Self { pool, volume, id }
    }
}

/// Kind of filesystem structure a block holds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Inode,
    DirectoryBlock,
    DataBlock,
    Superblock,
}

impl BlockType {
    /// Block types that draw ids from an allocator
    pub const ALLOCATED: [Self; 3] = [Self::Inode, Self::DirectoryBlock, Self::DataBlock];

    /// Get the block type name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Inode => "inode",
            Self::DirectoryBlock => "directory",
            Self::DataBlock => "data",
            Self::Superblock => "superblock",
        }
    }

    /// Whether blocks of this type are addressed by allocated ids
    #[must_use]
    pub const fn is_allocated(&self) -> bool {
        !matches!(self, Self::Superblock)
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for BlockType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inode" | "in" => Ok(Self::Inode),
            "directory" | "dir" | "directory_block" => Ok(Self::DirectoryBlock),
            "data" | "block" | "data_block" => Ok(Self::DataBlock),
            "superblock" | "sb" => Ok(Self::Superblock),
            _ => Err(format!("unknown block type: {s}")),
        }
    }
}

/// Current time in seconds since the Unix epoch
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
