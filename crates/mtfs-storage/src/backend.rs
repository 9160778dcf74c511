//! Storage backend contract
//!
//! A backend persists filesystem structures on one physical volume. Callers
//! attach it once, run block operations from any number of threads, then
//! detach it once at shutdown.
//!
//! # Block operations
//!
//! Blocks are addressed by `(id, block type)`. Each block has a metadata
//! twin selected by the `metadata` flag, which always carries a
//! [`BlockInfo`] regardless of the block type.

use bytes::Bytes;
use mtfs_common::{BlockInfo, BlockType, DirectoryBlock, Error, Inode, Params, Result, Superblock};

/// Contents of one block or of its metadata twin
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Inode(Inode),
    Directory(DirectoryBlock),
    /// Raw data block image
    Data(Bytes),
    /// Block metadata
    Info(BlockInfo),
}

impl Payload {
    /// Short name of the payload kind
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Inode(_) => "inode",
            Self::Directory(_) => "directory",
            Self::Data(_) => "data",
            Self::Info(_) => "metadata",
        }
    }

    /// Check the payload is what `(block_type, metadata)` stores
    pub fn check(&self, block_type: BlockType, metadata: bool) -> Result<()> {
        let matches = match (self, block_type, metadata) {
            (_, BlockType::Superblock, _) => return Err(Error::UnsupportedBlockType(block_type)),
            (Self::Info(_), _, true)
            | (Self::Inode(_), BlockType::Inode, false)
            | (Self::Directory(_), BlockType::DirectoryBlock, false)
            | (Self::Data(_), BlockType::DataBlock, false) => true,
            _ => false,
        };
        if matches {
            Ok(())
        } else {
            Err(Error::invalid_argument(format!(
                "{} payload cannot be stored as {}{}",
                self.kind(),
                if metadata { "metadata of " } else { "" },
                block_type
            )))
        }
    }

    pub fn into_inode(self) -> Result<Inode> {
        match self {
            Self::Inode(inode) => Ok(inode),
            other => Err(unexpected("inode", &other)),
        }
    }

    pub fn into_directory(self) -> Result<DirectoryBlock> {
        match self {
            Self::Directory(dir) => Ok(dir),
            other => Err(unexpected("directory", &other)),
        }
    }

    pub fn into_data(self) -> Result<Bytes> {
        match self {
            Self::Data(data) => Ok(data),
            other => Err(unexpected("data", &other)),
        }
    }

    pub fn into_info(self) -> Result<BlockInfo> {
        match self {
            Self::Info(info) => Ok(info),
            other => Err(unexpected("metadata", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &Payload) -> Error {
    Error::decode(format!("expected {wanted} payload, got {}", got.kind()))
}

impl From<Inode> for Payload {
    fn from(inode: Inode) -> Self {
        Self::Inode(inode)
    }
}

impl From<DirectoryBlock> for Payload {
    fn from(dir: DirectoryBlock) -> Self {
        Self::Directory(dir)
    }
}

impl From<BlockInfo> for Payload {
    fn from(info: BlockInfo) -> Self {
        Self::Info(info)
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Self::Data(data)
    }
}

/// Core trait for storage backends
pub trait StorageBackend: Send + Sync {
    /// Registered backend name
    fn name(&self) -> &str;

    /// Validate `params`, connect and restore allocator state
    ///
    /// Nothing is touched when a parameter is missing or invalid.
    fn attach(&self, params: &Params) -> Result<()>;

    /// Persist allocator state and release the connection
    ///
    /// Callers must quiesce first: an id allocated by an operation still
    /// running while detach takes its snapshot is missing from the saved
    /// state.
    fn detach(&self) -> Result<()>;

    /// Allocate an id for a new block
    fn add(&self, block_type: BlockType) -> Result<u64>;

    /// Release `id` and delete the block
    ///
    /// The id is released even if the remote delete fails.
    fn del(&self, id: u64, block_type: BlockType) -> Result<()>;

    /// Read a block or its metadata
    fn get(&self, id: u64, block_type: BlockType, metadata: bool) -> Result<Payload>;

    /// Write a block or its metadata
    fn put(&self, id: u64, block_type: BlockType, payload: &Payload, metadata: bool) -> Result<()>;

    /// Read the superblock
    fn get_superblock(&self) -> Result<Superblock> {
        Err(Error::Unsupported(format!("{} has no superblock", self.name())))
    }

    /// Write the superblock
    fn put_superblock(&self, _superblock: &Superblock) -> Result<()> {
        Err(Error::Unsupported(format!("{} has no superblock", self.name())))
    }

    fn get_inode(&self, id: u64) -> Result<Inode> {
        self.get(id, BlockType::Inode, false)?.into_inode()
    }

    fn put_inode(&self, id: u64, inode: &Inode) -> Result<()> {
        self.put(id, BlockType::Inode, &Payload::Inode(inode.clone()), false)
    }

    fn get_directory(&self, id: u64) -> Result<DirectoryBlock> {
        self.get(id, BlockType::DirectoryBlock, false)?.into_directory()
    }

    fn put_directory(&self, id: u64, dir: &DirectoryBlock) -> Result<()> {
        self.put(id, BlockType::DirectoryBlock, &Payload::Directory(dir.clone()), false)
    }

    fn get_data(&self, id: u64) -> Result<Bytes> {
        self.get(id, BlockType::DataBlock, false)?.into_data()
    }

    fn put_data(&self, id: u64, data: Bytes) -> Result<()> {
        self.put(id, BlockType::DataBlock, &Payload::Data(data), false)
    }

    /// Read the metadata twin of a block
    fn get_info(&self, id: u64, block_type: BlockType) -> Result<BlockInfo> {
        self.get(id, block_type, true)?.into_info()
    }

    /// Write the metadata twin of a block
    fn put_info(&self, id: u64, block_type: BlockType, info: &BlockInfo) -> Result<()> {
        self.put(id, block_type, &Payload::Info(info.clone()), true)
    }
}
