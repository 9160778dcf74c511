//! Object-store backend
//!
//! Persists every block as one object in a bucket:
//!
//! ```text
//! [metas/](inodes/|directories/|datas/)<id>   block or metadata document
//! ids.json                                    allocator state
//! superblock                                  binary superblock record
//! ```
//!
//! Inodes, directory blocks and metadata are JSON documents. Data blocks
//! are raw images of exactly `blockSize` bytes. All transfers are staged
//! through files under `<home>/<bucket>`.

use crate::allocator::{AllocatorSnapshot, Allocators};
use crate::backend::{Payload, StorageBackend};
use crate::object_store::{ObjectStore, ObjectStoreConnector};
use crate::registry::PluginInfo;
use crate::staging::{IDS_KEY, SUPERBLOCK_KEY, StagingArea, object_key};
use bytes::Bytes;
use mtfs_common::config::OBJECT_STORE_PARAMS;
use mtfs_common::{
    BlockInfo, BlockType, DirectoryBlock, Document, Error, Inode, ObjectStoreParams, Params,
    Result, Superblock,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{Span, debug, info, info_span, warn};

/// Registered name of the object-store backend
pub const BACKEND_NAME: &str = "s3";

/// State of an attached backend
struct Session {
    params: ObjectStoreParams,
    store: Arc<dyn ObjectStore>,
    staging: StagingArea,
    allocators: Allocators,
}

impl Session {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>> {
        match payload {
            Payload::Inode(inode) => inode.to_document(),
            Payload::Directory(dir) => dir.to_document(),
            Payload::Info(info) => info.to_document(),
            Payload::Data(data) => {
                let block_size = self.params.block_size;
                if data.len() > block_size {
                    return Err(Error::invalid_argument(format!(
                        "data block of {} bytes exceeds block size {block_size}",
                        data.len()
                    )));
                }
                let mut image = Vec::with_capacity(block_size);
                image.extend_from_slice(data);
                image.resize(block_size, 0);
                Ok(image)
            }
        }
    }

    fn decode(&self, block_type: BlockType, metadata: bool, contents: Vec<u8>) -> Result<Payload> {
        if metadata {
            return BlockInfo::from_document(&contents).map(Payload::Info);
        }
        match block_type {
            BlockType::Inode => Inode::from_document(&contents).map(Payload::Inode),
            BlockType::DirectoryBlock => {
                DirectoryBlock::from_document(&contents).map(Payload::Directory)
            }
            BlockType::DataBlock => {
                if contents.len() != self.params.block_size {
                    return Err(Error::decode(format!(
                        "data block holds {} bytes, block size is {}",
                        contents.len(),
                        self.params.block_size
                    )));
                }
                Ok(Payload::Data(Bytes::from(contents)))
            }
            BlockType::Superblock => Err(Error::UnsupportedBlockType(block_type)),
        }
    }
}

/// Storage backend over an object store bucket
pub struct ObjectStoreBackend {
    connector: Arc<dyn ObjectStoreConnector>,
    session: RwLock<Option<Arc<Session>>>,
    span: Span,
}

impl ObjectStoreBackend {
    /// Create a detached backend that opens buckets through `connector`
    pub fn new(connector: Arc<dyn ObjectStoreConnector>) -> Self {
        Self {
            connector,
            session: RwLock::new(None),
            span: info_span!("backend", name = BACKEND_NAME),
        }
    }

    /// Name and required attach parameters
    #[must_use]
    pub fn plugin_info() -> PluginInfo {
        PluginInfo::new(BACKEND_NAME, OBJECT_STORE_PARAMS)
    }

    /// Whether the backend is attached
    pub fn is_attached(&self) -> bool {
        self.session.read().is_some()
    }

    /// Data block size of the attached volume
    pub fn block_size(&self) -> Option<usize> {
        self.session.read().as_ref().map(|s| s.params.block_size)
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.session
            .read()
            .clone()
            .ok_or_else(|| Error::State(format!("{BACKEND_NAME} backend is not attached")))
    }
}

impl StorageBackend for ObjectStoreBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn attach(&self, params: &Params) -> Result<()> {
        let _enter = self.span.enter();
        let params = ObjectStoreParams::from_params(params)?;

        let mut slot = self.session.write();
        if slot.is_some() {
            return Err(Error::State(format!(
                "{BACKEND_NAME} backend is already attached"
            )));
        }

        let store = self.connector.connect(&params.region, &params.bucket)?;
        let staging = StagingArea::create(params.staging_dir())?;

        let allocators = match staging.download(store.as_ref(), IDS_KEY) {
            Ok(doc) => Allocators::from_snapshot(AllocatorSnapshot::from_document(&doc)?)?,
            Err(e) if e.is_not_found() => {
                info!(bucket = %params.bucket, "No allocator state in bucket, starting fresh");
                Allocators::new()
            }
            Err(e) => return Err(e),
        };

        info!(
            bucket = %params.bucket,
            region = %params.region,
            block_size = params.block_size,
            staging = %staging.dir().display(),
            "Attached"
        );

        *slot = Some(Arc::new(Session {
            params,
            store,
            staging,
            allocators,
        }));
        Ok(())
    }

    fn detach(&self) -> Result<()> {
        let _enter = self.span.enter();
        let mut slot = self.session.write();
        let session = slot
            .clone()
            .ok_or_else(|| Error::State(format!("{BACKEND_NAME} backend is not attached")))?;

        // Stays attached if the flush fails so the caller can retry
        let doc = session.allocators.snapshot().to_document()?;
        session
            .staging
            .upload(session.store.as_ref(), IDS_KEY, &doc)?;

        *slot = None;
        info!(bucket = %session.params.bucket, "Detached");
        Ok(())
    }

    fn add(&self, block_type: BlockType) -> Result<u64> {
        let _enter = self.span.enter();
        let session = self.session()?;
        let id = session.allocators.get(block_type)?.allocate();
        debug!(id, %block_type, "Allocated block");
        Ok(id)
    }

    fn del(&self, id: u64, block_type: BlockType) -> Result<()> {
        let _enter = self.span.enter();
        let session = self.session()?;
        session.allocators.get(block_type)?.release(id);

        for metadata in [false, true] {
            let key = object_key(id, block_type, metadata)?;
            if let Err(e) = session.store.delete_object(&key) {
                warn!(key = %key, "Failed to delete object, id already released: {}", e);
            }
        }

        debug!(id, %block_type, "Deleted block");
        Ok(())
    }

    fn get(&self, id: u64, block_type: BlockType, metadata: bool) -> Result<Payload> {
        let _enter = self.span.enter();
        let session = self.session()?;
        let key = object_key(id, block_type, metadata)?;

        let contents = session.staging.download(session.store.as_ref(), &key)?;
        let payload = session.decode(block_type, metadata, contents)?;

        debug!(key = %key, "Read block");
        Ok(payload)
    }

    fn put(&self, id: u64, block_type: BlockType, payload: &Payload, metadata: bool) -> Result<()> {
        let _enter = self.span.enter();
        payload.check(block_type, metadata)?;
        let session = self.session()?;
        let key = object_key(id, block_type, metadata)?;

        let contents = session.encode(payload)?;
        session
            .staging
            .upload(session.store.as_ref(), &key, &contents)?;

        debug!(key = %key, bytes = contents.len(), "Wrote block");
        Ok(())
    }

    fn get_superblock(&self) -> Result<Superblock> {
        let _enter = self.span.enter();
        let session = self.session()?;
        let record = session
            .staging
            .download(session.store.as_ref(), SUPERBLOCK_KEY)?;
        Superblock::from_bytes(&record)
    }

    fn put_superblock(&self, superblock: &Superblock) -> Result<()> {
        let _enter = self.span.enter();
        let session = self.session()?;
        let record = superblock.to_bytes()?;
        session
            .staging
            .upload(session.store.as_ref(), SUPERBLOCK_KEY, &record)?;
        info!(
            pools = superblock.pools.len(),
            roots = superblock.root_inodes.len(),
            "Wrote superblock"
        );
        Ok(())
    }
}
