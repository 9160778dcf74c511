//! MTFS Storage - Block persistence through pluggable backends
//!
//! This crate implements:
//! - Per block type id allocation with recycling
//! - The storage backend contract and its registry
//! - An object-store backend with stage, transfer and cleanup
//! - Local-directory and in-memory object stores

pub mod allocator;
pub mod backend;
pub mod object_backend;
pub mod object_store;
pub mod registry;
pub mod staging;

// Re-exports
pub use allocator::{AllocatorSnapshot, AllocatorState, Allocators, IdAllocator, ROOT_INODE_ID};
pub use backend::{Payload, StorageBackend};
pub use object_backend::{BACKEND_NAME, ObjectStoreBackend};
pub use object_store::{
    LocalConnector, LocalObjectStore, MemoryConnector, MemoryObjectStore, ObjectStore,
    ObjectStoreConnector,
};
pub use registry::{BackendConstructor, BackendRegistry, PluginInfo};
pub use staging::{IDS_KEY, SUPERBLOCK_KEY, StagingArea, object_key};
