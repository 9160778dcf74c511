//! Block id allocation
//!
//! Every allocated block type owns an independent id space. Freed ids are
//! recycled oldest-first before the space grows; releasing the highest
//! issued id shrinks the space instead of queueing it.

use mtfs_common::{BlockType, Document, Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tracing::warn;

/// Id reserved for the root inode
pub const ROOT_INODE_ID: u64 = 0;

/// Persisted state of one id space
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorState {
    /// Next id handed out when no freed id is available
    pub next: u64,
    /// Released ids, oldest first
    pub frees: VecDeque<u64>,
}

impl AllocatorState {
    /// Fresh state starting at `first`
    #[must_use]
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: first,
            frees: VecDeque::new(),
        }
    }

    /// Check that every freed id was issued and is listed once
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.frees.len());
        for &id in &self.frees {
            if id >= self.next {
                return Err(Error::decode(format!(
                    "freed id {id} was never issued (next {})",
                    self.next
                )));
            }
            if !seen.insert(id) {
                return Err(Error::decode(format!("freed id {id} listed twice")));
            }
        }
        Ok(())
    }
}

/// In-memory id space; `members` mirrors `order` for constant-time lookups
#[derive(Debug)]
struct IdSpace {
    next: u64,
    order: VecDeque<u64>,
    members: HashSet<u64>,
}

impl IdSpace {
    fn is_allocated(&self, id: u64) -> bool {
        id < self.next && !self.members.contains(&id)
    }
}

/// Thread-safe allocator for one block type
#[derive(Debug)]
pub struct IdAllocator {
    space: Mutex<IdSpace>,
}

impl IdAllocator {
    /// Create an empty allocator whose first id is `first`
    #[must_use]
    pub fn new(first: u64) -> Self {
        Self::with_space(IdSpace {
            next: first,
            order: VecDeque::new(),
            members: HashSet::new(),
        })
    }

    /// Create an allocator from persisted state
    ///
    /// Fails with [`Error::Decode`] if the state could hand out an id twice.
    pub fn from_state(state: AllocatorState) -> Result<Self> {
        state.validate()?;
        let members = state.frees.iter().copied().collect();
        Ok(Self::with_space(IdSpace {
            next: state.next,
            order: state.frees,
            members,
        }))
    }

    fn with_space(space: IdSpace) -> Self {
        Self {
            space: Mutex::new(space),
        }
    }

    /// Allocate an id
    pub fn allocate(&self) -> u64 {
        let mut space = self.space.lock();
        if let Some(id) = space.order.pop_front() {
            space.members.remove(&id);
            return id;
        }
        let id = space.next;
        space.next += 1;
        id
    }

    /// Return an id to the allocator
    ///
    /// Releasing an id that is not currently allocated is a caller bug.
    pub fn release(&self, id: u64) {
        let mut space = self.space.lock();
        let allocated = space.is_allocated(id);
        debug_assert!(
            allocated,
            "released id {id} was not allocated (next {}, {} free)",
            space.next,
            space.order.len()
        );
        if !allocated {
            warn!(id, next = space.next, "Ignoring release of unallocated id");
            return;
        }

        if id + 1 == space.next {
            space.next = id;
        } else {
            space.order.push_back(id);
            space.members.insert(id);
        }
    }

    /// Check whether an id is currently handed out
    pub fn is_allocated(&self, id: u64) -> bool {
        self.space.lock().is_allocated(id)
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> AllocatorState {
        let space = self.space.lock();
        AllocatorState {
            next: space.next,
            frees: space.order.clone(),
        }
    }
}

/// Persisted state of all three id spaces, stored as `ids.json`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorSnapshot {
    pub inode: AllocatorState,
    pub directory: AllocatorState,
    pub data: AllocatorState,
}

impl Default for AllocatorSnapshot {
    fn default() -> Self {
        Self {
            inode: AllocatorState::starting_at(ROOT_INODE_ID + 1),
            directory: AllocatorState::starting_at(0),
            data: AllocatorState::starting_at(0),
        }
    }
}

impl Document for AllocatorSnapshot {}

/// The per-block-type allocators of one backend
#[derive(Debug)]
pub struct Allocators {
    inode: IdAllocator,
    directory: IdAllocator,
    data: IdAllocator,
}

impl Allocators {
    /// Allocators at their initial values
    #[must_use]
    pub fn new() -> Self {
        Self {
            inode: IdAllocator::new(ROOT_INODE_ID + 1),
            directory: IdAllocator::new(0),
            data: IdAllocator::new(0),
        }
    }

    /// Allocators restored from persisted state
    pub fn from_snapshot(snapshot: AllocatorSnapshot) -> Result<Self> {
        Ok(Self {
            inode: IdAllocator::from_state(snapshot.inode)?,
            directory: IdAllocator::from_state(snapshot.directory)?,
            data: IdAllocator::from_state(snapshot.data)?,
        })
    }

    /// Allocator for a block type
    pub fn get(&self, block_type: BlockType) -> Result<&IdAllocator> {
        match block_type {
            BlockType::Inode => Ok(&self.inode),
            BlockType::DirectoryBlock => Ok(&self.directory),
            BlockType::DataBlock => Ok(&self.data),
            BlockType::Superblock => Err(Error::UnsupportedBlockType(block_type)),
        }
    }

    /// State of every allocator
    pub fn snapshot(&self) -> AllocatorSnapshot {
        AllocatorSnapshot {
            inode: self.inode.snapshot(),
            directory: self.directory.snapshot(),
            data: self.data.snapshot(),
        }
    }
}

impl Default for Allocators {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashSet;

    #[test]
    fn test_allocate_sequential() {
        let alloc = IdAllocator::new(0);
        assert_eq!(alloc.allocate(), 0);
        assert_eq!(alloc.allocate(), 1);
        assert_eq!(alloc.allocate(), 2);
        assert!(alloc.is_allocated(1));
        assert!(!alloc.is_allocated(3));
    }

    #[test]
    fn test_reuse_before_growth() {
        let alloc = IdAllocator::new(0);
        for _ in 0..5 {
            alloc.allocate();
        }
        alloc.release(1);
        alloc.release(3);

        // Oldest release first, then growth resumes
        assert_eq!(alloc.allocate(), 1);
        assert_eq!(alloc.allocate(), 3);
        assert_eq!(alloc.allocate(), 5);
    }

    #[test]
    fn test_tail_release_collapses() {
        let alloc = IdAllocator::new(0);
        for _ in 0..3 {
            alloc.allocate();
        }
        alloc.release(2);

        let state = alloc.snapshot();
        assert_eq!(state.next, 2);
        assert!(state.frees.is_empty());
        assert_eq!(alloc.allocate(), 2);
    }

    #[test]
    fn test_tail_release_does_not_cascade() {
        let alloc = IdAllocator::new(0);
        for _ in 0..4 {
            alloc.allocate();
        }
        alloc.release(2);
        alloc.release(3);

        let state = alloc.snapshot();
        assert_eq!(state.next, 3);
        assert_eq!(state.frees, VecDeque::from([2]));
        assert_eq!(alloc.allocate(), 2);
        assert_eq!(alloc.allocate(), 3);
    }

    #[test]
    fn test_random_sequence_keeps_ids_unique() {
        let mut rng = rand::thread_rng();
        let alloc = IdAllocator::new(1);
        let mut live: Vec<u64> = Vec::new();

        for _ in 0..5_000 {
            if live.is_empty() || rng.gen_bool(0.6) {
                let id = alloc.allocate();
                assert!(id >= 1);
                assert!(!live.contains(&id), "id {id} issued twice");
                live.push(id);
            } else {
                let id = live.swap_remove(rng.gen_range(0..live.len()));
                alloc.release(id);
            }
        }

        for id in &live {
            assert!(alloc.is_allocated(*id));
        }
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let alloc = IdAllocator::new(0);
        let threads = 8;
        let per_thread = 1_000;

        let ids: Vec<u64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| s.spawn(|| (0..per_thread).map(|_| alloc.allocate()).collect::<Vec<_>>()))
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), threads * per_thread);
        assert_eq!(alloc.snapshot().next, (threads * per_thread) as u64);
    }

    #[test]
    fn test_concurrent_allocate_and_release() {
        let alloc = IdAllocator::new(0);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let mut mine = Vec::new();
                    for round in 0..500 {
                        mine.push(alloc.allocate());
                        if round % 3 == 0 {
                            alloc.release(mine.remove(0));
                        }
                    }
                    for id in &mine {
                        assert!(alloc.is_allocated(*id));
                    }
                });
            }
        });
    }

    #[test]
    fn test_initial_values() {
        let allocators = Allocators::new();
        assert_eq!(allocators.get(BlockType::Inode).unwrap().allocate(), 1);
        assert_eq!(allocators.get(BlockType::DirectoryBlock).unwrap().allocate(), 0);
        assert_eq!(allocators.get(BlockType::DataBlock).unwrap().allocate(), 0);
        assert!(matches!(
            allocators.get(BlockType::Superblock),
            Err(Error::UnsupportedBlockType(BlockType::Superblock))
        ));
    }

    #[test]
    fn test_snapshot_document() {
        let allocators = Allocators::new();
        let data = allocators.get(BlockType::DataBlock).unwrap();
        for _ in 0..4 {
            data.allocate();
        }
        data.release(1);

        let doc = allocators.snapshot().to_document().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&doc).unwrap();
        assert_eq!(value["inode"]["next"], 1);
        assert_eq!(value["data"]["next"], 4);
        assert_eq!(value["data"]["frees"], serde_json::json!([1]));

        let restored =
            Allocators::from_snapshot(AllocatorSnapshot::from_document(&doc).unwrap()).unwrap();
        assert_eq!(restored.snapshot(), allocators.snapshot());
        assert_eq!(restored.get(BlockType::DataBlock).unwrap().allocate(), 1);
    }

    #[test]
    fn test_large_free_list() {
        let alloc = IdAllocator::new(0);
        let count = 50_000;
        for _ in 0..count {
            alloc.allocate();
        }
        for id in (0..count - 1).step_by(2) {
            alloc.release(id);
        }

        let state = alloc.snapshot();
        assert_eq!(state.next, count);
        assert_eq!(state.frees.len() as u64, count / 2);
        assert!(!alloc.is_allocated(0));
        assert!(alloc.is_allocated(1));

        for expected in (0..count - 1).step_by(2) {
            assert_eq!(alloc.allocate(), expected);
            assert!(alloc.is_allocated(expected));
        }
        assert!(alloc.snapshot().frees.is_empty());
        assert_eq!(alloc.allocate(), count);
    }

    #[test]
    fn test_inconsistent_state_rejected() {
        let beyond = AllocatorState {
            next: 4,
            frees: VecDeque::from([1, 4]),
        };
        let twice = AllocatorState {
            next: 4,
            frees: VecDeque::from([2, 1, 2]),
        };
        for state in [beyond, twice] {
            let err = IdAllocator::from_state(state).unwrap_err();
            assert_eq!(err.kind(), mtfs_common::ErrorKind::Decode);
        }

        let mut snapshot = AllocatorSnapshot::default();
        snapshot.data.frees.push_back(0);
        assert!(Allocators::from_snapshot(snapshot).is_err());

        let restored = IdAllocator::from_state(AllocatorState {
            next: 4,
            frees: VecDeque::from([2, 0]),
        })
        .unwrap();
        assert!(!restored.is_allocated(0));
        assert!(restored.is_allocated(1));
        assert_eq!(restored.allocate(), 2);
    }
}
