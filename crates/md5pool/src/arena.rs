//! Fixed-capacity shared memory arena.
//!
//! The arena lends sized regions of one pre-allocated buffer to tasks. The
//! block list is a contiguous, offset-ordered partition of the capacity:
//! every byte belongs to exactly one block, adjacent blocks touch, and no
//! two blocks overlap. Allocation is first-fit with a split; release merges
//! adjacent free blocks in a single left-to-right pass.
//!
//! The block list is only ever mutated by the scheduler task (single
//! writer). The buffer itself is shared with workers through a read-write
//! lock: the transfer side writes a region before the owning task's message
//! is sent, the worker reads it after, and the allocator guarantees a region
//! is never handed to a second live task. The lock is never held across an
//! await point.

use crate::task::TaskId;
use parking_lot::RwLock;
use std::sync::Arc;

/// Handle to the arena's backing buffer, shared with worker tasks.
pub(crate) type SharedBuf = Arc<RwLock<Box<[u8]>>>;

/// Usage ratio above which the arena logs a pressure warning.
const HIGH_WATER: f64 = 0.9;

/// One region of the arena.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MemoryBlock {
    offset: usize,
    size: usize,
    in_use: bool,
    owner: Option<TaskId>,
}

/// Point-in-time arena usage, surfaced through pool status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaUsage {
    /// Total buffer capacity in bytes.
    pub capacity: usize,
    /// Bytes currently lent out.
    pub used: usize,
    /// Bytes currently free.
    pub free: usize,
    /// Number of disjoint free regions; more than one means fragmentation.
    pub fragments: usize,
}

pub(crate) struct Arena {
    buf: SharedBuf,
    blocks: Vec<MemoryBlock>,
    capacity: usize,
    chunk_size: usize,
}

impl Arena {
    pub(crate) fn new(capacity: usize, chunk_size: usize) -> Self {
        Self {
            buf: Arc::new(RwLock::new(vec![0u8; capacity].into_boxed_slice())),
            blocks: vec![MemoryBlock {
                offset: 0,
                size: capacity,
                in_use: false,
                owner: None,
            }],
            capacity,
            chunk_size,
        }
    }

    pub(crate) fn shared(&self) -> SharedBuf {
        Arc::clone(&self.buf)
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Lends `size` bytes to `owner`, returning the region offset.
    ///
    /// First free block large enough wins; a strictly larger block is split
    /// so the in-use block is exactly `size`. Returns `None` if no block
    /// fits even after a defragmentation pass — callers fall back to inline
    /// byte transfer, never fail the task.
    pub(crate) fn allocate(&mut self, size: usize, owner: TaskId) -> Option<usize> {
        debug_assert!(size > 0, "zero-sized regions are never allocated");
        if let Some(offset) = self.try_allocate(size, owner) {
            self.observe_pressure();
            return Some(offset);
        }
        self.defragment();
        let offset = self.try_allocate(size, owner);
        if offset.is_some() {
            self.observe_pressure();
        }
        offset
    }

    fn try_allocate(&mut self, size: usize, owner: TaskId) -> Option<usize> {
        let idx = self
            .blocks
            .iter()
            .position(|b| !b.in_use && b.size >= size)?;
        let offset = self.blocks[idx].offset;
        let remainder = self.blocks[idx].size - size;
        self.blocks[idx].size = size;
        self.blocks[idx].in_use = true;
        self.blocks[idx].owner = Some(owner);
        if remainder > 0 {
            self.blocks.insert(
                idx + 1,
                MemoryBlock {
                    offset: offset + size,
                    size: remainder,
                    in_use: false,
                    owner: None,
                },
            );
        }
        Some(offset)
    }

    /// Frees every block owned by `owner` and merges adjacent free blocks.
    ///
    /// A no-op for owners holding nothing, so terminal transitions can call
    /// it unconditionally.
    pub(crate) fn release(&mut self, owner: TaskId) {
        let mut released = false;
        for block in &mut self.blocks {
            if block.owner == Some(owner) {
                block.in_use = false;
                block.owner = None;
                released = true;
            }
        }
        if released {
            self.defragment();
        }
    }

    /// Merges every pair of adjacent free blocks.
    ///
    /// One left-to-right pass reaches a fixed point: a merge only ever grows
    /// the block already visited, so nothing to its left can become
    /// mergeable afterwards.
    pub(crate) fn defragment(&mut self) {
        let mut i = 0;
        while i + 1 < self.blocks.len() {
            if !self.blocks[i].in_use && !self.blocks[i + 1].in_use {
                self.blocks[i].size += self.blocks[i + 1].size;
                self.blocks.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }

    /// Copies `data` into the region starting at `offset`.
    pub(crate) fn write(&self, offset: usize, data: &[u8]) {
        let mut guard = self.buf.write();
        guard[offset..offset + data.len()].copy_from_slice(data);
    }

    pub(crate) fn usage(&self) -> ArenaUsage {
        let used: usize = self.blocks.iter().filter(|b| b.in_use).map(|b| b.size).sum();
        ArenaUsage {
            capacity: self.capacity,
            used,
            free: self.capacity - used,
            fragments: self.blocks.iter().filter(|b| !b.in_use).count(),
        }
    }

    fn observe_pressure(&self) {
        let usage = self.usage();
        let ratio = usage.used as f64 / usage.capacity.max(1) as f64;
        if ratio > HIGH_WATER {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                used = usage.used,
                capacity = usage.capacity,
                fragments = usage.fragments,
                "arena usage above high-water mark"
            );
        }
    }
}
