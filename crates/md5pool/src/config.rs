//! Pool configuration.

use crate::error::{Error, Result};

/// Shared-arena sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Total capacity of the shared buffer in bytes.
    pub capacity: usize,
    /// Chunk size for streaming transfers; inputs larger than this stream.
    pub chunk_size: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            capacity: 16 * 1024 * 1024,
            chunk_size: 1024 * 1024,
        }
    }
}

impl ArenaConfig {
    pub(crate) fn validate(&self) -> bool {
        self.capacity > 0 && self.chunk_size > 0 && self.chunk_size <= self.capacity
    }
}

/// Configuration for [`Md5Pool`](crate::Md5Pool).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker tasks. Defaults to the number of CPUs.
    pub workers: usize,
    /// Ceiling on simultaneously dispatched tasks, independent of the
    /// worker count. Defaults to the worker count.
    pub max_concurrent: usize,
    /// Shared arena sizing; `None` disables the arena and every payload
    /// travels inline.
    pub arena: Option<ArenaConfig>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            workers,
            max_concurrent: workers,
            arena: Some(ArenaConfig::default()),
        }
    }
}

impl PoolConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig {
                reason: "worker count must be greater than 0".into(),
            });
        }
        if self.max_concurrent == 0 {
            return Err(Error::InvalidConfig {
                reason: "max_concurrent must be greater than 0".into(),
            });
        }
        if let Some(arena) = &self.arena {
            if !arena.validate() {
                return Err(Error::InvalidConfig {
                    reason: format!(
                        "arena capacity {} and chunk size {} are inconsistent",
                        arena.capacity, arena.chunk_size
                    ),
                });
            }
        }
        Ok(())
    }
}
