//! # md5pool
//!
//! A bounded-concurrency MD5 hashing pool. Callers submit in-memory buffers
//! or files and receive lowercase-hex digests; a fixed set of worker tasks
//! does the hashing, and a fixed-capacity shared arena moves payload bytes
//! between the control task and the workers without per-task heap churn.
//!
//! ## Shape
//!
//! - One control actor owns all scheduling state: the priority-ordered
//!   pending queue, the dispatched set (bounded by a concurrency ceiling
//!   independent of the worker count), the idle-worker list, and the arena
//!   block list.
//! - Workers are isolated tokio tasks, reachable only over per-worker
//!   bounded channels. Inputs larger than the configured chunk size stream
//!   through a single reused arena region with incremental hash state on
//!   the worker side; everything else travels whole, through the arena when
//!   a region is available and inline when it is not.
//! - Cancellation and timeouts are control-side decisions: the task
//!   resolves immediately and any late worker message for it is discarded.
//!
//! The pool remains usable after any single-task failure; a crashed worker
//! is replaced in its slot and only the tasks pending on it are rejected.

mod arena;
mod config;
mod engine;
mod error;
mod pool;
mod source;
mod streaming;
mod task;

pub use config::{ArenaConfig, PoolConfig};
pub use engine::{DigestWidth, digest_oneshot};
pub use error::{Error, Result};
pub use pool::{ArenaUsage, Md5Pool, PoolStatus};
pub use source::ByteSource;
pub use task::{
    BatchProgressFn, DEFAULT_TIMEOUT, ProgressFn, TaskHandle, TaskId, TaskOptions,
};
