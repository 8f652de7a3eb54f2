//! Error types for the hashing pool.
//!
//! This module defines the central `Error` enum, which captures every
//! caller-visible failure of the pool. Internal recoverable faults (an
//! exhausted arena, a fragmented block list) never appear here: the arena
//! reports exhaustion with a sentinel and every call site has an inline
//! fallback, so those conditions are handled locally.
//!
//! ## Error cases
//! - `WorkerFailure`: a worker task died; every task pending on it fails.
//! - `Timeout`: the task's deadline expired while it was in flight.
//! - `Cancelled`: the caller cancelled the task.
//! - `InvalidState`: a protocol error, e.g. a chunk for an unknown stream
//!   session.
//! - `PoolReconfigured`: the arena was enabled/disabled while the task was
//!   dispatched.
//! - `PoolShutdown`: the pool was destroyed before the task resolved.
//! - `Channel`: an internal send/receive failure between tasks.
//! - `Io`: the byte source could not be read.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the hashing pool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A worker execution unit terminated abnormally.
    #[error("worker {worker} failed: {context}")]
    WorkerFailure { worker: usize, context: String },

    /// The task's deadline expired before a result arrived.
    #[error("task deadline exceeded")]
    Timeout,

    /// The task was cancelled by the caller.
    #[error("task cancelled")]
    Cancelled,

    /// A protocol invariant was violated (e.g. chunk for a closed session).
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    /// The arena was reconfigured while this task was in flight.
    #[error("pool reconfigured while task was in flight")]
    PoolReconfigured,

    /// The pool was destroyed, or the task outlived it.
    #[error("pool is shut down")]
    PoolShutdown,

    /// Internal channel send/receive failure (e.g. closed channel).
    #[error("channel error: {context}")]
    Channel { context: String },

    /// The configuration was rejected at construction.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Reading the byte source failed.
    #[error("byte source I/O error: {0}")]
    Io(#[from] std::io::Error),
}
