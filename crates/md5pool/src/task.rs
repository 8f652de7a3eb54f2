//! Task identity, submission options, and the message contracts between the
//! scheduler and its workers.

use crate::engine::DigestWidth;
use crate::error::{Error, Result};
use bytes::Bytes;
use core::fmt;
use core::time::Duration;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Opaque token identifying one submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Per-task progress callback, invoked with a 0..=100 percentage.
///
/// Called on the pool's control task; keep it fast.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Batch progress callback, invoked with `(completed, total)` counts.
pub type BatchProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Options accepted by [`Md5Pool::submit`](crate::Md5Pool::submit).
#[derive(Clone, Default)]
pub struct TaskOptions {
    /// Rendered digest width.
    pub width: DigestWidth,
    /// Dispatch priority; numerically higher runs sooner, ties drain in
    /// submission order.
    pub priority: i32,
    /// Deadline measured from dispatch. `None` applies
    /// [`DEFAULT_TIMEOUT`]; [`Duration::ZERO`] means no deadline at all.
    pub timeout: Option<Duration>,
    /// Optional progress sink; only streaming tasks report progress.
    pub progress: Option<ProgressFn>,
}

/// Deadline applied when [`TaskOptions::timeout`] is left unset.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

impl TaskOptions {
    pub(crate) fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }
}

/// Pending result of one submitted task.
///
/// Keep the handle to [`digest`](Self::digest) the result; the task keeps
/// running if the handle is dropped.
#[derive(Debug)]
pub struct TaskHandle {
    pub(crate) id: TaskId,
    pub(crate) rx: oneshot::Receiver<Result<String>>,
}

impl TaskHandle {
    /// The task's id, usable with [`Md5Pool::cancel`](crate::Md5Pool::cancel).
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Waits for the task's terminal state: the rendered digest or a typed
    /// error. Resolves to [`Error::PoolShutdown`] if the pool is destroyed
    /// first.
    pub async fn digest(self) -> Result<String> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::PoolShutdown),
        }
    }
}

/// Payload of a one-shot calculate message: exactly one variant is
/// populated.
#[derive(Debug, Clone)]
pub(crate) enum Payload {
    /// Bytes carried in the message itself (arena disabled or exhausted).
    Inline(Bytes),
    /// A region of the shared arena buffer.
    Arena { offset: usize, len: usize },
}

/// How a calculate message is to be processed.
#[derive(Debug)]
pub(crate) enum CalculateMode {
    /// Hash the payload and reply with the digest.
    OneShot(Payload),
    /// Open an incremental session; `total_chunks` chunk messages follow.
    Stream { total_chunks: u32 },
}

/// A message sent from the scheduler (or a transfer task) to one worker.
///
/// Requests are consumed in order by the worker's event loop; per-worker
/// ordering is what lets a stream's chunks arrive after its session-opening
/// calculate without extra handshakes.
#[derive(Debug)]
pub(crate) enum WorkRequest {
    /// Hash one task's input, either whole or as the start of a stream.
    Calculate {
        id: TaskId,
        width: DigestWidth,
        mode: CalculateMode,
    },
    /// Feed one chunk of an open stream session from the arena.
    CalculateChunk {
        id: TaskId,
        index: u32,
        offset: usize,
        len: usize,
    },
    /// Drop an open stream session without producing a digest.
    CancelStream { id: TaskId },
    /// Stop the worker loop; `ack` confirms the worker drained.
    Shutdown { ack: oneshot::Sender<()> },
}

/// A message sent from a worker back to the scheduler.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    /// Terminal success for a task.
    Completed {
        worker: usize,
        id: TaskId,
        digest: String,
    },
    /// Terminal failure for a task.
    Failed {
        worker: usize,
        id: TaskId,
        error: Error,
    },
    /// One stream chunk was folded into the session; `pct` reaches 100
    /// exactly on the finalizing chunk.
    ChunkDone {
        worker: usize,
        id: TaskId,
        index: u32,
        pct: u8,
    },
    /// The worker task terminated abnormally (panic).
    Crashed { worker: usize },
}

/// Everything the scheduler's event loop reacts to besides commands.
#[derive(Debug)]
pub(crate) enum Event {
    Worker(WorkerEvent),
    /// A dispatched task's deadline fired. Stale ids are ignored.
    Deadline(TaskId),
    /// A transfer task failed before the worker could produce a result.
    TransferFailed { id: TaskId, error: Error },
}
