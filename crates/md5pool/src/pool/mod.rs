//! The caller-facing pool.
//!
//! [`Md5Pool`] is an explicit factory: construct one wherever it is needed
//! and clone it freely — there is no process-wide default instance. All
//! operations go through a command channel to the control actor, so the
//! facade itself holds no scheduling state.

pub(crate) mod channel;
pub(crate) mod scheduler;
pub(crate) mod worker;

pub use crate::arena::ArenaUsage;

use crate::config::{ArenaConfig, PoolConfig};
use crate::engine::DigestWidth;
use crate::error::{Error, Result};
use crate::source::ByteSource;
use crate::task::{BatchProgressFn, TaskHandle, TaskId, TaskOptions};
use core::time::Duration;
use futures::future::join_all;
use scheduler::{Command, Scheduler, TaskSpec};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

const COMMAND_QUEUE_DEPTH: usize = 64;
const EVENT_QUEUE_DEPTH: usize = 256;

/// Point-in-time pool state, from [`Md5Pool::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub total_workers: usize,
    pub idle_workers: usize,
    /// Tasks waiting for admission.
    pub queued: usize,
    /// Tasks currently dispatched to workers.
    pub dispatched: usize,
    pub max_concurrent: usize,
    pub arena_enabled: bool,
    /// Arena block accounting; `None` while the arena is disabled.
    pub arena: Option<ArenaUsage>,
}

struct PoolInner {
    commands: mpsc::Sender<Command>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

/// A bounded pool of hashing workers fed through a shared memory arena.
///
/// ```no_run
/// # async fn demo() -> md5pool::Result<()> {
/// use md5pool::{ByteSource, Md5Pool, PoolConfig, TaskOptions};
///
/// let pool = Md5Pool::new(PoolConfig::default())?;
/// let handle = pool
///     .submit(ByteSource::from(b"hello world".to_vec()), TaskOptions::default())
///     .await?;
/// let digest = handle.digest().await?;
/// # let _ = digest;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Md5Pool {
    inner: Arc<PoolInner>,
}

impl Md5Pool {
    /// Creates a pool and spawns its workers. Must be called from within a
    /// tokio runtime.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::new(config, event_tx, shutdown.clone());
        tokio::spawn(scheduler.run(command_rx, event_rx));
        Ok(Self {
            inner: Arc::new(PoolInner {
                commands: command_tx,
                next_id: AtomicU64::new(1),
                shutdown,
            }),
        })
    }

    /// Submits one hashing task.
    ///
    /// Always returns a handle; per-task faults (an unreadable file, a
    /// timeout, a worker failure) resolve the handle with a typed error
    /// rather than failing the submission. `Err` here means the pool itself
    /// is gone.
    pub async fn submit(&self, source: ByteSource, options: TaskOptions) -> Result<TaskHandle> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::PoolShutdown);
        }

        let id = TaskId::from_raw(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (done_tx, done_rx) = oneshot::channel();
        let handle = TaskHandle { id, rx: done_rx };

        let len = match source.len().await {
            Ok(len) => len,
            Err(e) => {
                let _ = done_tx.send(Err(e.into()));
                return Ok(handle);
            }
        };

        let spec = TaskSpec {
            id,
            source,
            len,
            width: options.width,
            priority: options.priority,
            timeout: options.effective_timeout(),
            progress: options.progress,
            done: done_tx,
        };
        if self
            .inner
            .commands
            .send(Command::Submit(spec))
            .await
            .is_err()
        {
            return Err(Error::PoolShutdown);
        }
        Ok(handle)
    }

    /// Hashes a batch, resolving to digests in input order regardless of
    /// internal completion order.
    ///
    /// Later items get a higher dispatch priority so a bounded pool drains
    /// the batch by urgency rather than strictly front-to-back; batch items
    /// carry no deadline. `progress` observes `(completed, total)` after
    /// each item resolves.
    pub async fn submit_batch(
        &self,
        sources: Vec<ByteSource>,
        width: DigestWidth,
        progress: Option<BatchProgressFn>,
    ) -> Result<Vec<String>> {
        let total = sources.len();
        let mut handles = Vec::with_capacity(total);
        for (index, source) in sources.into_iter().enumerate() {
            let options = TaskOptions {
                width,
                priority: index as i32,
                timeout: Some(Duration::ZERO),
                progress: None,
            };
            handles.push(self.submit(source, options).await?);
        }

        let completed = Arc::new(AtomicUsize::new(0));
        let results = join_all(handles.into_iter().map(|handle| {
            let completed = Arc::clone(&completed);
            let progress = progress.clone();
            async move {
                let result = handle.digest().await;
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(progress) = &progress {
                    progress(done, total);
                }
                result
            }
        }))
        .await;

        results.into_iter().collect()
    }

    /// Cancels a queued or dispatched task. Returns `false` if the id is
    /// not currently tracked. Cancellation does not preempt a worker
    /// already hashing; its eventual result for this id is discarded.
    pub async fn cancel(&self, id: TaskId) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .inner
            .commands
            .send(Command::Cancel { id, reply: reply_tx })
            .await
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Snapshot of worker, queue, and arena state.
    pub async fn status(&self) -> Result<PoolStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Status { reply: reply_tx })
            .await
            .map_err(|_| Error::PoolShutdown)?;
        reply_rx.await.map_err(|_| Error::PoolShutdown)
    }

    /// Enables (or resizes) the shared arena. Returns `false` if the sizing
    /// is unusable.
    ///
    /// All workers are recreated to pick up the new buffer, so every task
    /// dispatched at the moment of the call rejects with
    /// [`Error::PoolReconfigured`]; queued tasks are preserved. Avoid
    /// calling under active load.
    pub async fn enable_arena(&self, capacity: usize, chunk_size: usize) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = Command::EnableArena {
            config: ArenaConfig {
                capacity,
                chunk_size,
            },
            reply: reply_tx,
        };
        if self.inner.commands.send(command).await.is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Disables the shared arena; subsequent payloads travel inline. Same
    /// in-flight caveat as [`enable_arena`](Self::enable_arena).
    pub async fn disable_arena(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .inner
            .commands
            .send(Command::DisableArena { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    /// Tears the pool down: workers stop, queues clear, and every
    /// outstanding [`TaskHandle`] resolves to [`Error::PoolShutdown`].
    /// Best-effort teardown, not a graceful drain.
    pub async fn destroy(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .inner
            .commands
            .send(Command::Destroy { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}
