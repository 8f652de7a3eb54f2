//! The control actor: the single authority for "what runs next".
//!
//! The scheduler owns every piece of mutable pool state — the pending
//! queue, the active set, the idle worker list, and the arena block list —
//! and is driven by two ordered streams: caller commands and worker/timer
//! events. All admission decisions funnel through [`Scheduler::pump`],
//! invoked from every state-change site, so the concurrency ceiling holds
//! no matter which transition fired. All terminal transitions funnel
//! through [`Scheduler::complete`], which enforces the exactly-once
//! contract by removing the task's completion record.
//!
//! Per task, the state machine is `Queued → Dispatched → (Completed |
//! Failed | Cancelled | TimedOut)`, plus `Queued → Cancelled`. Events
//! carrying an id the scheduler no longer tracks — a cancelled task's late
//! result, a stale deadline — are discarded silently.

use crate::arena::Arena;
use crate::config::{ArenaConfig, PoolConfig};
use crate::engine::DigestWidth;
use crate::error::{Error, Result};
use crate::pool::PoolStatus;
use crate::pool::channel::WorkerChannel;
use crate::source::ByteSource;
use crate::streaming::{self, StreamJob};
use crate::task::{
    CalculateMode, Event, Payload, ProgressFn, TaskId, WorkRequest, WorkerEvent,
};
use core::time::Duration;
use std::collections::{BinaryHeap, HashMap};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// A caller-facing operation, sent by the pool facade.
pub(crate) enum Command {
    Submit(TaskSpec),
    Cancel {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<PoolStatus>,
    },
    EnableArena {
        config: ArenaConfig,
        reply: oneshot::Sender<bool>,
    },
    DisableArena {
        reply: oneshot::Sender<()>,
    },
    Destroy {
        reply: oneshot::Sender<()>,
    },
}

/// One submission, carried from the facade to the scheduler.
pub(crate) struct TaskSpec {
    pub id: TaskId,
    pub source: ByteSource,
    pub len: u64,
    pub width: DigestWidth,
    pub priority: i32,
    pub timeout: Duration,
    pub progress: Option<ProgressFn>,
    pub done: oneshot::Sender<Result<String>>,
}

/// Queue key: highest priority first, submission order within a tier.
#[derive(PartialEq, Eq)]
struct QueuedKey {
    priority: i32,
    seq: u64,
    id: TaskId,
}

impl Ord for QueuedKey {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedKey {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Bookkeeping for one dispatched task.
struct ActiveTask {
    worker: usize,
    done: oneshot::Sender<Result<String>>,
    progress: Option<ProgressFn>,
    streaming: bool,
    /// Feeds chunk acknowledgements to the task's stream transfer; dropped
    /// on terminal transition, which stops the transfer.
    acks: Option<mpsc::Sender<u32>>,
}

enum Flow {
    Continue,
    Stop,
}

pub(crate) struct Scheduler {
    config: PoolConfig,
    workers: Vec<WorkerChannel>,
    idle: Vec<usize>,
    pending: BinaryHeap<QueuedKey>,
    queued: HashMap<TaskId, TaskSpec>,
    active: HashMap<TaskId, ActiveTask>,
    arena: Option<Arena>,
    events_tx: mpsc::Sender<Event>,
    shutdown: CancellationToken,
    seq: u64,
}

impl Scheduler {
    pub(crate) fn new(
        config: PoolConfig,
        events_tx: mpsc::Sender<Event>,
        shutdown: CancellationToken,
    ) -> Self {
        let arena = config
            .arena
            .map(|a| Arena::new(a.capacity, a.chunk_size));
        let shared = arena.as_ref().map(Arena::shared);
        let workers: Vec<_> = (0..config.workers)
            .map(|slot| WorkerChannel::spawn(slot, events_tx.clone(), shared.clone()))
            .collect();
        let idle = (0..config.workers).collect();
        Self {
            config,
            workers,
            idle,
            pending: BinaryHeap::new(),
            queued: HashMap::new(),
            active: HashMap::new(),
            arena,
            events_tx,
            shutdown,
            seq: 0,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<Event>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Flow::Stop = self.handle_command(command) {
                            break;
                        }
                    }
                    // Every facade clone is gone; tear down.
                    None => break,
                },
                event = events.recv() => {
                    if let Some(event) = event {
                        self.handle_event(event);
                    }
                }
            }
        }
        self.teardown().await;
    }

    fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Submit(spec) => {
                self.seq += 1;
                self.pending.push(QueuedKey {
                    priority: spec.priority,
                    seq: self.seq,
                    id: spec.id,
                });
                self.queued.insert(spec.id, spec);
                self.pump();
            }
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(id));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::EnableArena { config, reply } => {
                let _ = reply.send(self.reconfigure(Some(config)));
            }
            Command::DisableArena { reply } => {
                self.reconfigure(None);
                let _ = reply.send(());
            }
            Command::Destroy { reply } => {
                #[cfg(feature = "tracing")]
                tracing::info!("pool destroy requested");
                // Best-effort teardown: queued and dispatched completion
                // records are dropped, so outstanding handles observe a
                // shutdown error rather than a graceful drain.
                self.pending.clear();
                self.queued.clear();
                self.active.clear();
                let _ = reply.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Worker(WorkerEvent::Completed { id, digest, .. }) => {
                self.complete(id, Ok(digest));
                self.pump();
            }
            Event::Worker(WorkerEvent::Failed { id, error, .. }) => {
                self.complete(id, Err(error));
                self.pump();
            }
            Event::Worker(WorkerEvent::ChunkDone { id, index, pct, .. }) => {
                if let Some(task) = self.active.get(&id) {
                    if let Some(acks) = &task.acks {
                        let _ = acks.try_send(index);
                    }
                    if let Some(progress) = &task.progress {
                        progress(pct);
                    }
                }
            }
            Event::Worker(WorkerEvent::Crashed { worker }) => {
                self.handle_crash(worker);
                self.pump();
            }
            Event::Deadline(id) => {
                if self.active.contains_key(&id) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%id, "task deadline expired");
                    self.complete(id, Err(Error::Timeout));
                    self.pump();
                }
            }
            Event::TransferFailed { id, error } => {
                self.complete(id, Err(error));
                self.pump();
            }
        }
    }

    /// The one admission point: dispatches pending tasks while both the
    /// concurrency ceiling and the idle-worker requirement allow it.
    fn pump(&mut self) {
        while self.active.len() < self.config.max_concurrent && !self.idle.is_empty() {
            let Some(spec) = self.pop_next() else { break };
            let worker = self.idle.pop().expect("idle checked in loop condition");
            self.dispatch(spec, worker);
        }
    }

    /// Pops the highest-priority queued task, skipping keys whose task was
    /// cancelled while queued.
    fn pop_next(&mut self) -> Option<TaskSpec> {
        while let Some(key) = self.pending.pop() {
            if let Some(spec) = self.queued.remove(&key.id) {
                return Some(spec);
            }
        }
        None
    }

    fn dispatch(&mut self, spec: TaskSpec, worker: usize) {
        let TaskSpec {
            id,
            source,
            len,
            width,
            priority: _,
            timeout,
            progress,
            done,
        } = spec;

        #[cfg(feature = "tracing")]
        tracing::trace!(%id, worker, len, "dispatching task");

        if timeout > Duration::ZERO {
            let events = self.events_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = events.send(Event::Deadline(id)).await;
            });
        }

        let chunk_size = self.arena.as_ref().map(Arena::chunk_size);
        let wants_streaming = matches!(chunk_size, Some(chunk) if len > chunk as u64);

        if wants_streaming {
            let chunk = chunk_size.expect("streaming implies arena");
            let region = self
                .arena
                .as_mut()
                .and_then(|arena| arena.allocate(chunk, id));
            if let Some(offset) = region {
                let arena = self.arena.as_ref().expect("region came from the arena");
                let (ack_tx, ack_rx) = mpsc::channel(2);
                self.active.insert(
                    id,
                    ActiveTask {
                        worker,
                        done,
                        progress,
                        streaming: true,
                        acks: Some(ack_tx),
                    },
                );
                tokio::spawn(streaming::stream_transfer(StreamJob {
                    id,
                    width,
                    source,
                    len,
                    chunk_size: chunk,
                    arena_offset: offset,
                    shared: arena.shared(),
                    worker_tx: self.workers[worker].sender(),
                    acks: ack_rx,
                    events: self.events_tx.clone(),
                }));
                return;
            }
            // Arena exhausted: degrade to a whole-buffer inline transfer.
            #[cfg(feature = "tracing")]
            tracing::debug!(%id, "arena exhausted, falling back to inline transfer");
        }

        self.active.insert(
            id,
            ActiveTask {
                worker,
                done,
                progress,
                streaming: false,
                acks: None,
            },
        );

        // Whole-input path. Prefer an arena region when one fits; inline
        // bytes otherwise. Empty inputs skip the arena (zero-sized regions
        // do not exist) and hash inline.
        let region = if !wants_streaming && len > 0 {
            self.arena
                .as_mut()
                .and_then(|arena| arena.allocate(len as usize, id))
        } else {
            None
        };
        if let Some(offset) = region {
            let arena = self.arena.as_ref().expect("region came from the arena");
            match source {
                ByteSource::Memory(data) => {
                    arena.write(offset, &data);
                    let request = WorkRequest::Calculate {
                        id,
                        width,
                        mode: CalculateMode::OneShot(Payload::Arena {
                            offset,
                            len: data.len(),
                        }),
                    };
                    if let Err(_e) = self.workers[worker].try_dispatch(request) {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(%id, worker, "dispatch failed: {_e}");
                        self.complete(id, Err(worker_failure(worker)));
                    }
                }
                source @ ByteSource::File(_) => {
                    tokio::spawn(streaming::arena_transfer(
                        id,
                        width,
                        source,
                        offset,
                        len as usize,
                        arena.shared(),
                        self.workers[worker].sender(),
                        self.events_tx.clone(),
                    ));
                }
            }
            return;
        }

        match source {
            ByteSource::Memory(data) => {
                let request = WorkRequest::Calculate {
                    id,
                    width,
                    mode: CalculateMode::OneShot(Payload::Inline(data)),
                };
                if let Err(_e) = self.workers[worker].try_dispatch(request) {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%id, worker, "dispatch failed: {_e}");
                    self.complete(id, Err(worker_failure(worker)));
                }
            }
            source @ ByteSource::File(_) => {
                tokio::spawn(streaming::inline_transfer(
                    id,
                    width,
                    source,
                    self.workers[worker].sender(),
                    self.events_tx.clone(),
                ));
            }
        }
    }

    /// The one terminal-transition point: resolves the completion record
    /// exactly once, releases the task's arena regions, and frees its
    /// worker. Unknown ids are stale and ignored.
    fn complete(&mut self, id: TaskId, result: Result<String>) {
        let Some(task) = self.active.remove(&id) else {
            #[cfg(feature = "tracing")]
            tracing::trace!(%id, "discarding event for untracked task");
            return;
        };
        if let Some(arena) = &mut self.arena {
            arena.release(id);
        }
        if task.streaming && result.is_err() {
            // The worker may still hold the session; tell it to drop the
            // state. Unknown ids are ignored on the worker side too.
            self.workers[task.worker].cancel_stream(id);
        }
        self.idle.push(task.worker);
        let _ = task.done.send(result);
    }

    /// Cancels a task in either the queued or the dispatched state.
    fn cancel(&mut self, id: TaskId) -> bool {
        if let Some(spec) = self.queued.remove(&id) {
            // The heap key becomes a tombstone that pop_next skips.
            let _ = spec.done.send(Err(Error::Cancelled));
            return true;
        }
        if self.active.contains_key(&id) {
            self.complete(id, Err(Error::Cancelled));
            self.pump();
            return true;
        }
        false
    }

    /// Rejects every dispatched task on a crashed worker, releases their
    /// arena regions, and replaces the worker in the same slot.
    fn handle_crash(&mut self, worker: usize) {
        #[cfg(feature = "tracing")]
        tracing::error!(worker, "worker crashed, replacing");
        let victims: Vec<TaskId> = self
            .active
            .iter()
            .filter(|(_, task)| task.worker == worker)
            .map(|(id, _)| *id)
            .collect();
        for id in victims {
            self.complete(id, Err(worker_failure(worker)));
        }
        let shared = self.arena.as_ref().map(Arena::shared);
        self.workers[worker].respawn(self.events_tx.clone(), shared);
        // The replacement starts idle; complete() already returned the slot
        // for each rejected task, and an idle crash leaves the slot where
        // it was.
        if !self.idle.contains(&worker) {
            self.idle.push(worker);
        }
    }

    /// Applies an arena change, rejecting every dispatched task and
    /// recreating all workers so they see the new shared buffer. Queued
    /// tasks survive and re-dispatch under the new configuration.
    fn reconfigure(&mut self, config: Option<ArenaConfig>) -> bool {
        if let Some(config) = &config {
            if !config.validate() {
                return false;
            }
        }

        let dispatched: Vec<TaskId> = self.active.keys().copied().collect();
        for id in dispatched {
            self.complete(id, Err(Error::PoolReconfigured));
        }

        self.arena = config.map(|a| Arena::new(a.capacity, a.chunk_size));
        self.config.arena = config;

        let shared = self.arena.as_ref().map(Arena::shared);
        for worker in &mut self.workers {
            worker.respawn(self.events_tx.clone(), shared.clone());
        }
        self.idle = (0..self.workers.len()).collect();
        self.pump();
        true
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            total_workers: self.workers.len(),
            idle_workers: self.idle.len(),
            queued: self.queued.len(),
            dispatched: self.active.len(),
            max_concurrent: self.config.max_concurrent,
            arena_enabled: self.arena.is_some(),
            arena: self.arena.as_ref().map(Arena::usage),
        }
    }

    async fn teardown(&mut self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("notifying all workers to shut down");
        for worker in &self.workers {
            worker.shutdown().await;
        }
        self.shutdown.cancel();
        #[cfg(feature = "tracing")]
        tracing::info!("pool shut down");
    }
}

fn worker_failure(worker: usize) -> Error {
    Error::WorkerFailure {
        worker,
        context: "worker terminated abnormally".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::QueuedKey;
    use crate::task::TaskId;
    use std::collections::BinaryHeap;

    fn key(priority: i32, seq: u64) -> QueuedKey {
        QueuedKey {
            priority,
            seq,
            id: TaskId::from_raw(seq),
        }
    }

    #[test]
    fn queue_orders_by_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        heap.push(key(0, 1));
        heap.push(key(5, 2));
        heap.push(key(5, 3));
        heap.push(key(-1, 4));
        heap.push(key(0, 5));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop()).map(|k| k.seq).collect();
        // Highest priority first; equal tiers drain in submission order.
        assert_eq!(order, vec![2, 3, 1, 5, 4]);
    }
}
