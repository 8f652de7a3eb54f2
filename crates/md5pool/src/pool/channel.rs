//! Per-worker channel ownership.
//!
//! A [`WorkerChannel`] owns exactly one worker slot: the bounded request
//! sender, the spawned worker task, and a watcher that converts an abnormal
//! worker termination (a panic) into a crash event for the scheduler. A
//! crashed or reconfigured slot is replaced in place with a fresh channel
//! and worker; the slot index never changes.

use crate::arena::SharedBuf;
use crate::error::Error;
use crate::pool::worker::worker_loop;
use crate::task::{Event, TaskId, WorkRequest, WorkerEvent};
use core::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Depth of a worker's request queue. One task is in flight per worker at a
/// time; the headroom absorbs a queued chunk message plus a best-effort
/// stream cancel without ever blocking the control task.
const REQUEST_QUEUE_DEPTH: usize = 4;

/// How long teardown waits for each worker's shutdown acknowledgement.
const SHUTDOWN_ACK_TIMEOUT: Duration = Duration::from_secs(3);

pub(crate) struct WorkerChannel {
    slot: usize,
    tx: mpsc::Sender<WorkRequest>,
    watcher: JoinHandle<()>,
}

impl WorkerChannel {
    /// Spawns a worker into `slot` and returns its owning channel.
    pub(crate) fn spawn(slot: usize, events: mpsc::Sender<Event>, shared: Option<SharedBuf>) -> Self {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let handle = tokio::spawn(worker_loop(slot, rx, shared, events.clone()));
        let watcher = tokio::spawn(watch(slot, handle, events));
        Self { slot, tx, watcher }
    }

    /// Replaces this slot's worker with a freshly constructed one.
    ///
    /// Dropping the old sender closes the old worker's channel, so a
    /// still-running predecessor drains and exits on its own; a panicked
    /// one is already gone.
    pub(crate) fn respawn(&mut self, events: mpsc::Sender<Event>, shared: Option<SharedBuf>) {
        #[cfg(feature = "tracing")]
        tracing::debug!("respawning worker {}", self.slot);
        *self = Self::spawn(self.slot, events, shared);
    }

    /// A cloned sender for transfer tasks that feed this worker directly.
    pub(crate) fn sender(&self) -> mpsc::Sender<WorkRequest> {
        self.tx.clone()
    }

    /// Sends a request without waiting. The queue is sized so a full queue
    /// or a closed channel both mean the worker is gone.
    pub(crate) fn try_dispatch(&self, request: WorkRequest) -> Result<(), Error> {
        self.tx.try_send(request).map_err(|_| Error::Channel {
            context: format!("worker {} channel closed or full", self.slot),
        })
    }

    /// Best-effort stream cancel; failures are ignored because the worker
    /// discards unknown session ids anyway.
    pub(crate) fn cancel_stream(&self, id: TaskId) {
        let _ = self.tx.try_send(WorkRequest::CancelStream { id });
    }

    /// Asks the worker to drain and stop, waiting briefly for the
    /// acknowledgement.
    pub(crate) async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .tx
            .send(WorkRequest::Shutdown { ack: ack_tx })
            .await
            .is_err()
        {
            #[cfg(feature = "tracing")]
            tracing::debug!("worker {} already gone at shutdown", self.slot);
            return;
        }
        match timeout(SHUTDOWN_ACK_TIMEOUT, ack_rx).await {
            Ok(Ok(())) => {
                #[cfg(feature = "tracing")]
                tracing::trace!("worker {} shutdown acknowledged", self.slot);
            }
            Ok(Err(_e)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("worker {} dropped shutdown ack: {_e}", self.slot);
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("worker {} shutdown timed out", self.slot);
            }
        }
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        // The watcher would otherwise report scheduler-initiated aborts; a
        // normal exit resolves it first, so this only silences teardown.
        self.watcher.abort();
    }
}

/// Converts an abnormal worker termination into a crash event.
async fn watch(slot: usize, handle: JoinHandle<()>, events: mpsc::Sender<Event>) {
    if let Err(e) = handle.await {
        if e.is_panic() {
            #[cfg(feature = "tracing")]
            tracing::error!("worker {slot} panicked");
            let _ = events
                .send(Event::Worker(WorkerEvent::Crashed { worker: slot }))
                .await;
        }
    }
}
