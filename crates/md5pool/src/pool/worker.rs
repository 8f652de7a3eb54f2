//! Worker task: the execution unit that actually hashes bytes.
//!
//! Each worker owns its own [`IncrementalSessions`] registry and listens on
//! a bounded MPSC channel until the channel closes or a shutdown request
//! arrives. Results, failures, and chunk acknowledgements travel back to
//! the scheduler over the shared event channel; the worker never touches
//! scheduling state itself.

use crate::arena::SharedBuf;
use crate::engine::{self, DigestWidth, IncrementalSessions};
use crate::error::Error;
use crate::task::{CalculateMode, Event, Payload, TaskId, WorkRequest, WorkerEvent};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Chunk bookkeeping for one open stream session.
///
/// The hash state itself lives in the worker's [`IncrementalSessions`];
/// this tracks how far the stream has advanced.
struct StreamState {
    width: DigestWidth,
    processed: u32,
    total: u32,
}

pub(crate) async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<WorkRequest>,
    shared: Option<SharedBuf>,
    events: mpsc::Sender<Event>,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("worker {worker_id} started");

    let mut sessions = IncrementalSessions::new();
    let mut streams: HashMap<TaskId, StreamState> = HashMap::new();

    while let Some(request) = rx.recv().await {
        match request {
            WorkRequest::Calculate {
                id,
                width,
                mode: CalculateMode::OneShot(payload),
            } => {
                let event = match hash_payload(&shared, payload, width).await {
                    Ok(digest) => WorkerEvent::Completed {
                        worker: worker_id,
                        id,
                        digest,
                    },
                    Err(error) => WorkerEvent::Failed {
                        worker: worker_id,
                        id,
                        error,
                    },
                };
                if events.send(Event::Worker(event)).await.is_err() {
                    break;
                }
            }
            WorkRequest::Calculate {
                id,
                width,
                mode: CalculateMode::Stream { total_chunks },
            } => {
                sessions.open(id);
                streams.insert(
                    id,
                    StreamState {
                        width,
                        processed: 0,
                        total: total_chunks,
                    },
                );
            }
            WorkRequest::CalculateChunk {
                id,
                index,
                offset,
                len,
            } => {
                let produced = process_chunk(
                    worker_id,
                    &shared,
                    &mut sessions,
                    &mut streams,
                    id,
                    index,
                    offset,
                    len,
                );
                // The finalizing chunk produces two ordered events: the
                // 100% acknowledgement, then the result.
                for event in produced {
                    if events.send(Event::Worker(event)).await.is_err() {
                        return;
                    }
                }
            }
            WorkRequest::CancelStream { id } => {
                sessions.cancel(id);
                streams.remove(&id);
            }
            WorkRequest::Shutdown { ack } => {
                #[cfg(feature = "tracing")]
                tracing::debug!("worker {worker_id} received shutdown signal");
                let _ = ack.send(());
                break;
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("worker {worker_id} stopped");
}

/// Hashes a one-shot payload.
///
/// Inline payloads are hashed cooperatively; arena payloads are at most one
/// chunk long, so they are hashed synchronously under the read guard.
async fn hash_payload(
    shared: &Option<SharedBuf>,
    payload: Payload,
    width: DigestWidth,
) -> Result<String, Error> {
    match payload {
        Payload::Inline(data) => Ok(engine::digest_cooperative(&data, width).await),
        Payload::Arena { offset, len } => match shared {
            Some(buf) => {
                let guard = buf.read();
                Ok(engine::digest_oneshot(&guard[offset..offset + len], width))
            }
            None => Err(Error::InvalidState {
                reason: "arena payload received without a shared buffer".into(),
            }),
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn process_chunk(
    worker_id: usize,
    shared: &Option<SharedBuf>,
    sessions: &mut IncrementalSessions,
    streams: &mut HashMap<TaskId, StreamState>,
    id: TaskId,
    index: u32,
    offset: usize,
    len: usize,
) -> Vec<WorkerEvent> {
    let Some(state) = streams.get_mut(&id) else {
        return vec![WorkerEvent::Failed {
            worker: worker_id,
            id,
            error: Error::InvalidState {
                reason: format!("chunk {index} for unknown stream session {id}"),
            },
        }];
    };

    let Some(buf) = shared else {
        streams.remove(&id);
        sessions.cancel(id);
        return vec![WorkerEvent::Failed {
            worker: worker_id,
            id,
            error: Error::InvalidState {
                reason: "stream chunk received without a shared buffer".into(),
            },
        }];
    };

    let updated = {
        let guard = buf.read();
        sessions.update(id, &guard[offset..offset + len])
    };
    if !updated {
        streams.remove(&id);
        return vec![WorkerEvent::Failed {
            worker: worker_id,
            id,
            error: Error::InvalidState {
                reason: format!("no hash state for stream session {id}"),
            },
        }];
    }

    state.processed += 1;
    let pct = (u64::from(state.processed) * 100 / u64::from(state.total)) as u8;
    let ack = WorkerEvent::ChunkDone {
        worker: worker_id,
        id,
        index,
        pct,
    };

    if state.processed == state.total {
        let width = state.width;
        streams.remove(&id);
        match sessions.finalize(id, width) {
            Some(digest) => vec![
                ack,
                WorkerEvent::Completed {
                    worker: worker_id,
                    id,
                    digest,
                },
            ],
            None => vec![WorkerEvent::Failed {
                worker: worker_id,
                id,
                error: Error::InvalidState {
                    reason: format!("stream session {id} vanished before finalize"),
                },
            }],
        }
    } else {
        vec![ack]
    }
}
