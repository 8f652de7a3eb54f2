//! Transfer drivers that move task bytes to a worker.
//!
//! Three shapes, spawned by the scheduler at dispatch time:
//!
//! - [`stream_transfer`]: chunked transfer through a single reused arena
//!   region, for inputs larger than the chunk size. Yields to the executor
//!   between chunks so the control task never stalls behind one large
//!   input.
//! - [`arena_transfer`]: whole-input transfer through an arena region, for
//!   inputs that fit in one chunk (file sources need the read off the
//!   control task).
//! - [`inline_transfer`]: whole-input transfer inside the message itself,
//!   the fallback when the arena is disabled or exhausted.
//!
//! A transfer failure is reported as an [`Event::TransferFailed`] so the
//! scheduler performs the terminal transition; drivers never complete tasks
//! themselves.

use crate::arena::SharedBuf;
use crate::engine::DigestWidth;
use crate::error::Error;
use crate::source::ByteSource;
use crate::task::{CalculateMode, Event, Payload, TaskId, WorkRequest};
use tokio::sync::mpsc;

pub(crate) struct StreamJob {
    pub id: TaskId,
    pub width: DigestWidth,
    pub source: ByteSource,
    pub len: u64,
    pub chunk_size: usize,
    /// Offset of the task's single chunk-sized arena region.
    pub arena_offset: usize,
    pub shared: SharedBuf,
    pub worker_tx: mpsc::Sender<WorkRequest>,
    /// Chunk acknowledgements forwarded by the scheduler. Closed when the
    /// task reaches a terminal state, which stops the transfer.
    pub acks: mpsc::Receiver<u32>,
    pub events: mpsc::Sender<Event>,
}

/// Number of chunks needed to stream `len` bytes at `chunk_size`.
pub(crate) fn total_chunks(len: u64, chunk_size: usize) -> u32 {
    len.div_ceil(chunk_size as u64) as u32
}

/// Drives one streaming task to completion.
///
/// Opens the worker-side session, then per chunk: read a range from the
/// source, copy it into the arena region, send the chunk message, and wait
/// for the worker's acknowledgement before overwriting the region with the
/// next chunk. The worker emits the terminal result on the final chunk.
pub(crate) async fn stream_transfer(mut job: StreamJob) {
    let total = total_chunks(job.len, job.chunk_size);

    if job
        .worker_tx
        .send(WorkRequest::Calculate {
            id: job.id,
            width: job.width,
            mode: CalculateMode::Stream {
                total_chunks: total,
            },
        })
        .await
        .is_err()
    {
        fail(&job.events, job.id, channel_error("stream open send failed")).await;
        return;
    }

    let mut reader = match job.source.open_reader().await {
        Ok(reader) => reader,
        Err(e) => {
            fail(&job.events, job.id, e.into()).await;
            return;
        }
    };

    for index in 0..total {
        let remaining = job.len - u64::from(index) * job.chunk_size as u64;
        let want = (job.chunk_size as u64).min(remaining) as usize;
        let chunk = match reader.next_chunk(want).await {
            Ok(chunk) => chunk,
            Err(e) => {
                fail(&job.events, job.id, e.into()).await;
                return;
            }
        };

        {
            let mut guard = job.shared.write();
            guard[job.arena_offset..job.arena_offset + chunk.len()].copy_from_slice(&chunk);
        }

        if job
            .worker_tx
            .send(WorkRequest::CalculateChunk {
                id: job.id,
                index,
                offset: job.arena_offset,
                len: chunk.len(),
            })
            .await
            .is_err()
        {
            fail(&job.events, job.id, channel_error("chunk send failed")).await;
            return;
        }

        // The region is reused for the next chunk, so wait until the worker
        // confirms it has consumed this one. A closed ack channel means the
        // task reached a terminal state behind our back; stop quietly.
        if job.acks.recv().await.is_none() {
            #[cfg(feature = "tracing")]
            tracing::trace!(id = %job.id, "stream transfer stopped early");
            return;
        }

        // Let other control-side work interleave between chunks.
        tokio::task::yield_now().await;
    }
}

/// Reads an entire source and transfers it through an arena region of
/// `region_len` bytes.
pub(crate) async fn arena_transfer(
    id: TaskId,
    width: DigestWidth,
    source: ByteSource,
    offset: usize,
    region_len: usize,
    shared: SharedBuf,
    worker_tx: mpsc::Sender<WorkRequest>,
    events: mpsc::Sender<Event>,
) {
    let data = match source.read_all().await {
        Ok(data) => data,
        Err(e) => {
            fail(&events, id, e.into()).await;
            return;
        }
    };

    // A file can change size between the length probe and the read; a
    // payload that no longer fits its region travels inline instead.
    if data.len() > region_len {
        let request = WorkRequest::Calculate {
            id,
            width,
            mode: CalculateMode::OneShot(Payload::Inline(data)),
        };
        if worker_tx.send(request).await.is_err() {
            fail(&events, id, channel_error("inline calculate send failed")).await;
        }
        return;
    }

    {
        let mut guard = shared.write();
        guard[offset..offset + data.len()].copy_from_slice(&data);
    }

    let request = WorkRequest::Calculate {
        id,
        width,
        mode: CalculateMode::OneShot(Payload::Arena {
            offset,
            len: data.len(),
        }),
    };
    if worker_tx.send(request).await.is_err() {
        fail(&events, id, channel_error("arena calculate send failed")).await;
    }
}

/// Reads an entire source and transfers it inline in the message.
pub(crate) async fn inline_transfer(
    id: TaskId,
    width: DigestWidth,
    source: ByteSource,
    worker_tx: mpsc::Sender<WorkRequest>,
    events: mpsc::Sender<Event>,
) {
    let data = match source.read_all().await {
        Ok(data) => data,
        Err(e) => {
            fail(&events, id, e.into()).await;
            return;
        }
    };

    let request = WorkRequest::Calculate {
        id,
        width,
        mode: CalculateMode::OneShot(Payload::Inline(data)),
    };
    if worker_tx.send(request).await.is_err() {
        fail(&events, id, channel_error("inline calculate send failed")).await;
    }
}

fn channel_error(context: &str) -> Error {
    Error::Channel {
        context: context.into(),
    }
}

async fn fail(events: &mpsc::Sender<Event>, id: TaskId, error: Error) {
    let _ = events.send(Event::TransferFailed { id, error }).await;
}
