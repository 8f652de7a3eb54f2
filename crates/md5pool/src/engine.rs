//! The hashing engine collaborator.
//!
//! Everything MD5 lives here: one-shot digests, cooperative bulk hashing,
//! and the per-worker registry of incremental sessions used by streaming
//! tasks. The engine is deterministic and side-effect free; the rest of the
//! crate treats it as an opaque `new()`/`update()`/`finalize()` box.

use crate::task::TaskId;
use md5::{Digest, Md5};
use std::collections::HashMap;

/// How many bytes a worker hashes between cooperative yields.
///
/// Large inline payloads are hashed in slices so a worker never monopolizes
/// an executor thread for longer than one slice's worth of work.
const YIELD_INTERVAL: usize = 2 * 1024 * 1024;

/// Slice granularity for bulk hashing.
const HASH_SLICE: usize = 256 * 1024;

/// Requested width of a rendered digest.
///
/// `Half` and `Full` are the two recognized fast paths; `Chars(n)` truncates
/// the full lowercase-hex digest to its first `n` characters (clamped to the
/// full 32). A truncated digest is a prefix of the full one, never an
/// independent hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestWidth {
    /// First 16 hex characters (half of the 128-bit digest).
    Half,
    /// All 32 hex characters.
    Full,
    /// First `n` hex characters, clamped to 32.
    Chars(usize),
}

impl Default for DigestWidth {
    fn default() -> Self {
        Self::Full
    }
}

impl DigestWidth {
    /// Number of hex characters this width renders.
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Half => 16,
            Self::Full => 32,
            Self::Chars(n) => {
                if n > 32 { 32 } else { n }
            }
        }
    }

    fn render(self, digest: md5::digest::Output<Md5>) -> String {
        let mut hex = format!("{digest:x}");
        hex.truncate(self.hex_len());
        hex
    }
}

/// Computes the digest of `data` in a single synchronous pass.
pub fn digest_oneshot(data: &[u8], width: DigestWidth) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    width.render(hasher.finalize())
}

/// Computes the digest of `data`, yielding to the executor every
/// [`YIELD_INTERVAL`] bytes so sibling tasks keep making progress.
pub(crate) async fn digest_cooperative(data: &[u8], width: DigestWidth) -> String {
    let mut hasher = Md5::new();
    let mut since_yield = 0usize;
    for slice in data.chunks(HASH_SLICE) {
        hasher.update(slice);
        since_yield += slice.len();
        if since_yield >= YIELD_INTERVAL {
            since_yield = 0;
            tokio::task::yield_now().await;
        }
    }
    width.render(hasher.finalize())
}

/// Registry of open incremental hash sessions, keyed by task id.
///
/// Owned by a single worker task; one session per streaming task. `finalize`
/// and `cancel` both remove the session, so a digest can be produced at most
/// once per id.
#[derive(Default)]
pub(crate) struct IncrementalSessions {
    open: HashMap<TaskId, Md5>,
}

impl IncrementalSessions {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Opens a fresh session. Returns `false` if one is already open for
    /// this id.
    pub(crate) fn open(&mut self, id: TaskId) -> bool {
        use std::collections::hash_map::Entry;
        match self.open.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(Md5::new());
                true
            }
        }
    }

    /// Feeds bytes into the session. Returns `false` for unknown ids.
    pub(crate) fn update(&mut self, id: TaskId, data: &[u8]) -> bool {
        match self.open.get_mut(&id) {
            Some(hasher) => {
                hasher.update(data);
                true
            }
            None => false,
        }
    }

    /// Closes the session and renders the digest. Returns `None` for
    /// unknown ids; the session no longer exists afterwards.
    pub(crate) fn finalize(&mut self, id: TaskId, width: DigestWidth) -> Option<String> {
        self.open.remove(&id).map(|hasher| width.render(hasher.finalize()))
    }

    /// Discards the session without producing a digest.
    pub(crate) fn cancel(&mut self, id: TaskId) -> bool {
        self.open.remove(&id).is_some()
    }
}
