//! Byte sources accepted by the pool.
//!
//! A source is either an in-memory buffer or a file path. Both expose a
//! total length up front and can be read whole (inline transfer) or in
//! sequential ranges (streaming transfer).

use bytes::Bytes;
use std::io;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

/// A hashing input with a known total length.
#[derive(Debug, Clone)]
pub enum ByteSource {
    /// Bytes already resident in memory.
    Memory(Bytes),
    /// A file on disk, read lazily.
    File(PathBuf),
}

impl ByteSource {
    /// Total length of the source in bytes.
    pub async fn len(&self) -> io::Result<u64> {
        match self {
            Self::Memory(data) => Ok(data.len() as u64),
            Self::File(path) => Ok(tokio::fs::metadata(path).await?.len()),
        }
    }

    /// Reads the entire source into one buffer.
    pub(crate) async fn read_all(&self) -> io::Result<Bytes> {
        match self {
            Self::Memory(data) => Ok(data.clone()),
            Self::File(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        }
    }

    /// Opens a sequential reader over the source.
    pub(crate) async fn open_reader(&self) -> io::Result<SourceReader> {
        match self {
            Self::Memory(data) => Ok(SourceReader::Memory {
                data: data.clone(),
                pos: 0,
            }),
            Self::File(path) => Ok(SourceReader::File(tokio::fs::File::open(path).await?)),
        }
    }
}

impl From<Bytes> for ByteSource {
    fn from(data: Bytes) -> Self {
        Self::Memory(data)
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(data: Vec<u8>) -> Self {
        Self::Memory(Bytes::from(data))
    }
}

impl From<&'static [u8]> for ByteSource {
    fn from(data: &'static [u8]) -> Self {
        Self::Memory(Bytes::from_static(data))
    }
}

impl From<PathBuf> for ByteSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

/// Sequential range reader used by the streaming transfer.
///
/// The caller asks for exact chunk lengths it computed from the source's
/// total length, so a short read is an I/O error, not an EOF condition.
pub(crate) enum SourceReader {
    Memory { data: Bytes, pos: usize },
    File(tokio::fs::File),
}

impl SourceReader {
    /// Returns the next `want` bytes of the source.
    pub(crate) async fn next_chunk(&mut self, want: usize) -> io::Result<Bytes> {
        match self {
            Self::Memory { data, pos } => {
                let end = (*pos + want).min(data.len());
                let chunk = data.slice(*pos..end);
                *pos = end;
                Ok(chunk)
            }
            Self::File(file) => {
                let mut buf = vec![0u8; want];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}
