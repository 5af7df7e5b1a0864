//! Chunking sink that splits a byte stream into digest-named files.
//!
//! Bytes accumulate in a temp file until the chunk reaches the maximum size,
//! at which point the chunk is sealed: its running SHA-1 is finalized and the
//! temp file is renamed to `<hex>.part`. Only sealed chunks ever carry a
//! digest name, so a failed or abandoned stream leaves nothing that looks
//! complete.

use crate::error::{GeneError, Result};
use crate::pack::digest::{ChunkDigest, RunningDigest};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Default maximum chunk size (80 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 80 * 1024 * 1024;

const WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// A sealed chunk: its digest and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRecord {
    pub digest: ChunkDigest,
    pub size: u64,
}

struct OpenChunk {
    temp_path: PathBuf,
    file: BufWriter<File>,
    digest: RunningDigest,
}

/// Write-only sink producing size-bounded, SHA-1 named chunk files.
///
/// Not thread-safe; a single producer owns the stream.
pub struct ChunkingHashStream {
    dir: PathBuf,
    max_chunk_size: u64,
    current: Option<OpenChunk>,
    chunks: Vec<ChunkRecord>,
    bytes_written: u64,
    temp_counter: u64,
    closed: bool,
}

impl ChunkingHashStream {
    pub fn new(dir: impl Into<PathBuf>, max_chunk_size: u64) -> Result<Self> {
        if max_chunk_size == 0 {
            return Err(GeneError::InvalidChunkSize(max_chunk_size));
        }
        Ok(Self {
            dir: dir.into(),
            max_chunk_size,
            current: None,
            chunks: Vec::new(),
            bytes_written: 0,
            temp_counter: 0,
            closed: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_chunk_size(&self) -> u64 {
        self.max_chunk_size
    }

    /// Sealed chunks in emission order.
    pub fn chunks(&self) -> &[ChunkRecord] {
        &self.chunks
    }

    pub fn digests(&self) -> Vec<ChunkDigest> {
        self.chunks.iter().map(|c| c.digest).collect()
    }

    /// Total bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append `data`, sealing as many chunks as fill up along the way.
    pub fn write_bytes(&mut self, mut data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(GeneError::StreamClosed);
        }

        while !data.is_empty() {
            let mut chunk = match self.current.take() {
                Some(chunk) => chunk,
                None => self.open_chunk()?,
            };

            let room = self.max_chunk_size - chunk.digest.len();
            let take = usize::try_from(room).map_or(data.len(), |room| room.min(data.len()));
            let (head, tail) = data.split_at(take);

            if let Err(e) = chunk.file.write_all(head) {
                self.current = Some(chunk);
                return Err(e.into());
            }
            chunk.digest.update(head);
            self.bytes_written += head.len() as u64;
            data = tail;

            if chunk.digest.len() == self.max_chunk_size {
                self.seal(chunk)?;
            } else {
                self.current = Some(chunk);
            }
        }

        Ok(())
    }

    /// Seal the open chunk (if any) and refuse further writes.
    ///
    /// A stream that never received a byte produces no chunk at all.
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(chunk) = self.current.take() {
            self.seal(chunk)?;
        }
        debug!(
            dir = %self.dir.display(),
            chunks = self.chunks.len(),
            bytes = self.bytes_written,
            "Chunk stream closed"
        );
        Ok(())
    }

    fn open_chunk(&mut self) -> Result<OpenChunk> {
        let temp_path = self
            .dir
            .join(format!(".chunk-{:06}.tmp", self.temp_counter));
        self.temp_counter += 1;
        let file = File::create(&temp_path)?;
        trace!(path = %temp_path.display(), "Opened chunk");
        Ok(OpenChunk {
            temp_path,
            file: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            digest: RunningDigest::new(),
        })
    }

    fn seal(&mut self, chunk: OpenChunk) -> Result<()> {
        let OpenChunk {
            temp_path,
            file,
            digest,
        } = chunk;

        if let Err(e) = file.into_inner() {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into_error().into());
        }

        let size = digest.len();
        let digest = digest.finalize();
        let target = self.dir.join(digest.file_name());

        if target.exists() {
            // Same digest, same bytes: keep the existing file.
            fs::remove_file(&temp_path)?;
            debug!(chunk = %digest, size, "Duplicate chunk content");
        } else {
            fs::rename(&temp_path, &target)?;
            debug!(chunk = %digest, size, "Sealed chunk");
        }

        self.chunks.push(ChunkRecord { digest, size });
        Ok(())
    }
}

impl Write for ChunkingHashStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf).map_err(GeneError::into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.current.as_mut() {
            Some(chunk) => chunk.file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for ChunkingHashStream {
    fn drop(&mut self) {
        if let Some(chunk) = self.current.take() {
            drop(chunk.file);
            let _ = fs::remove_file(&chunk.temp_path);
        }
    }
}
