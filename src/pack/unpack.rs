//! Reassemble a published gene into its original bytes.

use crate::error::{GeneError, Result};
use crate::pack::codec::CodecSettings;
use crate::pack::digest::{ChunkDigest, GeneId, RunningDigest};
use crate::store::GeneStore;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Reads a gene's parts back to back, checking each part's SHA-1 as its
/// last byte goes by.
struct ChunkReader {
    parts: std::vec::IntoIter<(ChunkDigest, PathBuf)>,
    current: Option<(ChunkDigest, BufReader<File>, RunningDigest)>,
    total: u64,
    cancel: CancellationToken,
}

impl ChunkReader {
    fn new(parts: Vec<(ChunkDigest, PathBuf)>, cancel: CancellationToken) -> Self {
        Self {
            parts: parts.into_iter(),
            current: None,
            total: 0,
            cancel,
        }
    }

    fn read_inner(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if self.current.is_none() {
                let Some((digest, path)) = self.parts.next() else {
                    return Ok(0);
                };
                if self.cancel.is_cancelled() {
                    return Err(GeneError::Cancelled);
                }
                let file = File::open(&path)?;
                self.current = Some((digest, BufReader::new(file), RunningDigest::new()));
            }

            if let Some((_, reader, running)) = self.current.as_mut() {
                let n = reader.read(buf)?;
                if n > 0 {
                    running.update(&buf[..n]);
                    self.total += n as u64;
                    return Ok(n);
                }
            }

            // End of this part.
            if let Some((expected, _, running)) = self.current.take() {
                let actual = running.finalize();
                if actual != expected {
                    return Err(GeneError::DigestMismatch {
                        chunk: expected.to_string(),
                        expected: expected.to_hex(),
                        actual: actual.to_hex(),
                    });
                }
                debug!(chunk = %expected, "Verified chunk");
            }
        }
    }

    /// Read whatever the decoder left behind so every part gets verified.
    fn drain(mut self) -> Result<u64> {
        let mut sink = [0u8; 8192];
        while self.read_inner(&mut sink)? > 0 {}
        Ok(self.total)
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.read_inner(buf).map_err(GeneError::into_io)
    }
}

/// Write the original bytes of gene `id` to `dest`.
///
/// Output goes to a temp file beside `dest` and is renamed into place only
/// after every part verified and the length matched `originalSize`.
pub fn unpack(
    store: &GeneStore,
    id: &GeneId,
    dest: &Path,
    settings: &CodecSettings,
    cancel: &CancellationToken,
) -> Result<u64> {
    let manifest = store.load_manifest(id)?;
    let parts = manifest
        .parts
        .iter()
        .map(|digest| (*digest, store.chunk_path(id, digest)))
        .collect();

    let reader = ChunkReader::new(parts, cancel.clone());
    let mut decoder = manifest.format.decompressor(reader, settings)?;

    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".unpack-")
        .tempfile_in(parent)?;

    let written = {
        let mut out = BufWriter::new(temp.as_file_mut());
        let written = io::copy(&mut decoder, &mut out).map_err(GeneError::from_io)?;
        out.flush()?;
        written
    };

    let compressed = decoder.into_inner().drain()?;
    if compressed != manifest.size {
        return Err(GeneError::SizeMismatch {
            expected: manifest.size,
            actual: compressed,
        });
    }
    if written != manifest.original_size {
        return Err(GeneError::SizeMismatch {
            expected: manifest.original_size,
            actual: written,
        });
    }

    temp.persist(dest).map_err(|e| GeneError::Io(e.error))?;
    info!(gene = %id, dest = %dest.display(), bytes = written, "Unpacked gene");
    Ok(written)
}
