//! Gene packing: source file → codec → chunker → manifest → store.
//!
//! ```text
//! +--------+     +------------+     +--------------------+     +-----------+
//! | source | --> | Compressor | --> | ChunkingHashStream | --> | GeneStore |
//! | (1MiB) |     | plain/gz/xz|     |  <sha1>.part files |     |  publish  |
//! +--------+     +------------+     +--------------------+     +-----------+
//! ```
//!
//! Everything happens inside a scratch directory under the store root; the
//! directory only becomes visible under the gene's identity once the
//! manifest has been written.

pub mod chunker;
pub mod codec;
pub mod digest;
pub mod manifest;
pub mod unpack;

pub use chunker::{ChunkRecord, ChunkingHashStream, DEFAULT_CHUNK_SIZE};
pub use codec::{CodecSettings, Compressor, Decompressor, Format};
pub use digest::{ChunkDigest, GeneId, RunningDigest};
pub use manifest::{Architecture, Manifest, MANIFEST_FILE, SOURCE_FILE};
pub use unpack::unpack;

use crate::error::{GeneError, Result};
use crate::progress::ProgressObserver;
use crate::store::GeneStore;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Read buffer between the source file and the compressor.
pub const PACK_BUFFER_SIZE: usize = 1024 * 1024;

/// What to pack and how to describe it.
#[derive(Debug, Clone)]
pub struct PackRequest {
    pub source: PathBuf,
    pub name: String,
    pub gene_type: String,
    pub version: String,
    pub architecture: Architecture,
    pub max_compression: bool,
    /// Human-readable source document stored next to the manifest.
    pub source_document: Option<String>,
}

impl PackRequest {
    pub fn new(source: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            gene_type: String::new(),
            version: "1.0.0".to_string(),
            architecture: Architecture::Any,
            max_compression: false,
            source_document: None,
        }
    }

    fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Packer tuning.
#[derive(Debug, Clone)]
pub struct PackerConfig {
    pub chunk_size: u64,
    pub buffer_size: usize,
    pub codec: CodecSettings,
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer_size: PACK_BUFFER_SIZE,
            codec: CodecSettings::detect(),
        }
    }
}

/// Result of a successful pack.
#[derive(Debug, Clone)]
pub struct PackedGene {
    pub id: GeneId,
    pub manifest: Manifest,
    pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct GenePacker {
    store: GeneStore,
    config: PackerConfig,
}

impl GenePacker {
    pub fn new(store: GeneStore, config: PackerConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(GeneError::InvalidChunkSize(0));
        }
        if config.buffer_size == 0 {
            return Err(GeneError::Validation {
                field: "buffer_size",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(Self { store, config })
    }

    pub fn store(&self) -> &GeneStore {
        &self.store
    }

    /// Pack `request.source` into the store and return its identity.
    ///
    /// Blocking; see [`GenePacker::pack_async`] for use on the runtime.
    pub fn pack(
        &self,
        request: &PackRequest,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<PackedGene> {
        manifest::validate_name(&request.name)?;
        manifest::validate_version(&request.version)?;

        let total = match fs::metadata(&request.source) {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => {
                return Err(GeneError::Validation {
                    field: "source",
                    message: format!("{} is not a regular file", request.source.display()),
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(GeneError::SourceNotFound(request.source.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut source = File::open(&request.source)?;

        let format = Format::select(request.max_compression, total);
        debug!(source = %request.source.display(), total, %format, "Packing");

        let scratch = self.store.scratch_dir()?;
        let chunker = ChunkingHashStream::new(scratch.path(), self.config.chunk_size)?;
        let mut compressor = format.compressor(chunker, &self.config.codec)?;

        let mut buffer = vec![0u8; self.config.buffer_size];
        let mut processed = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(GeneError::Cancelled);
            }
            let n = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            compressor
                .write_all(&buffer[..n])
                .map_err(GeneError::from_io)?;
            processed += n as u64;
            progress.on_pack(processed, total);
        }

        let mut chunker = compressor.finish()?;
        chunker.close()?;

        let manifest = Manifest {
            version: request.version.clone(),
            name: request.name.clone(),
            gene_type: request.gene_type.clone(),
            format,
            filename: request.file_name(),
            parts: chunker.digests(),
            size: chunker.bytes_written(),
            original_size: processed,
            architecture: request.architecture,
            source: request.source_document.clone(),
        };
        drop(chunker);

        let json = manifest.canonical_json()?;
        let id = GeneId::compute(&json);
        fs::write(scratch.path().join(MANIFEST_FILE), &json)?;
        if let Some(document) = &request.source_document {
            fs::write(scratch.path().join(SOURCE_FILE), document)?;
        }

        let dir = self.store.publish(scratch, &id)?;
        info!(
            gene = %id,
            name = %manifest.name,
            format = %manifest.format,
            parts = manifest.parts.len(),
            size = manifest.size,
            original_size = manifest.original_size,
            "Packed gene"
        );
        Ok(PackedGene { id, manifest, dir })
    }

    /// Run [`GenePacker::pack`] on the blocking thread pool.
    pub async fn pack_async(
        &self,
        request: PackRequest,
        progress: Arc<dyn ProgressObserver>,
        cancel: CancellationToken,
    ) -> Result<PackedGene> {
        let packer = self.clone();
        tokio::task::spawn_blocking(move || packer.pack(&request, progress.as_ref(), &cancel))
            .await
            .map_err(|e| GeneError::Io(std::io::Error::other(e)))?
    }
}
