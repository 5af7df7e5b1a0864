//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use genepack::error::{GeneError, Result};
use genepack::pack::{
    ChunkDigest, CodecSettings, GeneId, GenePacker, PackRequest, PackedGene, PackerConfig,
};
use genepack::progress::NoProgress;
use genepack::store::GeneStore;
use genepack::transfer::{PutOutcome, RemoteStatus, RemoteStore, UploadGrant};
use genepack::Manifest;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn codec() -> CodecSettings {
    CodecSettings {
        xz_threads: 2,
        xz_memlimit: 256 * 1024 * 1024,
    }
}

pub fn packer(store_root: &Path, chunk_size: u64, buffer_size: usize) -> GenePacker {
    let store = GeneStore::open(store_root).unwrap();
    GenePacker::new(
        store,
        PackerConfig {
            chunk_size,
            buffer_size,
            codec: codec(),
        },
    )
    .unwrap()
}

/// Bytes that do not repeat at any chunk size used in tests.
pub fn distinct_bytes(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491_u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Pack `data` as a plain gene split into parts of `chunk_size` bytes.
pub fn pack_plain(store_root: &Path, data: &[u8], chunk_size: u64) -> PackedGene {
    assert!(data.len() <= 2048, "plain packing needs a source of at most 2 KiB");
    let source = store_root.with_extension("src");
    std::fs::write(&source, data).unwrap();
    packer(store_root, chunk_size, 1024)
        .pack(
            &PackRequest::new(&source, "fixture"),
            &NoProgress,
            &CancellationToken::new(),
        )
        .unwrap()
}

// =============================================================================
// In-memory remote store
// =============================================================================

#[derive(Default)]
struct State {
    declared: HashMap<GeneId, Manifest>,
    confirmed: HashMap<GeneId, HashSet<ChunkDigest>>,
    stored: HashMap<ChunkDigest, Bytes>,
    grants: HashMap<String, (GeneId, ChunkDigest)>,
    grants_issued: usize,
    uploads: Vec<ChunkDigest>,
    conflict_on_upload: HashSet<ChunkDigest>,
    conflict_on_confirm: HashSet<ChunkDigest>,
    /// Remaining forced failures per part, with the status to fail with.
    failures: HashMap<ChunkDigest, (u32, u16)>,
    expired_grants: usize,
    availability_checks: usize,
    availability_delay: usize,
}

/// Remote store double that keeps everything in memory and can be told to
/// misbehave in the ways a real service does.
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<State>,
    upload_delay: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep inside every upload, to make concurrency observable.
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    pub fn confirm(&self, gene: &GeneId, parts: &[ChunkDigest]) {
        let mut state = self.state.lock().unwrap();
        state.confirmed.entry(*gene).or_default().extend(parts.iter().copied());
    }

    /// Upload of `chunk` answers "already uploading"; the other uploader
    /// then finishes the part.
    pub fn conflict_on_upload(&self, chunk: ChunkDigest) {
        self.state.lock().unwrap().conflict_on_upload.insert(chunk);
    }

    pub fn conflict_on_confirm(&self, chunk: ChunkDigest) {
        self.state.lock().unwrap().conflict_on_confirm.insert(chunk);
    }

    /// Fail the next `times` uploads of `chunk` with HTTP `status`.
    pub fn fail_uploads(&self, chunk: ChunkDigest, times: u32, status: u16) {
        self.state.lock().unwrap().failures.insert(chunk, (times, status));
    }

    /// The next `count` grants are issued already expired.
    pub fn expire_next_grants(&self, count: usize) {
        self.state.lock().unwrap().expired_grants = count;
    }

    /// Report "not yet" for the first `checks` availability checks even
    /// when every part is confirmed.
    pub fn delay_availability(&self, checks: usize) {
        self.state.lock().unwrap().availability_delay = checks;
    }

    pub fn uploads(&self) -> Vec<ChunkDigest> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn grants_issued(&self) -> usize {
        self.state.lock().unwrap().grants_issued
    }

    pub fn confirmed(&self, gene: &GeneId) -> HashSet<ChunkDigest> {
        self.state
            .lock()
            .unwrap()
            .confirmed
            .get(gene)
            .cloned()
            .unwrap_or_default()
    }

    pub fn stored(&self, chunk: &ChunkDigest) -> Option<Bytes> {
        self.state.lock().unwrap().stored.get(chunk).cloned()
    }

    pub fn is_declared(&self, gene: &GeneId) -> bool {
        self.state.lock().unwrap().declared.contains_key(gene)
    }

    pub fn availability_checks(&self) -> usize {
        self.state.lock().unwrap().availability_checks
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get_status(&self, gene: &GeneId) -> Result<RemoteStatus> {
        let state = self.state.lock().unwrap();
        let mut confirmed: Vec<ChunkDigest> = state
            .confirmed
            .get(gene)
            .map(|parts| parts.iter().copied().collect())
            .unwrap_or_default();
        confirmed.sort();
        let declared = state
            .declared
            .get(gene)
            .map(|manifest| manifest.parts.clone())
            .unwrap_or_default();
        Ok(RemoteStatus {
            confirmed_parts: confirmed,
            declared_parts: declared,
        })
    }

    async fn request_upload_grant(&self, gene: &GeneId, chunk: &ChunkDigest) -> Result<UploadGrant> {
        let mut state = self.state.lock().unwrap();
        state.grants_issued += 1;
        let url = format!("mem://{}/{}/{}", gene.to_hex(), chunk.to_hex(), state.grants_issued);
        let expires_at = if state.expired_grants > 0 {
            state.expired_grants -= 1;
            Utc::now() - chrono::Duration::seconds(1)
        } else {
            Utc::now() + chrono::Duration::minutes(5)
        };
        state.grants.insert(url.clone(), (*gene, *chunk));
        Ok(UploadGrant { url, expires_at })
    }

    async fn upload_bytes(&self, grant: &UploadGrant, data: Bytes) -> Result<PutOutcome> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }
        let result = self.accept_upload(grant, data);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn confirm_chunk(&self, gene: &GeneId, chunk: &ChunkDigest) -> Result<PutOutcome> {
        let mut state = self.state.lock().unwrap();
        if !state.stored.contains_key(chunk) {
            return Err(GeneError::Remote {
                status: 400,
                message: format!("{chunk} was never uploaded"),
            });
        }
        let newly = state.confirmed.entry(*gene).or_default().insert(*chunk);
        if !newly || state.conflict_on_confirm.contains(chunk) {
            return Ok(PutOutcome::Conflict);
        }
        Ok(PutOutcome::Stored)
    }

    async fn declare_manifest(&self, gene: &GeneId, manifest: &Manifest) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .declared
            .insert(*gene, manifest.clone());
        Ok(())
    }

    async fn is_available(&self, gene: &GeneId) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.availability_checks += 1;
        let Some(manifest) = state.declared.get(gene) else {
            return Ok(false);
        };
        let confirmed = state.confirmed.get(gene);
        let complete = manifest
            .parts
            .iter()
            .all(|part| confirmed.is_some_and(|c| c.contains(part)));
        Ok(complete && state.availability_checks > state.availability_delay)
    }
}

impl MemoryRemoteStore {
    fn accept_upload(&self, grant: &UploadGrant, data: Bytes) -> Result<PutOutcome> {
        let mut state = self.state.lock().unwrap();
        let Some((gene, chunk)) = state.grants.get(&grant.url).copied() else {
            return Err(GeneError::Remote {
                status: 404,
                message: format!("unknown grant {}", grant.url),
            });
        };
        if grant.expires_at <= Utc::now() {
            return Err(GeneError::Remote {
                status: 403,
                message: "grant expired".to_string(),
            });
        }
        if let Some((remaining, status)) = state.failures.get_mut(&chunk) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(GeneError::Remote {
                    status: *status,
                    message: "forced failure".to_string(),
                });
            }
        }
        if state.conflict_on_upload.contains(&chunk) {
            state.uploads.push(chunk);
            state.confirmed.entry(gene).or_default().insert(chunk);
            state.stored.insert(chunk, data);
            return Ok(PutOutcome::Conflict);
        }
        if ChunkDigest::compute(&data) != chunk {
            return Err(GeneError::Remote {
                status: 422,
                message: format!("body does not hash to {chunk}"),
            });
        }
        state.grants.remove(&grant.url);
        state.uploads.push(chunk);
        state.stored.insert(chunk, data);
        Ok(PutOutcome::Stored)
    }
}
