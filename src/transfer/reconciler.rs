//! One reconciliation round: diff local parts against the remote's
//! confirmed set and upload what is missing.
//!
//! ```text
//! Declared -> Diffing -> Uploading -> Confirming -> Complete
//!                            |             |
//!                            +-------------+--> Failed
//! ```
//!
//! Nothing is persisted between rounds; the remote status is the source of
//! truth, so a failed round is resumed simply by running another one.

use crate::error::{GeneError, Result};
use crate::pack::digest::{ChunkDigest, GeneId};
use crate::pack::manifest::Manifest;
use crate::progress::ProgressObserver;
use crate::store::GeneStore;
use crate::transfer::pool::WorkerPool;
use crate::transfer::remote::{PutOutcome, RemoteStore, UploadGrant};
use bytes::Bytes;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Chunk uploads in flight at once.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Grants with less validity than this are refreshed before use.
pub const GRANT_REFRESH_THRESHOLD: Duration = Duration::from_secs(10);

// =============================================================================
// Configuration and report
// =============================================================================

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub parallelism: usize,
    pub grant_refresh: Duration,
    /// Attempts per chunk within one round; only transient failures retry.
    pub chunk_attempts: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            grant_refresh: GRANT_REFRESH_THRESHOLD,
            chunk_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Declared,
    Diffing,
    Uploading,
    Confirming,
    Complete,
    Failed,
}

/// Outcome of one reconciliation round.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub gene: GeneId,
    pub phase: TransferPhase,

    /// Parts the remote had not confirmed when the round started
    pub missing: Vec<ChunkDigest>,

    /// Parts uploaded and confirmed by this round
    pub uploaded: Vec<ChunkDigest>,

    /// Parts another actor was already handling
    pub conflicted: Vec<ChunkDigest>,

    /// Parts that failed, with the reason
    pub failed: Vec<(ChunkDigest, String)>,

    /// Parts never started because the round was cancelled
    pub skipped: Vec<ChunkDigest>,

    pub bytes_uploaded: u64,
}

impl TransferReport {
    fn new(gene: GeneId) -> Self {
        Self {
            gene,
            phase: TransferPhase::Declared,
            missing: Vec::new(),
            uploaded: Vec::new(),
            conflicted: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            bytes_uploaded: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phase == TransferPhase::Complete
    }

    /// True when this round put at least one new part on the remote.
    pub fn made_progress(&self) -> bool {
        !self.uploaded.is_empty()
    }

    /// Parts a later round still has to deliver.
    pub fn outstanding(&self) -> Vec<ChunkDigest> {
        self.failed
            .iter()
            .map(|(digest, _)| *digest)
            .chain(self.skipped.iter().copied())
            .collect()
    }

    /// Turn a failed round into [`GeneError::IncompleteUpload`].
    pub fn into_result(self) -> Result<Self> {
        if self.phase == TransferPhase::Failed {
            return Err(GeneError::IncompleteUpload {
                outstanding: self.outstanding().iter().map(ToString::to_string).collect(),
            });
        }
        Ok(self)
    }
}

// =============================================================================
// Per-chunk task
// =============================================================================

#[derive(Debug)]
enum ChunkOutcome {
    Uploaded { bytes: u64 },
    Conflict,
    Failed(GeneError),
    Skipped,
}

type GrantCache = Arc<Mutex<HashMap<ChunkDigest, UploadGrant>>>;

/// Grants are plain data, so a panic elsewhere leaves the map usable.
fn lock_grants(grants: &GrantCache) -> MutexGuard<'_, HashMap<ChunkDigest, UploadGrant>> {
    grants.lock().unwrap_or_else(|poisoned| {
        warn!("Grant cache lock poisoned, recovering");
        PoisonError::into_inner(poisoned)
    })
}

/// Everything one chunk upload needs, cheap to clone into a task.
#[derive(Clone)]
struct ChunkTask {
    remote: Arc<dyn RemoteStore>,
    gene: GeneId,
    grants: GrantCache,
    uploaded_bytes: Arc<AtomicU64>,
    total_bytes: u64,
    progress: Arc<dyn ProgressObserver>,
    cancel: CancellationToken,
    config: ReconcilerConfig,
}

impl ChunkTask {
    async fn run(self, chunk: ChunkDigest, path: PathBuf) -> (ChunkDigest, ChunkOutcome) {
        if self.cancel.is_cancelled() {
            return (chunk, ChunkOutcome::Skipped);
        }
        self.progress.on_upload(
            self.uploaded_bytes.load(Ordering::Relaxed),
            self.total_bytes,
            &chunk,
            false,
        );

        let attempts = self.config.chunk_attempts.max(1);
        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            match self.attempt(&chunk, &path).await {
                Ok(outcome) => break outcome,
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(chunk = %chunk, attempt, error = %e, "Chunk upload failed, retrying");
                }
                Err(e) => {
                    warn!(chunk = %chunk, error = %e, "Chunk upload failed");
                    break ChunkOutcome::Failed(e);
                }
            }
        };

        if matches!(outcome, ChunkOutcome::Uploaded { .. } | ChunkOutcome::Conflict) {
            self.progress.on_upload(
                self.uploaded_bytes.load(Ordering::Relaxed),
                self.total_bytes,
                &chunk,
                true,
            );
        }
        (chunk, outcome)
    }

    async fn attempt(&self, chunk: &ChunkDigest, path: &Path) -> Result<ChunkOutcome> {
        let mut grant = self.grant(chunk).await?;
        let data = Bytes::from(tokio::fs::read(path).await?);
        let len = data.len() as u64;

        // Reading a large part can eat into the grant's validity.
        if grant.needs_refresh(Utc::now(), self.config.grant_refresh) {
            warn!(chunk = %chunk, "Upload grant about to expire, refreshing");
            grant = self.remote.request_upload_grant(&self.gene, chunk).await?;
        }

        match self.remote.upload_bytes(&grant, data).await {
            Ok(PutOutcome::Stored) => {}
            Ok(PutOutcome::Conflict) => {
                debug!(chunk = %chunk, "Chunk already being uploaded elsewhere");
                // Counted for progress only; the other uploader delivers it.
                self.uploaded_bytes.fetch_add(len, Ordering::Relaxed);
                return Ok(ChunkOutcome::Conflict);
            }
            Err(e) => {
                // Unused grant; a later attempt may still use it.
                self.stash(*chunk, grant);
                return Err(e);
            }
        }

        match self.remote.confirm_chunk(&self.gene, chunk).await? {
            PutOutcome::Stored => debug!(chunk = %chunk, bytes = len, "Chunk uploaded"),
            PutOutcome::Conflict => debug!(chunk = %chunk, "Chunk already confirmed"),
        }
        self.uploaded_bytes.fetch_add(len, Ordering::Relaxed);
        Ok(ChunkOutcome::Uploaded { bytes: len })
    }

    /// A cached grant if it is still fresh, otherwise a new one.
    async fn grant(&self, chunk: &ChunkDigest) -> Result<UploadGrant> {
        let cached = lock_grants(&self.grants).remove(chunk);
        match cached {
            Some(grant) if !grant.needs_refresh(Utc::now(), self.config.grant_refresh) => {
                debug!(chunk = %chunk, "Reusing upload grant");
                Ok(grant)
            }
            _ => self.remote.request_upload_grant(&self.gene, chunk).await,
        }
    }

    fn stash(&self, chunk: ChunkDigest, grant: UploadGrant) {
        lock_grants(&self.grants).insert(chunk, grant);
    }
}

// =============================================================================
// Reconciler
// =============================================================================

pub struct TransferReconciler {
    remote: Arc<dyn RemoteStore>,
    store: GeneStore,
    config: ReconcilerConfig,
    grants: GrantCache,
}

impl TransferReconciler {
    pub fn new(remote: Arc<dyn RemoteStore>, store: GeneStore, config: ReconcilerConfig) -> Self {
        Self {
            remote,
            store,
            config,
            grants: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one round for `gene`, whose manifest must already be declared.
    ///
    /// Failures of single chunks land in the report; only failures that
    /// affect the whole gene (such as the status query) are returned as
    /// errors.
    pub async fn reconcile(
        &self,
        gene: &GeneId,
        manifest: &Manifest,
        progress: Arc<dyn ProgressObserver>,
        cancel: &CancellationToken,
    ) -> Result<TransferReport> {
        let mut report = TransferReport::new(*gene);

        report.phase = TransferPhase::Diffing;
        let status = self.remote.get_status(gene).await?;
        let declared: HashSet<ChunkDigest> = manifest.parts.iter().copied().collect();
        let confirmed: HashSet<ChunkDigest> = status.confirmed_parts.iter().copied().collect();
        let unknown = confirmed.difference(&declared).count();
        if unknown > 0 {
            warn!(gene = %gene, unknown, "Remote confirmed parts this manifest does not declare");
        }

        report.missing = manifest
            .unique_parts()
            .into_iter()
            .filter(|digest| !confirmed.contains(digest))
            .collect();
        if report.missing.is_empty() {
            debug!(gene = %gene, "All parts confirmed");
            report.phase = TransferPhase::Complete;
            return Ok(report);
        }

        report.phase = TransferPhase::Uploading;
        let mut sized = Vec::with_capacity(report.missing.len());
        let mut total_bytes = 0;
        for digest in &report.missing {
            let path = self.store.chunk_path(gene, digest);
            let size = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) => {
                    // The upload task fails on read and reports the part.
                    warn!(
                        chunk = %digest,
                        path = %path.display(),
                        error = %e,
                        "Local part unreadable"
                    );
                    0
                }
            };
            total_bytes += size;
            sized.push((*digest, path));
        }
        info!(
            gene = %gene,
            missing = report.missing.len(),
            confirmed = confirmed.len(),
            bytes = total_bytes,
            "Uploading missing parts"
        );

        let template = ChunkTask {
            remote: Arc::clone(&self.remote),
            gene: *gene,
            grants: Arc::clone(&self.grants),
            uploaded_bytes: Arc::new(AtomicU64::new(0)),
            total_bytes,
            progress,
            cancel: cancel.clone(),
            config: self.config.clone(),
        };
        let mut pool = WorkerPool::new(self.config.parallelism);
        for (digest, path) in sized {
            pool.submit(template.clone().run(digest, path));
        }
        let mut outcomes = pool.join().await?;

        report.phase = TransferPhase::Confirming;
        // Completion order is arbitrary; report in manifest order.
        let order: HashMap<ChunkDigest, usize> = report
            .missing
            .iter()
            .enumerate()
            .map(|(i, digest)| (*digest, i))
            .collect();
        outcomes.sort_by_key(|(digest, _)| order.get(digest).copied().unwrap_or(usize::MAX));
        for (digest, outcome) in outcomes {
            match outcome {
                ChunkOutcome::Uploaded { bytes } => {
                    report.uploaded.push(digest);
                    report.bytes_uploaded += bytes;
                }
                ChunkOutcome::Conflict => report.conflicted.push(digest),
                ChunkOutcome::Failed(e) => report.failed.push((digest, e.to_string())),
                ChunkOutcome::Skipped => report.skipped.push(digest),
            }
        }

        if report.made_progress() {
            info!(
                gene = %gene,
                uploaded = report.uploaded.len(),
                bytes = report.bytes_uploaded,
                "Uploaded parts"
            );
        }

        if !report.skipped.is_empty() {
            return Err(GeneError::Cancelled);
        }

        report.phase = if report.failed.is_empty() {
            TransferPhase::Complete
        } else {
            warn!(gene = %gene, failed = report.failed.len(), "Round left parts outstanding");
            TransferPhase::Failed
        };
        Ok(report)
    }
}
