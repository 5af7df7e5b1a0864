//! Push pipeline.
//!
//! Declares the manifest, runs a first reconcile round, then optionally
//! waits for the remote to assemble the gene.

use crate::error::{GeneError, Result};
use crate::pack::digest::GeneId;
use crate::progress::ProgressObserver;
use crate::store::GeneStore;
use crate::transfer::poller::{AvailabilityPoller, PollSummary, PollerConfig};
use crate::transfer::reconciler::{ReconcilerConfig, TransferReconciler, TransferReport};
use crate::transfer::remote::RemoteStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub reconciler: ReconcilerConfig,
    pub poller: PollerConfig,
    /// Return after the first round instead of waiting for availability.
    pub no_wait: bool,
}

#[derive(Debug, Clone)]
pub struct PushSummary {
    pub gene: GeneId,
    pub first_round: TransferReport,
    /// Present when the push waited for availability.
    pub poll: Option<PollSummary>,
}

/// Orchestrator for pushing a local gene to a remote store
pub struct GenePusher {
    store: GeneStore,
    remote: Arc<dyn RemoteStore>,
    options: PushOptions,
}

impl GenePusher {
    pub fn new(store: GeneStore, remote: Arc<dyn RemoteStore>, options: PushOptions) -> Self {
        Self {
            store,
            remote,
            options,
        }
    }

    pub async fn push(
        &self,
        gene: &GeneId,
        progress: Arc<dyn ProgressObserver>,
        cancel: &CancellationToken,
    ) -> Result<PushSummary> {
        // 1. Local manifest, checked against its identity
        let manifest = self.store.load_manifest(gene)?;
        let identity = manifest.identity()?;
        if identity != *gene {
            return Err(GeneError::Validation {
                field: "manifest",
                message: format!("{gene} holds a manifest for {identity}"),
            });
        }

        // 2. Declare
        self.remote.declare_manifest(gene, &manifest).await?;
        info!(gene = %gene, parts = manifest.parts.len(), "Declared manifest");

        // 3. First round
        let reconciler = TransferReconciler::new(
            Arc::clone(&self.remote),
            self.store.clone(),
            self.options.reconciler.clone(),
        );
        let first_round = reconciler
            .reconcile(gene, &manifest, Arc::clone(&progress), cancel)
            .await?;
        info!(
            gene = %gene,
            uploaded = first_round.uploaded.len(),
            conflicted = first_round.conflicted.len(),
            failed = first_round.failed.len(),
            "First upload round finished"
        );

        if self.options.no_wait {
            let first_round = first_round.into_result()?;
            return Ok(PushSummary {
                gene: *gene,
                first_round,
                poll: None,
            });
        }

        // 4. Wait; later rounds retry whatever the first one left behind
        let poll = AvailabilityPoller::new(self.options.poller)
            .wait(&reconciler, gene, &manifest, progress, cancel)
            .await?;
        Ok(PushSummary {
            gene: *gene,
            first_round,
            poll: Some(poll),
        })
    }
}
