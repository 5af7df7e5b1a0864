//! Wait for the remote to assemble a gene, topping up missing parts while
//! waiting.

use crate::error::{GeneError, Result};
use crate::pack::digest::GeneId;
use crate::pack::manifest::Manifest;
use crate::progress::ProgressObserver;
use crate::transfer::reconciler::{TransferReconciler, TransferReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    /// Pause between availability checks.
    pub interval: Duration,
    /// Deadline without progress. Every round that uploads something
    /// restarts the window from that moment.
    pub timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollSummary {
    /// Reconcile rounds run while waiting.
    pub rounds: u32,
    pub waited: Duration,
    /// Rounds that restarted the deadline window.
    pub extensions: u32,
    pub last_round: Option<TransferReport>,
}

#[derive(Debug, Clone, Default)]
pub struct AvailabilityPoller {
    config: PollerConfig,
}

impl AvailabilityPoller {
    pub fn new(config: PollerConfig) -> Self {
        Self { config }
    }

    /// Poll until `gene` is available, the deadline passes
    /// ([`GeneError::Timeout`]), or `cancel` fires.
    pub async fn wait(
        &self,
        reconciler: &TransferReconciler,
        gene: &GeneId,
        manifest: &Manifest,
        progress: Arc<dyn ProgressObserver>,
        cancel: &CancellationToken,
    ) -> Result<PollSummary> {
        let start = Instant::now();
        let mut deadline = start + self.config.timeout;
        let mut summary = PollSummary {
            rounds: 0,
            waited: Duration::ZERO,
            extensions: 0,
            last_round: None,
        };

        loop {
            if cancel.is_cancelled() {
                return Err(GeneError::Cancelled);
            }
            if reconciler.remote().is_available(gene).await? {
                summary.waited = start.elapsed();
                info!(gene = %gene, rounds = summary.rounds, waited_secs = summary.waited.as_secs(), "Gene available");
                return Ok(summary);
            }
            if Instant::now() >= deadline {
                return Err(GeneError::Timeout {
                    waited: start.elapsed(),
                });
            }

            debug!(gene = %gene, interval_ms = self.config.interval.as_millis() as u64, "Gene not available yet");
            tokio::select! {
                _ = cancel.cancelled() => return Err(GeneError::Cancelled),
                _ = tokio::time::sleep(self.config.interval) => {}
            }

            let report = reconciler
                .reconcile(gene, manifest, Arc::clone(&progress), cancel)
                .await?;
            summary.rounds += 1;
            if report.made_progress() {
                // Sliding window: idle time after the last progress is bounded.
                deadline = deadline.max(Instant::now() + self.config.timeout);
                summary.extensions += 1;
                debug!(gene = %gene, uploaded = report.uploaded.len(), "Progress made, extending deadline");
            }
            summary.last_round = Some(report);
        }
    }
}
