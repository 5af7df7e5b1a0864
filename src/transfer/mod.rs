//! Resumable upload of packed genes.
//!
//! # Architecture
//!
//! ```text
//! +-------------+     +--------------------+     +--------------------+
//! | GenePusher  | --> | TransferReconciler | --> | AvailabilityPoller |
//! | (declare)   |     | (diff + upload)    |     | (wait, re-round)   |
//! +-------------+     +--------------------+     +--------------------+
//!                               |
//!                          WorkerPool
//!                               |
//!                          RemoteStore (HTTP or in-memory)
//! ```

pub mod http;
pub mod pipeline;
pub mod poller;
pub mod pool;
pub mod reconciler;
pub mod remote;

pub use http::{retry_request, HttpRemoteStore, RetryPolicy};
pub use pipeline::{GenePusher, PushOptions, PushSummary};
pub use poller::{AvailabilityPoller, PollSummary, PollerConfig};
pub use pool::WorkerPool;
pub use reconciler::{
    ReconcilerConfig, TransferPhase, TransferReconciler, TransferReport, DEFAULT_PARALLELISM,
    GRANT_REFRESH_THRESHOLD,
};
pub use remote::{PutOutcome, RemoteStatus, RemoteStore, UploadGrant};
