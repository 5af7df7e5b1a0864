//! Boundary between the uploader and whatever stores genes remotely.

use crate::error::Result;
use crate::pack::digest::{ChunkDigest, GeneId};
use crate::pack::manifest::Manifest;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Remote view of one gene's parts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatus {
    /// Parts the remote holds and has verified.
    #[serde(default)]
    pub confirmed_parts: Vec<ChunkDigest>,
    /// Parts named by the declared manifest.
    #[serde(default)]
    pub declared_parts: Vec<ChunkDigest>,
}

/// Short-lived permission to upload one part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadGrant {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl UploadGrant {
    /// Validity left at `now`; zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// True when less than `threshold` of validity is left.
    pub fn needs_refresh(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.remaining(now) < threshold
    }
}

/// Result of an upload or confirm call. A conflict means another actor is
/// already handling the part, which counts as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    Conflict,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_status(&self, gene: &GeneId) -> Result<RemoteStatus>;

    async fn request_upload_grant(&self, gene: &GeneId, chunk: &ChunkDigest) -> Result<UploadGrant>;

    async fn upload_bytes(&self, grant: &UploadGrant, data: Bytes) -> Result<PutOutcome>;

    async fn confirm_chunk(&self, gene: &GeneId, chunk: &ChunkDigest) -> Result<PutOutcome>;

    /// Declare the manifest. Declaring an already-known manifest succeeds.
    async fn declare_manifest(&self, gene: &GeneId, manifest: &Manifest) -> Result<()>;

    /// True once the remote has assembled the gene.
    async fn is_available(&self, gene: &GeneId) -> Result<bool>;
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    async fn get_status(&self, gene: &GeneId) -> Result<RemoteStatus> {
        (**self).get_status(gene).await
    }

    async fn request_upload_grant(&self, gene: &GeneId, chunk: &ChunkDigest) -> Result<UploadGrant> {
        (**self).request_upload_grant(gene, chunk).await
    }

    async fn upload_bytes(&self, grant: &UploadGrant, data: Bytes) -> Result<PutOutcome> {
        (**self).upload_bytes(grant, data).await
    }

    async fn confirm_chunk(&self, gene: &GeneId, chunk: &ChunkDigest) -> Result<PutOutcome> {
        (**self).confirm_chunk(gene, chunk).await
    }

    async fn declare_manifest(&self, gene: &GeneId, manifest: &Manifest) -> Result<()> {
        (**self).declare_manifest(gene, manifest).await
    }

    async fn is_available(&self, gene: &GeneId) -> Result<bool> {
        (**self).is_available(gene).await
    }
}
