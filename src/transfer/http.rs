//! [`RemoteStore`] over HTTP/JSON.

use crate::error::{GeneError, Result};
use crate::pack::digest::{ChunkDigest, GeneId};
use crate::pack::manifest::Manifest;
use crate::transfer::remote::{PutOutcome, RemoteStatus, RemoteStore, UploadGrant};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry schedule for server errors and connection failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(16))
    }
}

/// Retry `make_request` on 5xx responses and transport errors
/// (1s, 2s, 4s with the default policy). The last response or error is
/// returned once the retries are used up.
pub async fn retry_request<F, Fut>(policy: RetryPolicy, mut make_request: F) -> reqwest::Result<Response>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = reqwest::Result<Response>>,
{
    let mut attempt = 0;

    loop {
        match make_request().await {
            Ok(response) if response.status().is_server_error() => {
                attempt += 1;
                if attempt > policy.max_retries {
                    return Ok(response);
                }
                let delay = policy.delay(attempt);
                warn!(status = %response.status(), delay_ms = delay.as_millis() as u64, "Server error, retrying");
                tokio::time::sleep(delay).await;
            }
            Ok(response) => return Ok(response),
            Err(e) => {
                attempt += 1;
                if attempt > policy.max_retries {
                    return Err(e);
                }
                let delay = policy.delay(attempt);
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "Request failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[derive(Clone)]
pub struct HttpRemoteStore {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    retry: RetryPolicy,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        // Relative joins only append when the base ends in '/'.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| GeneError::Config(format!("invalid server URL {base_url:?}: {e}")))?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("genepack/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url,
            token,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| GeneError::Config(format!("failed to build URL for {path}: {e}")))
    }

    fn gene_path(gene: &GeneId) -> String {
        format!("genes/{}", gene.to_hex())
    }

    fn part_path(gene: &GeneId, chunk: &ChunkDigest, action: &str) -> String {
        format!("genes/{}/parts/{}/{}", gene.to_hex(), chunk.to_hex(), action)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send<F>(&self, make: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        Ok(retry_request(self.retry, || make().send()).await?)
    }

    async fn send_json<T: DeserializeOwned, F>(&self, make: F) -> Result<T>
    where
        F: Fn() -> RequestBuilder,
    {
        let response = self.send(make).await?;
        let response = error_for_status(response).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn send_put<F>(&self, make: F) -> Result<PutOutcome>
    where
        F: Fn() -> RequestBuilder,
    {
        let response = self.send(make).await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(PutOutcome::Conflict);
        }
        error_for_status(response).await?;
        Ok(PutOutcome::Stored)
    }
}

async fn error_for_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(GeneError::Remote {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get_status(&self, gene: &GeneId) -> Result<RemoteStatus> {
        let url = self.url(&format!("{}/status", Self::gene_path(gene)))?;
        self.send_json(|| self.authorize(self.http.get(url.clone())))
            .await
    }

    async fn request_upload_grant(&self, gene: &GeneId, chunk: &ChunkDigest) -> Result<UploadGrant> {
        let url = self.url(&Self::part_path(gene, chunk, "grant"))?;
        let grant: UploadGrant = self
            .send_json(|| self.authorize(self.http.post(url.clone())))
            .await?;
        debug!(chunk = %chunk, expires_at = %grant.expires_at, "Received upload grant");
        Ok(grant)
    }

    async fn upload_bytes(&self, grant: &UploadGrant, data: Bytes) -> Result<PutOutcome> {
        let url = Url::parse(&grant.url)
            .map_err(|e| GeneError::Transport(format!("invalid grant URL {:?}: {e}", grant.url)))?;
        // Grant URLs are pre-signed and carry no bearer token.
        self.send_put(|| {
            self.http
                .put(url.clone())
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(data.clone())
        })
        .await
    }

    async fn confirm_chunk(&self, gene: &GeneId, chunk: &ChunkDigest) -> Result<PutOutcome> {
        let url = self.url(&Self::part_path(gene, chunk, "confirm"))?;
        self.send_put(|| self.authorize(self.http.post(url.clone())))
            .await
    }

    async fn declare_manifest(&self, gene: &GeneId, manifest: &Manifest) -> Result<()> {
        let url = self.url(&format!("{}/manifest", Self::gene_path(gene)))?;
        let body = Bytes::from(manifest.canonical_json()?);
        let outcome = self
            .send_put(|| {
                self.authorize(self.http.put(url.clone()))
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body.clone())
            })
            .await?;
        if outcome == PutOutcome::Conflict {
            debug!(gene = %gene, "Manifest already declared");
        }
        Ok(())
    }

    async fn is_available(&self, gene: &GeneId) -> Result<bool> {
        let url = self.url(&Self::gene_path(gene))?;
        let response = self
            .send(|| self.authorize(self.http.get(url.clone())))
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::ACCEPTED | StatusCode::NOT_FOUND => Ok(false),
            _ => error_for_status(response).await.map(|_| false),
        }
    }
}
