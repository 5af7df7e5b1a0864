//! Content digests used for chunk names and gene identities.
//!
//! Chunks are named by SHA-1 (`sha1:<hex>`), genes by the SHA-256 of their
//! canonical manifest (`sha256:<hex>`).

use crate::error::{GeneError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;

/// File extension of sealed chunk files.
pub const CHUNK_EXTENSION: &str = "part";

const SHA1_PREFIX: &str = "sha1:";
const SHA256_PREFIX: &str = "sha256:";

/// SHA-1 digest of one chunk's bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkDigest([u8; 20]);

impl ChunkDigest {
    pub fn compute(data: &[u8]) -> Self {
        let mut running = RunningDigest::new();
        running.update(data);
        running.finalize()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Name of the sealed chunk file inside a gene directory.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.to_hex(), CHUNK_EXTENSION)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for ChunkDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SHA1_PREFIX, self.to_hex())
    }
}

impl fmt::Debug for ChunkDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkDigest({})", &self.to_hex()[..12])
    }
}

impl FromStr for ChunkDigest {
    type Err = GeneError;

    fn from_str(s: &str) -> Result<Self> {
        let hex_part = s
            .strip_prefix(SHA1_PREFIX)
            .ok_or_else(|| GeneError::InvalidDigest(format!("expected sha1: prefix in {s:?}")))?;
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex_part, &mut bytes)
            .map_err(|e| GeneError::InvalidDigest(format!("{s:?}: {e}")))?;
        Ok(Self(bytes))
    }
}

impl Serialize for ChunkDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChunkDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental SHA-1 accumulator for the chunk currently being written.
///
/// One accumulator lives per open chunk; [`RunningDigest::finalize`] consumes
/// it, so a fresh one must be started for the next chunk.
#[derive(Clone, Default)]
pub struct RunningDigest {
    hasher: Sha1,
    len: u64,
}

impl RunningDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.len += data.len() as u64;
    }

    /// Bytes hashed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finalize(self) -> ChunkDigest {
        ChunkDigest(self.hasher.finalize().into())
    }
}

/// Content identity of a packed gene: SHA-256 of its canonical manifest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeneId([u8; 32]);

impl GeneId {
    pub fn compute(canonical_manifest: &[u8]) -> Self {
        Self(Sha256::digest(canonical_manifest).into())
    }

    /// Hex digest without the algorithm tag; also the gene's directory name.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a bare 64-character hex digest (a gene directory name).
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| GeneError::InvalidDigest(format!("{s:?}: {e}")))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for GeneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SHA256_PREFIX, self.to_hex())
    }
}

impl fmt::Debug for GeneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GeneId({})", &self.to_hex()[..12])
    }
}

impl FromStr for GeneId {
    type Err = GeneError;

    /// Accepts `sha256:<hex>` or the bare hex digest.
    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s.strip_prefix(SHA256_PREFIX).unwrap_or(s))
    }
}
