//! Gene manifest and its canonical serialization.

use crate::error::{GeneError, Result};
use crate::pack::codec::Format;
use crate::pack::digest::{ChunkDigest, GeneId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// File name of the manifest inside a gene directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// File name of the optional human-readable source document.
pub const SOURCE_FILE: &str = "gene.yaml";

/// Target architecture a gene was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    #[default]
    Any,
    #[serde(alias = "x86_64", alias = "amd64")]
    X64,
    #[serde(alias = "aarch64")]
    Arm64,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Any => "any",
            Architecture::X64 => "x64",
            Architecture::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = GeneError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(Architecture::Any),
            "x64" | "x86_64" | "amd64" => Ok(Architecture::X64),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            _ => Err(GeneError::UnsupportedArchitecture(s.to_string())),
        }
    }
}

/// Description of one packed gene.
///
/// Field order is the serialization order; default-valued fields are left
/// out so the canonical JSON, and therefore the identity, only depends on
/// what was actually set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub gene_type: String,
    #[serde(default, skip_serializing_if = "is_default")]
    pub format: Format,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<ChunkDigest>,
    /// Compressed size: the sum of all part lengths.
    #[serde(default, skip_serializing_if = "is_default")]
    pub size: u64,
    #[serde(default, skip_serializing_if = "is_default")]
    pub original_size: u64,
    #[serde(default, skip_serializing_if = "is_default")]
    pub architecture: Architecture,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

impl Manifest {
    pub fn canonical_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// SHA-256 of the canonical JSON.
    pub fn identity(&self) -> Result<GeneId> {
        Ok(GeneId::compute(&self.canonical_json()?))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let manifest: Manifest = serde_json::from_slice(bytes)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Distinct parts in manifest order.
    pub fn unique_parts(&self) -> Vec<ChunkDigest> {
        let mut seen = std::collections::HashSet::new();
        self.parts
            .iter()
            .filter(|digest| seen.insert(**digest))
            .copied()
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_version(&self.version)?;
        if self.parts.is_empty() && self.size != 0 {
            return Err(GeneError::Validation {
                field: "parts",
                message: format!("{} compressed bytes declared without parts", self.size),
            });
        }
        Ok(())
    }
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(GeneError::Validation {
            field: "name",
            message: "must not be empty".to_string(),
        });
    }
    if name.contains(['/', '\\']) || name.chars().any(char::is_control) {
        return Err(GeneError::Validation {
            field: "name",
            message: format!("{name:?} contains path separators or control characters"),
        });
    }
    Ok(())
}

/// Accepts `MAJOR.MINOR.PATCH` with optional `-pre` and `+build` suffixes.
pub fn validate_version(version: &str) -> Result<()> {
    let core = version
        .split_once('+')
        .map_or(version, |(core, _)| core);
    let core = core.split_once('-').map_or(core, |(core, _)| core);
    let numbers: Vec<&str> = core.split('.').collect();
    let valid = numbers.len() == 3
        && numbers
            .iter()
            .all(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
    if valid {
        Ok(())
    } else {
        Err(GeneError::Validation {
            field: "version",
            message: format!("{version:?} is not a semantic version"),
        })
    }
}
