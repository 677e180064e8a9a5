//! Operation fingerprints: the cache keys for memoized pipeline work
//!
//! A fingerprint is the SHA-256 digest of the input's canonical bytes plus the
//! operation kind and its ordered parameters. Parameters are kept verbatim and
//! compared structurally, so two fingerprints only match when every parameter
//! is identical.

use crate::{codec, error::Result, types::ImageArtifact};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Cacheable operation families. Each has its own cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Background removal with optional color replacement and edge blur
    RemoveBackground,
    /// Generative background swap
    SwapBackground,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemoveBackground => write!(f, "remove-background"),
            Self::SwapBackground => write!(f, "swap-background"),
        }
    }
}

/// One operation parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamValue {
    /// An optional parameter that was not supplied
    Absent,
    Text(String),
    Int(i64),
    UInt(u64),
}

impl From<Option<&str>> for ParamValue {
    fn from(value: Option<&str>) -> Self {
        value.map_or(Self::Absent, |s| Self::Text(s.to_string()))
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::UInt(u64::from(value))
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl ParamValue {
    fn feed(&self, hasher: &mut Sha256) {
        match self {
            Self::Absent => hasher.update([0u8]),
            Self::Text(s) => {
                hasher.update([1u8]);
                hasher.update((s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            },
            Self::Int(v) => {
                hasher.update([3u8]);
                hasher.update(v.to_le_bytes());
            },
            Self::UInt(v) => {
                hasher.update([2u8]);
                hasher.update(v.to_le_bytes());
            },
        }
    }
}

/// Identity of one cacheable unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationFingerprint {
    kind: OperationKind,
    image_digest: [u8; 32],
    params: Vec<ParamValue>,
}

impl OperationFingerprint {
    /// Build from already-encoded canonical bytes
    #[must_use]
    pub fn new(kind: OperationKind, canonical_bytes: &[u8], params: Vec<ParamValue>) -> Self {
        let image_digest: [u8; 32] = Sha256::digest(canonical_bytes).into();
        Self {
            kind,
            image_digest,
            params,
        }
    }

    /// Encode `artifact` canonically and fingerprint it
    ///
    /// # Errors
    /// - Canonical encoding failure
    pub fn for_artifact(
        kind: OperationKind,
        artifact: &ImageArtifact,
        params: Vec<ParamValue>,
    ) -> Result<Self> {
        let bytes = codec::encode_canonical(artifact)?;
        Ok(Self::new(kind, &bytes, params))
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    #[must_use]
    pub fn params(&self) -> &[ParamValue] {
        &self.params
    }

    /// Hex digest over kind, image digest and parameters
    #[must_use]
    pub fn digest_hex(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.to_string().as_bytes());
        hasher.update(self.image_digest);
        for param in &self.params {
            param.feed(&mut hasher);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Short identifier for log lines
    #[must_use]
    pub fn short_hex(&self) -> String {
        let mut hex = self.digest_hex();
        hex.truncate(12);
        hex
    }
}

impl std::fmt::Display for OperationFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.short_hex())
    }
}
