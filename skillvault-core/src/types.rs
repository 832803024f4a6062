//! Core types: identifiers, callers, and the persisted row shapes.

use chrono::Utc;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Genesis sentinel for the per-package audit chain.
pub const GENESIS: &str = "GENESIS";

/// Current wall-clock time as Unix milliseconds, the persisted timestamp unit.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Lowercase hex SHA-256 (64 chars).
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn random_hex_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Stable external package slug.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque internal package identifier (hex-encoded random bytes).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InternalId(String);

impl InternalId {
    pub fn generate() -> Self {
        Self(random_hex_id())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated caller identity, supplied by the surrounding system.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerId(String);

impl CallerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque row identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowId(String);

impl RowId {
    pub fn generate() -> Self {
        Self(random_hex_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A caller plus the billing tier the metering collaborator consumes.
#[derive(Clone, Debug)]
pub struct Caller {
    pub id: CallerId,
    pub tier: String,
}

impl Caller {
    pub fn new(id: impl Into<String>, tier: impl Into<String>) -> Self {
        Self {
            id: CallerId::new(id),
            tier: tier.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// A marketplace package, created externally and referenced here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Package {
    pub package_id: PackageId,
    pub internal_id: InternalId,
    pub author_id: CallerId,
}

/// One encrypted version of a package's rule document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptedKnowledge {
    pub id: RowId,
    pub internal_id: InternalId,
    pub wrapped_dek: Vec<u8>,
    pub ciphertext: Vec<u8>,
    /// Hex SHA-256 of the plaintext the encryption consumed.
    pub content_hash: String,
    pub is_active: bool,
    pub created_at: i64,
}

/// Who holds a stored share.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Custodian {
    Platform,
    Backup,
}

impl fmt::Display for Custodian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Custodian::Platform => write!(f, "platform"),
            Custodian::Backup => write!(f, "backup"),
        }
    }
}

/// A stored DEK share. Share index 2 (expert) is never stored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShareRecord {
    pub id: RowId,
    pub internal_id: InternalId,
    /// 1 (platform) or 3 (backup).
    pub share_index: u8,
    /// Stable hex share representation.
    pub share_data: String,
    pub custodian: Custodian,
    pub created_at: i64,
}

/// One link of the per-package invocation hash chain. Never updated or
/// deleted, revocation included.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: RowId,
    pub internal_id: InternalId,
    pub caller_id: CallerId,
    /// Hex SHA-256 of the emitted conclusion text.
    pub conclusion_hash: String,
    /// `event_hash` of the previous entry, or `"GENESIS"`.
    pub prev_hash: String,
    /// SHA-256 over `internal_id || caller_id || conclusion_hash || prev_hash`.
    pub event_hash: String,
    pub inference_ms: Option<i64>,
    pub created_at: i64,
}

/// Provenance anchor for one upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IpAnchorRecord {
    pub id: RowId,
    pub internal_id: InternalId,
    pub content_hash: String,
    /// `"github:<sha>"` or `"sha256:<hex>"`.
    pub witness_ref: String,
    pub registered_at: i64,
}
