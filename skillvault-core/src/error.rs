//! Error types for the core.

use crate::types::{InternalId, PackageId};
use skillvault_crypto::{KeyError, ShareError};
use std::fmt;

// ---------------------------------------------------------------------------
// Store error
// ---------------------------------------------------------------------------

/// Persistent-store I/O failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreError(pub String);

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// Top-level vault error
// ---------------------------------------------------------------------------

/// Failure taxonomy for vault and pipeline operations. The transport layer
/// maps each variant to a status code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VaultError {
    /// No such package.
    NotFound(PackageId),
    /// Author-only operation attempted by a non-author.
    Forbidden,
    /// Package has no active encrypted knowledge.
    NoKnowledge(PackageId),
    /// Threshold shares exist for this package but none was supplied.
    ShareRequired,
    InsufficientShares,
    IncompatibleShares,
    MalformedShare,
    /// Wrapped-DEK authentication failed (tampering or KEK mismatch).
    CorruptWrap(InternalId),
    /// Knowledge ciphertext authentication failed.
    CorruptCiphertext(InternalId),
    TooLarge { len: usize, max: usize },
    NoKek,
    RateLimited { retry_after_secs: u64 },
    QuotaExceeded,
    /// External language-model call failed or timed out.
    ExternalUnavailable(String),
    Store(String),
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "package not found: {}", id),
            Self::Forbidden => write!(f, "forbidden"),
            Self::NoKnowledge(id) => write!(f, "no active knowledge for package: {}", id),
            Self::ShareRequired => write!(f, "expert share required"),
            Self::InsufficientShares => write!(f, "insufficient shares"),
            Self::IncompatibleShares => write!(f, "shares do not belong to the same split"),
            Self::MalformedShare => write!(f, "malformed share"),
            Self::CorruptWrap(id) => write!(f, "wrapped key failed authentication: {}", id),
            Self::CorruptCiphertext(id) => write!(f, "ciphertext failed authentication: {}", id),
            Self::TooLarge { len, max } => {
                write!(f, "plaintext too large: {} bytes (max {})", len, max)
            }
            Self::NoKek => write!(f, "no key-encryption key loaded"),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "rate limited, retry after {}s", retry_after_secs)
            }
            Self::QuotaExceeded => write!(f, "quota exceeded"),
            Self::ExternalUnavailable(msg) => write!(f, "external model unavailable: {}", msg),
            Self::Store(msg) => write!(f, "store error: {}", msg),
        }
    }
}

impl std::error::Error for VaultError {}

impl From<StoreError> for VaultError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.0)
    }
}

impl From<ShareError> for VaultError {
    fn from(e: ShareError) -> Self {
        match e {
            ShareError::InsufficientShares { .. } => Self::InsufficientShares,
            ShareError::IncompatibleShares => Self::IncompatibleShares,
            ShareError::MalformedShare => Self::MalformedShare,
        }
    }
}

impl VaultError {
    /// Attach package context to a key-manager failure. Corrupt blobs log
    /// the internal id only; key bytes and plaintext never appear.
    pub(crate) fn from_key_error(e: KeyError, internal_id: &InternalId) -> Self {
        match e {
            KeyError::NoKek => Self::NoKek,
            KeyError::CorruptWrap => {
                tracing::error!(internal_id = %internal_id, "wrapped DEK failed authentication");
                Self::CorruptWrap(internal_id.clone())
            }
            KeyError::CorruptCiphertext => {
                tracing::error!(internal_id = %internal_id, "knowledge ciphertext failed authentication");
                Self::CorruptCiphertext(internal_id.clone())
            }
            KeyError::TooLarge { len, max } => Self::TooLarge { len, max },
            KeyError::Rng => Self::Store("random source unavailable".into()),
        }
    }
}
