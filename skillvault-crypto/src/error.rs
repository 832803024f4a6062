//! Error types for the crypto crate.

use std::fmt;

// ---------------------------------------------------------------------------
// Uniform primitive errors
// ---------------------------------------------------------------------------

/// AEAD seal / framing failure. Carries no detail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SealError;

impl fmt::Display for SealError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "encryption failed")
    }
}

impl std::error::Error for SealError {}

/// AEAD open / framing failure. Uniform for all causes so callers cannot
/// distinguish a bad tag from a malformed frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenError;

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decryption failed")
    }
}

impl std::error::Error for OpenError {}

// ---------------------------------------------------------------------------
// Key manager errors
// ---------------------------------------------------------------------------

/// Failure taxonomy for DEK generation, wrapping, and payload encryption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyError {
    /// The process has no key-encryption key loaded.
    NoKek,
    /// Wrapped-DEK blob failed authentication or framing.
    CorruptWrap,
    /// Payload blob failed authentication, framing, or UTF-8 decoding.
    CorruptCiphertext,
    /// Plaintext exceeds the configured bound.
    TooLarge { len: usize, max: usize },
    /// The system random source failed.
    Rng,
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoKek => write!(f, "no key-encryption key loaded"),
            Self::CorruptWrap => write!(f, "wrapped key failed authentication"),
            Self::CorruptCiphertext => write!(f, "ciphertext failed authentication"),
            Self::TooLarge { len, max } => {
                write!(f, "plaintext too large: {} bytes (max {})", len, max)
            }
            Self::Rng => write!(f, "random source unavailable"),
        }
    }
}

impl std::error::Error for KeyError {}

// ---------------------------------------------------------------------------
// Share splitter errors
// ---------------------------------------------------------------------------

/// Failure taxonomy for the (2,3) threshold scheme.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShareError {
    /// Fewer than the threshold number of shares were supplied.
    InsufficientShares { got: usize },
    /// The supplied shares do not belong to the same split.
    IncompatibleShares,
    /// A share failed to decode (hex, length, version, or index).
    MalformedShare,
}

impl fmt::Display for ShareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientShares { got } => {
                write!(f, "insufficient shares: got {}, need 2", got)
            }
            Self::IncompatibleShares => write!(f, "shares do not belong to the same split"),
            Self::MalformedShare => write!(f, "malformed share"),
        }
    }
}

impl std::error::Error for ShareError {}
