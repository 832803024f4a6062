//! Key manager: DEK generation, KEK wrapping, and payload encryption.
//!
//! The KEK is loaded once from configuration and immutable for the life of
//! the process. Every knowledge payload is encrypted under a fresh DEK; the
//! DEK is persisted only wrapped under the KEK.

use rand_core::{OsRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aead;
use crate::error::KeyError;
use crate::wire::{self, DEK_BYTES, KNOWLEDGE_AAD, WRAP_AAD, WRAPPED_DEK_BYTES};

/// Default plaintext bound, overridable via [`KeyManager::with_plaintext_limit`].
pub const DEFAULT_PLAINTEXT_MAX_BYTES: usize = 100_000;

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// Process-wide key-encryption key. Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Kek([u8; 32]);

impl Kek {
    /// Parse a 64-hex configuration value.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(|_| KeyError::NoKek)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| KeyError::NoKek)?;
        Ok(Self(arr))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Fresh random KEK, for tests and ephemeral deployments.
    pub fn generate() -> Result<Self, KeyError> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|_| KeyError::Rng)?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Kek(..)")
    }
}

/// Per-upload data-encryption key. Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Dek([u8; DEK_BYTES]);

impl Dek {
    pub fn generate() -> Result<Self, KeyError> {
        let mut bytes = [0u8; DEK_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|_| KeyError::Rng)?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; DEK_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; DEK_BYTES] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; DEK_BYTES] {
        &self.0
    }

    /// Constant-time equality.
    pub fn ct_eq(&self, other: &Dek) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl std::fmt::Debug for Dek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Dek(..)")
    }
}

// ---------------------------------------------------------------------------
// Key manager
// ---------------------------------------------------------------------------

pub struct KeyManager {
    kek: Option<Kek>,
    plaintext_max: usize,
}

impl KeyManager {
    pub fn new(kek: Kek) -> Self {
        Self {
            kek: Some(kek),
            plaintext_max: DEFAULT_PLAINTEXT_MAX_BYTES,
        }
    }

    /// A manager with no KEK. Wrapping and unwrapping fail with
    /// [`KeyError::NoKek`]; payload encryption still works.
    pub fn without_kek() -> Self {
        Self {
            kek: None,
            plaintext_max: DEFAULT_PLAINTEXT_MAX_BYTES,
        }
    }

    pub fn with_plaintext_limit(mut self, max: usize) -> Self {
        self.plaintext_max = max;
        self
    }

    pub fn plaintext_max(&self) -> usize {
        self.plaintext_max
    }

    pub fn generate_dek(&self) -> Result<Dek, KeyError> {
        Dek::generate()
    }

    /// Wrap a DEK under the process KEK: `nonce(12) || tag(16) || ct(32)`.
    pub fn wrap_dek(&self, dek: &Dek) -> Result<Vec<u8>, KeyError> {
        let kek = self.kek.as_ref().ok_or(KeyError::NoKek)?;
        let nonce = aead::nonce().map_err(|_| KeyError::Rng)?;
        let ct = aead::aead_seal(&kek.0, &nonce, dek.as_bytes(), WRAP_AAD)
            .map_err(|_| KeyError::CorruptWrap)?;
        let blob = wire::encode_box(&nonce, &ct).map_err(|_| KeyError::CorruptWrap)?;
        debug_assert_eq!(blob.len(), WRAPPED_DEK_BYTES);
        Ok(blob)
    }

    pub fn unwrap_dek(&self, blob: &[u8]) -> Result<Dek, KeyError> {
        let kek = self.kek.as_ref().ok_or(KeyError::NoKek)?;
        if blob.len() != WRAPPED_DEK_BYTES {
            return Err(KeyError::CorruptWrap);
        }
        let parts = wire::decode_box(blob).map_err(|_| KeyError::CorruptWrap)?;
        let raw = aead::aead_open(&kek.0, parts.nonce, &parts.ct_with_tag(), WRAP_AAD)
            .map_err(|_| KeyError::CorruptWrap)?;
        Dek::from_slice(&raw).ok_or(KeyError::CorruptWrap)
    }

    /// Encrypt a UTF-8 payload under a DEK: `nonce(12) || tag(16) || ct(N)`.
    pub fn encrypt(&self, plaintext: &str, dek: &Dek) -> Result<Vec<u8>, KeyError> {
        let len = plaintext.len();
        if len > self.plaintext_max {
            return Err(KeyError::TooLarge {
                len,
                max: self.plaintext_max,
            });
        }
        let nonce = aead::nonce().map_err(|_| KeyError::Rng)?;
        let ct = aead::aead_seal(&dek.0, &nonce, plaintext.as_bytes(), KNOWLEDGE_AAD)
            .map_err(|_| KeyError::CorruptCiphertext)?;
        wire::encode_box(&nonce, &ct).map_err(|_| KeyError::CorruptCiphertext)
    }

    pub fn decrypt(&self, blob: &[u8], dek: &Dek) -> Result<String, KeyError> {
        let parts = wire::decode_box(blob).map_err(|_| KeyError::CorruptCiphertext)?;
        let raw = aead::aead_open(&dek.0, parts.nonce, &parts.ct_with_tag(), KNOWLEDGE_AAD)
            .map_err(|_| KeyError::CorruptCiphertext)?;
        String::from_utf8(raw).map_err(|_| KeyError::CorruptCiphertext)
    }
}
