//! # Skillvault Crypto
//!
//! Cryptographic primitives for the skill vault: envelope encryption of
//! rule documents, (2,3) threshold splitting of data-encryption keys, and
//! secure scopes that guarantee key material is zero-filled on release.
//!
//! ## Quick Start
//!
//! ```
//! use skillvault_crypto::{KeyManager, Kek, shares};
//!
//! let keys = KeyManager::new(Kek::generate().unwrap());
//! let dek = keys.generate_dek().unwrap();
//!
//! // Envelope: payload under the DEK, DEK wrapped under the KEK.
//! let blob = keys.encrypt("rule document", &dek).unwrap();
//! let wrapped = keys.wrap_dek(&dek).unwrap();
//! assert_eq!(wrapped.len(), 60);
//!
//! // Threshold: any two of the three shares recover the DEK.
//! let [platform, expert, _backup] = shares::split(&dek).unwrap();
//! let recovered = shares::reconstruct(&[platform, expert]).unwrap();
//! assert_eq!(keys.decrypt(&blob, &recovered).unwrap(), "rule document");
//! ```
//!
//! ## What's NOT Provided
//!
//! - Key persistence (callers store wrapped DEKs and shares)
//! - Streaming encryption
//! - Constant-time guarantees beyond tag and key comparison

#![deny(unsafe_code)]

mod aead;
mod manager;

pub mod error;
pub mod scope;
pub mod shares;
pub mod wire;

pub use error::{KeyError, OpenError, SealError, ShareError};
pub use manager::{Dek, Kek, KeyManager, DEFAULT_PLAINTEXT_MAX_BYTES};
pub use scope::{with_secure, with_secure_in_place};
pub use shares::{KeyShare, INDEX_BACKUP, INDEX_EXPERT, INDEX_PLATFORM, SHARE_COUNT, THRESHOLD};
pub use wire::{NONCE_BYTES, TAG_BYTES, WRAPPED_DEK_BYTES};
