//! Persisted blob framing (v1)
//!
//! Every encrypted blob is laid out as:
//!   nonce[12] || tag[16] || ct[N]
//!
//! where N equals the plaintext length. A wrapped DEK is the same frame
//! with N = 32, i.e. 60 bytes total.

use crate::error::{OpenError, SealError};

pub const NONCE_BYTES: usize = 12;
pub const TAG_BYTES: usize = 16;
pub const DEK_BYTES: usize = 32;

/// Minimum frame: nonce + tag, zero-length ciphertext.
pub const MIN_BOX_BYTES: usize = NONCE_BYTES + TAG_BYTES;

/// Fixed size of a wrapped DEK: nonce(12) || tag(16) || ct(32).
pub const WRAPPED_DEK_BYTES: usize = NONCE_BYTES + TAG_BYTES + DEK_BYTES; // 60

/// Domain-separation AAD for DEK wrapping.
pub const WRAP_AAD: &[u8] = b"skillvault|wrap|v1";

/// Domain-separation AAD for knowledge payloads.
pub const KNOWLEDGE_AAD: &[u8] = b"skillvault|knowledge|v1";

/// Borrowed view of a parsed blob.
#[derive(Debug, Clone, Copy)]
pub struct BoxComponents<'a> {
    pub nonce: &'a [u8; NONCE_BYTES],
    pub tag: &'a [u8; TAG_BYTES],
    pub ciphertext: &'a [u8],
}

impl BoxComponents<'_> {
    /// Reassemble `ct || tag`, the order the AEAD backend consumes.
    pub fn ct_with_tag(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ciphertext.len() + TAG_BYTES);
        out.extend_from_slice(self.ciphertext);
        out.extend_from_slice(self.tag);
        out
    }
}

pub fn decode_box(data: &[u8]) -> Result<BoxComponents<'_>, OpenError> {
    if data.len() < MIN_BOX_BYTES {
        return Err(OpenError);
    }

    let nonce: &[u8; NONCE_BYTES] = data[..NONCE_BYTES].try_into().map_err(|_| OpenError)?;
    let tag: &[u8; TAG_BYTES] = data[NONCE_BYTES..MIN_BOX_BYTES]
        .try_into()
        .map_err(|_| OpenError)?;
    let ciphertext = &data[MIN_BOX_BYTES..];

    Ok(BoxComponents {
        nonce,
        tag,
        ciphertext,
    })
}

/// Frame an AEAD output (`ct || tag`) under its nonce.
pub fn encode_box(nonce: &[u8; NONCE_BYTES], ct_and_tag: &[u8]) -> Result<Vec<u8>, SealError> {
    if ct_and_tag.len() < TAG_BYTES {
        return Err(SealError);
    }
    let ct_len = ct_and_tag.len() - TAG_BYTES;

    let mut out = Vec::with_capacity(NONCE_BYTES + ct_and_tag.len());
    out.extend_from_slice(nonce);
    out.extend_from_slice(&ct_and_tag[ct_len..]);
    out.extend_from_slice(&ct_and_tag[..ct_len]);
    Ok(out)
}
