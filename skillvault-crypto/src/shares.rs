//! (2,3) threshold split of a DEK.
//!
//! Byte-wise Shamir over GF(256). Any two shares reconstruct the DEK
//! exactly; a single share is one point on a random degree-1 polynomial per
//! byte and reveals nothing.
//!
//! External share representation (stable hex, part of the persisted ABI):
//!   version[1] || split_id[16] || x[1] || y[32]
//!
//! `split_id` is random per split and identical across the triple, so shares
//! from different splits are rejected instead of interpolating to garbage.
//! `x` is the share index: 1 = platform, 2 = expert, 3 = backup.

use rand_core::{OsRng, RngCore};
use sharks::{Share, Sharks};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ShareError;
use crate::manager::Dek;
use crate::wire::DEK_BYTES;

pub const SHARE_VERSION: u8 = 0x01;
pub const SPLIT_ID_BYTES: usize = 16;
/// x coordinate plus one y byte per secret byte.
pub const SHARE_BODY_BYTES: usize = 1 + DEK_BYTES;
pub const SHARE_BYTES: usize = 1 + SPLIT_ID_BYTES + SHARE_BODY_BYTES; // 50

pub const THRESHOLD: u8 = 2;
pub const SHARE_COUNT: usize = 3;

pub const INDEX_PLATFORM: u8 = 1;
pub const INDEX_EXPERT: u8 = 2;
pub const INDEX_BACKUP: u8 = 3;

// ---------------------------------------------------------------------------
// Share type
// ---------------------------------------------------------------------------

/// One share of a split DEK. Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyShare {
    split_id: [u8; SPLIT_ID_BYTES],
    /// `x || y[32]`, the serialized GF(256) share.
    body: Vec<u8>,
}

impl KeyShare {
    /// Share index (the x coordinate): 1, 2, or 3.
    pub fn index(&self) -> u8 {
        self.body[0]
    }

    pub fn split_id(&self) -> &[u8; SPLIT_ID_BYTES] {
        &self.split_id
    }

    pub fn to_hex(&self) -> String {
        let mut raw = Vec::with_capacity(SHARE_BYTES);
        raw.push(SHARE_VERSION);
        raw.extend_from_slice(&self.split_id);
        raw.extend_from_slice(&self.body);
        let out = hex::encode(&raw);
        raw.zeroize();
        out
    }

    pub fn from_hex(s: &str) -> Result<Self, ShareError> {
        let mut raw = hex::decode(s.trim()).map_err(|_| ShareError::MalformedShare)?;
        let result = Self::from_raw(&raw);
        raw.zeroize();
        result
    }

    fn from_raw(raw: &[u8]) -> Result<Self, ShareError> {
        if raw.len() != SHARE_BYTES || raw[0] != SHARE_VERSION {
            return Err(ShareError::MalformedShare);
        }
        let split_id: [u8; SPLIT_ID_BYTES] = raw[1..1 + SPLIT_ID_BYTES]
            .try_into()
            .map_err(|_| ShareError::MalformedShare)?;
        let body = raw[1 + SPLIT_ID_BYTES..].to_vec();
        let index = body[0];
        if !(1..=SHARE_COUNT as u8).contains(&index) {
            return Err(ShareError::MalformedShare);
        }
        Ok(Self { split_id, body })
    }
}

impl std::fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyShare(x={})", self.index())
    }
}

// ---------------------------------------------------------------------------
// Split / reconstruct / verify
// ---------------------------------------------------------------------------

/// Split a DEK into three shares, positionally {platform, expert, backup}.
pub fn split(dek: &Dek) -> Result<[KeyShare; SHARE_COUNT], ShareError> {
    let mut split_id = [0u8; SPLIT_ID_BYTES];
    OsRng
        .try_fill_bytes(&mut split_id)
        .map_err(|_| ShareError::MalformedShare)?;

    let sharks = Sharks(THRESHOLD);
    let dealer = sharks.dealer(dek.as_bytes());

    let mut shares = dealer.take(SHARE_COUNT).map(|s| KeyShare {
        split_id,
        body: Vec::from(&s),
    });
    // The dealer hands out x = 1, 2, 3 in order.
    Ok([
        shares.next().ok_or(ShareError::MalformedShare)?,
        shares.next().ok_or(ShareError::MalformedShare)?,
        shares.next().ok_or(ShareError::MalformedShare)?,
    ])
}

/// Reconstruct the DEK from at least two shares of the same split.
pub fn reconstruct(shares: &[KeyShare]) -> Result<Dek, ShareError> {
    if shares.len() < THRESHOLD as usize {
        return Err(ShareError::InsufficientShares { got: shares.len() });
    }

    let split_id = shares[0].split_id;
    for share in &shares[1..] {
        if share.split_id != split_id {
            return Err(ShareError::IncompatibleShares);
        }
    }
    let mut seen = [false; SHARE_COUNT + 1];
    for share in shares {
        let x = share.index() as usize;
        if seen[x] {
            return Err(ShareError::IncompatibleShares);
        }
        seen[x] = true;
    }

    let parsed: Vec<Share> = shares
        .iter()
        .map(|s| Share::try_from(s.body.as_slice()).map_err(|_| ShareError::MalformedShare))
        .collect::<Result<_, _>>()?;

    let mut secret = Sharks(THRESHOLD)
        .recover(&parsed)
        .map_err(|_| ShareError::MalformedShare)?;
    let dek = Dek::from_slice(&secret).ok_or(ShareError::MalformedShare);
    secret.zeroize();
    dek
}

/// True iff the shares reconstruct exactly this DEK.
pub fn verify(shares: &[KeyShare], dek: &Dek) -> bool {
    match reconstruct(shares) {
        Ok(recovered) => recovered.ct_eq(dek),
        Err(_) => false,
    }
}
