//! IP anchoring: record a content hash with an external timestamp witness,
//! falling back to a keyed hash when no witness is reachable.

use crate::types::{CallerId, PackageId};

use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Witness publication failure. The anchor swallows it and falls back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WitnessError(pub String);

impl fmt::Display for WitnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "witness unavailable: {}", self.0)
    }
}

impl std::error::Error for WitnessError {}

/// External public witness (e.g. a commit in a designated repository).
pub trait WitnessBackend: Send + Sync {
    /// Publish a content hash; returns the witness commit sha.
    fn publish(&self, content_hash: &str) -> Result<String, WitnessError>;
}

/// Best-effort content-hash anchoring. Never fails: when the witness is
/// unreachable (or none is configured) the anchor is a keyed
/// HMAC-SHA-256 over `package_id || content_hash || caller_id` under a
/// process secret, rendered as `sha256:<hex>`.
pub struct IpAnchor {
    backend: Option<Arc<dyn WitnessBackend>>,
    hmac_secret: Zeroizing<Vec<u8>>,
}

impl IpAnchor {
    /// `secret` is mandatory when no backend is configured; with a backend
    /// an absent secret is replaced by an ephemeral random process secret
    /// so the fallback path is always keyed.
    pub fn new(backend: Option<Arc<dyn WitnessBackend>>, secret: Option<Vec<u8>>) -> Self {
        let hmac_secret = secret.unwrap_or_else(|| {
            let mut bytes = vec![0u8; 32];
            OsRng.fill_bytes(&mut bytes);
            bytes
        });
        Self {
            backend,
            hmac_secret: Zeroizing::new(hmac_secret),
        }
    }

    pub fn register(
        &self,
        package_id: &PackageId,
        content_hash: &str,
        caller_id: &CallerId,
    ) -> String {
        if let Some(backend) = &self.backend {
            match backend.publish(content_hash) {
                Ok(sha) => return format!("github:{}", sha),
                Err(e) => {
                    tracing::debug!(package_id = %package_id, error = %e, "witness fallback");
                }
            }
        }

        let mut mac = HmacSha256::new_from_slice(&self.hmac_secret)
            .expect("HMAC accepts any key length");
        mac.update(package_id.as_str().as_bytes());
        mac.update(content_hash.as_bytes());
        mac.update(caller_id.as_str().as_bytes());
        format!("sha256:{}", hex::encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedWitness;

    impl WitnessBackend for FixedWitness {
        fn publish(&self, _content_hash: &str) -> Result<String, WitnessError> {
            Ok("abc123def".into())
        }
    }

    struct DownWitness;

    impl WitnessBackend for DownWitness {
        fn publish(&self, _content_hash: &str) -> Result<String, WitnessError> {
            Err(WitnessError("connection refused".into()))
        }
    }

    fn ids() -> (PackageId, CallerId) {
        (PackageId::new("pkg"), CallerId::new("author"))
    }

    #[test]
    fn witness_ref_uses_backend_sha() {
        let anchor = IpAnchor::new(Some(Arc::new(FixedWitness)), None);
        let (pkg, caller) = ids();
        assert_eq!(anchor.register(&pkg, "hash", &caller), "github:abc123def");
    }

    #[test]
    fn unreachable_witness_falls_back_to_keyed_hash() {
        let anchor = IpAnchor::new(Some(Arc::new(DownWitness)), Some(b"secret".to_vec()));
        let (pkg, caller) = ids();
        let witness_ref = anchor.register(&pkg, "hash", &caller);
        assert!(witness_ref.starts_with("sha256:"));
        assert_eq!(witness_ref.len(), "sha256:".len() + 64);
    }

    #[test]
    fn fallback_is_deterministic_under_one_secret() {
        let anchor = IpAnchor::new(None, Some(b"secret".to_vec()));
        let (pkg, caller) = ids();
        let a = anchor.register(&pkg, "hash", &caller);
        let b = anchor.register(&pkg, "hash", &caller);
        assert_eq!(a, b);

        let other = IpAnchor::new(None, Some(b"other-secret".to_vec()));
        assert_ne!(a, other.register(&pkg, "hash", &caller));
    }

    #[test]
    fn fallback_binds_all_three_inputs() {
        let anchor = IpAnchor::new(None, Some(b"secret".to_vec()));
        let (pkg, caller) = ids();
        let base = anchor.register(&pkg, "hash", &caller);
        assert_ne!(base, anchor.register(&PackageId::new("pkg2"), "hash", &caller));
        assert_ne!(base, anchor.register(&pkg, "hash2", &caller));
        assert_ne!(base, anchor.register(&pkg, "hash", &CallerId::new("other")));
    }
}
