//! Hash-chained invocation audit log.
//!
//! Each package carries its own append-only chain. Every entry commits to
//! the previous entry's hash, so insertion, deletion, or edits break the
//! chain detectably. Revocation never touches this log.

use crate::error::{StoreError, VaultError};
use crate::store::AuditStore;
use crate::types::{now_ms, sha256_hex, AuditEntry, CallerId, InternalId, RowId, GENESIS};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Canonical event hash: SHA-256 over the UTF-8 concatenation of
/// `internal_id || caller_id || conclusion_hash || prev_hash`, no separators.
pub fn event_hash(
    internal_id: &InternalId,
    caller_id: &CallerId,
    conclusion_hash: &str,
    prev_hash: &str,
) -> String {
    let mut preimage = String::with_capacity(
        internal_id.as_str().len()
            + caller_id.as_str().len()
            + conclusion_hash.len()
            + prev_hash.len(),
    );
    preimage.push_str(internal_id.as_str());
    preimage.push_str(caller_id.as_str());
    preimage.push_str(conclusion_hash);
    preimage.push_str(prev_hash);
    sha256_hex(preimage.as_bytes())
}

/// Append-only audit log over an [`AuditStore`].
pub struct AuditLog {
    store: Arc<dyn AuditStore>,
    /// Named append locks keyed by internal id. The read-last-then-append
    /// sequence must be serialized per package; readers take no lock.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, internal_id: &InternalId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(internal_id.as_str().to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Append one chained entry for a completed invocation.
    pub async fn append(
        &self,
        internal_id: &InternalId,
        caller_id: &CallerId,
        conclusion_hash: String,
        inference_ms: Option<i64>,
    ) -> Result<AuditEntry, VaultError> {
        let lock = self.lock_for(internal_id);
        let _guard = lock.lock().await;

        let prev_hash = self
            .store
            .latest(internal_id)?
            .map(|e| e.event_hash)
            .unwrap_or_else(|| GENESIS.to_string());
        let event_hash = event_hash(internal_id, caller_id, &conclusion_hash, &prev_hash);

        let entry = AuditEntry {
            id: RowId::generate(),
            internal_id: internal_id.clone(),
            caller_id: caller_id.clone(),
            conclusion_hash,
            prev_hash,
            event_hash,
            inference_ms,
            created_at: now_ms(),
        };
        self.store.append(entry.clone())?;
        Ok(entry)
    }

    /// All entries for a package, in creation order. Lock-free.
    pub fn entries(&self, internal_id: &InternalId) -> Result<Vec<AuditEntry>, VaultError> {
        Ok(self.store.entries(internal_id)?)
    }

    pub fn latest(&self, internal_id: &InternalId) -> Result<Option<AuditEntry>, VaultError> {
        Ok(self.store.latest(internal_id)?)
    }

    pub fn count_since(
        &self,
        internal_id: &InternalId,
        caller_id: &CallerId,
        since_ms: i64,
    ) -> Result<u64, StoreError> {
        self.store.count_since(internal_id, caller_id, since_ms)
    }

    /// Recompute every event hash from stored fields and check linkage.
    /// A `false` result is a tamper signal; the log is never repaired.
    pub fn verify_chain(&self, internal_id: &InternalId) -> Result<bool, VaultError> {
        let entries = self.store.entries(internal_id)?;
        let mut prev = GENESIS.to_string();
        for entry in entries {
            if entry.prev_hash != prev {
                return Ok(false);
            }
            let expected = event_hash(
                &entry.internal_id,
                &entry.caller_id,
                &entry.conclusion_hash,
                &entry.prev_hash,
            );
            if entry.event_hash != expected {
                return Ok(false);
            }
            prev = entry.event_hash;
        }
        Ok(true)
    }
}
