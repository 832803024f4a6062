//! Store contracts and the in-memory backend.
//!
//! Row ownership is enforced at the component level: only the skill vault
//! calls the mutating half of [`VaultStore`], and only the audit log calls
//! [`AuditStore::append`]. The audit trait exposes no update or delete.

use crate::error::StoreError;
use crate::types::{
    AuditEntry, CallerId, EncryptedKnowledge, InternalId, IpAnchorRecord, Package, PackageId,
    ShareRecord,
};

use std::collections::HashMap;
use std::sync::RwLock;

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

/// Everything written in one upload transaction.
#[derive(Clone, Debug)]
pub struct UploadTxn {
    /// The new active knowledge row.
    pub knowledge: EncryptedKnowledge,
    /// Fresh share rows (indexes 1 and 3). Empty on the legacy path.
    pub shares: Vec<ShareRecord>,
    pub anchor: IpAnchorRecord,
}

/// Transactional row operations over packages, knowledge, shares, and
/// anchors. Implementations must serialize concurrent uploads for the same
/// package; the later-committing transaction wins outright.
pub trait VaultStore: Send + Sync {
    fn find_package(&self, package_id: &PackageId) -> Result<Option<Package>, StoreError>;

    fn active_knowledge(
        &self,
        internal_id: &InternalId,
    ) -> Result<Option<EncryptedKnowledge>, StoreError>;

    fn shares(&self, internal_id: &InternalId) -> Result<Vec<ShareRecord>, StoreError>;

    fn anchors(&self, internal_id: &InternalId) -> Result<Vec<IpAnchorRecord>, StoreError>;

    /// Atomically: mark every active knowledge row for the package inactive,
    /// insert the new active row, delete all existing share rows, insert the
    /// new share rows, and record the anchor.
    fn commit_upload(&self, txn: UploadTxn) -> Result<(), StoreError>;

    /// Crypto-shred: delete every share row, then every knowledge row
    /// (active and archived). Returns `(deleted_shares, deleted_versions)`.
    /// Anchor and audit rows are untouched.
    fn purge_package(&self, internal_id: &InternalId) -> Result<(u64, u64), StoreError>;
}

/// Append-only audit rows. `append` calls for one package are serialized by
/// the audit log component; readers take no lock.
pub trait AuditStore: Send + Sync {
    fn append(&self, entry: AuditEntry) -> Result<(), StoreError>;

    /// The most recently created entry for a package, if any.
    fn latest(&self, internal_id: &InternalId) -> Result<Option<AuditEntry>, StoreError>;

    /// All entries for a package in creation order.
    fn entries(&self, internal_id: &InternalId) -> Result<Vec<AuditEntry>, StoreError>;

    /// Count of entries for `(package, caller)` created strictly after
    /// `since_ms`.
    fn count_since(
        &self,
        internal_id: &InternalId,
        caller: &CallerId,
        since_ms: i64,
    ) -> Result<u64, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// In-memory store (tests and ephemeral embedding).
#[derive(Default)]
pub struct InMemoryStore {
    packages: RwLock<HashMap<String, Package>>,
    knowledge: RwLock<Vec<EncryptedKnowledge>>,
    shares: RwLock<Vec<ShareRecord>>,
    anchors: RwLock<Vec<IpAnchorRecord>>,
    audit: RwLock<Vec<AuditEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a package row (package creation itself is external).
    pub fn register_package(&self, package: Package) {
        let mut packages = self.packages.write().unwrap();
        packages.insert(package.package_id.as_str().to_string(), package);
    }

    /// All knowledge rows for a package, newest last (tests and tooling).
    pub fn knowledge_rows(&self, internal_id: &InternalId) -> Vec<EncryptedKnowledge> {
        self.knowledge
            .read()
            .unwrap()
            .iter()
            .filter(|k| &k.internal_id == internal_id)
            .cloned()
            .collect()
    }
}

impl VaultStore for InMemoryStore {
    fn find_package(&self, package_id: &PackageId) -> Result<Option<Package>, StoreError> {
        let packages = self.packages.read().unwrap();
        Ok(packages.get(package_id.as_str()).cloned())
    }

    fn active_knowledge(
        &self,
        internal_id: &InternalId,
    ) -> Result<Option<EncryptedKnowledge>, StoreError> {
        let knowledge = self.knowledge.read().unwrap();
        Ok(knowledge
            .iter()
            .find(|k| &k.internal_id == internal_id && k.is_active)
            .cloned())
    }

    fn shares(&self, internal_id: &InternalId) -> Result<Vec<ShareRecord>, StoreError> {
        let shares = self.shares.read().unwrap();
        Ok(shares
            .iter()
            .filter(|s| &s.internal_id == internal_id)
            .cloned()
            .collect())
    }

    fn anchors(&self, internal_id: &InternalId) -> Result<Vec<IpAnchorRecord>, StoreError> {
        let anchors = self.anchors.read().unwrap();
        Ok(anchors
            .iter()
            .filter(|a| &a.internal_id == internal_id)
            .cloned()
            .collect())
    }

    fn commit_upload(&self, txn: UploadTxn) -> Result<(), StoreError> {
        // Lock order: knowledge, shares, anchors. Holding all three for the
        // duration makes the commit atomic and serializes uploads.
        let mut knowledge = self.knowledge.write().unwrap();
        let mut shares = self.shares.write().unwrap();
        let mut anchors = self.anchors.write().unwrap();

        let internal_id = txn.knowledge.internal_id.clone();
        for row in knowledge.iter_mut() {
            if row.internal_id == internal_id {
                row.is_active = false;
            }
        }
        knowledge.push(txn.knowledge);

        shares.retain(|s| s.internal_id != internal_id);
        shares.extend(txn.shares);

        anchors.push(txn.anchor);
        Ok(())
    }

    fn purge_package(&self, internal_id: &InternalId) -> Result<(u64, u64), StoreError> {
        let mut knowledge = self.knowledge.write().unwrap();
        let mut shares = self.shares.write().unwrap();

        let shares_before = shares.len();
        shares.retain(|s| &s.internal_id != internal_id);
        let deleted_shares = (shares_before - shares.len()) as u64;

        let knowledge_before = knowledge.len();
        knowledge.retain(|k| &k.internal_id != internal_id);
        let deleted_versions = (knowledge_before - knowledge.len()) as u64;

        Ok((deleted_shares, deleted_versions))
    }
}

impl AuditStore for InMemoryStore {
    fn append(&self, entry: AuditEntry) -> Result<(), StoreError> {
        let mut audit = self.audit.write().unwrap();
        audit.push(entry);
        Ok(())
    }

    fn latest(&self, internal_id: &InternalId) -> Result<Option<AuditEntry>, StoreError> {
        let audit = self.audit.read().unwrap();
        Ok(audit
            .iter()
            .rev()
            .find(|e| &e.internal_id == internal_id)
            .cloned())
    }

    fn entries(&self, internal_id: &InternalId) -> Result<Vec<AuditEntry>, StoreError> {
        let audit = self.audit.read().unwrap();
        Ok(audit
            .iter()
            .filter(|e| &e.internal_id == internal_id)
            .cloned()
            .collect())
    }

    fn count_since(
        &self,
        internal_id: &InternalId,
        caller: &CallerId,
        since_ms: i64,
    ) -> Result<u64, StoreError> {
        let audit = self.audit.read().unwrap();
        Ok(audit
            .iter()
            .filter(|e| {
                &e.internal_id == internal_id && &e.caller_id == caller && e.created_at > since_ms
            })
            .count() as u64)
    }
}
