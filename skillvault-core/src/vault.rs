//! Skill vault: per-package lifecycle of encrypted knowledge and shares.
//!
//! Upload is the only writer of knowledge, share, and anchor rows; revoke is
//! the only deleter. The expert share (index 2) is returned from upload
//! exactly once and never stored.

use crate::anchor::IpAnchor;
use crate::error::VaultError;
use crate::store::{UploadTxn, VaultStore};
use crate::types::{
    now_ms, sha256_hex, Caller, Custodian, EncryptedKnowledge, IpAnchorRecord, Package, PackageId,
    RowId, ShareRecord,
};

use skillvault_crypto::{shares, with_secure, KeyManager, INDEX_BACKUP, INDEX_PLATFORM};
use std::sync::Arc;

/// The caller-held share, handed out once per upload. Deliberately not
/// `Display`/`Serialize`: the surrounding transport decides how it leaves
/// the process.
#[derive(Debug)]
pub struct ExpertShare(String);

impl ExpertShare {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RevokeOutcome {
    pub deleted_shares: u64,
    pub deleted_versions: u64,
}

pub struct SkillVault {
    store: Arc<dyn VaultStore>,
    keys: Arc<KeyManager>,
    anchor: IpAnchor,
}

impl SkillVault {
    pub fn new(store: Arc<dyn VaultStore>, keys: Arc<KeyManager>, anchor: IpAnchor) -> Self {
        Self {
            store,
            keys,
            anchor,
        }
    }

    /// Resolve a package and gate on authorship.
    fn authorize(&self, caller: &Caller, package_id: &PackageId) -> Result<Package, VaultError> {
        let package = self
            .store
            .find_package(package_id)?
            .ok_or_else(|| VaultError::NotFound(package_id.clone()))?;
        if package.author_id != caller.id {
            return Err(VaultError::Forbidden);
        }
        Ok(package)
    }

    /// Encrypt and store a new knowledge version, archive the previous one,
    /// re-split the DEK, and anchor the content hash. Returns the expert
    /// share; any previously issued expert share is now useless.
    pub async fn upload(
        &self,
        caller: &Caller,
        package_id: &PackageId,
        plaintext: &str,
    ) -> Result<ExpertShare, VaultError> {
        let package = self.authorize(caller, package_id)?;
        let internal_id = &package.internal_id;

        let dek = self
            .keys
            .generate_dek()
            .map_err(|e| VaultError::from_key_error(e, internal_id))?;
        let ciphertext = self
            .keys
            .encrypt(plaintext, &dek)
            .map_err(|e| VaultError::from_key_error(e, internal_id))?;
        let wrapped_dek = self
            .keys
            .wrap_dek(&dek)
            .map_err(|e| VaultError::from_key_error(e, internal_id))?;
        let content_hash = sha256_hex(plaintext.as_bytes());

        let [platform, expert, backup] = shares::split(&dek)?;
        drop(dek);

        let witness_ref = self
            .anchor
            .register(package_id, &content_hash, &caller.id);

        let created_at = now_ms();
        let txn = UploadTxn {
            knowledge: EncryptedKnowledge {
                id: RowId::generate(),
                internal_id: internal_id.clone(),
                wrapped_dek,
                ciphertext,
                content_hash: content_hash.clone(),
                is_active: true,
                created_at,
            },
            shares: vec![
                ShareRecord {
                    id: RowId::generate(),
                    internal_id: internal_id.clone(),
                    share_index: INDEX_PLATFORM,
                    share_data: platform.to_hex(),
                    custodian: Custodian::Platform,
                    created_at,
                },
                ShareRecord {
                    id: RowId::generate(),
                    internal_id: internal_id.clone(),
                    share_index: INDEX_BACKUP,
                    share_data: backup.to_hex(),
                    custodian: Custodian::Backup,
                    created_at,
                },
            ],
            anchor: IpAnchorRecord {
                id: RowId::generate(),
                internal_id: internal_id.clone(),
                content_hash,
                witness_ref,
                registered_at: created_at,
            },
        };
        self.store.commit_upload(txn)?;

        tracing::info!(internal_id = %internal_id, "knowledge uploaded");
        Ok(ExpertShare(expert.to_hex()))
    }

    /// Author-only plaintext read of the active version.
    pub async fn read(&self, caller: &Caller, package_id: &PackageId) -> Result<String, VaultError> {
        let package = self.authorize(caller, package_id)?;
        let internal_id = &package.internal_id;

        let knowledge = self
            .store
            .active_knowledge(internal_id)?
            .ok_or_else(|| VaultError::NoKnowledge(package_id.clone()))?;

        with_secure(
            || {
                self.keys
                    .unwrap_dek(&knowledge.wrapped_dek)
                    .map_err(|e| VaultError::from_key_error(e, internal_id))
            },
            |dek| {
                self.keys
                    .decrypt(&knowledge.ciphertext, dek)
                    .map_err(|e| VaultError::from_key_error(e, internal_id))
            },
        )
    }

    /// Crypto-shred the package: delete every share row, then every
    /// knowledge version. Idempotent; the audit log is untouched. After
    /// success no code path can produce the plaintext again.
    pub async fn revoke(
        &self,
        caller: &Caller,
        package_id: &PackageId,
    ) -> Result<RevokeOutcome, VaultError> {
        let package = self.authorize(caller, package_id)?;
        let (deleted_shares, deleted_versions) =
            self.store.purge_package(&package.internal_id)?;

        tracing::info!(
            internal_id = %package.internal_id,
            deleted_shares,
            deleted_versions,
            "knowledge revoked"
        );
        Ok(RevokeOutcome {
            deleted_shares,
            deleted_versions,
        })
    }

    /// Author-visible provenance trail for a package.
    pub async fn anchors(
        &self,
        caller: &Caller,
        package_id: &PackageId,
    ) -> Result<Vec<crate::types::IpAnchorRecord>, VaultError> {
        let package = self.authorize(caller, package_id)?;
        Ok(self.store.anchors(&package.internal_id)?)
    }
}
