//! # Skillvault Core
//!
//! Security core for a marketplace of human-authored decision rules.
//! Creators upload rule documents; callers invoke them and receive only
//! sanitized verdicts. Rule plaintext never leaves the process: not to
//! operators, not to external models (outside the author's own lab
//! preview), not through the audit trail, and not after revocation.
//!
//! Built on `skillvault-crypto` for envelope encryption, (2,3) threshold
//! key shares, and zeroizing secure scopes.
//!
//! ## Quick Start
//!
//! ```ignore
//! use skillvault_core::*;
//! use skillvault_crypto::KeyManager;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = CoreConfig::from_env().unwrap();
//! config.validate().unwrap();
//!
//! let store = Arc::new(InMemoryStore::new());
//! let keys = Arc::new(
//!     KeyManager::new(config.kek().unwrap()).with_plaintext_limit(config.plaintext_max_bytes),
//! );
//! let anchor = IpAnchor::new(None, config.ip_anchor_hmac_secret.clone().map(String::into_bytes));
//!
//! let vault = SkillVault::new(store.clone(), keys.clone(), anchor);
//! let pipeline = InvocationPipeline::new(
//!     store.clone(), store.clone(), keys, Arc::new(UnmeteredQuota), None, &config,
//! );
//!
//! // Author uploads; the expert share comes back exactly once.
//! let author = Caller::new("author-1", "pro");
//! let pkg = PackageId::new("pricing-advisor");
//! let expert_share = vault.upload(&author, &pkg, r#"[{"id":"r1", ...}]"#).await.unwrap();
//!
//! // A caller invokes with the expert share and gets a sanitized verdict.
//! let caller = Caller::new("agent-7", "free");
//! let out = pipeline
//!     .invoke(&caller, &pkg, "B2B SaaS startup", Some(expert_share.as_str()), None)
//!     .await
//!     .unwrap();
//! assert_eq!(out.mode.as_str(), "local");
//! # });
//! ```

pub mod anchor;
pub mod audit;
pub mod config;
pub mod error;
pub mod llm;
pub mod metering;
pub mod pipeline;
pub mod rules;
pub mod store;
pub mod types;
pub mod vault;

// Re-export main types for convenience
pub use anchor::{IpAnchor, WitnessBackend, WitnessError};
pub use audit::AuditLog;
pub use config::{ConfigError, CoreConfig, WitnessBackendKind};
pub use error::{StoreError, VaultError};
pub use llm::{PolishError, Polisher, StaticPolisher};
pub use metering::{MeterQueue, Metering, UnmeteredQuota, UsageRecord};
pub use pipeline::{Conclusion, InvocationPipeline, Mode, NOTICE_HYBRID, NOTICE_LAB, NOTICE_LOCAL};
pub use rules::{DimensionScore, Evaluation, Rule, Verdict};
pub use store::{AuditStore, InMemoryStore, UploadTxn, VaultStore};
pub use types::{
    AuditEntry, Caller, CallerId, Custodian, EncryptedKnowledge, InternalId, IpAnchorRecord,
    Package, PackageId, ShareRecord, GENESIS,
};
pub use vault::{ExpertShare, RevokeOutcome, SkillVault};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event_hash;
    use crate::types::{now_ms, sha256_hex, RowId};
    use async_trait::async_trait;
    use skillvault_crypto::KeyManager;
    use std::sync::{Arc, Mutex};

    const STARTUP_RULES: &str = r#"[
        {"id":"r1","dimension":"market_fit","condition":{"keywords":["B2B","SaaS"]},"conclusion":"strong","weight":0.9},
        {"id":"r2","dimension":"market_fit","condition":{"keywords":["niche"]},"conclusion":"weak","weight":0.4},
        {"id":"r3","dimension":"team","condition":{},"conclusion":"unknown","weight":0.5}
    ]"#;
    const STARTUP_QUERY: &str = "This is a B2B SaaS startup.";

    fn test_config() -> CoreConfig {
        CoreConfig {
            kek_hex: Some("ab".repeat(32)),
            ip_anchor_hmac_secret: Some("test-anchor-secret".into()),
            ..CoreConfig::default()
        }
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        vault: SkillVault,
        pipeline: InvocationPipeline,
        author: Caller,
        package_id: PackageId,
        internal_id: InternalId,
    }

    fn harness() -> Harness {
        harness_with(test_config(), None, Arc::new(UnmeteredQuota))
    }

    fn harness_with(
        config: CoreConfig,
        polisher: Option<Arc<dyn Polisher>>,
        metering: Arc<dyn Metering>,
    ) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let keys = Arc::new(
            KeyManager::new(config.kek().unwrap()).with_plaintext_limit(config.plaintext_max_bytes),
        );
        let anchor = IpAnchor::new(
            None,
            config.ip_anchor_hmac_secret.clone().map(String::into_bytes),
        );
        let vault = SkillVault::new(store.clone(), keys.clone(), anchor);
        let pipeline = InvocationPipeline::new(
            store.clone(),
            store.clone(),
            keys,
            metering,
            polisher,
            &config,
        );

        let author = Caller::new("author-1", "pro");
        let package_id = PackageId::new("pricing-advisor");
        let internal_id = InternalId::generate();
        store.register_package(Package {
            package_id: package_id.clone(),
            internal_id: internal_id.clone(),
            author_id: author.id.clone(),
        });

        Harness {
            store,
            vault,
            pipeline,
            author,
            package_id,
            internal_id,
        }
    }

    fn stranger() -> Caller {
        Caller::new("agent-7", "free")
    }

    struct DenyQuota;

    impl Metering for DenyQuota {
        fn check_quota(&self, _caller: &Caller) -> Result<bool, StoreError> {
            Ok(false)
        }

        fn record_usage(&self, _record: UsageRecord) -> Result<(), StoreError> {
            Ok(())
        }
    }

    /// Captures every (system, user, api_key) triple it is called with.
    struct RecordingPolisher {
        reply: String,
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingPolisher {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.into(),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Polisher for RecordingPolisher {
        async fn polish(
            &self,
            system: &str,
            user: &str,
            _max_tokens: u32,
            api_key: &str,
        ) -> Result<String, PolishError> {
            self.calls
                .lock()
                .unwrap()
                .push((system.into(), user.into(), api_key.into()));
            Ok(self.reply.clone())
        }
    }

    struct FailingPolisher;

    #[async_trait]
    impl Polisher for FailingPolisher {
        async fn polish(
            &self,
            _system: &str,
            _user: &str,
            _max_tokens: u32,
            _api_key: &str,
        ) -> Result<String, PolishError> {
            Err(PolishError("upstream 500".into()))
        }
    }

    struct SleepyPolisher;

    #[async_trait]
    impl Polisher for SleepyPolisher {
        async fn polish(
            &self,
            _system: &str,
            _user: &str,
            _max_tokens: u32,
            _api_key: &str,
        ) -> Result<String, PolishError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    // === Upload ===

    #[tokio::test]
    async fn upload_leaves_one_active_row_and_two_shares() {
        let h = harness();
        let share = h
            .vault
            .upload(&h.author, &h.package_id, STARTUP_RULES)
            .await
            .unwrap();

        let rows = h.store.knowledge_rows(&h.internal_id);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_active);
        assert_eq!(rows[0].content_hash, sha256_hex(STARTUP_RULES.as_bytes()));
        assert_eq!(rows[0].wrapped_dek.len(), 60);

        let mut indexes: Vec<u8> = h
            .store
            .shares(&h.internal_id)
            .unwrap()
            .iter()
            .map(|s| s.share_index)
            .collect();
        indexes.sort_unstable();
        assert_eq!(indexes, vec![1, 3]);

        // The expert share itself is never persisted.
        assert!(h
            .store
            .shares(&h.internal_id)
            .unwrap()
            .iter()
            .all(|s| s.share_data != share.as_str()));

        let anchors = h.store.anchors(&h.internal_id).unwrap();
        assert_eq!(anchors.len(), 1);
        assert!(anchors[0].witness_ref.starts_with("sha256:"));
    }

    #[tokio::test]
    async fn second_upload_archives_and_invalidates_old_expert_share() {
        let h = harness();
        let old_share = h
            .vault
            .upload(&h.author, &h.package_id, STARTUP_RULES)
            .await
            .unwrap();
        h.vault
            .upload(&h.author, &h.package_id, "# second edition")
            .await
            .unwrap();

        let rows = h.store.knowledge_rows(&h.internal_id);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.iter().filter(|r| r.is_active).count(), 1);

        // Shares were re-issued: the old expert share no longer matches.
        let err = h
            .pipeline
            .invoke(
                &stranger(),
                &h.package_id,
                "query",
                Some(old_share.as_str()),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err, VaultError::IncompatibleShares);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let config = CoreConfig {
            plaintext_max_bytes: 64,
            ..test_config()
        };
        let h = harness_with(config, None, Arc::new(UnmeteredQuota));
        let err = h
            .vault
            .upload(&h.author, &h.package_id, &"x".repeat(65))
            .await
            .unwrap_err();
        assert_eq!(err, VaultError::TooLarge { len: 65, max: 64 });
        assert!(h.store.knowledge_rows(&h.internal_id).is_empty());
    }

    // === Read ===

    #[tokio::test]
    async fn author_reads_back_plaintext() {
        let h = harness();
        h.vault
            .upload(&h.author, &h.package_id, STARTUP_RULES)
            .await
            .unwrap();
        let plaintext = h.vault.read(&h.author, &h.package_id).await.unwrap();
        assert_eq!(plaintext, STARTUP_RULES);
    }

    #[tokio::test]
    async fn read_without_upload_is_no_knowledge() {
        let h = harness();
        let err = h.vault.read(&h.author, &h.package_id).await.unwrap_err();
        assert_eq!(err, VaultError::NoKnowledge(h.package_id.clone()));
    }

    // === Authorization (upload / read / revoke / lab preview) ===

    #[tokio::test]
    async fn author_only_operations_reject_strangers() {
        let h = harness();
        h.vault
            .upload(&h.author, &h.package_id, STARTUP_RULES)
            .await
            .unwrap();
        let intruder = stranger();

        assert_eq!(
            h.vault
                .upload(&intruder, &h.package_id, "{}")
                .await
                .unwrap_err(),
            VaultError::Forbidden
        );
        assert_eq!(
            h.vault.read(&intruder, &h.package_id).await.unwrap_err(),
            VaultError::Forbidden
        );
        assert_eq!(
            h.vault.revoke(&intruder, &h.package_id).await.unwrap_err(),
            VaultError::Forbidden
        );
        assert_eq!(
            h.pipeline
                .invoke(&intruder, &h.package_id, "q", None, Some("sk-lab"))
                .await
                .unwrap_err(),
            VaultError::Forbidden
        );
    }

    #[tokio::test]
    async fn unknown_package_is_not_found() {
        let h = harness();
        let missing = PackageId::new("no-such-package");
        assert_eq!(
            h.vault
                .upload(&h.author, &missing, "doc")
                .await
                .unwrap_err(),
            VaultError::NotFound(missing.clone())
        );
        assert_eq!(
            h.pipeline
                .invoke(&h.author, &missing, "q", None, None)
                .await
                .unwrap_err(),
            VaultError::NotFound(missing)
        );
    }

    // === Scenario A: structured evaluation, local mode ===

    #[tokio::test]
    async fn structured_evaluation_local_mode() {
        let h = harness();
        let share = h
            .vault
            .upload(&h.author, &h.package_id, STARTUP_RULES)
            .await
            .unwrap();

        let out = h
            .pipeline
            .invoke(
                &stranger(),
                &h.package_id,
                STARTUP_QUERY,
                Some(share.as_str()),
                None,
            )
            .await
            .unwrap();

        assert_eq!(out.mode, Mode::Local);
        assert_eq!(out.notice, NOTICE_LOCAL);
        assert!(out.conclusion.contains("market_fit"));
        assert!(out.conclusion.contains("6.9"));
        assert!(out.conclusion.contains("strong"));
        assert!(out.conclusion.contains("unknown"));
        assert!(out.conclusion.contains("8.5"));
        assert!(out.conclusion.contains("recommend"));
        for leaked in ["B2B", "SaaS", "niche", "r1", "weight"] {
            assert!(
                !out.conclusion.contains(leaked) && !out.notice.contains(leaked),
                "response leaked {:?}",
                leaked
            );
        }
    }

    // === Scenario B: free-form fallback ===

    #[tokio::test]
    async fn freeform_document_falls_back_to_mock() {
        let h = harness();
        let share = h
            .vault
            .upload(&h.author, &h.package_id, "# markdown")
            .await
            .unwrap();

        let query = "x".repeat(250);
        let out = h
            .pipeline
            .invoke(&stranger(), &h.package_id, &query, Some(share.as_str()), None)
            .await
            .unwrap();

        assert_eq!(out.mode, Mode::Local);
        assert!(out.conclusion.contains(&format!("{}...", "x".repeat(100))));
        assert!(!out.conclusion.contains(&"x".repeat(101)));
        assert!(!out.conclusion.contains("markdown"));
    }

    // === Scenario C: expert share required ===

    #[tokio::test]
    async fn invoke_without_share_fails_with_share_required() {
        let h = harness();
        let share = h
            .vault
            .upload(&h.author, &h.package_id, STARTUP_RULES)
            .await
            .unwrap();

        assert_eq!(
            h.pipeline
                .invoke(&stranger(), &h.package_id, "q", None, None)
                .await
                .unwrap_err(),
            VaultError::ShareRequired
        );

        let out = h
            .pipeline
            .invoke(&stranger(), &h.package_id, "q", Some(share.as_str()), None)
            .await
            .unwrap();
        assert_eq!(out.mode, Mode::Local);
    }

    #[tokio::test]
    async fn garbled_share_is_rejected() {
        let h = harness();
        h.vault
            .upload(&h.author, &h.package_id, STARTUP_RULES)
            .await
            .unwrap();
        assert_eq!(
            h.pipeline
                .invoke(&stranger(), &h.package_id, "q", Some("zz-not-hex"), None)
                .await
                .unwrap_err(),
            VaultError::MalformedShare
        );
    }

    // === Legacy path: wrapped DEK only, no shares on record ===

    #[tokio::test]
    async fn legacy_package_without_shares_unwraps_directly() {
        let h = harness();
        let config = test_config();
        let keys = KeyManager::new(config.kek().unwrap());
        let dek = keys.generate_dek().unwrap();
        h.store
            .commit_upload(UploadTxn {
                knowledge: EncryptedKnowledge {
                    id: RowId::generate(),
                    internal_id: h.internal_id.clone(),
                    wrapped_dek: keys.wrap_dek(&dek).unwrap(),
                    ciphertext: keys.encrypt("# legacy notes", &dek).unwrap(),
                    content_hash: sha256_hex(b"# legacy notes"),
                    is_active: true,
                    created_at: now_ms(),
                },
                shares: vec![],
                anchor: IpAnchorRecord {
                    id: RowId::generate(),
                    internal_id: h.internal_id.clone(),
                    content_hash: sha256_hex(b"# legacy notes"),
                    witness_ref: "sha256:00".into(),
                    registered_at: now_ms(),
                },
            })
            .unwrap();

        let out = h
            .pipeline
            .invoke(&stranger(), &h.package_id, "hello", None, None)
            .await
            .unwrap();
        assert_eq!(out.mode, Mode::Local);
        assert!(out.conclusion.contains("hello"));
    }

    // === Scenario D: hash chain ===

    #[tokio::test]
    async fn consecutive_invocations_chain_audit_rows() {
        let h = harness();
        let share = h
            .vault
            .upload(&h.author, &h.package_id, STARTUP_RULES)
            .await
            .unwrap();
        let caller = stranger();

        let first = h
            .pipeline
            .invoke(&caller, &h.package_id, "first query", Some(share.as_str()), None)
            .await
            .unwrap();
        h.pipeline
            .invoke(&caller, &h.package_id, "second query", Some(share.as_str()), None)
            .await
            .unwrap();

        let entries = h.pipeline.audit().entries(&h.internal_id).unwrap();
        assert_eq!(entries.len(), 2);
        let (e0, e1) = (&entries[0], &entries[1]);

        assert_eq!(e0.prev_hash, GENESIS);
        assert_eq!(e1.prev_hash, e0.event_hash);
        assert_eq!(e0.conclusion_hash, sha256_hex(first.conclusion.as_bytes()));
        for entry in [e0, e1] {
            assert_eq!(
                entry.event_hash,
                event_hash(
                    &entry.internal_id,
                    &entry.caller_id,
                    &entry.conclusion_hash,
                    &entry.prev_hash,
                )
            );
            assert!(entry.inference_ms.is_some());
        }
        assert!(h.pipeline.audit().verify_chain(&h.internal_id).unwrap());
    }

    // === Scenario E: revoke, then invoke ===

    #[tokio::test]
    async fn revoke_shreds_rows_but_keeps_audit() {
        let h = harness();
        let share = h
            .vault
            .upload(&h.author, &h.package_id, STARTUP_RULES)
            .await
            .unwrap();
        h.pipeline
            .invoke(&stranger(), &h.package_id, "q", Some(share.as_str()), None)
            .await
            .unwrap();

        let outcome = h.vault.revoke(&h.author, &h.package_id).await.unwrap();
        assert_eq!(outcome.deleted_shares, 2);
        assert_eq!(outcome.deleted_versions, 1);

        assert_eq!(
            h.pipeline
                .invoke(&stranger(), &h.package_id, "q", Some(share.as_str()), None)
                .await
                .unwrap_err(),
            VaultError::NoKnowledge(h.package_id.clone())
        );
        assert_eq!(
            h.vault.read(&h.author, &h.package_id).await.unwrap_err(),
            VaultError::NoKnowledge(h.package_id.clone())
        );

        assert!(h.store.knowledge_rows(&h.internal_id).is_empty());
        assert!(h.store.shares(&h.internal_id).unwrap().is_empty());
        let entries = h.pipeline.audit().entries(&h.internal_id).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(h.pipeline.audit().verify_chain(&h.internal_id).unwrap());
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let h = harness();
        h.vault
            .upload(&h.author, &h.package_id, STARTUP_RULES)
            .await
            .unwrap();
        h.vault.revoke(&h.author, &h.package_id).await.unwrap();

        let second = h.vault.revoke(&h.author, &h.package_id).await.unwrap();
        assert_eq!(second.deleted_shares, 0);
        assert_eq!(second.deleted_versions, 0);
    }

    // === Scenario F: lab preview gate leaves no audit row ===

    #[tokio::test]
    async fn rejected_lab_preview_writes_no_audit_row() {
        let h = harness();
        let share = h
            .vault
            .upload(&h.author, &h.package_id, STARTUP_RULES)
            .await
            .unwrap();

        let err = h
            .pipeline
            .invoke(
                &stranger(),
                &h.package_id,
                "q",
                Some(share.as_str()),
                Some("sk-lab-key"),
            )
            .await
            .unwrap_err();
        assert_eq!(err, VaultError::Forbidden);
        assert!(h.pipeline.audit().entries(&h.internal_id).unwrap().is_empty());
    }

    // === Rate limit and quota ===

    #[tokio::test]
    async fn rate_limit_trips_after_the_window_count() {
        let config = CoreConfig {
            rate_limit_count: 3,
            ..test_config()
        };
        let h = harness_with(config, None, Arc::new(UnmeteredQuota));
        let share = h
            .vault
            .upload(&h.author, &h.package_id, "# notes")
            .await
            .unwrap();
        let caller = stranger();

        for _ in 0..4 {
            h.pipeline
                .invoke(&caller, &h.package_id, "q", Some(share.as_str()), None)
                .await
                .unwrap();
        }
        let err = h
            .pipeline
            .invoke(&caller, &h.package_id, "q", Some(share.as_str()), None)
            .await
            .unwrap_err();
        assert_eq!(err, VaultError::RateLimited { retry_after_secs: 600 });

        // Other callers are unaffected.
        h.pipeline
            .invoke(&h.author, &h.package_id, "q", Some(share.as_str()), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn exhausted_quota_blocks_before_evaluation() {
        let h = harness_with(test_config(), None, Arc::new(DenyQuota));
        let share = h
            .vault
            .upload(&h.author, &h.package_id, "# notes")
            .await
            .unwrap();
        assert_eq!(
            h.pipeline
                .invoke(&stranger(), &h.package_id, "q", Some(share.as_str()), None)
                .await
                .unwrap_err(),
            VaultError::QuotaExceeded
        );
        assert!(h.pipeline.audit().entries(&h.internal_id).unwrap().is_empty());
    }

    // === Mode B: hybrid polishing over the safe skeleton ===

    #[tokio::test]
    async fn hybrid_mode_sends_only_the_safe_skeleton() {
        let polisher = RecordingPolisher::new("Polished advisory.");
        let config = CoreConfig {
            anthropic_key: Some("sk-platform".into()),
            ..test_config()
        };
        let h = harness_with(config, Some(polisher.clone()), Arc::new(UnmeteredQuota));
        let share = h
            .vault
            .upload(&h.author, &h.package_id, STARTUP_RULES)
            .await
            .unwrap();

        let out = h
            .pipeline
            .invoke(
                &stranger(),
                &h.package_id,
                "a consumer app",
                Some(share.as_str()),
                None,
            )
            .await
            .unwrap();

        assert_eq!(out.mode, Mode::Hybrid);
        assert_eq!(out.notice, NOTICE_HYBRID);
        assert_eq!(out.conclusion, "Polished advisory.");

        let calls = polisher.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (system, user, api_key) = &calls[0];
        assert_eq!(api_key, "sk-platform");
        assert!(user.contains("a consumer app"));
        for leaked in ["B2B", "SaaS", "niche", "r1", "weight", "condition"] {
            assert!(
                !system.contains(leaked) && !user.contains(leaked),
                "hybrid call leaked {:?}",
                leaked
            );
        }
    }

    #[tokio::test]
    async fn hybrid_failure_degrades_to_local_silently() {
        let config = CoreConfig {
            anthropic_key: Some("sk-platform".into()),
            ..test_config()
        };
        let h = harness_with(config, Some(Arc::new(FailingPolisher)), Arc::new(UnmeteredQuota));
        let share = h
            .vault
            .upload(&h.author, &h.package_id, STARTUP_RULES)
            .await
            .unwrap();

        let out = h
            .pipeline
            .invoke(&stranger(), &h.package_id, STARTUP_QUERY, Some(share.as_str()), None)
            .await
            .unwrap();
        assert_eq!(out.mode, Mode::Local);
        assert_eq!(out.notice, NOTICE_LOCAL);
        assert!(out.conclusion.contains("recommend"));
    }

    #[tokio::test(start_paused = true)]
    async fn hybrid_timeout_degrades_to_local() {
        let config = CoreConfig {
            anthropic_key: Some("sk-platform".into()),
            external_call_timeout_ms: 1_000,
            ..test_config()
        };
        let h = harness_with(config, Some(Arc::new(SleepyPolisher)), Arc::new(UnmeteredQuota));
        let share = h
            .vault
            .upload(&h.author, &h.package_id, STARTUP_RULES)
            .await
            .unwrap();

        let out = h
            .pipeline
            .invoke(&stranger(), &h.package_id, STARTUP_QUERY, Some(share.as_str()), None)
            .await
            .unwrap();
        assert_eq!(out.mode, Mode::Local);
    }

    #[tokio::test]
    async fn freeform_never_goes_hybrid() {
        let polisher = RecordingPolisher::new("should not be used");
        let config = CoreConfig {
            anthropic_key: Some("sk-platform".into()),
            ..test_config()
        };
        let h = harness_with(config, Some(polisher.clone()), Arc::new(UnmeteredQuota));
        let share = h
            .vault
            .upload(&h.author, &h.package_id, "# markdown")
            .await
            .unwrap();

        let out = h
            .pipeline
            .invoke(&stranger(), &h.package_id, "q", Some(share.as_str()), None)
            .await
            .unwrap();
        assert_eq!(out.mode, Mode::Local);
        assert!(polisher.calls.lock().unwrap().is_empty());
    }

    // === Mode C: author lab preview ===

    #[tokio::test]
    async fn lab_preview_sends_plaintext_under_the_lab_key() {
        let polisher = RecordingPolisher::new("Lab reply.");
        let h = harness_with(test_config(), Some(polisher.clone()), Arc::new(UnmeteredQuota));
        let share = h
            .vault
            .upload(&h.author, &h.package_id, STARTUP_RULES)
            .await
            .unwrap();

        let out = h
            .pipeline
            .invoke(
                &h.author,
                &h.package_id,
                "trial query",
                Some(share.as_str()),
                Some("sk-lab-key"),
            )
            .await
            .unwrap();

        assert_eq!(out.mode, Mode::LabPreview);
        assert_eq!(out.notice, NOTICE_LAB);
        assert_eq!(out.conclusion, "Lab reply.");

        let calls = polisher.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (system, user, api_key) = &calls[0];
        assert_eq!(system, STARTUP_RULES);
        assert_eq!(user, "trial query");
        assert_eq!(api_key, "sk-lab-key");

        assert_eq!(h.pipeline.audit().entries(&h.internal_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lab_preview_failure_surfaces_and_skips_audit() {
        let h = harness_with(test_config(), Some(Arc::new(FailingPolisher)), Arc::new(UnmeteredQuota));
        let share = h
            .vault
            .upload(&h.author, &h.package_id, STARTUP_RULES)
            .await
            .unwrap();

        let err = h
            .pipeline
            .invoke(
                &h.author,
                &h.package_id,
                "q",
                Some(share.as_str()),
                Some("sk-lab-key"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::ExternalUnavailable(_)));
        assert!(h.pipeline.audit().entries(&h.internal_id).unwrap().is_empty());
    }

    // === Plaintext containment across the response and audit surface ===

    #[tokio::test]
    async fn rule_content_never_reaches_response_or_audit() {
        let h = harness();
        let doc = r#"[
            {"id":"id_alpha","dimension":"axis","condition":{},"conclusion":"visible_token","weight":0.6},
            {"id":"id_kappa","dimension":"axis","condition":{"keywords":["zq_secret_token"]},"conclusion":"hidden_token","weight":0.9}
        ]"#;
        let share = h.vault.upload(&h.author, &h.package_id, doc).await.unwrap();

        let out = h
            .pipeline
            .invoke(&stranger(), &h.package_id, "unrelated", Some(share.as_str()), None)
            .await
            .unwrap();

        // The fired rule's author-chosen tokens may surface; nothing else.
        assert!(out.conclusion.contains("visible_token"));
        assert!(out.conclusion.contains("axis"));
        for field in [&out.conclusion, &out.notice] {
            for leaked in ["zq_secret_token", "hidden_token", "id_alpha", "id_kappa", "0.6", "0.9"] {
                assert!(!field.contains(leaked), "response leaked {:?}", leaked);
            }
        }

        for entry in h.pipeline.audit().entries(&h.internal_id).unwrap() {
            let row = serde_json::to_string(&entry).unwrap();
            assert!(!row.contains("zq_secret_token"));
            assert!(!row.contains("visible_token"));
        }
    }
}
