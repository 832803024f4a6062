//! Invocation pipeline: a linear sequence of early-exit gates followed by
//! evaluation inside a secure scope and a chained audit append.
//!
//! Failures before evaluation never touch the audit log. Once evaluation
//! has produced a conclusion, the audit row is appended before the response
//! is returned; usage metering runs afterwards on a background queue and
//! can never fail the invocation.

use crate::audit::AuditLog;
use crate::config::CoreConfig;
use crate::error::VaultError;
use crate::llm::Polisher;
use crate::metering::{MeterQueue, Metering, UsageRecord};
use crate::rules::{evaluate, local_report, mock_freeform_response, to_safe_prompt, try_parse_rules, Evaluation};
use crate::store::{AuditStore, VaultStore};
use crate::types::{now_ms, sha256_hex, Caller, EncryptedKnowledge, InternalId, PackageId};

use skillvault_crypto::{shares, with_secure, Dek, KeyManager, KeyShare, INDEX_PLATFORM};
use std::sync::Arc;
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

pub const NOTICE_LOCAL: &str = "no data transmitted; evaluation ran locally";
pub const NOTICE_HYBRID: &str =
    "only the safe evaluation skeleton was transmitted to the external model";
pub const NOTICE_LAB: &str =
    "rule plaintext was transmitted to the external model under the author's own agreement";

const HYBRID_SYSTEM_PROMPT: &str = "You are given a pre-computed evaluation skeleton. \
     Rewrite it as a short advisory paragraph. Use only the figures and tokens provided; \
     do not invent specifics.";

const MAX_POLISH_TOKENS: u32 = 1024;

/// How the conclusion was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Local,
    Hybrid,
    LabPreview,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Local => "local",
            Mode::Hybrid => "hybrid",
            Mode::LabPreview => "lab-preview-expert-key",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invocation response. The notice always names the mode actually used.
#[derive(Clone, Debug)]
pub struct Conclusion {
    pub conclusion: String,
    pub mode: Mode,
    pub notice: String,
}

/// What the secure scope hands back for mode execution. The lab-preview
/// plaintext stays inside a zeroizing guard owned by the pipeline.
enum Prepared {
    LabPreview(Zeroizing<String>),
    Freeform,
    Structured(Evaluation),
}

pub struct InvocationPipeline {
    store: Arc<dyn VaultStore>,
    audit: AuditLog,
    keys: Arc<KeyManager>,
    metering: Arc<dyn Metering>,
    meter_queue: MeterQueue,
    polisher: Option<Arc<dyn Polisher>>,
    platform_key: Option<String>,
    rate_limit_window_ms: i64,
    rate_limit_count: u64,
    external_timeout: Duration,
}

impl InvocationPipeline {
    /// Must be constructed inside a tokio runtime (spawns the metering
    /// queue worker).
    pub fn new(
        store: Arc<dyn VaultStore>,
        audit_store: Arc<dyn AuditStore>,
        keys: Arc<KeyManager>,
        metering: Arc<dyn Metering>,
        polisher: Option<Arc<dyn Polisher>>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            store,
            audit: AuditLog::new(audit_store),
            keys,
            metering: metering.clone(),
            meter_queue: MeterQueue::spawn(metering, 64),
            polisher,
            platform_key: config.anthropic_key.clone(),
            rate_limit_window_ms: config.rate_limit_window_ms,
            rate_limit_count: config.rate_limit_count,
            external_timeout: Duration::from_millis(config.external_call_timeout_ms),
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Run one invocation end to end.
    pub async fn invoke(
        &self,
        caller: &Caller,
        package_id: &PackageId,
        query: &str,
        expert_share: Option<&str>,
        lab_key: Option<&str>,
    ) -> Result<Conclusion, VaultError> {
        // 1. Resolve.
        let package = self
            .store
            .find_package(package_id)?
            .ok_or_else(|| VaultError::NotFound(package_id.clone()))?;
        let internal_id = &package.internal_id;

        // 2. Rate limit. Advisory: the count may lag in-flight invocations
        //    because it is not atomic with the audit append.
        let cutoff = now_ms() - self.rate_limit_window_ms;
        let recent = self.audit.count_since(internal_id, &caller.id, cutoff)?;
        if recent > self.rate_limit_count {
            return Err(VaultError::RateLimited {
                retry_after_secs: (self.rate_limit_window_ms / 1000).max(0) as u64,
            });
        }

        // 3. Quota.
        if !self.metering.check_quota(caller)? {
            return Err(VaultError::QuotaExceeded);
        }

        // 4. Lab preview is author-only.
        if lab_key.is_some() && package.author_id != caller.id {
            return Err(VaultError::Forbidden);
        }

        // 5. Knowledge.
        let knowledge = self
            .store
            .active_knowledge(internal_id)?
            .ok_or_else(|| VaultError::NoKnowledge(package_id.clone()))?;

        // 6. DEK recovery inputs. With shares on record the caller must
        //    present the expert share; otherwise the wrapped DEK is the
        //    legacy path.
        let stored_shares = self.store.shares(internal_id)?;
        let expert = if stored_shares.len() >= 2 {
            let supplied = expert_share.ok_or(VaultError::ShareRequired)?;
            Some(KeyShare::from_hex(supplied)?)
        } else {
            None
        };

        // 7. Evaluate inside a single secure scope holding the DEK.
        let start = Instant::now();
        let prepared = with_secure(
            || self.recover_dek(&knowledge, &stored_shares, expert.as_ref(), internal_id),
            |dek| {
                let plaintext = Zeroizing::new(
                    self.keys
                        .decrypt(&knowledge.ciphertext, dek)
                        .map_err(|e| VaultError::from_key_error(e, internal_id))?,
                );
                if lab_key.is_some() {
                    return Ok(Prepared::LabPreview(plaintext));
                }
                Ok(match try_parse_rules(&plaintext) {
                    Some(rules) => Prepared::Structured(evaluate(&rules, query)),
                    None => Prepared::Freeform,
                })
            },
        )?;

        let (conclusion, mode, notice) = match prepared {
            Prepared::LabPreview(plaintext) => {
                let polisher = self.polisher.as_deref().ok_or_else(|| {
                    VaultError::ExternalUnavailable("no external model transport configured".into())
                })?;
                let api_key = lab_key.ok_or(VaultError::Forbidden)?;
                let reply = self
                    .polish_bounded(polisher, &plaintext, query, api_key)
                    .await?;
                (reply, Mode::LabPreview, NOTICE_LAB)
            }
            Prepared::Freeform => (mock_freeform_response(query), Mode::Local, NOTICE_LOCAL),
            Prepared::Structured(evaluation) => {
                let polished = match (self.polisher.as_deref(), self.platform_key.as_deref()) {
                    (Some(polisher), Some(api_key)) => {
                        let skeleton = to_safe_prompt(&evaluation, query);
                        match self
                            .polish_bounded(polisher, HYBRID_SYSTEM_PROMPT, &skeleton, api_key)
                            .await
                        {
                            Ok(reply) => Some(reply),
                            Err(e) => {
                                tracing::warn!(
                                    internal_id = %internal_id,
                                    error = %e,
                                    "hybrid polish failed, serving local evaluation"
                                );
                                None
                            }
                        }
                    }
                    _ => None,
                };
                match polished {
                    Some(reply) => (reply, Mode::Hybrid, NOTICE_HYBRID),
                    None => (local_report(&evaluation), Mode::Local, NOTICE_LOCAL),
                }
            }
        };
        let inference_ms = start.elapsed().as_millis() as i64;

        // 8. Audit append. Mandatory once evaluation succeeded.
        let conclusion_hash = sha256_hex(conclusion.as_bytes());
        self.audit
            .append(internal_id, &caller.id, conclusion_hash, Some(inference_ms))
            .await?;

        // 9. Metering, off the response path.
        self.meter_queue.submit(UsageRecord {
            package_id: package_id.clone(),
            caller_id: caller.id.clone(),
            tier: caller.tier.clone(),
            mode: mode.as_str().to_string(),
            recorded_at: now_ms(),
        });

        // 10. Respond.
        Ok(Conclusion {
            conclusion,
            mode,
            notice: notice.to_string(),
        })
    }

    fn recover_dek(
        &self,
        knowledge: &EncryptedKnowledge,
        stored_shares: &[crate::types::ShareRecord],
        expert: Option<&KeyShare>,
        internal_id: &InternalId,
    ) -> Result<Dek, VaultError> {
        if stored_shares.len() >= 2 {
            let expert = expert.ok_or(VaultError::ShareRequired)?;
            let platform_row = stored_shares
                .iter()
                .find(|s| s.share_index == INDEX_PLATFORM)
                .ok_or_else(|| VaultError::Store("platform share row missing".into()))?;
            let platform = KeyShare::from_hex(&platform_row.share_data)?;
            Ok(shares::reconstruct(&[platform, expert.clone()])?)
        } else {
            self.keys
                .unwrap_dek(&knowledge.wrapped_dek)
                .map_err(|e| VaultError::from_key_error(e, internal_id))
        }
    }

    async fn polish_bounded(
        &self,
        polisher: &dyn Polisher,
        system: &str,
        user: &str,
        api_key: &str,
    ) -> Result<String, VaultError> {
        match tokio::time::timeout(
            self.external_timeout,
            polisher.polish(system, user, MAX_POLISH_TOKENS, api_key),
        )
        .await
        {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(VaultError::ExternalUnavailable(e.to_string())),
            Err(_) => Err(VaultError::ExternalUnavailable(format!(
                "external call exceeded {}ms",
                self.external_timeout.as_millis()
            ))),
        }
    }
}
