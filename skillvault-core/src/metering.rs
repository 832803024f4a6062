//! Metering boundary: quota checks and best-effort usage recording.

use crate::error::StoreError;
use crate::types::{Caller, CallerId, PackageId};

use std::sync::Arc;
use tokio::sync::mpsc;

/// One recorded invocation, handed to the metering collaborator.
#[derive(Clone, Debug)]
pub struct UsageRecord {
    pub package_id: PackageId,
    pub caller_id: CallerId,
    pub tier: String,
    pub mode: String,
    pub recorded_at: i64,
}

/// External metering collaborator.
///
/// `check_quota` gates the invocation; `record_usage` is called after the
/// fact from a background queue and must tolerate replays.
pub trait Metering: Send + Sync {
    fn check_quota(&self, caller: &Caller) -> Result<bool, StoreError>;
    fn record_usage(&self, record: UsageRecord) -> Result<(), StoreError>;
}

/// Allows every caller and records nothing.
pub struct UnmeteredQuota;

impl Metering for UnmeteredQuota {
    fn check_quota(&self, _caller: &Caller) -> Result<bool, StoreError> {
        Ok(true)
    }

    fn record_usage(&self, _record: UsageRecord) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Background queue
// ---------------------------------------------------------------------------

/// Bounded fire-and-forget queue in front of `Metering::record_usage`.
/// Submission never blocks the invocation; a full queue or a failed record
/// is logged and dropped.
pub struct MeterQueue {
    tx: mpsc::Sender<UsageRecord>,
}

impl MeterQueue {
    pub fn spawn(meter: Arc<dyn Metering>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<UsageRecord>(capacity);
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = meter.record_usage(record) {
                    tracing::warn!(error = %e, "usage recording failed");
                }
            }
        });
        Self { tx }
    }

    pub fn submit(&self, record: UsageRecord) {
        if let Err(e) = self.tx.try_send(record) {
            tracing::warn!(error = %e, "usage record dropped");
        }
    }
}
