//! Deposit verification worker.
//!
//! Tasks arrive from the webhook once a deposit crosses the confirmation
//! threshold. The worker re-verifies against the chain itself rather than
//! trusting the webhook body, retries transient trouble with exponential
//! backoff, and leaves an audit trail for everything it cannot resolve.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use chain_connectors::{ChainVerifier, VerificationReport, VerificationStatus};
use fanledger_core::{
    BalanceDeltas, LedgerError, LedgerResult, Notifier, NotifyEvent, TransactionId, TxStatus,
};
use fanledger_database::DatabaseManager;
use wallet_ledger::{
    advance_status_in, apply_deltas_in, lock_transaction_in, map_db_err, merge_metadata_in,
    record_audit_in, update_deposit_progress_in,
};

/// Work item: one deposit past the webhook threshold.
#[derive(Debug, Clone)]
pub struct DepositTask {
    pub transaction_id: TransactionId,
    pub tx_hash: String,
}

/// Exponential backoff schedule for verification attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given 1-based attempt: base doubled per attempt,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let millis = self.base_delay.as_millis().saturating_mul(1u128 << exp);
        Duration::from_millis(millis.min(self.max_delay.as_millis()) as u64)
    }
}

/// Drives a queued deposit to `confirmed` or `failed`, or records a stall.
pub struct DepositWorker {
    db: Arc<DatabaseManager>,
    verifier: Arc<dyn ChainVerifier>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

impl DepositWorker {
    pub fn new(
        db: Arc<DatabaseManager>,
        verifier: Arc<dyn ChainVerifier>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            db,
            verifier,
            notifier,
            retry,
        }
    }

    /// Worker-pool entry point; failures are logged, never propagated.
    pub async fn process(&self, task: DepositTask) {
        if let Err(err) = self.drive(&task).await {
            error!(
                transaction_id = %task.transaction_id,
                tx_hash = %task.tx_hash,
                error = %err,
                "deposit verification aborted"
            );
        }
    }

    #[instrument(skip(self, task), fields(tx_hash = %task.tx_hash))]
    async fn drive(&self, task: &DepositTask) -> LedgerResult<()> {
        for attempt in 1..=self.retry.max_attempts {
            match self.verifier.verify_transaction(&task.tx_hash).await {
                Ok(report) => match report.status {
                    VerificationStatus::Confirmed => {
                        match self.credit_verified(task, &report).await {
                            Ok(notification) => {
                                if let Some(event) = notification {
                                    if let Err(err) = self.notifier.notify(event).await {
                                        warn!(error = %err, "deposit notification failed");
                                    }
                                }
                                return Ok(());
                            }
                            // Credit is idempotent behind the pending
                            // re-check, so a transient failure just retries.
                            Err(err) => warn!(attempt, error = %err, "deposit credit failed"),
                        }
                    }
                    VerificationStatus::Failed => {
                        return self
                            .mark_failed(task, "provider reported on-chain failure", json!({}))
                            .await;
                    }
                    VerificationStatus::Pending => {
                        debug!(
                            attempt,
                            confirmations = report.confirmations,
                            "deposit still confirming"
                        );
                    }
                },
                Err(err) => {
                    warn!(attempt, error = %err, "verification attempt failed");
                }
            }
            if attempt < self.retry.max_attempts {
                sleep(self.retry.delay_for(attempt)).await;
            }
        }
        self.record_stalled(task).await
    }

    /// One transaction: lock the row, re-check `pending`, credit the wallet,
    /// flip to `confirmed`, audit.
    async fn credit_verified(
        &self,
        task: &DepositTask,
        report: &VerificationReport,
    ) -> LedgerResult<Option<NotifyEvent>> {
        let mut tx = self.db.pool().begin().await.map_err(map_db_err)?;
        let record = lock_transaction_in(&mut tx, task.transaction_id).await?;
        if TxStatus::parse(&record.status)? != TxStatus::Pending {
            tx.rollback().await.map_err(map_db_err)?;
            debug!(status = %record.status, "deposit no longer pending, nothing to do");
            return Ok(None);
        }
        let user_id = record.user_id.ok_or_else(|| {
            LedgerError::storage(format!("deposit {} has no user attached", record.id))
        })?;

        if report.amount != record.amount {
            drop(tx);
            warn!(
                expected = %record.amount,
                verified = %report.amount,
                "deposit amount does not match the chain"
            );
            return self
                .mark_failed(
                    task,
                    "amount mismatch",
                    json!({ "expected": record.amount, "verified": report.amount }),
                )
                .await
                .map(|_| None);
        }

        update_deposit_progress_in(&mut tx, record.id, report.confirmations, report.block_number)
            .await?;
        let deltas = BalanceDeltas {
            deposit: record.amount,
            ..Default::default()
        };
        apply_deltas_in(&mut tx, user_id, &deltas).await?;
        advance_status_in(&mut tx, &record, TxStatus::Confirmed).await?;
        record_audit_in(
            &mut tx,
            None,
            "deposit.credited",
            Some(("transaction", record.id)),
            json!({ "tx_hash": task.tx_hash, "user_id": user_id, "amount": record.amount }),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        counter!("deposits_confirmed_total", 1);
        info!(%user_id, amount = %record.amount, "deposit credited");

        Ok(Some(NotifyEvent::DepositConfirmed {
            user_id,
            amount: record.amount,
            currency: record.currency.clone(),
            tx_hash: task.tx_hash.clone(),
        }))
    }

    /// Marks a still-pending deposit `failed` for operator review.
    async fn mark_failed(
        &self,
        task: &DepositTask,
        reason: &str,
        details: serde_json::Value,
    ) -> LedgerResult<()> {
        let mut tx = self.db.pool().begin().await.map_err(map_db_err)?;
        let record = lock_transaction_in(&mut tx, task.transaction_id).await?;
        if TxStatus::parse(&record.status)? != TxStatus::Pending {
            tx.rollback().await.map_err(map_db_err)?;
            return Ok(());
        }
        advance_status_in(&mut tx, &record, TxStatus::Failed).await?;
        merge_metadata_in(&mut tx, record.id, json!({ "failure": reason })).await?;
        let mut audit = json!({ "tx_hash": task.tx_hash, "reason": reason });
        if let (Some(audit_map), Some(detail_map)) = (audit.as_object_mut(), details.as_object()) {
            for (key, value) in detail_map {
                audit_map.insert(key.clone(), value.clone());
            }
        }
        record_audit_in(
            &mut tx,
            None,
            "deposit.failed",
            Some(("transaction", record.id)),
            audit,
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        counter!("deposits_failed_total", 1);
        warn!(transaction_id = %task.transaction_id, reason, "deposit marked failed");
        Ok(())
    }

    /// All attempts spent: the row stays `pending`, the stall is audited so
    /// operators can pick it up.
    async fn record_stalled(&self, task: &DepositTask) -> LedgerResult<()> {
        let mut tx = self.db.pool().begin().await.map_err(map_db_err)?;
        let record = lock_transaction_in(&mut tx, task.transaction_id).await?;
        if TxStatus::parse(&record.status)? != TxStatus::Pending {
            tx.rollback().await.map_err(map_db_err)?;
            return Ok(());
        }
        record_audit_in(
            &mut tx,
            None,
            "deposit.stalled",
            Some(("transaction", record.id)),
            json!({ "tx_hash": task.tx_hash, "attempts": self.retry.max_attempts }),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        counter!("deposits_stalled_total", 1);
        warn!(
            transaction_id = %task.transaction_id,
            attempts = self.retry.max_attempts,
            "deposit verification exhausted retries"
        );
        Ok(())
    }
}
