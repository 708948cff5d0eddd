//! Contest cancellation and refund retry.
//!
//! Cancellation is deliberately best-effort, the opposite policy from
//! settlement: each entry is refunded in its own transaction, failures are
//! collected instead of raised, and the contest flips to `cancelled`
//! regardless so no more money can enter it. Every refund carries a
//! deterministic idempotency key, which makes the whole operation safe to
//! re-run after a crash and lets `retry_refunds` re-drive only what failed.

use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Postgres, Transaction};
use tracing::{debug, info, instrument, warn};

use fanledger_core::{
    quantize, AdminId, BalanceDeltas, ContestId, ContestStatus, EntryId, LedgerError, LedgerResult,
    NotifyEvent, TransactionId, TxKind, UserId,
};
use wallet_ledger::{
    apply_deltas_in, find_by_idempotency_key_in, find_latest_audit_in, map_db_err,
    record_audit_in, LedgerEntry,
};

use crate::lifecycle::{load_entries_in, lock_contest_in};
use crate::{refund_key, ContestEngine};

/// One refund that could not be applied; kept in the recorded summary so
/// `retry_refunds` can re-drive it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundFailure {
    pub entry_id: EntryId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub error: String,
}

/// Aggregate outcome of a cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationSummary {
    pub contest_id: ContestId,
    pub participants: u32,
    pub refunded: u32,
    pub failed: u32,
    pub total_refunded: Decimal,
    pub failures: Vec<RefundFailure>,
    /// True when the contest was already cancelled and the recorded summary
    /// was returned without writes.
    #[serde(default)]
    pub replayed: bool,
}

impl ContestEngine {
    /// Cancels a contest and refunds every entry fee to the deposit bucket.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        contest_id: ContestId,
        admin_id: AdminId,
    ) -> LedgerResult<CancellationSummary> {
        let mut tx = self.begin().await?;
        let contest = lock_contest_in(&mut tx, contest_id).await?;
        let status = ContestStatus::parse(&contest.status)?;
        match status {
            ContestStatus::Cancelled => {
                let mut summary = read_cancellation_summary_in(&mut tx, contest_id).await?;
                tx.rollback().await.map_err(map_db_err)?;
                summary.replayed = true;
                debug!(%contest_id, "cancellation replayed from the audit trail");
                return Ok(summary);
            }
            ContestStatus::Settled => return Err(LedgerError::AlreadySettled { contest_id }),
            _ => status.ensure_transition(ContestStatus::Cancelled)?,
        }

        let entries = load_entries_in(&mut tx, contest_id).await?;

        // Refunds run in their own transactions while the contest row stays
        // locked here, so a concurrent settle or cancel waits. A refund that
        // committed before a crash is skipped on re-run via its key.
        let mut refunded = 0u32;
        let mut total_refunded = Decimal::ZERO;
        let mut failures = Vec::new();
        let mut notifications = Vec::new();
        for entry in &entries {
            match self
                .refund_entry(contest_id, entry.id, entry.user_id, entry.amount_debited)
                .await
            {
                Ok(_) => {
                    refunded += 1;
                    total_refunded += entry.amount_debited;
                    notifications.push((entry.user_id, entry.amount_debited));
                }
                Err(err) => {
                    counter!("contest_refund_failures_total", 1);
                    warn!(
                        %contest_id,
                        entry_id = %entry.id,
                        user_id = %entry.user_id,
                        error = %err,
                        "entry refund failed, recorded for retry"
                    );
                    failures.push(RefundFailure {
                        entry_id: entry.id,
                        user_id: entry.user_id,
                        amount: entry.amount_debited,
                        error: err.to_string(),
                    });
                }
            }
        }

        let summary = CancellationSummary {
            contest_id,
            participants: entries.len() as u32,
            refunded,
            failed: failures.len() as u32,
            total_refunded: quantize(total_refunded),
            failures,
            replayed: false,
        };
        record_audit_in(
            &mut tx,
            Some(admin_id),
            "contest.cancelled",
            Some(("contest", contest_id)),
            serde_json::to_value(&summary)?,
        )
        .await?;
        sqlx::query("UPDATE contests SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(contest_id)
            .bind(ContestStatus::Cancelled.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        tx.commit().await.map_err(map_db_err)?;
        info!(
            %contest_id,
            participants = summary.participants,
            refunded = summary.refunded,
            failed = summary.failed,
            "contest cancelled"
        );

        self.notify_refunds(contest_id, &notifications).await;
        Ok(summary)
    }

    /// Re-drives the failed refunds recorded by [`ContestEngine::cancel`]
    /// and appends an updated summary to the audit trail.
    #[instrument(skip(self))]
    pub async fn retry_refunds(
        &self,
        contest_id: ContestId,
        admin_id: AdminId,
    ) -> LedgerResult<CancellationSummary> {
        let mut tx = self.begin().await?;
        let contest = lock_contest_in(&mut tx, contest_id).await?;
        let status = ContestStatus::parse(&contest.status)?;
        if status != ContestStatus::Cancelled {
            return Err(LedgerError::validation(format!(
                "refunds can only be retried on a cancelled contest, contest {contest_id} is {}",
                status.as_str()
            )));
        }
        let mut summary = read_cancellation_summary_in(&mut tx, contest_id).await?;
        if summary.failures.is_empty() {
            tx.rollback().await.map_err(map_db_err)?;
            summary.replayed = true;
            return Ok(summary);
        }

        let mut still_failed = Vec::new();
        let mut notifications = Vec::new();
        for failure in &summary.failures {
            match self
                .refund_entry(contest_id, failure.entry_id, failure.user_id, failure.amount)
                .await
            {
                Ok(_) => {
                    summary.refunded += 1;
                    summary.total_refunded = quantize(summary.total_refunded + failure.amount);
                    notifications.push((failure.user_id, failure.amount));
                }
                Err(err) => {
                    counter!("contest_refund_failures_total", 1);
                    warn!(
                        %contest_id,
                        entry_id = %failure.entry_id,
                        error = %err,
                        "entry refund failed again"
                    );
                    still_failed.push(RefundFailure {
                        error: err.to_string(),
                        ..failure.clone()
                    });
                }
            }
        }
        summary.failed = still_failed.len() as u32;
        summary.failures = still_failed;
        summary.replayed = false;
        record_audit_in(
            &mut tx,
            Some(admin_id),
            "contest.cancelled",
            Some(("contest", contest_id)),
            serde_json::to_value(&summary)?,
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        info!(
            %contest_id,
            refunded = summary.refunded,
            failed = summary.failed,
            "refund retry finished"
        );

        self.notify_refunds(contest_id, &notifications).await;
        Ok(summary)
    }

    /// Refunds one entry fee to the deposit bucket in its own transaction,
    /// keyed so a repeat invocation is a no-op.
    async fn refund_entry(
        &self,
        contest_id: ContestId,
        entry_id: EntryId,
        user_id: UserId,
        amount: Decimal,
    ) -> LedgerResult<TransactionId> {
        let key = refund_key(contest_id, entry_id);
        let mut tx = self.begin().await?;
        if let Some(existing) = find_by_idempotency_key_in(&mut tx, &key).await? {
            tx.rollback().await.map_err(map_db_err)?;
            debug!(%contest_id, %entry_id, "refund already recorded");
            return Ok(existing.id);
        }
        let deltas = BalanceDeltas {
            deposit: amount,
            ..Default::default()
        };
        let (wallet, _balances) = apply_deltas_in(&mut tx, user_id, &deltas).await?;
        let transaction_id = LedgerEntry::new(TxKind::Internal, amount, &wallet.currency)
            .user(user_id)
            .related("contest", contest_id)
            .idempotency_key(&key)
            .metadata(json!({ "reason": "contest_refund", "entry_id": entry_id }))
            .insert_in(&mut tx)
            .await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(transaction_id)
    }

    async fn notify_refunds(&self, contest_id: ContestId, refunds: &[(UserId, Decimal)]) {
        for (user_id, amount) in refunds {
            let event = NotifyEvent::ContestRefunded {
                user_id: *user_id,
                contest_id,
                amount: *amount,
            };
            if let Err(err) = self.notifier.notify(event).await {
                warn!(%contest_id, %user_id, error = %err, "refund notification failed");
            }
        }
    }
}

pub(crate) async fn read_cancellation_summary_in(
    tx: &mut Transaction<'static, Postgres>,
    contest_id: ContestId,
) -> LedgerResult<CancellationSummary> {
    let audit = find_latest_audit_in(tx, "contest.cancelled", contest_id)
        .await?
        .ok_or_else(|| {
            LedgerError::storage(format!(
                "cancelled contest {contest_id} has no recorded cancellation summary"
            ))
        })?;
    Ok(serde_json::from_value(audit.details)?)
}
