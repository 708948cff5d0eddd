//! Withdrawal request, approval and execution.
//!
//! A withdrawal moves winning funds into the held bucket when requested and
//! only out of it once the external payout settled. The payout provider is
//! called exactly once per approved withdrawal; a failed call leaves the
//! funds held and the row `failed` for an operator to resolve, because
//! blindly retrying an irreversible transfer is worse than stopping.

use std::sync::Arc;

use metrics::counter;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use chain_connectors::{PayoutExecutor, PayoutReceipt};
use fanledger_core::{
    validate_amount, AdminId, LedgerError, LedgerResult, Notifier, NotifyEvent, TransactionId,
    TxKind, TxStatus, UserId,
};
use fanledger_database::{DatabaseManager, TransactionRecord};
use wallet_ledger::{
    advance_status_in, complete_withdrawal_in, hold_for_withdrawal_in, lock_transaction_in,
    lock_wallet_in, map_db_err, merge_metadata_in, record_audit_in, release_withdrawal_hold_in,
    LedgerEntry,
};

use crate::queue::TaskQueue;

/// Work item: one approved withdrawal awaiting payout.
#[derive(Debug, Clone, Copy)]
pub struct WithdrawalTask {
    pub withdrawal_id: TransactionId,
}

/// Front of the withdrawal lifecycle: requests, approvals, rejections and
/// cancellations. Holds the queue feeding [`PayoutWorker`]; the workers
/// themselves never hold a sender, so dropping the service closes the queue.
pub struct WithdrawalService {
    db: Arc<DatabaseManager>,
    notifier: Arc<dyn Notifier>,
    queue: TaskQueue<WithdrawalTask>,
}

impl WithdrawalService {
    pub fn new(
        db: Arc<DatabaseManager>,
        notifier: Arc<dyn Notifier>,
        queue: TaskQueue<WithdrawalTask>,
    ) -> Self {
        Self {
            db,
            notifier,
            queue,
        }
    }

    /// Creates a pending withdrawal and holds the funds, atomically.
    #[instrument(skip(self))]
    pub async fn request_withdrawal(
        &self,
        user_id: UserId,
        amount: Decimal,
        destination: &str,
    ) -> LedgerResult<TransactionRecord> {
        let amount = validate_amount(amount)?;
        if destination.trim().is_empty() {
            return Err(LedgerError::validation(
                "withdrawal destination cannot be empty",
            ));
        }

        let mut tx = self.db.pool().begin().await.map_err(map_db_err)?;
        let wallet = lock_wallet_in(&mut tx, user_id).await?;
        let entry = LedgerEntry::new(TxKind::Withdrawal, amount, &wallet.currency)
            .user(user_id)
            .metadata(json!({ "destination": destination }));
        let withdrawal_id = entry.id();
        entry.insert_in(&mut tx).await?;
        hold_for_withdrawal_in(&mut tx, user_id, amount, withdrawal_id).await?;
        record_audit_in(
            &mut tx,
            None,
            "withdrawal.requested",
            Some(("transaction", withdrawal_id)),
            json!({ "user_id": user_id, "amount": amount, "destination": destination }),
        )
        .await?;
        let record = lock_transaction_in(&mut tx, withdrawal_id).await?;
        tx.commit().await.map_err(map_db_err)?;
        counter!("withdrawals_requested_total", 1);
        info!(%user_id, %withdrawal_id, %amount, "withdrawal requested");
        Ok(record)
    }

    /// Flips `pending` to `processing` and hands the withdrawal to a worker.
    /// Re-approving an already-processing withdrawal only re-queues it, so a
    /// full queue at the first attempt is recoverable.
    #[instrument(skip(self))]
    pub async fn approve(
        &self,
        withdrawal_id: TransactionId,
        admin_id: AdminId,
    ) -> LedgerResult<()> {
        let mut tx = self.db.pool().begin().await.map_err(map_db_err)?;
        let record = lock_withdrawal(&mut tx, withdrawal_id).await?;
        match TxStatus::parse(&record.status)? {
            TxStatus::Processing => {
                tx.rollback().await.map_err(map_db_err)?;
                debug!(%withdrawal_id, "already approved, re-queueing");
            }
            _ => {
                advance_status_in(&mut tx, &record, TxStatus::Processing).await?;
                record_audit_in(
                    &mut tx,
                    Some(admin_id),
                    "withdrawal.approved",
                    Some(("transaction", withdrawal_id)),
                    json!({ "amount": record.amount }),
                )
                .await?;
                tx.commit().await.map_err(map_db_err)?;
                info!(%withdrawal_id, "withdrawal approved");
            }
        }
        self.queue.enqueue(WithdrawalTask { withdrawal_id })
    }

    /// Admin decline of a pending withdrawal; the hold goes straight back.
    #[instrument(skip(self))]
    pub async fn reject(
        &self,
        withdrawal_id: TransactionId,
        admin_id: AdminId,
    ) -> LedgerResult<()> {
        let mut tx = self.db.pool().begin().await.map_err(map_db_err)?;
        let record = lock_withdrawal(&mut tx, withdrawal_id).await?;
        let user_id = record.user_id.ok_or_else(|| {
            LedgerError::storage(format!("withdrawal {withdrawal_id} has no user attached"))
        })?;
        advance_status_in(&mut tx, &record, TxStatus::Rejected).await?;
        release_withdrawal_hold_in(&mut tx, user_id, record.amount, withdrawal_id).await?;
        record_audit_in(
            &mut tx,
            Some(admin_id),
            "withdrawal.rejected",
            Some(("transaction", withdrawal_id)),
            json!({ "user_id": user_id, "amount": record.amount }),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        counter!("withdrawals_rejected_total", 1);
        info!(%withdrawal_id, %user_id, "withdrawal rejected");

        let event = NotifyEvent::WithdrawalRejected {
            user_id,
            withdrawal_id,
            amount: record.amount,
        };
        if let Err(err) = self.notifier.notify(event).await {
            warn!(%withdrawal_id, error = %err, "rejection notification failed");
        }
        Ok(())
    }

    /// User-initiated cancel of their own pending withdrawal.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        withdrawal_id: TransactionId,
        user_id: UserId,
    ) -> LedgerResult<()> {
        let mut tx = self.db.pool().begin().await.map_err(map_db_err)?;
        let record = lock_withdrawal(&mut tx, withdrawal_id).await?;
        if record.user_id != Some(user_id) {
            return Err(LedgerError::validation(format!(
                "withdrawal {withdrawal_id} does not belong to user {user_id}"
            )));
        }
        advance_status_in(&mut tx, &record, TxStatus::Cancelled).await?;
        release_withdrawal_hold_in(&mut tx, user_id, record.amount, withdrawal_id).await?;
        record_audit_in(
            &mut tx,
            None,
            "withdrawal.cancelled",
            Some(("transaction", withdrawal_id)),
            json!({ "user_id": user_id, "amount": record.amount }),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        info!(%withdrawal_id, %user_id, "withdrawal cancelled");
        Ok(())
    }
}

/// Back of the lifecycle: runs the provider payout for approved withdrawals
/// and settles the row either way.
pub struct PayoutWorker {
    db: Arc<DatabaseManager>,
    executor: Arc<dyn PayoutExecutor>,
    notifier: Arc<dyn Notifier>,
}

impl PayoutWorker {
    pub fn new(
        db: Arc<DatabaseManager>,
        executor: Arc<dyn PayoutExecutor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            executor,
            notifier,
        }
    }

    /// Worker-pool entry point; failures are logged, never propagated.
    pub async fn process(&self, task: WithdrawalTask) {
        if let Err(err) = self.execute(task.withdrawal_id).await {
            error!(
                withdrawal_id = %task.withdrawal_id,
                error = %err,
                "withdrawal execution aborted"
            );
        }
    }

    /// Runs the external payout for a processing withdrawal, then settles
    /// the row. No lock is held across the provider call.
    #[instrument(skip(self))]
    async fn execute(&self, withdrawal_id: TransactionId) -> LedgerResult<()> {
        let record = sqlx::query_as::<_, TransactionRecord>(
            "SELECT * FROM transactions WHERE id = $1",
        )
        .bind(withdrawal_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| LedgerError::not_found(format!("withdrawal {withdrawal_id}")))?;

        if TxStatus::parse(&record.status)? != TxStatus::Processing {
            debug!(%withdrawal_id, status = %record.status, "not in processing, skipping");
            return Ok(());
        }
        let user_id = record.user_id.ok_or_else(|| {
            LedgerError::storage(format!("withdrawal {withdrawal_id} has no user attached"))
        })?;
        let destination = record
            .metadata
            .get("destination")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                LedgerError::storage(format!("withdrawal {withdrawal_id} has no destination"))
            })?;

        match self
            .executor
            .execute_payout(&destination, record.amount, &record.currency)
            .await
        {
            Ok(receipt) => self.finish_completed(&record, user_id, receipt).await,
            Err(err) => self.finish_failed(&record, user_id, &err.to_string()).await,
        }
    }

    async fn finish_completed(
        &self,
        record: &TransactionRecord,
        user_id: UserId,
        receipt: PayoutReceipt,
    ) -> LedgerResult<()> {
        let mut tx = self.db.pool().begin().await.map_err(map_db_err)?;
        let locked = lock_transaction_in(&mut tx, record.id).await?;
        if TxStatus::parse(&locked.status)? != TxStatus::Processing {
            tx.rollback().await.map_err(map_db_err)?;
            warn!(withdrawal_id = %record.id, "withdrawal state changed mid-payout");
            return Ok(());
        }
        complete_withdrawal_in(&mut tx, user_id, locked.amount, locked.id).await?;
        advance_status_in(&mut tx, &locked, TxStatus::Completed).await?;
        merge_metadata_in(&mut tx, locked.id, json!({ "provider_ref": receipt.provider_ref }))
            .await?;
        record_audit_in(
            &mut tx,
            None,
            "withdrawal.completed",
            Some(("transaction", locked.id)),
            json!({
                "user_id": user_id,
                "amount": locked.amount,
                "provider_ref": receipt.provider_ref
            }),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        counter!("withdrawals_completed_total", 1);
        info!(withdrawal_id = %record.id, %user_id, amount = %locked.amount, "withdrawal completed");

        let event = NotifyEvent::WithdrawalCompleted {
            user_id,
            withdrawal_id: record.id,
            amount: locked.amount,
            provider_ref: receipt.provider_ref,
        };
        if let Err(err) = self.notifier.notify(event).await {
            warn!(withdrawal_id = %record.id, error = %err, "completion notification failed");
        }
        Ok(())
    }

    /// Provider refused or errored. Funds stay held; only the row flips so
    /// an operator can investigate before any money moves again.
    async fn finish_failed(
        &self,
        record: &TransactionRecord,
        user_id: UserId,
        reason: &str,
    ) -> LedgerResult<()> {
        let mut tx = self.db.pool().begin().await.map_err(map_db_err)?;
        let locked = lock_transaction_in(&mut tx, record.id).await?;
        if TxStatus::parse(&locked.status)? != TxStatus::Processing {
            tx.rollback().await.map_err(map_db_err)?;
            return Ok(());
        }
        advance_status_in(&mut tx, &locked, TxStatus::Failed).await?;
        merge_metadata_in(&mut tx, locked.id, json!({ "failure": reason })).await?;
        record_audit_in(
            &mut tx,
            None,
            "withdrawal.failed",
            Some(("transaction", locked.id)),
            json!({ "user_id": user_id, "amount": locked.amount, "reason": reason }),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        counter!("withdrawals_failed_total", 1);
        warn!(withdrawal_id = %record.id, reason, "withdrawal payout failed; funds stay held");

        let event = NotifyEvent::WithdrawalFailed {
            user_id,
            withdrawal_id: record.id,
            amount: locked.amount,
            reason: reason.to_string(),
        };
        if let Err(err) = self.notifier.notify(event).await {
            warn!(withdrawal_id = %record.id, error = %err, "failure notification failed");
        }
        Ok(())
    }
}

/// Locks a transactions row and checks it really is a withdrawal.
async fn lock_withdrawal(
    tx: &mut sqlx::Transaction<'static, sqlx::Postgres>,
    withdrawal_id: TransactionId,
) -> LedgerResult<TransactionRecord> {
    let record = lock_transaction_in(tx, withdrawal_id).await?;
    if TxKind::parse(&record.tx_type)? != TxKind::Withdrawal {
        return Err(LedgerError::validation(format!(
            "transaction {withdrawal_id} is not a withdrawal"
        )));
    }
    Ok(record)
}
