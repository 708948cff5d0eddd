//! Balance mutations.
//!
//! The public methods on [`WalletLedger`] each own one SQL transaction and
//! commit only after every write succeeded; the `*_in` functions are the
//! same primitives lifted onto a caller-owned transaction. Wallet rows are
//! always read `FOR UPDATE` before balances are recomputed, so concurrent
//! mutations of one wallet serialize at the database.

use metrics::counter;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{Postgres, Transaction};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use fanledger_core::{
    debit_split, quantize, validate_amount, AdminId, BalanceDeltas, Balances, ContestId,
    LedgerError, LedgerResult, TransactionId, TxKind, TxStatus, UserId,
};
use fanledger_database::WalletRecord;

use crate::audit::record_audit_in;
use crate::entries::{find_by_idempotency_key_in, LedgerEntry};
use crate::{balances_of, map_db_err, CreditReceipt, DebitReceipt, WalletLedger};

impl WalletLedger {
    async fn begin(&self) -> LedgerResult<Transaction<'static, Postgres>> {
        self.db.pool().begin().await.map_err(map_db_err)
    }

    /// Applies signed per-bucket deltas as a manual adjustment.
    ///
    /// Writes an `internal` ledger row whose amount is the net signed change
    /// and an audit row naming the operator and reason.
    #[instrument(skip(self))]
    pub async fn update_balances(
        &self,
        user_id: UserId,
        deltas: BalanceDeltas,
        reason: &str,
        admin_id: Option<AdminId>,
    ) -> LedgerResult<Balances> {
        if deltas.is_noop() {
            return Err(LedgerError::validation(
                "balance adjustment must change at least one bucket",
            ));
        }
        let mut tx = self.begin().await?;
        let (wallet, balances) = apply_deltas_in(&mut tx, user_id, &deltas).await?;
        let net = quantize(deltas.deposit + deltas.bonus + deltas.winning);
        let transaction_id = LedgerEntry::new(TxKind::Internal, net, &wallet.currency)
            .user(user_id)
            .metadata(json!({ "deltas": deltas, "reason": reason }))
            .insert_in(&mut tx)
            .await?;
        record_audit_in(
            &mut tx,
            admin_id,
            "wallet.adjusted",
            Some(("transaction", transaction_id)),
            json!({ "user_id": user_id, "deltas": deltas, "reason": reason }),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        info!(%user_id, %transaction_id, reason, "wallet balances adjusted");
        Ok(balances)
    }

    /// Credits the deposit bucket outside the on-chain pipeline, e.g. an
    /// operator resolving a stalled deposit by hand.
    #[instrument(skip(self))]
    pub async fn credit_deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
        admin_id: Option<AdminId>,
    ) -> LedgerResult<CreditReceipt> {
        let amount = validate_amount(amount)?;
        let mut tx = self.begin().await?;
        let receipt = credit_deposit_in(&mut tx, user_id, amount).await?;
        record_audit_in(
            &mut tx,
            admin_id,
            "deposit.credited",
            Some(("transaction", receipt.transaction_id)),
            json!({ "user_id": user_id, "amount": amount }),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        counter!("wallet_credits_total", 1);
        info!(%user_id, transaction_id = %receipt.transaction_id, %amount, "deposit credited");
        Ok(receipt)
    }

    /// Credits the winning bucket, deduplicating on `idempotency_key` when
    /// one is supplied.
    #[instrument(skip(self))]
    pub async fn credit_winning(
        &self,
        user_id: UserId,
        amount: Decimal,
        reason: &str,
        idempotency_key: Option<&str>,
    ) -> LedgerResult<CreditReceipt> {
        let amount = validate_amount(amount)?;
        let mut tx = self.begin().await?;
        let receipt =
            credit_winning_in(&mut tx, user_id, amount, reason, idempotency_key, None).await?;
        tx.commit().await.map_err(map_db_err)?;
        if receipt.deduped {
            debug!(%user_id, key = ?idempotency_key, "winning credit deduplicated");
        } else {
            counter!("wallet_credits_total", 1);
            info!(
                %user_id,
                transaction_id = %receipt.transaction_id,
                %amount,
                reason,
                "winning credited"
            );
        }
        Ok(receipt)
    }

    /// Debits an entry fee across the spendable buckets in priority order.
    #[instrument(skip(self))]
    pub async fn debit_for_contest_entry(
        &self,
        user_id: UserId,
        amount: Decimal,
        contest_id: ContestId,
    ) -> LedgerResult<DebitReceipt> {
        let amount = validate_amount(amount)?;
        let mut tx = self.begin().await?;
        let receipt = debit_for_contest_entry_in(&mut tx, user_id, amount, contest_id).await?;
        tx.commit().await.map_err(map_db_err)?;
        counter!("wallet_debits_total", 1);
        info!(%user_id, %contest_id, %amount, "entry fee debited");
        Ok(receipt)
    }

    /// Freezes winning funds under an in-flight withdrawal.
    #[instrument(skip(self))]
    pub async fn hold_for_withdrawal(
        &self,
        user_id: UserId,
        amount: Decimal,
        withdrawal_tx_id: TransactionId,
    ) -> LedgerResult<Balances> {
        let amount = validate_amount(amount)?;
        let mut tx = self.begin().await?;
        let balances = hold_for_withdrawal_in(&mut tx, user_id, amount, withdrawal_tx_id).await?;
        record_audit_in(
            &mut tx,
            None,
            "withdrawal.hold_placed",
            Some(("transaction", withdrawal_tx_id)),
            json!({ "user_id": user_id, "amount": amount }),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(balances)
    }

    /// Returns held funds to the winning bucket after a rejection or a
    /// user cancellation.
    #[instrument(skip(self))]
    pub async fn release_withdrawal_hold(
        &self,
        user_id: UserId,
        amount: Decimal,
        withdrawal_tx_id: TransactionId,
    ) -> LedgerResult<Balances> {
        let amount = validate_amount(amount)?;
        let mut tx = self.begin().await?;
        let balances =
            release_withdrawal_hold_in(&mut tx, user_id, amount, withdrawal_tx_id).await?;
        record_audit_in(
            &mut tx,
            None,
            "withdrawal.hold_released",
            Some(("transaction", withdrawal_tx_id)),
            json!({ "user_id": user_id, "amount": amount }),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(balances)
    }

    /// Removes held funds permanently once the external payout settled.
    #[instrument(skip(self))]
    pub async fn complete_withdrawal(
        &self,
        user_id: UserId,
        amount: Decimal,
        withdrawal_tx_id: TransactionId,
    ) -> LedgerResult<Balances> {
        let amount = validate_amount(amount)?;
        let mut tx = self.begin().await?;
        let balances = complete_withdrawal_in(&mut tx, user_id, amount, withdrawal_tx_id).await?;
        record_audit_in(
            &mut tx,
            None,
            "withdrawal.hold_completed",
            Some(("transaction", withdrawal_tx_id)),
            json!({ "user_id": user_id, "amount": amount }),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(balances)
    }
}

/// Locks a wallet row for the rest of the caller's transaction.
pub async fn lock_wallet_in(
    tx: &mut Transaction<'static, Postgres>,
    user_id: UserId,
) -> LedgerResult<WalletRecord> {
    sqlx::query_as::<_, WalletRecord>("SELECT * FROM wallets WHERE user_id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| LedgerError::not_found(format!("wallet for user {user_id}")))
}

/// Creates the wallet row if missing, then locks it.
pub async fn ensure_wallet_in(
    tx: &mut Transaction<'static, Postgres>,
    user_id: UserId,
) -> LedgerResult<WalletRecord> {
    sqlx::query(
        "INSERT INTO wallets (id, user_id) VALUES ($1, $2) ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .execute(&mut **tx)
    .await
    .map_err(map_db_err)?;
    lock_wallet_in(tx, user_id).await
}

/// Applies signed deltas to a wallet, creating it first if needed. Returns
/// the pre-mutation row and the balances after the write.
pub async fn apply_deltas_in(
    tx: &mut Transaction<'static, Postgres>,
    user_id: UserId,
    deltas: &BalanceDeltas,
) -> LedgerResult<(WalletRecord, Balances)> {
    let wallet = ensure_wallet_in(tx, user_id).await?;
    let balances = balances_of(&wallet).checked_apply(deltas)?;
    write_balances_in(tx, wallet.id, &balances).await?;
    Ok((wallet, balances))
}

async fn write_balances_in(
    tx: &mut Transaction<'static, Postgres>,
    wallet_id: Uuid,
    balances: &Balances,
) -> LedgerResult<()> {
    sqlx::query(
        "UPDATE wallets SET deposit_balance = $2, bonus_balance = $3, winning_balance = $4, \
         held_balance = $5, updated_at = NOW() WHERE id = $1",
    )
    .bind(wallet_id)
    .bind(balances.deposit)
    .bind(balances.bonus)
    .bind(balances.winning)
    .bind(balances.held)
    .execute(&mut **tx)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

/// Credits the deposit bucket and writes a confirmed deposit row.
pub async fn credit_deposit_in(
    tx: &mut Transaction<'static, Postgres>,
    user_id: UserId,
    amount: Decimal,
) -> LedgerResult<CreditReceipt> {
    let deltas = BalanceDeltas {
        deposit: amount,
        ..Default::default()
    };
    let (wallet, balances) = apply_deltas_in(tx, user_id, &deltas).await?;
    let transaction_id = LedgerEntry::new(TxKind::Deposit, amount, &wallet.currency)
        .user(user_id)
        .status(TxStatus::Confirmed)
        .metadata(json!({ "source": "manual_credit" }))
        .insert_in(tx)
        .await?;
    Ok(CreditReceipt {
        transaction_id,
        user_id,
        amount,
        balances,
        deduped: false,
    })
}

/// Credits the winning bucket, writing a payout row unless the idempotency
/// key already matched an earlier credit. The unique constraint on
/// `idempotency_key` backstops the pre-check under races.
pub async fn credit_winning_in(
    tx: &mut Transaction<'static, Postgres>,
    user_id: UserId,
    amount: Decimal,
    reason: &str,
    idempotency_key: Option<&str>,
    related: Option<(&str, Uuid)>,
) -> LedgerResult<CreditReceipt> {
    if let Some(key) = idempotency_key {
        if let Some(existing) = find_by_idempotency_key_in(tx, key).await? {
            let wallet = lock_wallet_in(tx, user_id).await?;
            debug!(%user_id, key, "winning credit already recorded");
            return Ok(CreditReceipt {
                transaction_id: existing.id,
                user_id,
                amount: existing.amount,
                balances: balances_of(&wallet),
                deduped: true,
            });
        }
    }
    let deltas = BalanceDeltas {
        winning: amount,
        ..Default::default()
    };
    let (wallet, balances) = apply_deltas_in(tx, user_id, &deltas).await?;
    let mut entry = LedgerEntry::new(TxKind::Payout, amount, &wallet.currency)
        .user(user_id)
        .metadata(json!({ "reason": reason }));
    if let Some(key) = idempotency_key {
        entry = entry.idempotency_key(key);
    }
    if let Some((entity, target)) = related {
        entry = entry.related(entity, target);
    }
    let transaction_id = entry.insert_in(tx).await?;
    Ok(CreditReceipt {
        transaction_id,
        user_id,
        amount,
        balances,
        deduped: false,
    })
}

/// Debits an entry fee from the spendable buckets: deposit first, then
/// bonus, then winning. Fails atomically when the three together cannot
/// cover the amount; the split is recorded in the row metadata.
pub async fn debit_for_contest_entry_in(
    tx: &mut Transaction<'static, Postgres>,
    user_id: UserId,
    amount: Decimal,
    contest_id: ContestId,
) -> LedgerResult<DebitReceipt> {
    let wallet = lock_wallet_in(tx, user_id).await?;
    let current = balances_of(&wallet);
    let split = debit_split(&current, amount)
        .ok_or_else(|| LedgerError::insufficient_funds(amount, current.spendable()))?;
    let balances = current.checked_apply(&BalanceDeltas {
        deposit: -split.from_deposit,
        bonus: -split.from_bonus,
        winning: -split.from_winning,
    })?;
    write_balances_in(tx, wallet.id, &balances).await?;
    let transaction_id = LedgerEntry::new(TxKind::ContestEntry, amount, &wallet.currency)
        .user(user_id)
        .related("contest", contest_id)
        .metadata(json!({ "split": split }))
        .insert_in(tx)
        .await?;
    Ok(DebitReceipt {
        transaction_id,
        user_id,
        amount,
        split,
        balances,
    })
}

/// Moves winning funds into the held bucket for a pending withdrawal.
pub async fn hold_for_withdrawal_in(
    tx: &mut Transaction<'static, Postgres>,
    user_id: UserId,
    amount: Decimal,
    withdrawal_tx_id: TransactionId,
) -> LedgerResult<Balances> {
    let wallet = lock_wallet_in(tx, user_id).await?;
    let current = balances_of(&wallet);
    if current.winning < amount {
        return Err(LedgerError::insufficient_funds(amount, current.winning));
    }
    let next = Balances {
        winning: quantize(current.winning - amount),
        held: quantize(current.held + amount),
        ..current
    };
    write_balances_in(tx, wallet.id, &next).await?;
    debug!(%user_id, %withdrawal_tx_id, %amount, "withdrawal hold placed");
    Ok(next)
}

/// Moves held funds back to the winning bucket.
pub async fn release_withdrawal_hold_in(
    tx: &mut Transaction<'static, Postgres>,
    user_id: UserId,
    amount: Decimal,
    withdrawal_tx_id: TransactionId,
) -> LedgerResult<Balances> {
    let wallet = lock_wallet_in(tx, user_id).await?;
    let current = balances_of(&wallet);
    if current.held < amount {
        return Err(LedgerError::insufficient_funds(amount, current.held));
    }
    let next = Balances {
        winning: quantize(current.winning + amount),
        held: quantize(current.held - amount),
        ..current
    };
    write_balances_in(tx, wallet.id, &next).await?;
    debug!(%user_id, %withdrawal_tx_id, %amount, "withdrawal hold released");
    Ok(next)
}

/// Removes held funds permanently once the external payout settled.
pub async fn complete_withdrawal_in(
    tx: &mut Transaction<'static, Postgres>,
    user_id: UserId,
    amount: Decimal,
    withdrawal_tx_id: TransactionId,
) -> LedgerResult<Balances> {
    let wallet = lock_wallet_in(tx, user_id).await?;
    let current = balances_of(&wallet);
    if current.held < amount {
        return Err(LedgerError::insufficient_funds(amount, current.held));
    }
    let next = Balances {
        held: quantize(current.held - amount),
        ..current
    };
    write_balances_in(tx, wallet.id, &next).await?;
    debug!(%user_id, %withdrawal_tx_id, %amount, "withdrawal hold completed");
    Ok(next)
}
