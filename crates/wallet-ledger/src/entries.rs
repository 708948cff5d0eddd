//! Insert and update helpers for rows in the `transactions` table.
//!
//! Each financial event gets exactly one row. Lifecycle kinds (deposits,
//! withdrawals) advance through the transition table in
//! `fanledger_core::status`; every other kind is written terminal and never
//! touched again.

use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use fanledger_core::status::ensure_transition;
use fanledger_core::{LedgerError, LedgerResult, TransactionId, TxKind, TxStatus, UserId};
use fanledger_database::TransactionRecord;

use crate::map_db_err;

/// Builder for a new ledger row. The id is allocated up front so callers
/// can reference the row before the insert commits.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    id: TransactionId,
    user_id: Option<UserId>,
    kind: TxKind,
    status: TxStatus,
    amount: Decimal,
    currency: String,
    related: Option<(String, Uuid)>,
    idempotency_key: Option<String>,
    tx_hash: Option<String>,
    confirmations: i32,
    block_number: Option<i64>,
    metadata: serde_json::Value,
}

impl LedgerEntry {
    /// Starts a row of the given kind in that kind's initial status.
    pub fn new(kind: TxKind, amount: Decimal, currency: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            kind,
            status: kind.initial_status(),
            amount,
            currency: currency.to_string(),
            related: None,
            idempotency_key: None,
            tx_hash: None,
            confirmations: 0,
            block_number: None,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Id the row will carry once inserted.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Overrides the initial status, e.g. a manually credited deposit that
    /// is confirmed the moment it is written.
    pub fn status(mut self, status: TxStatus) -> Self {
        self.status = status;
        self
    }

    pub fn related(mut self, entity: &str, id: Uuid) -> Self {
        self.related = Some((entity.to_string(), id));
        self
    }

    pub fn idempotency_key(mut self, key: &str) -> Self {
        self.idempotency_key = Some(key.to_string());
        self
    }

    pub fn tx_hash(mut self, hash: &str) -> Self {
        self.tx_hash = Some(hash.to_string());
        self
    }

    pub fn confirmations(mut self, confirmations: i32) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub fn block_number(mut self, block_number: Option<i64>) -> Self {
        self.block_number = block_number;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Writes the row inside the caller's transaction.
    pub async fn insert_in(
        self,
        tx: &mut Transaction<'static, Postgres>,
    ) -> LedgerResult<TransactionId> {
        let LedgerEntry {
            id,
            user_id,
            kind,
            status,
            amount,
            currency,
            related,
            idempotency_key,
            tx_hash,
            confirmations,
            block_number,
            metadata,
        } = self;
        let (related_entity, related_id) = match related {
            Some((entity, target)) => (Some(entity), Some(target)),
            None => (None, None),
        };
        sqlx::query(
            "INSERT INTO transactions \
             (id, user_id, tx_type, status, amount, currency, related_entity, related_id, \
              idempotency_key, tx_hash, confirmations, block_number, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(id)
        .bind(user_id)
        .bind(kind.as_str())
        .bind(status.as_str())
        .bind(amount)
        .bind(currency)
        .bind(related_entity)
        .bind(related_id)
        .bind(idempotency_key)
        .bind(tx_hash)
        .bind(confirmations)
        .bind(block_number)
        .bind(metadata)
        .execute(&mut **tx)
        .await
        .map_err(map_db_err)?;
        Ok(id)
    }
}

/// Locks a ledger row by id for the rest of the caller's transaction.
pub async fn lock_transaction_in(
    tx: &mut Transaction<'static, Postgres>,
    id: TransactionId,
) -> LedgerResult<TransactionRecord> {
    sqlx::query_as::<_, TransactionRecord>("SELECT * FROM transactions WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| LedgerError::not_found(format!("transaction {id}")))
}

/// Locks the deposit row carrying an on-chain hash, if one exists.
pub async fn lock_deposit_by_hash_in(
    tx: &mut Transaction<'static, Postgres>,
    tx_hash: &str,
) -> LedgerResult<Option<TransactionRecord>> {
    sqlx::query_as::<_, TransactionRecord>(
        "SELECT * FROM transactions WHERE tx_hash = $1 AND tx_type = $2 FOR UPDATE",
    )
    .bind(tx_hash)
    .bind(TxKind::Deposit.as_str())
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_db_err)
}

/// Finds a ledger row by its idempotency key.
pub async fn find_by_idempotency_key_in(
    tx: &mut Transaction<'static, Postgres>,
    key: &str,
) -> LedgerResult<Option<TransactionRecord>> {
    sqlx::query_as::<_, TransactionRecord>("SELECT * FROM transactions WHERE idempotency_key = $1")
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_db_err)
}

/// Advances a row's status after checking the per-kind transition table.
/// The caller is expected to hold the row lock.
pub async fn advance_status_in(
    tx: &mut Transaction<'static, Postgres>,
    record: &TransactionRecord,
    to: TxStatus,
) -> LedgerResult<()> {
    let kind = TxKind::parse(&record.tx_type)?;
    let from = TxStatus::parse(&record.status)?;
    ensure_transition(kind, from, to)?;
    sqlx::query("UPDATE transactions SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(record.id)
        .bind(to.as_str())
        .execute(&mut **tx)
        .await
        .map_err(map_db_err)?;
    Ok(())
}

/// Records observed chain progress on a deposit row.
pub async fn update_deposit_progress_in(
    tx: &mut Transaction<'static, Postgres>,
    id: TransactionId,
    confirmations: i32,
    block_number: Option<i64>,
) -> LedgerResult<()> {
    sqlx::query(
        "UPDATE transactions SET confirmations = $2, \
         block_number = COALESCE($3, block_number), updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(confirmations)
    .bind(block_number)
    .execute(&mut **tx)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

/// Merges a JSON patch into a row's metadata.
pub async fn merge_metadata_in(
    tx: &mut Transaction<'static, Postgres>,
    id: TransactionId,
    patch: serde_json::Value,
) -> LedgerResult<()> {
    sqlx::query("UPDATE transactions SET metadata = metadata || $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(patch)
        .execute(&mut **tx)
        .await
        .map_err(map_db_err)?;
    Ok(())
}
