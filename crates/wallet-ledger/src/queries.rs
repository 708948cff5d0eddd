//! Read-side wallet and ledger queries.

use fanledger_core::{LedgerError, LedgerResult, TransactionId, TxKind, UserId};
use fanledger_database::{TransactionRecord, WalletRecord};

use crate::mutations::ensure_wallet_in;
use crate::{map_db_err, WalletLedger};

const HISTORY_DEFAULT_LIMIT: i64 = 50;
const HISTORY_MAX_LIMIT: i64 = 200;

/// Paging and kind filter for transaction history.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryFilter {
    pub kind: Option<TxKind>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl WalletLedger {
    /// Fetches a user's wallet row.
    pub async fn get_wallet(&self, user_id: UserId) -> LedgerResult<WalletRecord> {
        sqlx::query_as::<_, WalletRecord>("SELECT * FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(map_db_err)?
            .ok_or_else(|| LedgerError::not_found(format!("wallet for user {user_id}")))
    }

    /// Fetches a user's wallet row, creating an empty one first if the user
    /// has never held funds.
    pub async fn ensure_wallet(&self, user_id: UserId) -> LedgerResult<WalletRecord> {
        let mut tx = self.db.pool().begin().await.map_err(map_db_err)?;
        let wallet = ensure_wallet_in(&mut tx, user_id).await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(wallet)
    }

    /// Fetches a single ledger row.
    pub async fn get_transaction(&self, id: TransactionId) -> LedgerResult<TransactionRecord> {
        sqlx::query_as::<_, TransactionRecord>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(map_db_err)?
            .ok_or_else(|| LedgerError::not_found(format!("transaction {id}")))
    }

    /// Finds the deposit carrying an on-chain transaction hash.
    pub async fn find_deposit_by_hash(
        &self,
        tx_hash: &str,
    ) -> LedgerResult<Option<TransactionRecord>> {
        sqlx::query_as::<_, TransactionRecord>(
            "SELECT * FROM transactions WHERE tx_hash = $1 AND tx_type = $2",
        )
        .bind(tx_hash)
        .bind(TxKind::Deposit.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(map_db_err)
    }

    /// Pages a user's ledger rows, newest first.
    pub async fn transaction_history(
        &self,
        user_id: UserId,
        filter: HistoryFilter,
    ) -> LedgerResult<Vec<TransactionRecord>> {
        let limit = filter
            .limit
            .unwrap_or(HISTORY_DEFAULT_LIMIT)
            .clamp(1, HISTORY_MAX_LIMIT);
        let offset = filter.offset.unwrap_or(0).max(0);
        let rows = match filter.kind {
            Some(kind) => {
                sqlx::query_as::<_, TransactionRecord>(
                    "SELECT * FROM transactions WHERE user_id = $1 AND tx_type = $2 \
                     ORDER BY created_at DESC LIMIT $3 OFFSET $4",
                )
                .bind(user_id)
                .bind(kind.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(self.db.pool())
                .await
            }
            None => {
                sqlx::query_as::<_, TransactionRecord>(
                    "SELECT * FROM transactions WHERE user_id = $1 \
                     ORDER BY created_at DESC LIMIT $2 OFFSET $3",
                )
                .bind(user_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(self.db.pool())
                .await
            }
        };
        rows.map_err(map_db_err)
    }
}
