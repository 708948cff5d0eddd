//! # Wallet Ledger
//!
//! Balance mutator for the four-bucket wallet model. Every public operation
//! runs as one SQL transaction that locks the target wallet row
//! (`SELECT ... FOR UPDATE`), recomputes balances through the pure helpers
//! in `fanledger-core`, writes a `transactions` row for each discrete
//! financial event, and commits. A bucket can never be negative at a commit
//! point; an operation that would overdraw rolls back with
//! `InsufficientFunds` and leaves no trace.
//!
//! The `*_in` functions expose the same primitives on a caller-owned
//! `sqlx::Transaction` so the contest engine and the payment pipeline can
//! compose them into larger atomic units. When one transaction touches more
//! than one wallet, callers must acquire the wallet locks in ascending
//! `user_id` order.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fanledger_core::{Balances, DebitSplit, LedgerError, TransactionId, UserId};
use fanledger_database::{DatabaseManager, WalletRecord};

pub mod audit;
pub mod entries;
pub mod mutations;
pub mod queries;

pub use audit::{find_latest_audit, find_latest_audit_in, record_audit_in};
pub use entries::{
    advance_status_in, find_by_idempotency_key_in, lock_deposit_by_hash_in, lock_transaction_in,
    merge_metadata_in, update_deposit_progress_in, LedgerEntry,
};
pub use mutations::{
    apply_deltas_in, complete_withdrawal_in, credit_deposit_in, credit_winning_in,
    debit_for_contest_entry_in, ensure_wallet_in, hold_for_withdrawal_in, lock_wallet_in,
    release_withdrawal_hold_in,
};
pub use queries::HistoryFilter;

/// Handle over the storage layer for wallet and ledger operations.
///
/// Cheap to clone; every service that moves money holds one.
#[derive(Debug, Clone)]
pub struct WalletLedger {
    db: Arc<DatabaseManager>,
}

impl WalletLedger {
    /// Creates a ledger over an initialized database manager.
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// The underlying database handle.
    pub fn database(&self) -> &Arc<DatabaseManager> {
        &self.db
    }
}

/// Outcome of a credit operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditReceipt {
    pub transaction_id: TransactionId,
    pub user_id: UserId,
    pub amount: Decimal,
    /// Balances after the credit, or the current balances when deduped.
    pub balances: Balances,
    /// True when an idempotency key matched an earlier credit and no new
    /// money moved.
    pub deduped: bool,
}

/// Outcome of an entry-fee debit, carrying how the amount was drawn from
/// the three spendable buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebitReceipt {
    pub transaction_id: TransactionId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub split: DebitSplit,
    pub balances: Balances,
}

/// Converts a stored wallet row into the in-memory bucket model.
pub fn balances_of(record: &WalletRecord) -> Balances {
    Balances {
        deposit: record.deposit_balance,
        bonus: record.bonus_balance,
        winning: record.winning_balance,
        held: record.held_balance,
    }
}

/// Maps a low-level sqlx error onto the shared ledger taxonomy.
///
/// Lock-wait timeouts (`55P03`) and unique violations (`23505`) surface as
/// `Conflict` so callers can retry; everything else is `Storage`.
pub fn map_db_err(err: sqlx::Error) -> LedgerError {
    match &err {
        sqlx::Error::RowNotFound => LedgerError::not_found("requested row"),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("55P03") => LedgerError::conflict(format!("lock wait timed out: {db}")),
            Some("23505") => LedgerError::conflict(format!(
                "duplicate key on {}",
                db.constraint().unwrap_or("unique constraint")
            )),
            _ => LedgerError::storage(err.to_string()),
        },
        _ => LedgerError::storage(err.to_string()),
    }
}

/// Returns the violated constraint name when the error is a Postgres unique
/// violation, letting callers turn specific races into domain errors.
pub fn unique_violation(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => db.constraint(),
        _ => None,
    }
}
