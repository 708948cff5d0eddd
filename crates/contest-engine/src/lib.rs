//! # Contest Engine
//!
//! Contest lifecycle, entry management and deterministic settlement for the
//! FanLedger platform. Settlement is all-or-nothing inside one SQL
//! transaction; cancellation refunds best-effort per entry and records
//! every failure for operator retry. Both operations replay from the audit
//! trail: running them again on a terminal contest returns the recorded
//! summary without moving money.

use std::sync::Arc;

use sqlx::{Postgres, Transaction};

use fanledger_core::{ContestId, EntryId, LedgerResult, Notifier};
use fanledger_database::DatabaseManager;
use wallet_ledger::map_db_err;

pub mod cancel;
pub mod join;
pub mod lifecycle;
pub mod settle;

pub use cancel::{CancellationSummary, RefundFailure};
pub use lifecycle::ContestDraft;
pub use settle::{EntryPayout, SettlementSummary};

/// Coordinates contest state transitions and the money they move.
///
/// Holds explicit handles; services are wired together at startup instead
/// of reaching for globals.
#[derive(Clone)]
pub struct ContestEngine {
    db: Arc<DatabaseManager>,
    notifier: Arc<dyn Notifier>,
}

impl ContestEngine {
    /// Creates an engine over the database and a notification backend.
    pub fn new(db: Arc<DatabaseManager>, notifier: Arc<dyn Notifier>) -> Self {
        Self { db, notifier }
    }

    /// The underlying database handle.
    pub fn database(&self) -> &Arc<DatabaseManager> {
        &self.db
    }

    pub(crate) async fn begin(&self) -> LedgerResult<Transaction<'static, Postgres>> {
        self.db.pool().begin().await.map_err(map_db_err)
    }
}

/// Deterministic idempotency key for one entry's settlement credit.
///
/// Replayed settlements regenerate the same key, so the unique constraint
/// on `transactions.idempotency_key` makes double payment impossible.
pub fn settlement_key(contest_id: ContestId, entry_id: EntryId) -> String {
    format!("settle:{contest_id}:{entry_id}")
}

/// Deterministic idempotency key for one entry's cancellation refund.
pub fn refund_key(contest_id: ContestId, entry_id: EntryId) -> String {
    format!("refund:{contest_id}:{entry_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn keys_are_deterministic_and_distinct() {
        let contest_id = Uuid::new_v4();
        let entry_id = Uuid::new_v4();
        assert_eq!(
            settlement_key(contest_id, entry_id),
            settlement_key(contest_id, entry_id)
        );
        assert_ne!(
            settlement_key(contest_id, entry_id),
            refund_key(contest_id, entry_id)
        );
        assert!(settlement_key(contest_id, entry_id).starts_with("settle:"));
        assert!(refund_key(contest_id, entry_id).starts_with("refund:"));
    }
}
