//! Contest entry.

use metrics::counter;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use fanledger_core::{ContestId, ContestStatus, LedgerError, LedgerResult, UserId};
use fanledger_database::ContestEntryRecord;
use wallet_ledger::{
    debit_for_contest_entry_in, map_db_err, record_audit_in, unique_violation,
};

use crate::lifecycle::{generate_code, lock_contest_in};
use crate::ContestEngine;

impl ContestEngine {
    /// Joins a user into an open contest, debiting the entry fee.
    ///
    /// One transaction: the contest row lock serializes the capacity check,
    /// the `(contest_id, user_id)` unique constraint kills the double-join
    /// race, and the wallet debit rolls back together with the entry on any
    /// failure.
    #[instrument(skip(self))]
    pub async fn join_contest(
        &self,
        contest_id: ContestId,
        user_id: UserId,
    ) -> LedgerResult<ContestEntryRecord> {
        let mut tx = self.begin().await?;
        let contest = lock_contest_in(&mut tx, contest_id).await?;
        let status = ContestStatus::parse(&contest.status)?;
        if !status.is_joinable() {
            return Err(LedgerError::validation(format!(
                "contest {contest_id} is not open for entries ({})",
                status.as_str()
            )));
        }
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM contest_entries WHERE contest_id = $1")
                .bind(contest_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_db_err)?;
        if count >= i64::from(contest.max_players) {
            return Err(LedgerError::validation(format!(
                "contest {contest_id} is full ({} players)",
                contest.max_players
            )));
        }

        let entry_code = generate_code("EN");
        let inserted = sqlx::query_as::<_, ContestEntryRecord>(
            "INSERT INTO contest_entries (id, contest_id, user_id, entry_code, amount_debited) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(contest_id)
        .bind(user_id)
        .bind(&entry_code)
        .bind(contest.entry_fee)
        .fetch_one(&mut *tx)
        .await;
        let entry = match inserted {
            Ok(entry) => entry,
            Err(err) => {
                return Err(match unique_violation(&err) {
                    Some("contest_entries_contest_id_user_id_key") => LedgerError::AlreadyJoined {
                        contest_id,
                        user_id,
                    },
                    _ => map_db_err(err),
                });
            }
        };

        let receipt =
            debit_for_contest_entry_in(&mut tx, user_id, contest.entry_fee, contest_id).await?;
        record_audit_in(
            &mut tx,
            None,
            "contest.joined",
            Some(("contest", contest_id)),
            json!({
                "user_id": user_id,
                "entry_id": entry.id,
                "amount": receipt.amount,
                "split": receipt.split,
            }),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        counter!("contest_entries_total", 1);
        info!(
            %contest_id,
            %user_id,
            entry_id = %entry.id,
            amount = %receipt.amount,
            "contest entry accepted"
        );
        Ok(entry)
    }
}
