//! Contest lifecycle: creation, opening, closing and result recording.
//!
//! Status changes are checked against the transition table in
//! `fanledger_core::status` while the contest row is locked, so two
//! operators racing on the same contest serialize at the database.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument};
use uuid::Uuid;

use fanledger_core::{
    validate_amount, AdminId, ContestId, ContestStatus, LedgerError, LedgerResult, PrizeStructure,
    UserId,
};
use fanledger_database::{ContestEntryRecord, ContestRecord};
use wallet_ledger::{map_db_err, record_audit_in};

use crate::ContestEngine;

/// Parameters for creating a contest.
#[derive(Debug, Clone)]
pub struct ContestDraft {
    pub title: String,
    pub entry_fee: Decimal,
    pub currency: String,
    pub max_players: i32,
    pub commission_pct: Decimal,
    pub prize_structure: PrizeStructure,
    pub starts_at: Option<DateTime<Utc>>,
}

impl ContestEngine {
    /// Creates a scheduled contest after validating its economics.
    #[instrument(skip(self, draft))]
    pub async fn create_contest(
        &self,
        draft: ContestDraft,
        admin_id: AdminId,
    ) -> LedgerResult<ContestRecord> {
        let entry_fee = validate_amount(draft.entry_fee)?;
        if draft.title.trim().is_empty() {
            return Err(LedgerError::validation("contest title must not be empty"));
        }
        if draft.max_players < 2 {
            return Err(LedgerError::validation(format!(
                "a contest needs at least two players, got {}",
                draft.max_players
            )));
        }
        if draft.commission_pct < Decimal::ZERO || draft.commission_pct > Decimal::ONE_HUNDRED {
            return Err(LedgerError::validation(format!(
                "commission must be between 0 and 100, got {}",
                draft.commission_pct
            )));
        }
        draft.prize_structure.validate()?;

        let code = generate_code("FL");
        let mut tx = self.begin().await?;
        let contest = sqlx::query_as::<_, ContestRecord>(
            "INSERT INTO contests \
             (id, code, title, entry_fee, currency, max_players, commission_pct, \
              prize_structure, status, starts_at, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&code)
        .bind(draft.title.trim())
        .bind(entry_fee)
        .bind(&draft.currency)
        .bind(draft.max_players)
        .bind(draft.commission_pct)
        .bind(serde_json::to_value(&draft.prize_structure)?)
        .bind(ContestStatus::Scheduled.as_str())
        .bind(draft.starts_at)
        .bind(admin_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_err)?;
        record_audit_in(
            &mut tx,
            Some(admin_id),
            "contest.created",
            Some(("contest", contest.id)),
            json!({
                "code": code,
                "entry_fee": entry_fee,
                "max_players": draft.max_players,
                "commission_pct": draft.commission_pct,
            }),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        info!(contest_id = %contest.id, code, "contest created");
        Ok(contest)
    }

    /// Opens a scheduled contest for entries.
    #[instrument(skip(self))]
    pub async fn open_contest(
        &self,
        contest_id: ContestId,
        admin_id: AdminId,
    ) -> LedgerResult<ContestRecord> {
        self.transition_contest(contest_id, ContestStatus::Open, "contest.opened", admin_id)
            .await
    }

    /// Closes entries ahead of results and settlement.
    #[instrument(skip(self))]
    pub async fn close_contest(
        &self,
        contest_id: ContestId,
        admin_id: AdminId,
    ) -> LedgerResult<ContestRecord> {
        self.transition_contest(contest_id, ContestStatus::Closed, "contest.closed", admin_id)
            .await
    }

    async fn transition_contest(
        &self,
        contest_id: ContestId,
        to: ContestStatus,
        action: &str,
        admin_id: AdminId,
    ) -> LedgerResult<ContestRecord> {
        let mut tx = self.begin().await?;
        let contest = lock_contest_in(&mut tx, contest_id).await?;
        let status = ContestStatus::parse(&contest.status)?;
        status.ensure_transition(to)?;
        let updated = sqlx::query_as::<_, ContestRecord>(
            "UPDATE contests SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(contest_id)
        .bind(to.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_err)?;
        record_audit_in(
            &mut tx,
            Some(admin_id),
            action,
            Some(("contest", contest_id)),
            json!({ "from": status.as_str(), "to": to.as_str() }),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        info!(%contest_id, from = status.as_str(), to = to.as_str(), "contest status changed");
        Ok(updated)
    }

    /// Records final rankings for a closed contest ahead of settlement.
    ///
    /// Rankings are `(user, rank)` pairs with rank 1 as first place. Every
    /// ranked user must hold an entry; ranks must be positive and unique.
    #[instrument(skip(self, rankings))]
    pub async fn record_results(
        &self,
        contest_id: ContestId,
        rankings: &[(UserId, i32)],
        admin_id: AdminId,
    ) -> LedgerResult<()> {
        if rankings.is_empty() {
            return Err(LedgerError::validation("rankings must not be empty"));
        }
        let mut seen_ranks = HashSet::new();
        let mut seen_users = HashSet::new();
        for (user_id, rank) in rankings {
            if *rank < 1 {
                return Err(LedgerError::validation(format!(
                    "ranks are 1-based, got {rank}"
                )));
            }
            if !seen_ranks.insert(*rank) {
                return Err(LedgerError::validation(format!("duplicate rank {rank}")));
            }
            if !seen_users.insert(*user_id) {
                return Err(LedgerError::validation(format!(
                    "duplicate ranking for user {user_id}"
                )));
            }
        }

        let mut tx = self.begin().await?;
        let contest = lock_contest_in(&mut tx, contest_id).await?;
        let status = ContestStatus::parse(&contest.status)?;
        if status != ContestStatus::Closed {
            return Err(LedgerError::validation(format!(
                "results can only be recorded on a closed contest, contest {contest_id} is {}",
                status.as_str()
            )));
        }
        let entries = load_entries_in(&mut tx, contest_id).await?;
        for (user_id, rank) in rankings {
            let entry = entries
                .iter()
                .find(|entry| entry.user_id == *user_id)
                .ok_or_else(|| {
                    LedgerError::validation(format!(
                        "user {user_id} has no entry in contest {contest_id}"
                    ))
                })?;
            sqlx::query("UPDATE contest_entries SET winner_rank = $2 WHERE id = $1")
                .bind(entry.id)
                .bind(*rank)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
        }
        let recorded: Vec<_> = rankings
            .iter()
            .map(|(user_id, rank)| json!({ "user_id": user_id, "rank": rank }))
            .collect();
        record_audit_in(
            &mut tx,
            Some(admin_id),
            "contest.results_recorded",
            Some(("contest", contest_id)),
            json!({ "rankings": recorded }),
        )
        .await?;
        tx.commit().await.map_err(map_db_err)?;
        info!(%contest_id, count = rankings.len(), "contest results recorded");
        Ok(())
    }

    /// Fetches a contest row.
    pub async fn get_contest(&self, contest_id: ContestId) -> LedgerResult<ContestRecord> {
        sqlx::query_as::<_, ContestRecord>("SELECT * FROM contests WHERE id = $1")
            .bind(contest_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(map_db_err)?
            .ok_or_else(|| LedgerError::not_found(format!("contest {contest_id}")))
    }

    /// Lists a contest's entries in creation order.
    pub async fn contest_entries(
        &self,
        contest_id: ContestId,
    ) -> LedgerResult<Vec<ContestEntryRecord>> {
        sqlx::query_as::<_, ContestEntryRecord>(
            "SELECT * FROM contest_entries WHERE contest_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(contest_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(map_db_err)
    }
}

/// Locks a contest row for the rest of the caller's transaction.
pub(crate) async fn lock_contest_in(
    tx: &mut Transaction<'static, Postgres>,
    contest_id: ContestId,
) -> LedgerResult<ContestRecord> {
    sqlx::query_as::<_, ContestRecord>("SELECT * FROM contests WHERE id = $1 FOR UPDATE")
        .bind(contest_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| LedgerError::not_found(format!("contest {contest_id}")))
}

/// Loads entries in creation order, id as tiebreak for same-instant rows.
pub(crate) async fn load_entries_in(
    tx: &mut Transaction<'static, Postgres>,
    contest_id: ContestId,
) -> LedgerResult<Vec<ContestEntryRecord>> {
    sqlx::query_as::<_, ContestEntryRecord>(
        "SELECT * FROM contest_entries WHERE contest_id = $1 ORDER BY created_at ASC, id ASC",
    )
    .bind(contest_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(map_db_err)
}

/// Short human-pasteable code; the unique column constraint backstops the
/// negligible collision chance.
pub(crate) fn generate_code(prefix: &str) -> String {
    let token = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, token[..10].to_uppercase())
}
