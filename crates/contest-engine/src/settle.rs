//! Deterministic contest settlement.
//!
//! Settlement computes the pool, commission and per-position payouts, then
//! commits everything in one SQL transaction: winner credits, payout rows,
//! the commission row, the summary audit row and the status flip. Any
//! failure rolls the whole settlement back. The audit row is the replay
//! source: settling a settled contest returns the recorded summary with
//! `replayed = true` and writes nothing.

use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Postgres, Transaction};
use tracing::{debug, info, instrument, warn};

use fanledger_core::money::percentage_of;
use fanledger_core::prize::{PayoutPlan, PlannedPayout};
use fanledger_core::{
    quantize, AdminId, ContestId, ContestStatus, EntryId, LedgerError, LedgerResult, NotifyEvent,
    PrizeStructure, TransactionId, TxKind, UserId,
};
use fanledger_database::ContestEntryRecord;
use wallet_ledger::{
    credit_winning_in, find_latest_audit_in, lock_wallet_in, map_db_err, record_audit_in,
    LedgerEntry,
};

use crate::lifecycle::{load_entries_in, lock_contest_in};
use crate::{settlement_key, ContestEngine};

/// One prize credit made during settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPayout {
    pub entry_id: EntryId,
    pub user_id: UserId,
    pub position: u32,
    pub amount: Decimal,
    pub transaction_id: TransactionId,
}

/// Everything one settlement did, serialized losslessly into the audit
/// trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub contest_id: ContestId,
    pub entry_fee: Decimal,
    pub num_entries: u32,
    pub total_prize_pool: Decimal,
    pub commission: Decimal,
    pub distributable_pool: Decimal,
    pub payouts: Vec<EntryPayout>,
    /// True when the contest was already settled and the recorded summary
    /// was returned without writes.
    #[serde(default)]
    pub replayed: bool,
}

impl ContestEngine {
    /// Settles a closed contest, crediting winners all-or-nothing.
    #[instrument(skip(self))]
    pub async fn settle(
        &self,
        contest_id: ContestId,
        admin_id: AdminId,
    ) -> LedgerResult<SettlementSummary> {
        let mut tx = self.begin().await?;
        let contest = lock_contest_in(&mut tx, contest_id).await?;
        let status = ContestStatus::parse(&contest.status)?;
        match status {
            ContestStatus::Settled => {
                let mut summary = read_settlement_summary_in(&mut tx, contest_id).await?;
                tx.rollback().await.map_err(map_db_err)?;
                summary.replayed = true;
                debug!(%contest_id, "settlement replayed from the audit trail");
                return Ok(summary);
            }
            ContestStatus::Cancelled => return Err(LedgerError::AlreadyCancelled { contest_id }),
            _ => status.ensure_transition(ContestStatus::Settled)?,
        }

        let entries = load_entries_in(&mut tx, contest_id).await?;
        if entries.is_empty() {
            return Err(LedgerError::validation(format!(
                "contest {contest_id} has no entries to settle"
            )));
        }

        let num_entries = entries.len();
        let total_prize_pool = quantize(contest.entry_fee * Decimal::from(num_entries as u64));
        let commission = percentage_of(total_prize_pool, contest.commission_pct);
        let distributable_pool = quantize(total_prize_pool - commission);
        let structure: PrizeStructure = serde_json::from_value(contest.prize_structure.clone())?;
        let structure = if structure.0.is_empty() {
            PrizeStructure::default()
        } else {
            structure
        };
        let plan = structure.payout_plan(distributable_pool, num_entries);
        let recipients = match_recipients(&entries, &plan);

        // Wallet locks in ascending user_id order; the later credits then
        // re-enter locks this transaction already holds.
        let mut lock_order: Vec<UserId> = recipients.iter().map(|(entry, _)| entry.user_id).collect();
        lock_order.sort();
        lock_order.dedup();
        for user_id in &lock_order {
            lock_wallet_in(&mut tx, *user_id).await?;
        }

        let mut payouts = Vec::with_capacity(recipients.len());
        for (entry, planned) in &recipients {
            let key = settlement_key(contest_id, entry.id);
            let receipt = credit_winning_in(
                &mut tx,
                entry.user_id,
                planned.amount,
                "contest settlement",
                Some(&key),
                Some(("contest", contest_id)),
            )
            .await?;
            sqlx::query(
                "UPDATE contest_entries SET winner_rank = $2, payout_tx_id = $3 WHERE id = $1",
            )
            .bind(entry.id)
            .bind(planned.position as i32)
            .bind(receipt.transaction_id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
            payouts.push(EntryPayout {
                entry_id: entry.id,
                user_id: entry.user_id,
                position: planned.position,
                amount: planned.amount,
                transaction_id: receipt.transaction_id,
            });
        }

        if commission > Decimal::ZERO {
            LedgerEntry::new(TxKind::SystemFee, commission, &contest.currency)
                .related("contest", contest_id)
                .metadata(json!({ "commission_pct": contest.commission_pct }))
                .insert_in(&mut tx)
                .await?;
        }

        let summary = SettlementSummary {
            contest_id,
            entry_fee: contest.entry_fee,
            num_entries: num_entries as u32,
            total_prize_pool,
            commission,
            distributable_pool,
            payouts,
            replayed: false,
        };
        record_audit_in(
            &mut tx,
            Some(admin_id),
            "contest.settled",
            Some(("contest", contest_id)),
            serde_json::to_value(&summary)?,
        )
        .await?;
        sqlx::query(
            "UPDATE contests SET status = $2, settled_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(contest_id)
        .bind(ContestStatus::Settled.as_str())
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;
        tx.commit().await.map_err(map_db_err)?;
        counter!("contests_settled_total", 1);
        info!(
            %contest_id,
            num_entries,
            pool = %total_prize_pool,
            %commission,
            winners = summary.payouts.len(),
            "contest settled"
        );

        for payout in &summary.payouts {
            let event = NotifyEvent::ContestWon {
                user_id: payout.user_id,
                contest_id,
                position: payout.position,
                amount: payout.amount,
            };
            if let Err(err) = self.notifier.notify(event).await {
                warn!(%contest_id, user_id = %payout.user_id, error = %err, "winner notification failed");
            }
        }
        Ok(summary)
    }
}

/// Matches planned payout positions to entries: by pre-assigned rank when
/// any entry carries one, otherwise by creation order. A paid position with
/// no ranked entry is skipped and its share stays unallocated.
fn match_recipients<'a>(
    entries: &'a [ContestEntryRecord],
    plan: &'a PayoutPlan,
) -> Vec<(&'a ContestEntryRecord, &'a PlannedPayout)> {
    let ranked = entries.iter().any(|entry| entry.winner_rank.is_some());
    let mut matched = Vec::with_capacity(plan.payouts.len());
    for planned in &plan.payouts {
        let entry = if ranked {
            entries
                .iter()
                .find(|entry| entry.winner_rank == Some(planned.position as i32))
        } else {
            entries.get(planned.position as usize - 1)
        };
        match entry {
            Some(entry) => matched.push((entry, planned)),
            None => warn!(
                position = planned.position,
                "no ranked entry holds a paid position, share stays unallocated"
            ),
        }
    }
    matched
}

pub(crate) async fn read_settlement_summary_in(
    tx: &mut Transaction<'static, Postgres>,
    contest_id: ContestId,
) -> LedgerResult<SettlementSummary> {
    let audit = find_latest_audit_in(tx, "contest.settled", contest_id)
        .await?
        .ok_or_else(|| {
            LedgerError::storage(format!(
                "settled contest {contest_id} has no recorded settlement summary"
            ))
        })?;
    Ok(serde_json::from_value(audit.details)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn entry(winner_rank: Option<i32>) -> ContestEntryRecord {
        ContestEntryRecord {
            id: Uuid::new_v4(),
            contest_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            entry_code: "EN-TEST".to_string(),
            amount_debited: dec!(1),
            winner_rank,
            payout_tx_id: None,
            created_at: Utc::now(),
        }
    }

    fn plan_for(positions: &[(u32, Decimal)], pool: Decimal, entries: usize) -> PayoutPlan {
        PrizeStructure(
            positions
                .iter()
                .map(|&(position, percentage)| fanledger_core::PrizeSlot {
                    position,
                    percentage,
                })
                .collect(),
        )
        .payout_plan(pool, entries)
    }

    #[test]
    fn unranked_entries_match_by_creation_order() {
        let entries = vec![entry(None), entry(None), entry(None)];
        let plan = plan_for(&[(1, dec!(50)), (2, dec!(30)), (3, dec!(20))], dec!(2.85), 3);
        let matched = match_recipients(&entries, &plan);
        assert_eq!(matched.len(), 3);
        assert_eq!(matched[0].0.id, entries[0].id);
        assert_eq!(matched[1].0.id, entries[1].id);
        assert_eq!(matched[2].0.id, entries[2].id);
    }

    #[test]
    fn ranked_entries_match_by_rank_not_order() {
        let entries = vec![entry(Some(3)), entry(Some(1)), entry(Some(2))];
        let plan = plan_for(&[(1, dec!(50)), (2, dec!(30)), (3, dec!(20))], dec!(2.85), 3);
        let matched = match_recipients(&entries, &plan);
        assert_eq!(matched.len(), 3);
        // First prize goes to the entry ranked 1, created second.
        assert_eq!(matched[0].0.id, entries[1].id);
        assert_eq!(matched[1].0.id, entries[2].id);
        assert_eq!(matched[2].0.id, entries[0].id);
    }

    #[test]
    fn paid_position_without_ranked_entry_is_skipped() {
        // Two paid positions, but only one entry carries a rank.
        let entries = vec![entry(Some(1)), entry(None)];
        let plan = plan_for(&[(1, dec!(70)), (2, dec!(30))], dec!(2), 2);
        let matched = match_recipients(&entries, &plan);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].1.position, 1);
    }

    #[test]
    fn summary_round_trips_through_json() {
        let summary = SettlementSummary {
            contest_id: Uuid::new_v4(),
            entry_fee: dec!(1.00000000),
            num_entries: 2,
            total_prize_pool: dec!(2.00000000),
            commission: dec!(0.10000000),
            distributable_pool: dec!(1.90000000),
            payouts: vec![EntryPayout {
                entry_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                position: 1,
                amount: dec!(1.90000000),
                transaction_id: Uuid::new_v4(),
            }],
            replayed: false,
        };
        let value = serde_json::to_value(&summary).unwrap();
        // Amounts travel as strings, digit for digit.
        assert_eq!(value["payouts"][0]["amount"], "1.90000000");
        let back: SettlementSummary = serde_json::from_value(value).unwrap();
        assert_eq!(back, summary);
    }
}
