//! # Prize Structures and Payout Math
//!
//! A contest stores its prize structure as an ordered JSON array of
//! `{position, percentage}` slots. Settlement turns that structure plus the
//! distributable pool into a payout plan. Matching plan positions to actual
//! entries (creation order or pre-assigned ranks) is the contest engine's
//! job; this module is pure arithmetic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::money::percentage_of;

/// One prize slot: the finishing position (1-based) and its percentage of
/// the distributable pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeSlot {
    pub position: u32,
    pub percentage: Decimal,
}

/// Ordered prize slots, stored verbatim in `contests.prize_structure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrizeStructure(pub Vec<PrizeSlot>);

impl Default for PrizeStructure {
    /// Winner takes all.
    fn default() -> Self {
        PrizeStructure(vec![PrizeSlot {
            position: 1,
            percentage: Decimal::ONE_HUNDRED,
        }])
    }
}

impl PrizeStructure {
    /// Checks the structure at contest creation time: at least one slot,
    /// positions unique and 1-based, every percentage positive, total at
    /// most 100. An under-allocated total is allowed; the unallocated share
    /// simply stays in the pool.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.0.is_empty() {
            return Err(LedgerError::validation("prize structure cannot be empty"));
        }
        let mut seen = Vec::with_capacity(self.0.len());
        let mut total = Decimal::ZERO;
        for slot in &self.0 {
            if slot.position == 0 {
                return Err(LedgerError::validation(
                    "prize positions are 1-based; position 0 is invalid",
                ));
            }
            if seen.contains(&slot.position) {
                return Err(LedgerError::validation(format!(
                    "duplicate prize position {}",
                    slot.position
                )));
            }
            seen.push(slot.position);
            if slot.percentage <= Decimal::ZERO {
                return Err(LedgerError::validation(format!(
                    "prize percentage for position {} must be positive",
                    slot.position
                )));
            }
            total += slot.percentage;
        }
        if total > Decimal::ONE_HUNDRED {
            return Err(LedgerError::validation(format!(
                "prize percentages sum to {total}, exceeding 100"
            )));
        }
        Ok(())
    }

    /// Builds the payout plan for a settled pool. Slots whose position
    /// exceeds the number of entries are dropped; their shares are not
    /// redistributed. Each amount is quantized independently.
    pub fn payout_plan(&self, distributable_pool: Decimal, num_entries: usize) -> PayoutPlan {
        let mut payouts = Vec::new();
        let mut total_allocated = Decimal::ZERO;
        for slot in &self.0 {
            if slot.position as usize > num_entries {
                continue;
            }
            let amount = percentage_of(distributable_pool, slot.percentage);
            total_allocated += amount;
            payouts.push(PlannedPayout {
                position: slot.position,
                percentage: slot.percentage,
                amount,
            });
        }
        PayoutPlan {
            payouts,
            total_allocated,
        }
    }
}

/// One planned prize payment, before it is matched to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedPayout {
    pub position: u32,
    pub percentage: Decimal,
    pub amount: Decimal,
}

/// The full plan for one settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutPlan {
    pub payouts: Vec<PlannedPayout>,
    /// Sum of every planned amount; never exceeds the distributable pool
    /// for a valid structure.
    pub total_allocated: Decimal,
}
