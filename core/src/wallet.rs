//! # Wallet Bucket Model
//!
//! A wallet holds four non-negative buckets. `deposit`, `bonus` and
//! `winning` are spendable for contest entries in that priority order;
//! `held` is money frozen under an in-flight withdrawal and spendable by
//! nothing. Only `winning` can be withdrawn.
//!
//! Everything here is pure arithmetic on [`Decimal`]; persistence and row
//! locking live in the wallet-ledger crate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::money::quantize;

/// The four balance buckets of one wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balances {
    pub deposit: Decimal,
    pub bonus: Decimal,
    pub winning: Decimal,
    pub held: Decimal,
}

impl Balances {
    /// Amount spendable on contest entries (`held` excluded).
    pub fn spendable(&self) -> Decimal {
        self.deposit + self.bonus + self.winning
    }

    /// Everything the wallet holds, including frozen funds.
    pub fn total(&self) -> Decimal {
        self.spendable() + self.held
    }

    /// Applies signed per-bucket deltas, rejecting any result that would
    /// drive a bucket negative. `held` is not adjustable this way; it only
    /// moves through the withdrawal hold operations.
    pub fn checked_apply(&self, deltas: &BalanceDeltas) -> LedgerResult<Balances> {
        let next = Balances {
            deposit: quantize(self.deposit + deltas.deposit),
            bonus: quantize(self.bonus + deltas.bonus),
            winning: quantize(self.winning + deltas.winning),
            held: self.held,
        };
        for (value, delta) in [
            (next.deposit, deltas.deposit),
            (next.bonus, deltas.bonus),
            (next.winning, deltas.winning),
        ] {
            if value < Decimal::ZERO {
                return Err(LedgerError::insufficient_funds(-delta, value - delta));
            }
        }
        Ok(next)
    }
}

/// Signed adjustment applied to the spendable buckets by
/// `update_balances`. A zero delta leaves the bucket untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BalanceDeltas {
    #[serde(default)]
    pub deposit: Decimal,
    #[serde(default)]
    pub bonus: Decimal,
    #[serde(default)]
    pub winning: Decimal,
}

impl BalanceDeltas {
    /// True when every delta is zero.
    pub fn is_noop(&self) -> bool {
        self.deposit.is_zero() && self.bonus.is_zero() && self.winning.is_zero()
    }
}

/// How an entry-fee debit was satisfied across the three spendable
/// buckets. Recorded in the transaction row's metadata so the split is
/// auditable after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DebitSplit {
    pub from_deposit: Decimal,
    pub from_bonus: Decimal,
    pub from_winning: Decimal,
}

impl DebitSplit {
    /// Sum of the three components; equals the debited amount.
    pub fn total(&self) -> Decimal {
        self.from_deposit + self.from_bonus + self.from_winning
    }
}

/// Computes the priority split for debiting `amount` from `balances`:
/// deposit first, then bonus, then winning, each contribution capped at the
/// remaining need. Returns `None` when the three buckets together cannot
/// cover the amount.
pub fn debit_split(balances: &Balances, amount: Decimal) -> Option<DebitSplit> {
    if amount <= Decimal::ZERO {
        return None;
    }
    let mut remaining = amount;
    let from_deposit = remaining.min(balances.deposit);
    remaining -= from_deposit;
    let from_bonus = remaining.min(balances.bonus);
    remaining -= from_bonus;
    let from_winning = remaining.min(balances.winning);
    remaining -= from_winning;
    if remaining > Decimal::ZERO {
        return None;
    }
    Some(DebitSplit {
        from_deposit: quantize(from_deposit),
        from_bonus: quantize(from_bonus),
        from_winning: quantize(from_winning),
    })
}
