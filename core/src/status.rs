//! Transaction and contest status machines.
//!
//! Statuses are explicit enumerated columns, not free-form metadata. Every
//! transition is checked against a per-kind table before anything is
//! written; an illegal transition is a [`LedgerError::InvalidTransition`]
//! and causes no mutation.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Kind of ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    /// On-chain stablecoin deposit into the deposit bucket.
    Deposit,
    /// Withdrawal of winning funds to an external address.
    Withdrawal,
    /// Entry-fee debit for joining a contest.
    ContestEntry,
    /// Prize credit from contest settlement.
    Payout,
    /// Platform commission retained on settlement.
    SystemFee,
    /// Manual balance adjustment by an operator.
    Internal,
}

impl TxKind {
    /// Stable string form stored in the `transactions.tx_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Deposit => "deposit",
            TxKind::Withdrawal => "withdrawal",
            TxKind::ContestEntry => "contest_entry",
            TxKind::Payout => "payout",
            TxKind::SystemFee => "system_fee",
            TxKind::Internal => "internal",
        }
    }

    /// Parses the stored column value.
    pub fn parse(value: &str) -> LedgerResult<Self> {
        match value {
            "deposit" => Ok(TxKind::Deposit),
            "withdrawal" => Ok(TxKind::Withdrawal),
            "contest_entry" => Ok(TxKind::ContestEntry),
            "payout" => Ok(TxKind::Payout),
            "system_fee" => Ok(TxKind::SystemFee),
            "internal" => Ok(TxKind::Internal),
            other => Err(LedgerError::validation(format!(
                "unknown transaction kind '{other}'"
            ))),
        }
    }

    /// Initial status a freshly created row of this kind carries.
    pub fn initial_status(&self) -> TxStatus {
        match self {
            TxKind::Deposit | TxKind::Withdrawal => TxStatus::Pending,
            // Entry debits, payouts, fees and adjustments are written in
            // their terminal state inside the mutating transaction.
            TxKind::ContestEntry | TxKind::Payout | TxKind::SystemFee | TxKind::Internal => {
                TxStatus::Completed
            }
        }
    }
}

/// Status of a ledger transaction row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Processing,
    Confirmed,
    Completed,
    Failed,
    Rejected,
    Cancelled,
}

impl TxStatus {
    /// Stable string form stored in the `transactions.status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Processing => "processing",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
            TxStatus::Rejected => "rejected",
            TxStatus::Cancelled => "cancelled",
        }
    }

    /// Parses the stored column value.
    pub fn parse(value: &str) -> LedgerResult<Self> {
        match value {
            "pending" => Ok(TxStatus::Pending),
            "processing" => Ok(TxStatus::Processing),
            "confirmed" => Ok(TxStatus::Confirmed),
            "completed" => Ok(TxStatus::Completed),
            "failed" => Ok(TxStatus::Failed),
            "rejected" => Ok(TxStatus::Rejected),
            "cancelled" => Ok(TxStatus::Cancelled),
            other => Err(LedgerError::validation(format!(
                "unknown transaction status '{other}'"
            ))),
        }
    }

    /// Whether no further transition is permitted out of this status for
    /// the given kind.
    pub fn is_terminal(&self, kind: TxKind) -> bool {
        allowed_transitions(kind, *self).is_empty()
    }
}

/// The per-kind transition table.
fn allowed_transitions(kind: TxKind, from: TxStatus) -> &'static [TxStatus] {
    use TxStatus::*;
    match kind {
        TxKind::Deposit => match from {
            Pending => &[Confirmed, Failed],
            _ => &[],
        },
        TxKind::Withdrawal => match from {
            Pending => &[Processing, Rejected, Cancelled],
            Processing => &[Completed, Failed],
            _ => &[],
        },
        // Single-state kinds: written terminal, never advanced.
        TxKind::ContestEntry | TxKind::Payout | TxKind::SystemFee | TxKind::Internal => &[],
    }
}

/// Checks a status transition for the given transaction kind.
pub fn ensure_transition(kind: TxKind, from: TxStatus, to: TxStatus) -> LedgerResult<()> {
    if allowed_transitions(kind, from).contains(&to) {
        Ok(())
    } else {
        Err(LedgerError::InvalidTransition {
            kind: kind.as_str(),
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}

/// Lifecycle status of a contest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContestStatus {
    Scheduled,
    Open,
    Closed,
    Settled,
    Cancelled,
}

impl ContestStatus {
    /// Stable string form stored in the `contests.status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContestStatus::Scheduled => "scheduled",
            ContestStatus::Open => "open",
            ContestStatus::Closed => "closed",
            ContestStatus::Settled => "settled",
            ContestStatus::Cancelled => "cancelled",
        }
    }

    /// Parses the stored column value.
    pub fn parse(value: &str) -> LedgerResult<Self> {
        match value {
            "scheduled" => Ok(ContestStatus::Scheduled),
            "open" => Ok(ContestStatus::Open),
            "closed" => Ok(ContestStatus::Closed),
            "settled" => Ok(ContestStatus::Settled),
            "cancelled" => Ok(ContestStatus::Cancelled),
            other => Err(LedgerError::validation(format!(
                "unknown contest status '{other}'"
            ))),
        }
    }

    /// Whether the contest can still accept entries.
    pub fn is_joinable(&self) -> bool {
        matches!(self, ContestStatus::Open)
    }

    /// Whether the contest reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContestStatus::Settled | ContestStatus::Cancelled)
    }

    fn allowed_next(&self) -> &'static [ContestStatus] {
        use ContestStatus::*;
        match self {
            Scheduled => &[Open],
            Open => &[Closed, Cancelled],
            Closed => &[Settled, Cancelled],
            Settled | Cancelled => &[],
        }
    }

    /// Checks a contest status transition.
    pub fn ensure_transition(&self, to: ContestStatus) -> LedgerResult<()> {
        if self.allowed_next().contains(&to) {
            Ok(())
        } else {
            Err(LedgerError::InvalidTransition {
                kind: "contest",
                from: self.as_str(),
                to: to.as_str(),
            })
        }
    }
}
