//! User notification seam.
//!
//! Financial operations emit [`NotifyEvent`]s after commit. Delivery is
//! fire-and-forget: a failed notification is logged and dropped, never
//! surfaced to the financial caller. [`LogNotifier`] is the default
//! implementation; real delivery backends implement [`Notifier`] behind the
//! same trait.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::LedgerResult;
use crate::{ContestId, TransactionId, UserId};

/// Events worth telling a user about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotifyEvent {
    DepositConfirmed {
        user_id: UserId,
        amount: Decimal,
        currency: String,
        tx_hash: String,
    },
    WithdrawalCompleted {
        user_id: UserId,
        withdrawal_id: TransactionId,
        amount: Decimal,
        provider_ref: String,
    },
    WithdrawalFailed {
        user_id: UserId,
        withdrawal_id: TransactionId,
        amount: Decimal,
        reason: String,
    },
    WithdrawalRejected {
        user_id: UserId,
        withdrawal_id: TransactionId,
        amount: Decimal,
    },
    ContestWon {
        user_id: UserId,
        contest_id: ContestId,
        position: u32,
        amount: Decimal,
    },
    ContestRefunded {
        user_id: UserId,
        contest_id: ContestId,
        amount: Decimal,
    },
}

impl NotifyEvent {
    /// The user the event belongs to.
    pub fn user_id(&self) -> UserId {
        match self {
            NotifyEvent::DepositConfirmed { user_id, .. }
            | NotifyEvent::WithdrawalCompleted { user_id, .. }
            | NotifyEvent::WithdrawalFailed { user_id, .. }
            | NotifyEvent::WithdrawalRejected { user_id, .. }
            | NotifyEvent::ContestWon { user_id, .. }
            | NotifyEvent::ContestRefunded { user_id, .. } => *user_id,
        }
    }
}

/// Delivery backend for user notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one event. Implementations surface delivery failures as
    /// errors; callers log and drop them.
    async fn notify(&self, event: NotifyEvent) -> LedgerResult<()>;
}

/// Default notifier: structured log lines, nothing leaves the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: NotifyEvent) -> LedgerResult<()> {
        match &event {
            NotifyEvent::DepositConfirmed {
                user_id,
                amount,
                currency,
                tx_hash,
            } => {
                info!(%user_id, %amount, currency, tx_hash, "deposit confirmed");
            }
            NotifyEvent::WithdrawalCompleted {
                user_id,
                withdrawal_id,
                amount,
                provider_ref,
            } => {
                info!(%user_id, %withdrawal_id, %amount, provider_ref, "withdrawal completed");
            }
            NotifyEvent::WithdrawalFailed {
                user_id,
                withdrawal_id,
                amount,
                reason,
            } => {
                info!(%user_id, %withdrawal_id, %amount, reason, "withdrawal failed");
            }
            NotifyEvent::WithdrawalRejected {
                user_id,
                withdrawal_id,
                amount,
            } => {
                info!(%user_id, %withdrawal_id, %amount, "withdrawal rejected");
            }
            NotifyEvent::ContestWon {
                user_id,
                contest_id,
                position,
                amount,
            } => {
                info!(%user_id, %contest_id, position, %amount, "contest prize credited");
            }
            NotifyEvent::ContestRefunded {
                user_id,
                contest_id,
                amount,
            } => {
                info!(%user_id, %contest_id, %amount, "contest entry refunded");
            }
        }
        Ok(())
    }
}
