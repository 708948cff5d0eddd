//! # FanLedger Core
//!
//! Pure domain layer for the FanLedger financial ledger: fixed-point money
//! arithmetic, wallet bucket model, transaction and contest status machines,
//! prize-pool mathematics and the shared error taxonomy.
//!
//! Nothing in this crate performs I/O. The storage, settlement and payment
//! crates build on these types and are responsible for persistence and
//! concurrency control.

pub mod error;
pub mod money;
pub mod notify;
pub mod prize;
pub mod status;
pub mod wallet;

pub use error::{LedgerError, LedgerResult};
pub use money::{quantize, validate_amount, SCALE};
pub use notify::{LogNotifier, NotifyEvent, Notifier};
pub use prize::{PayoutPlan, PlannedPayout, PrizeSlot, PrizeStructure};
pub use status::{ContestStatus, TxKind, TxStatus};
pub use wallet::{debit_split, BalanceDeltas, Balances, DebitSplit};

/// Unique identifier aliases used across the ledger crates.
pub type UserId = uuid::Uuid;
pub type WalletId = uuid::Uuid;
pub type TransactionId = uuid::Uuid;
pub type ContestId = uuid::Uuid;
pub type EntryId = uuid::Uuid;
pub type AdminId = uuid::Uuid;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
