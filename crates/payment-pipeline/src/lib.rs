//! Money movement between the platform and the outside world.
//!
//! Three cooperating pieces:
//! - webhook ingestion records provider deposit notices and, past the
//!   confirmation threshold, enqueues verification work;
//! - deposit workers re-verify against the chain and credit wallets;
//! - the withdrawal service holds and approves outbound payouts, and payout
//!   workers execute and settle them.
//!
//! Every state change lands in the transactions ledger and the audit trail;
//! the queues and the Redis token are accelerators, never the authority.

pub mod deposits;
pub mod queue;
pub mod webhook;
pub mod withdrawals;

pub use deposits::{DepositTask, DepositWorker, RetryPolicy};
pub use queue::{TaskQueue, WorkerPool};
pub use webhook::{DepositNotice, WebhookAck, WebhookConfig, WebhookProcessor};
pub use withdrawals::{PayoutWorker, WithdrawalService, WithdrawalTask};
