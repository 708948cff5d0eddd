//! # FanLedger
//!
//! Financial ledger and contest-settlement engine for a fantasy-sports
//! platform. Users deposit stablecoin, enter paid contests and withdraw
//! winnings; every movement of money runs through the four-bucket wallet
//! model and lands in an append-only transactions ledger and audit trail,
//! so the full balance history can be replayed and reconciled.
//!
//! ## Architecture
//!
//! The system is organized into workspace crates:
//! - `fanledger-core`: domain types, error taxonomy, money arithmetic and
//!   the balance-mutation rules
//! - `fanledger-database`: PostgreSQL pool, Redis cache and embedded
//!   schema migrations
//! - `wallet-ledger`: wallets, ledger entries, holds and the audit trail
//! - `contest-engine`: contest lifecycle, entry, settlement and cancellation
//! - `payment-pipeline`: webhook ingestion, deposit crediting and payout
//!   execution
//! - `chain-connectors`: blockchain-verification and payout provider
//!   clients
//!
//! This crate assembles them into a running daemon; see
//! [`runtime::LedgerRuntime`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fanledger::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Connects, migrates and starts the worker pools.
//!     let runtime = LedgerRuntime::builder()
//!         .config(LedgerConfig::from_env()?)
//!         .build()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unused_qualifications,
    missing_debug_implementations
)]

pub mod runtime;

/// Re-exports for convenience
pub mod prelude {
    pub use crate::runtime::{LedgerRuntime, LedgerRuntimeBuilder};
    pub use fanledger_core::{Balances, LedgerError, LedgerResult, NotifyEvent};
    pub use fanledger_database::LedgerConfig;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build information
pub const BUILD_INFO: &str = concat!(
    "FanLedger v",
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CARGO_PKG_REPOSITORY"),
    ")"
);
