//! # Database Layer
//!
//! Storage layer for the FanLedger ledger: PostgreSQL via SQLx with
//! connection pooling and transaction support, Redis for cached reads and
//! de-duplication tokens, and an embedded schema migration runner.

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod migrations;
pub mod types;

// Re-export commonly used types
pub use cache::*;
pub use config::*;
pub use database::*;
pub use error::*;
pub use migrations::*;
pub use types::*;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
