//! Database type definitions
//!
//! Row records shared across the ledger services. Statuses and transaction
//! kinds are persisted as text and parsed into their enums at the service
//! boundary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Wallet row with the four balance buckets
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub deposit_balance: Decimal,
    pub winning_balance: Decimal,
    pub bonus_balance: Decimal,
    pub held_balance: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ledger transaction row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub tx_type: String,
    pub status: String,
    pub amount: Decimal,
    pub currency: String,
    pub related_entity: Option<String>,
    pub related_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub tx_hash: Option<String>,
    pub confirmations: i32,
    pub block_number: Option<i64>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Contest row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContestRecord {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub entry_fee: Decimal,
    pub currency: String,
    pub max_players: i32,
    pub commission_pct: Decimal,
    pub prize_structure: serde_json::Value,
    pub status: String,
    pub starts_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Contest entry row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContestEntryRecord {
    pub id: Uuid,
    pub contest_id: Uuid,
    pub user_id: Uuid,
    pub entry_code: String,
    pub amount_debited: Decimal,
    pub winner_rank: Option<i32>,
    pub payout_tx_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Immutable audit trail row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLogRecord {
    pub id: Uuid,
    pub admin_id: Option<Uuid>,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
