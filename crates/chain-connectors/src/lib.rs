//! Chain provider connectors for FanLedger
//!
//! This crate provides HTTP clients for the two external money rails:
//! - the scan API used to verify deposit transactions on chain
//! - the payout API used to execute approved withdrawals
//!
//! Clients implement the `ChainVerifier` and `PayoutExecutor` traits consumed
//! by the payment pipeline, so tests and alternative providers can stand in.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod credentials;
pub mod payout_api;
pub mod scan_api;

/// Provider connector error types
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transaction not found: {0}")]
    NotFound(String),

    #[error("Provider API error: {code} - {message}")]
    Api { code: String, message: String },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type ChainResult<T> = Result<T, ChainError>;

/// On-chain state of a transaction as the scan provider reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Confirmed,
    Failed,
}

impl VerificationStatus {
    pub fn parse(raw: &str) -> ChainResult<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "confirmed" | "success" => Ok(Self::Confirmed),
            "failed" | "dropped" => Ok(Self::Failed),
            other => Err(ChainError::InvalidResponse(format!(
                "unknown transaction status '{other}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

/// What the scan provider knows about one transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub status: VerificationStatus,
    pub confirmations: i32,
    pub amount: Decimal,
    pub block_number: Option<i64>,
}

/// Provider acknowledgement for an executed payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutReceipt {
    pub provider_ref: String,
}

/// Looks up a transaction hash against the chain.
#[async_trait]
pub trait ChainVerifier: Send + Sync {
    async fn verify_transaction(&self, tx_hash: &str) -> ChainResult<VerificationReport>;
}

/// Sends funds to an external destination. Implementations are expected to be
/// called at most once per withdrawal; the caller owns retry policy.
#[async_trait]
pub trait PayoutExecutor: Send + Sync {
    async fn execute_payout(
        &self,
        destination: &str,
        amount: Decimal,
        currency: &str,
    ) -> ChainResult<PayoutReceipt>;
}

/// Maps a non-success provider response to a typed error, draining the body
/// for the `{code, message}` shape the providers return.
pub(crate) async fn provider_error(context: &str, response: reqwest::Response) -> ChainError {
    let status = response.status();
    let body: Option<serde_json::Value> = response.json().await.ok();
    let message = body
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{context} returned HTTP {status}"));
    match status.as_u16() {
        401 | 403 => ChainError::Authentication(message),
        404 => ChainError::NotFound(message),
        429 => ChainError::RateLimit(message),
        _ => ChainError::Api {
            code: body
                .as_ref()
                .and_then(|v| v.get("code"))
                .map(|v| match v.as_str() {
                    Some(code) => code.to_string(),
                    None => v.to_string(),
                })
                .unwrap_or_else(|| status.as_u16().to_string()),
            message,
        },
    }
}
