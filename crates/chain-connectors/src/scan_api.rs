//! Scan provider client for on-chain transaction lookups.

use crate::credentials::ProviderCredentials;
use crate::{
    provider_error, ChainError, ChainResult, ChainVerifier, VerificationReport, VerificationStatus,
};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use tracing::debug;

/// Client for the scan API's transaction endpoint.
pub struct ScanApiClient {
    client: Client,
    base_url: String,
    api_key: Secret<String>,
}

#[derive(Debug, Deserialize)]
struct ScanTransaction {
    status: String,
    confirmations: i32,
    amount: Decimal,
    block_number: Option<i64>,
}

impl ScanApiClient {
    pub fn new(credentials: ProviderCredentials) -> ChainResult<Self> {
        credentials.validate()?;
        let client = Client::builder()
            .timeout(credentials.timeout)
            .build()
            .map_err(|err| ChainError::Configuration(format!("http client: {err}")))?;
        Ok(Self {
            client,
            base_url: credentials.base_url,
            api_key: credentials.api_key,
        })
    }
}

#[async_trait]
impl ChainVerifier for ScanApiClient {
    async fn verify_transaction(&self, tx_hash: &str) -> ChainResult<VerificationReport> {
        debug!(tx_hash, "looking up transaction on the scan provider");

        let url = format!("{}/v1/transactions/{}", self.base_url, tx_hash);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|err| ChainError::Network(format!("scan request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(provider_error("transaction lookup", response).await);
        }

        let payload: ScanTransaction = response
            .json()
            .await
            .map_err(|err| ChainError::InvalidResponse(format!("scan payload: {err}")))?;

        Ok(VerificationReport {
            status: VerificationStatus::parse(&payload.status)?,
            confirmations: payload.confirmations.max(0),
            amount: payload.amount,
            block_number: payload.block_number,
        })
    }
}
