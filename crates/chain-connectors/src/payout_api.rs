//! Payout provider client for sending funds to external destinations.

use crate::credentials::ProviderCredentials;
use crate::{provider_error, ChainError, ChainResult, PayoutExecutor, PayoutReceipt};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Client for the payout API. Each call moves real money, so callers invoke
/// it at most once per withdrawal.
pub struct PayoutApiClient {
    client: Client,
    base_url: String,
    api_key: Secret<String>,
}

#[derive(Debug, Serialize)]
struct PayoutRequest<'a> {
    destination: &'a str,
    amount: Decimal,
    currency: &'a str,
}

#[derive(Debug, Deserialize)]
struct PayoutResponse {
    reference: String,
}

impl PayoutApiClient {
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
impl PayoutExecutor for PayoutApiClient {
    async fn execute_payout(
        &self,
        destination: &str,
        amount: Decimal,
        currency: &str,
    ) -> ChainResult<PayoutReceipt> {
        debug!(destination, %amount, currency, "submitting payout to provider");

        let url = format!("{}/v1/payouts", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&PayoutRequest {
                destination,
                amount,
                currency,
            })
            .send()
            .await
            .map_err(|err| ChainError::Network(format!("payout request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(provider_error("payout submission", response).await);
        }

        let payload: PayoutResponse = response
            .json()
            .await
            .map_err(|err| ChainError::InvalidResponse(format!("payout payload: {err}")))?;

        info!(provider_ref = %payload.reference, "payout accepted by provider");
        Ok(PayoutReceipt {
            provider_ref: payload.reference,
        })
    }
}
