//! Provider credential handling.
//!
//! API keys are wrapped in the `secrecy` crate so they cannot leak through
//! logs or debug output.

use crate::{ChainError, ChainResult};
use secrecy::{ExposeSecret, Secret};
use std::env;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Connection settings for one provider endpoint.
#[derive(Clone)]
pub struct ProviderCredentials {
    /// Base URL of the provider API, without a trailing slash.
    pub base_url: String,
    /// Bearer key (never log or expose)
    pub api_key: Secret<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProviderCredentials {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: normalize_url(base_url.into()),
            api_key: Secret::new(api_key.into()),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn missing_env(var: &str) -> ChainError {
        ChainError::Configuration(format!("Missing environment variable: {}", var))
    }

    /// Load credentials from environment variables under a prefix.
    ///
    /// Naming convention:
    /// - Scan API: SCAN_API_URL, SCAN_API_KEY, SCAN_API_TIMEOUT_SECS
    /// - Payout API: PAYOUT_API_URL, PAYOUT_API_KEY, PAYOUT_API_TIMEOUT_SECS
    pub fn from_env(prefix: &str) -> ChainResult<Self> {
        debug!(prefix, "loading provider credentials from environment");

        let url_var = format!("{prefix}_URL");
        let key_var = format!("{prefix}_KEY");
        let base_url = env::var(&url_var).map_err(|_| Self::missing_env(&url_var))?;
        let api_key = env::var(&key_var).map_err(|_| Self::missing_env(&key_var))?;

        let timeout = match env::var(format!("{prefix}_TIMEOUT_SECS")) {
            Ok(raw) => Duration::from_secs(raw.parse::<u64>().map_err(|_| {
                ChainError::Configuration(format!("{prefix}_TIMEOUT_SECS must be an integer"))
            })?),
            Err(_) => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let credentials = Self::new(base_url, api_key).with_timeout(timeout);
        credentials.validate()?;
        Ok(credentials)
    }

    /// Validate that the endpoint and key are usable.
    pub fn validate(&self) -> ChainResult<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ChainError::Configuration(format!(
                "provider base URL must be http(s), got '{}'",
                self.base_url
            )));
        }
        if self.api_key.expose_secret().is_empty() {
            return Err(ChainError::Configuration(
                "provider API key cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the API key (exposes secret - use carefully)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

fn normalize_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
