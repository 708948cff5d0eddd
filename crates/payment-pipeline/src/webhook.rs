//! Deposit confirmation webhook ingestion.
//!
//! The provider re-delivers notices freely; everything here is built to make
//! that safe. The transactions row (unique `tx_hash`, terminal status) is the
//! idempotency authority. The Redis token only spares the queue duplicate
//! work, and ingestion degrades to enqueue-anyway when Redis is down.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use metrics::counter;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, info, instrument, warn};

use chain_connectors::VerificationStatus;
use fanledger_core::{
    validate_amount, LedgerError, LedgerResult, TransactionId, TxKind, TxStatus, UserId,
};
use fanledger_database::{CacheManager, DatabaseManager, TransactionRecord};
use wallet_ledger::{
    advance_status_in, lock_deposit_by_hash_in, lock_transaction_in, map_db_err, record_audit_in,
    update_deposit_progress_in, LedgerEntry,
};

use crate::deposits::DepositTask;
use crate::queue::TaskQueue;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_CONFIRMATION_THRESHOLD: i32 = 12;
const DEFAULT_DEDUPE_TTL: Duration = Duration::from_secs(86_400);

/// Ingestion settings.
#[derive(Clone)]
pub struct WebhookConfig {
    /// Shared HMAC secret. `None` disables verification (development only).
    pub secret: Option<Secret<String>>,
    /// Confirmations required before a deposit is handed to the workers.
    pub confirmation_threshold: i32,
    /// Lifetime of the Redis dedupe token.
    pub dedupe_ttl: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            confirmation_threshold: DEFAULT_CONFIRMATION_THRESHOLD,
            dedupe_ttl: DEFAULT_DEDUPE_TTL,
        }
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("confirmation_threshold", &self.confirmation_threshold)
            .field("dedupe_ttl", &self.dedupe_ttl)
            .finish()
    }
}

/// Payload the chain provider posts on every confirmation update.
#[derive(Debug, Clone, Deserialize)]
pub struct DepositNotice {
    pub tx_hash: String,
    /// Required on the first notice for a hash, ignored afterwards.
    pub user_id: Option<UserId>,
    pub amount: Decimal,
    pub currency: String,
    pub confirmations: i32,
    pub status: String,
    pub block_number: Option<i64>,
}

/// What the caller reports back to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub transaction_id: TransactionId,
    pub enqueued: bool,
}

/// Validates, records and (past the threshold) enqueues deposit notices.
pub struct WebhookProcessor {
    db: Arc<DatabaseManager>,
    cache: Arc<CacheManager>,
    queue: TaskQueue<DepositTask>,
    config: WebhookConfig,
}

impl WebhookProcessor {
    pub fn new(
        db: Arc<DatabaseManager>,
        cache: Arc<CacheManager>,
        queue: TaskQueue<DepositTask>,
        config: WebhookConfig,
    ) -> Self {
        if config.secret.is_none() {
            warn!("webhook signature verification is DISABLED; set a shared secret in production");
        }
        Self {
            db,
            cache,
            queue,
            config,
        }
    }

    /// Full ingestion path for one provider notice.
    #[instrument(skip(self, raw_body, signature))]
    pub async fn receive_confirmation(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> LedgerResult<WebhookAck> {
        verify_signature(self.config.secret.as_ref(), raw_body, signature)?;
        let notice = parse_notice(raw_body)?;
        let chain_status = VerificationStatus::parse(&notice.status)
            .map_err(|err| LedgerError::validation(err.to_string()))?;

        let mut tx = self.db.pool().begin().await.map_err(map_db_err)?;
        let record = match lock_deposit_by_hash_in(&mut tx, &notice.tx_hash).await? {
            Some(record) => record,
            None => self.create_pending_deposit(&mut tx, &notice).await?,
        };

        let status = TxStatus::parse(&record.status)?;
        if status.is_terminal(TxKind::Deposit) {
            tx.rollback().await.map_err(map_db_err)?;
            debug!(tx_hash = %notice.tx_hash, status = %record.status, "deposit already terminal");
            return Ok(WebhookAck {
                transaction_id: record.id,
                enqueued: false,
            });
        }

        update_deposit_progress_in(
            &mut tx,
            record.id,
            notice.confirmations.max(0),
            notice.block_number,
        )
        .await?;

        if chain_status == VerificationStatus::Failed {
            advance_status_in(&mut tx, &record, TxStatus::Failed).await?;
            record_audit_in(
                &mut tx,
                None,
                "deposit.failed",
                Some(("transaction", record.id)),
                json!({ "tx_hash": notice.tx_hash, "reason": "provider reported failure" }),
            )
            .await?;
            tx.commit().await.map_err(map_db_err)?;
            counter!("deposits_failed_total", 1);
            warn!(tx_hash = %notice.tx_hash, "provider reported deposit failure");
            return Ok(WebhookAck {
                transaction_id: record.id,
                enqueued: false,
            });
        }

        tx.commit().await.map_err(map_db_err)?;

        if notice.confirmations < self.config.confirmation_threshold {
            debug!(
                tx_hash = %notice.tx_hash,
                confirmations = notice.confirmations,
                threshold = self.config.confirmation_threshold,
                "deposit below confirmation threshold"
            );
            return Ok(WebhookAck {
                transaction_id: record.id,
                enqueued: false,
            });
        }

        let enqueued = self.claim_and_enqueue(&record, &notice.tx_hash).await;
        Ok(WebhookAck {
            transaction_id: record.id,
            enqueued,
        })
    }

    async fn create_pending_deposit(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Postgres>,
        notice: &DepositNotice,
    ) -> LedgerResult<TransactionRecord> {
        let user_id = notice.user_id.ok_or_else(|| {
            LedgerError::validation(format!(
                "first notice for {} must carry a user_id",
                notice.tx_hash
            ))
        })?;
        let amount = validate_amount(notice.amount)?;
        let id = LedgerEntry::new(TxKind::Deposit, amount, &notice.currency)
            .user(user_id)
            .tx_hash(&notice.tx_hash)
            .confirmations(notice.confirmations.max(0))
            .block_number(notice.block_number)
            .metadata(json!({ "source": "webhook" }))
            .insert_in(tx)
            .await?;
        info!(tx_hash = %notice.tx_hash, %user_id, %amount, "recorded incoming deposit");
        lock_transaction_in(tx, id).await
    }

    /// Claims the Redis token and enqueues. Returns whether a task was
    /// actually queued; queue refusal is an ack detail, not an error.
    async fn claim_and_enqueue(&self, record: &TransactionRecord, tx_hash: &str) -> bool {
        let token_key = format!("deposit:txhash:{tx_hash}");
        let claimed = match self
            .cache
            .set_if_absent(&token_key, "queued", self.config.dedupe_ttl)
            .await
        {
            Ok(claimed) => claimed,
            Err(err) => {
                warn!(error = %err, "dedupe token unavailable, enqueueing anyway");
                true
            }
        };
        if !claimed {
            debug!(tx_hash, "deposit already handed to the workers");
            return false;
        }

        let task = DepositTask {
            transaction_id: record.id,
            tx_hash: tx_hash.to_string(),
        };
        match self.queue.enqueue(task) {
            Ok(()) => {
                counter!("deposits_enqueued_total", 1);
                true
            }
            Err(err) => {
                if let Err(del_err) = self.cache.delete(&token_key).await {
                    warn!(error = %del_err, "failed to release dedupe token after queue refusal");
                }
                warn!(error = %err, tx_hash, "deposit queue refused the task");
                false
            }
        }
    }
}

/// Checks the `sha256=<hex>` HMAC header against the raw body.
pub fn verify_signature(
    secret: Option<&Secret<String>>,
    raw_body: &[u8],
    signature: Option<&str>,
) -> LedgerResult<()> {
    let Some(secret) = secret else {
        warn!("accepting webhook without signature verification");
        return Ok(());
    };
    let provided =
        signature.ok_or_else(|| LedgerError::signature("missing signature header"))?;
    let digest = hex::decode(provided.trim().trim_start_matches("sha256="))
        .map_err(|_| LedgerError::signature("signature is not valid hex"))?;
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| LedgerError::signature("webhook secret is unusable"))?;
    mac.update(raw_body);
    mac.verify_slice(&digest)
        .map_err(|_| LedgerError::signature("signature mismatch"))
}

pub fn parse_notice(raw_body: &[u8]) -> LedgerResult<DepositNotice> {
    serde_json::from_slice(raw_body)
        .map_err(|err| LedgerError::validation(format!("malformed webhook payload: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_passes() {
        let secret = Secret::new("hook-secret".to_string());
        let body = br#"{"tx_hash":"0xabc"}"#;
        let sig = sign("hook-secret", body);
        assert!(verify_signature(Some(&secret), body, Some(&sig)).is_ok());
    }

    #[test]
    fn prefixed_signature_passes() {
        let secret = Secret::new("hook-secret".to_string());
        let body = b"payload";
        let sig = format!("sha256={}", sign("hook-secret", body));
        assert!(verify_signature(Some(&secret), body, Some(&sig)).is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let secret = Secret::new("hook-secret".to_string());
        let sig = sign("hook-secret", b"original");
        let err = verify_signature(Some(&secret), b"tampered", Some(&sig)).unwrap_err();
        assert!(matches!(err, LedgerError::Signature { .. }));
    }

    #[test]
    fn missing_header_is_rejected_when_secret_is_set() {
        let secret = Secret::new("hook-secret".to_string());
        let err = verify_signature(Some(&secret), b"body", None).unwrap_err();
        assert!(matches!(err, LedgerError::Signature { .. }));
    }

    #[test]
    fn no_secret_skips_verification() {
        assert!(verify_signature(None, b"anything", None).is_ok());
    }

    #[test]
    fn notice_parses_with_optional_fields_absent() {
        let body = br#"{
            "tx_hash": "0xabc123",
            "amount": "1.50000000",
            "currency": "USDC",
            "confirmations": 3,
            "status": "pending",
            "block_number": null
        }"#;
        let notice = parse_notice(body).unwrap();
        assert_eq!(notice.tx_hash, "0xabc123");
        assert_eq!(notice.user_id, None);
        assert_eq!(notice.amount, dec!(1.5));
        assert_eq!(notice.block_number, None);
    }

    #[test]
    fn garbage_payload_is_a_validation_error() {
        let err = parse_notice(b"not json").unwrap_err();
        assert!(matches!(err, LedgerError::Validation { .. }));
    }
}
