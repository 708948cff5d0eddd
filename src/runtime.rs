//! Runtime assembly for the ledger daemon.
//!
//! [`LedgerRuntime`] wires configuration into the database pool, the Redis
//! cache, schema migrations, the ledger services and the background worker
//! pools, and owns their orderly shutdown. Workers start as part of
//! [`LedgerRuntimeBuilder::build`]; there is no separate start step.

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use chain_connectors::credentials::ProviderCredentials;
use chain_connectors::payout_api::PayoutApiClient;
use chain_connectors::scan_api::ScanApiClient;
use chain_connectors::{ChainVerifier, PayoutExecutor};
use contest_engine::ContestEngine;
use fanledger_core::{LogNotifier, Notifier};
use fanledger_database::{run_migrations, CacheManager, DatabaseManager, LedgerConfig};
use payment_pipeline::{
    DepositWorker, PayoutWorker, RetryPolicy, TaskQueue, WebhookProcessor, WithdrawalService,
    WorkerPool,
};
use wallet_ledger::WalletLedger;

/// Environment prefix for the blockchain-verification provider credentials.
const SCAN_API_PREFIX: &str = "SCAN_API";
/// Environment prefix for the payout provider credentials.
const PAYOUT_API_PREFIX: &str = "PAYOUT_API";

/// A fully wired ledger daemon.
///
/// The runtime owns the only handles to the webhook processor and withdrawal
/// service; [`LedgerRuntime::shutdown`] drops them, which closes the task
/// queues, and then waits for the worker pools to drain what was already
/// queued. Dropping the runtime without calling `shutdown` detaches the
/// workers instead of draining them.
pub struct LedgerRuntime {
    config: LedgerConfig,
    db: Arc<DatabaseManager>,
    cache: Arc<CacheManager>,
    ledger: Arc<WalletLedger>,
    contests: Arc<ContestEngine>,
    webhooks: Arc<WebhookProcessor>,
    withdrawals: Arc<WithdrawalService>,
    deposit_pool: WorkerPool,
    withdrawal_pool: WorkerPool,
}

impl LedgerRuntime {
    /// Creates a builder with nothing injected; every component falls back
    /// to its environment-driven default at build time.
    pub fn builder() -> LedgerRuntimeBuilder {
        LedgerRuntimeBuilder {
            config: None,
            verifier: None,
            executor: None,
            notifier: None,
        }
    }

    /// The configuration the runtime was built with.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// The PostgreSQL pool manager.
    pub fn db(&self) -> &Arc<DatabaseManager> {
        &self.db
    }

    /// The Redis cache manager.
    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Wallet balances, ledger entries and history.
    pub fn ledger(&self) -> &WalletLedger {
        &self.ledger
    }

    /// Contest lifecycle, entry, settlement and cancellation.
    pub fn contests(&self) -> &ContestEngine {
        &self.contests
    }

    /// Deposit-confirmation webhook ingestion.
    pub fn webhooks(&self) -> &WebhookProcessor {
        &self.webhooks
    }

    /// Withdrawal request, approval, rejection and cancellation.
    pub fn withdrawals(&self) -> &WithdrawalService {
        &self.withdrawals
    }

    /// Stops intake and drains the worker pools.
    ///
    /// Closing the queues makes further webhook enqueues and withdrawal
    /// approvals fail with a conflict; tasks already queued are finished
    /// before this returns.
    pub async fn shutdown(self) {
        let LedgerRuntime {
            webhooks,
            withdrawals,
            deposit_pool,
            withdrawal_pool,
            ..
        } = self;
        drop(webhooks);
        drop(withdrawals);
        deposit_pool.join().await;
        withdrawal_pool.join().await;
        info!("worker pools drained");
    }
}

impl fmt::Debug for LedgerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerRuntime")
            .field("environment", &self.config.environment)
            .field("deposit_workers", &self.config.workers.deposit_workers)
            .field(
                "withdrawal_workers",
                &self.config.workers.withdrawal_workers,
            )
            .finish_non_exhaustive()
    }
}

/// Builder for [`LedgerRuntime`].
///
/// The chain verifier, payout executor and notifier can be injected for
/// tests or alternative providers; by default they are built from
/// `SCAN_API_*` / `PAYOUT_API_*` environment credentials and the
/// log-backed notifier.
pub struct LedgerRuntimeBuilder {
    config: Option<LedgerConfig>,
    verifier: Option<Arc<dyn ChainVerifier>>,
    executor: Option<Arc<dyn PayoutExecutor>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl LedgerRuntimeBuilder {
    /// Uses `config` instead of reading the environment.
    pub fn config(mut self, config: LedgerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Injects the blockchain-verification client.
    pub fn verifier(mut self, verifier: Arc<dyn ChainVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Injects the payout provider client.
    pub fn executor(mut self, executor: Arc<dyn PayoutExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Injects the user-notification sink.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Connects, migrates, wires the services and starts the worker pools.
    pub async fn build(self) -> anyhow::Result<LedgerRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => LedgerConfig::from_env()?,
        };
        config.validate()?;

        let db = Arc::new(
            DatabaseManager::new(config.database.clone())
                .await
                .context("database pool")?,
        );
        let cache = Arc::new(
            CacheManager::new(config.cache.clone())
                .await
                .context("redis cache")?,
        );

        let report = run_migrations(&db).await.context("schema migrations")?;
        info!(
            applied = report.applied,
            skipped = report.skipped,
            "schema is current"
        );

        let notifier: Arc<dyn Notifier> = match self.notifier {
            Some(notifier) => notifier,
            None => Arc::new(LogNotifier),
        };
        let verifier: Arc<dyn ChainVerifier> = match self.verifier {
            Some(verifier) => verifier,
            None => {
                let credentials = ProviderCredentials::from_env(SCAN_API_PREFIX)
                    .context("scan provider credentials")?;
                Arc::new(ScanApiClient::new(credentials)?)
            }
        };
        let executor: Arc<dyn PayoutExecutor> = match self.executor {
            Some(executor) => executor,
            None => {
                let credentials = ProviderCredentials::from_env(PAYOUT_API_PREFIX)
                    .context("payout provider credentials")?;
                Arc::new(PayoutApiClient::new(credentials)?)
            }
        };

        let ledger = Arc::new(WalletLedger::new(Arc::clone(&db)));
        let contests = Arc::new(ContestEngine::new(Arc::clone(&db), Arc::clone(&notifier)));

        let (deposit_queue, deposit_rx) =
            TaskQueue::bounded("deposits", config.workers.queue_capacity);
        let (withdrawal_queue, withdrawal_rx) =
            TaskQueue::bounded("withdrawals", config.workers.queue_capacity);

        // The processor and service are the only strong holders of the queue
        // senders; shutdown relies on that to close the channels.
        let webhooks = Arc::new(WebhookProcessor::new(
            Arc::clone(&db),
            Arc::clone(&cache),
            deposit_queue,
            payment_pipeline::WebhookConfig {
                secret: config.webhook.shared_secret.clone(),
                confirmation_threshold: config.webhook.confirmation_threshold as i32,
                dedupe_ttl: config.webhook.dedupe_token_ttl,
            },
        ));
        let withdrawals = Arc::new(WithdrawalService::new(
            Arc::clone(&db),
            Arc::clone(&notifier),
            withdrawal_queue,
        ));

        let deposit_worker = Arc::new(DepositWorker::new(
            Arc::clone(&db),
            verifier,
            Arc::clone(&notifier),
            RetryPolicy {
                max_attempts: config.workers.retry_max_attempts,
                base_delay: config.workers.retry_base_delay,
                max_delay: config.workers.retry_max_delay,
            },
        ));
        let deposit_pool = WorkerPool::spawn(
            "deposits",
            config.workers.deposit_workers,
            deposit_rx,
            move |task| {
                let worker = Arc::clone(&deposit_worker);
                async move { worker.process(task).await }
            },
        );

        let payout_worker = Arc::new(PayoutWorker::new(
            Arc::clone(&db),
            executor,
            Arc::clone(&notifier),
        ));
        let withdrawal_pool = WorkerPool::spawn(
            "withdrawals",
            config.workers.withdrawal_workers,
            withdrawal_rx,
            move |task| {
                let worker = Arc::clone(&payout_worker);
                async move { worker.process(task).await }
            },
        );

        info!(
            deposit_workers = config.workers.deposit_workers,
            withdrawal_workers = config.workers.withdrawal_workers,
            queue_capacity = config.workers.queue_capacity,
            "ledger runtime assembled"
        );

        Ok(LedgerRuntime {
            config,
            db,
            cache,
            ledger,
            contests,
            webhooks,
            withdrawals,
            deposit_pool,
            withdrawal_pool,
        })
    }
}

impl fmt::Debug for LedgerRuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerRuntimeBuilder")
            .field("config", &self.config)
            .field("verifier", &self.verifier.as_ref().map(|_| "injected"))
            .field("executor", &self.executor.as_ref().map(|_| "injected"))
            .field("notifier", &self.notifier.as_ref().map(|_| "injected"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_starts_with_nothing_injected() {
        let builder = LedgerRuntime::builder();
        assert!(builder.config.is_none());
        assert!(builder.verifier.is_none());
        assert!(builder.executor.is_none());
        assert!(builder.notifier.is_none());
    }

    #[test]
    fn builder_applies_config() {
        let mut config = LedgerConfig::default();
        config.workers.deposit_workers = 7;
        let builder = LedgerRuntime::builder().config(config);
        let workers = builder.config.as_ref().map(|c| c.workers.deposit_workers);
        assert_eq!(workers, Some(7));
    }

    #[test]
    fn builder_debug_does_not_leak_components() {
        let builder = LedgerRuntime::builder().notifier(Arc::new(LogNotifier));
        let debug_output = format!("{:?}", builder);
        assert!(debug_output.contains("injected"));
    }
}
