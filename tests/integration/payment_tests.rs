//! Deposit and withdrawal pipeline tests against containerized PostgreSQL
//! and Redis, with the chain providers stubbed out.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use testcontainers::clients::Cli;
use uuid::Uuid;

use chain_connectors::{VerificationReport, VerificationStatus};
use fanledger_core::{LedgerError, LogNotifier, TxKind};
use fanledger_database::{DatabaseManager, TransactionRecord};
use payment_pipeline::{
    DepositTask, DepositWorker, PayoutWorker, RetryPolicy, TaskQueue, WebhookConfig,
    WebhookProcessor, WithdrawalService,
};
use wallet_ledger::{LedgerEntry, WalletLedger};

use crate::support;

const HASH: &str = "0xfeed0123456789abcdef";

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(10),
    }
}

async fn fetch_tx(db: &Arc<DatabaseManager>, id: Uuid) -> TransactionRecord {
    sqlx::query_as("SELECT * FROM transactions WHERE id = $1")
        .bind(id)
        .fetch_one(db.pool())
        .await
        .unwrap()
}

/// Inserts a threshold-crossed deposit row the way webhook ingestion would.
async fn seed_pending_deposit(
    db: &Arc<DatabaseManager>,
    user_id: Uuid,
    amount: Decimal,
) -> Uuid {
    let mut tx = db.pool().begin().await.unwrap();
    let entry = LedgerEntry::new(TxKind::Deposit, amount, "USDT")
        .user(user_id)
        .tx_hash(HASH)
        .confirmations(12)
        .metadata(json!({ "source": "webhook" }));
    let id = entry.id();
    entry.insert_in(&mut tx).await.unwrap();
    tx.commit().await.unwrap();
    id
}

#[tokio::test]
#[ignore = "requires docker"]
async fn webhook_records_then_enqueues_past_the_threshold() {
    let docker = Cli::default();
    let pg = support::postgres(&docker);
    let rd = support::redis(&docker);
    let db = support::migrated_db(&pg).await;
    let cache = support::cache_on(&rd).await;

    let (queue, mut rx) = TaskQueue::bounded("deposits", 16);
    let processor = WebhookProcessor::new(
        db.clone(),
        cache,
        queue,
        WebhookConfig {
            secret: None,
            confirmation_threshold: 3,
            dedupe_ttl: Duration::from_secs(60),
        },
    );

    let user_id = Uuid::new_v4();
    let below = serde_json::to_vec(&json!({
        "tx_hash": HASH,
        "user_id": user_id,
        "amount": "10.00000000",
        "currency": "USDT",
        "confirmations": 1,
        "status": "pending",
        "block_number": 812_000,
    }))
    .unwrap();
    let first = processor.receive_confirmation(&below, None).await.unwrap();
    assert!(!first.enqueued);
    let row = fetch_tx(&db, first.transaction_id).await;
    assert_eq!(row.status, "pending");
    assert_eq!(row.confirmations, 1);
    assert_eq!(row.tx_hash.as_deref(), Some(HASH));

    // Later notice for the same hash; user_id is no longer required.
    let past = serde_json::to_vec(&json!({
        "tx_hash": HASH,
        "amount": "10.00000000",
        "currency": "USDT",
        "confirmations": 3,
        "status": "confirmed",
        "block_number": 812_002,
    }))
    .unwrap();
    let second = processor.receive_confirmation(&past, None).await.unwrap();
    assert!(second.enqueued);
    assert_eq!(second.transaction_id, first.transaction_id);
    let task = rx.try_recv().unwrap();
    assert_eq!(task.transaction_id, first.transaction_id);
    assert_eq!(task.tx_hash, HASH);

    // Provider re-delivery: the Redis token keeps the queue quiet.
    let replay = processor.receive_confirmation(&past, None).await.unwrap();
    assert!(!replay.enqueued);
    assert!(rx.try_recv().is_err());
    let row = fetch_tx(&db, first.transaction_id).await;
    assert_eq!(row.confirmations, 3);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn verified_deposit_credits_the_wallet_exactly_once() {
    let docker = Cli::default();
    let pg = support::postgres(&docker);
    let db = support::migrated_db(&pg).await;
    let ledger = WalletLedger::new(db.clone());

    let user_id = Uuid::new_v4();
    let deposit_id = seed_pending_deposit(&db, user_id, dec!(10)).await;

    let verifier = support::StaticVerifier(VerificationReport {
        status: VerificationStatus::Confirmed,
        confirmations: 15,
        amount: dec!(10),
        block_number: Some(812_010),
    });
    let worker = DepositWorker::new(
        db.clone(),
        Arc::new(verifier),
        Arc::new(LogNotifier),
        fast_retry(),
    );
    let task = DepositTask {
        transaction_id: deposit_id,
        tx_hash: HASH.to_string(),
    };

    worker.process(task.clone()).await;
    let row = fetch_tx(&db, deposit_id).await;
    assert_eq!(row.status, "confirmed");
    assert_eq!(row.confirmations, 15);
    let wallet = ledger.get_wallet(user_id).await.unwrap();
    assert_eq!(wallet.deposit_balance, dec!(10));

    // Redelivered task finds the row already terminal and walks away.
    worker.process(task).await;
    let wallet = ledger.get_wallet(user_id).await.unwrap();
    assert_eq!(wallet.deposit_balance, dec!(10));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn amount_mismatch_fails_the_deposit_without_crediting() {
    let docker = Cli::default();
    let pg = support::postgres(&docker);
    let db = support::migrated_db(&pg).await;
    let ledger = WalletLedger::new(db.clone());

    let user_id = Uuid::new_v4();
    let deposit_id = seed_pending_deposit(&db, user_id, dec!(10)).await;

    let verifier = support::StaticVerifier(VerificationReport {
        status: VerificationStatus::Confirmed,
        confirmations: 15,
        amount: dec!(9.5),
        block_number: Some(812_010),
    });
    let worker = DepositWorker::new(
        db.clone(),
        Arc::new(verifier),
        Arc::new(LogNotifier),
        fast_retry(),
    );
    worker
        .process(DepositTask {
            transaction_id: deposit_id,
            tx_hash: HASH.to_string(),
        })
        .await;

    let row = fetch_tx(&db, deposit_id).await;
    assert_eq!(row.status, "failed");
    assert_eq!(row.metadata["failure"], "amount mismatch");
    // No wallet was ever created for the user.
    assert!(matches!(
        ledger.get_wallet(user_id).await,
        Err(LedgerError::NotFound { .. })
    ));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn approved_withdrawal_pays_out_and_removes_the_hold() {
    let docker = Cli::default();
    let pg = support::postgres(&docker);
    let db = support::migrated_db(&pg).await;
    let ledger = WalletLedger::new(db.clone());
    let admin = Uuid::new_v4();

    let user_id = Uuid::new_v4();
    ledger
        .credit_winning(user_id, dec!(30), "test seed", None)
        .await
        .unwrap();

    let (queue, mut rx) = TaskQueue::bounded("withdrawals", 8);
    let service = WithdrawalService::new(db.clone(), Arc::new(LogNotifier), queue);
    let record = service
        .request_withdrawal(user_id, dec!(10), "TPayout999Dest")
        .await
        .unwrap();
    assert_eq!(record.status, "pending");
    let wallet = ledger.get_wallet(user_id).await.unwrap();
    assert_eq!(wallet.winning_balance, dec!(20));
    assert_eq!(wallet.held_balance, dec!(10));

    service.approve(record.id, admin).await.unwrap();
    let task = rx.try_recv().unwrap();
    assert_eq!(task.withdrawal_id, record.id);

    let executor = Arc::new(support::CountingExecutor::default());
    let worker = PayoutWorker::new(db.clone(), executor.clone(), Arc::new(LogNotifier));
    worker.process(task).await;

    let row = fetch_tx(&db, record.id).await;
    assert_eq!(row.status, "completed");
    assert_eq!(row.metadata["provider_ref"], "payout-1");
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    let wallet = ledger.get_wallet(user_id).await.unwrap();
    assert_eq!(wallet.winning_balance, dec!(20));
    assert_eq!(wallet.held_balance, dec!(0));

    // A completed withdrawal cannot be approved back into processing.
    assert!(matches!(
        service.approve(record.id, admin).await,
        Err(LedgerError::InvalidTransition { .. })
    ));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn rejected_withdrawal_returns_the_hold() {
    let docker = Cli::default();
    let pg = support::postgres(&docker);
    let db = support::migrated_db(&pg).await;
    let ledger = WalletLedger::new(db.clone());
    let admin = Uuid::new_v4();

    let user_id = Uuid::new_v4();
    ledger
        .credit_winning(user_id, dec!(30), "test seed", None)
        .await
        .unwrap();
    let (queue, _rx) = TaskQueue::bounded("withdrawals", 8);
    let service = WithdrawalService::new(db.clone(), Arc::new(LogNotifier), queue);
    let record = service
        .request_withdrawal(user_id, dec!(10), "TPayout999Dest")
        .await
        .unwrap();

    service.reject(record.id, admin).await.unwrap();
    let row = fetch_tx(&db, record.id).await;
    assert_eq!(row.status, "rejected");
    let wallet = ledger.get_wallet(user_id).await.unwrap();
    assert_eq!(wallet.winning_balance, dec!(30));
    assert_eq!(wallet.held_balance, dec!(0));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn only_the_owner_may_cancel_a_withdrawal() {
    let docker = Cli::default();
    let pg = support::postgres(&docker);
    let db = support::migrated_db(&pg).await;
    let ledger = WalletLedger::new(db.clone());

    let owner = Uuid::new_v4();
    ledger
        .credit_winning(owner, dec!(30), "test seed", None)
        .await
        .unwrap();
    let (queue, _rx) = TaskQueue::bounded("withdrawals", 8);
    let service = WithdrawalService::new(db.clone(), Arc::new(LogNotifier), queue);
    let record = service
        .request_withdrawal(owner, dec!(10), "TPayout999Dest")
        .await
        .unwrap();

    let stranger = Uuid::new_v4();
    assert!(matches!(
        service.cancel(record.id, stranger).await,
        Err(LedgerError::Validation { .. })
    ));

    service.cancel(record.id, owner).await.unwrap();
    let row = fetch_tx(&db, record.id).await;
    assert_eq!(row.status, "cancelled");
    let wallet = ledger.get_wallet(owner).await.unwrap();
    assert_eq!(wallet.winning_balance, dec!(30));
    assert_eq!(wallet.held_balance, dec!(0));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn declined_payout_leaves_the_funds_held() {
    let docker = Cli::default();
    let pg = support::postgres(&docker);
    let db = support::migrated_db(&pg).await;
    let ledger = WalletLedger::new(db.clone());
    let admin = Uuid::new_v4();

    let user_id = Uuid::new_v4();
    ledger
        .credit_winning(user_id, dec!(30), "test seed", None)
        .await
        .unwrap();
    let (queue, mut rx) = TaskQueue::bounded("withdrawals", 8);
    let service = WithdrawalService::new(db.clone(), Arc::new(LogNotifier), queue);
    let record = service
        .request_withdrawal(user_id, dec!(10), "TPayout999Dest")
        .await
        .unwrap();
    service.approve(record.id, admin).await.unwrap();

    let worker = PayoutWorker::new(
        db.clone(),
        Arc::new(support::DecliningExecutor),
        Arc::new(LogNotifier),
    );
    worker.process(rx.try_recv().unwrap()).await;

    let row = fetch_tx(&db, record.id).await;
    assert_eq!(row.status, "failed");
    let failure = row.metadata["failure"].as_str().unwrap();
    assert!(failure.contains("insufficient_float"), "failure: {failure}");
    // Held funds stay frozen until an operator resolves the row.
    let wallet = ledger.get_wallet(user_id).await.unwrap();
    assert_eq!(wallet.winning_balance, dec!(20));
    assert_eq!(wallet.held_balance, dec!(10));
}
