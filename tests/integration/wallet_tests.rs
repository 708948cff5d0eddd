//! Balance mutator tests against containerized PostgreSQL.

use rust_decimal_macros::dec;
use testcontainers::clients::Cli;
use uuid::Uuid;

use fanledger_core::{BalanceDeltas, LedgerError};
use wallet_ledger::{balances_of, WalletLedger};

use crate::support;

#[tokio::test]
#[ignore = "requires docker"]
async fn entry_fee_debits_buckets_in_priority_order() {
    let docker = Cli::default();
    let node = support::postgres(&docker);
    let db = support::migrated_db(&node).await;
    let ledger = WalletLedger::new(db);

    let user_id = Uuid::new_v4();
    ledger
        .update_balances(
            user_id,
            BalanceDeltas {
                deposit: dec!(5),
                bonus: dec!(3),
                winning: dec!(10),
            },
            "test seed",
            None,
        )
        .await
        .unwrap();

    let receipt = ledger
        .debit_for_contest_entry(user_id, dec!(12), Uuid::new_v4())
        .await
        .unwrap();

    // Deposit drains first, then bonus, winning covers the rest.
    assert_eq!(receipt.split.from_deposit, dec!(5));
    assert_eq!(receipt.split.from_bonus, dec!(3));
    assert_eq!(receipt.split.from_winning, dec!(4));
    assert_eq!(receipt.balances.deposit, dec!(0));
    assert_eq!(receipt.balances.bonus, dec!(0));
    assert_eq!(receipt.balances.winning, dec!(6));

    let wallet = ledger.get_wallet(user_id).await.unwrap();
    assert_eq!(balances_of(&wallet), receipt.balances);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn overdraft_rolls_back_without_a_trace() {
    let docker = Cli::default();
    let node = support::postgres(&docker);
    let db = support::migrated_db(&node).await;
    let ledger = WalletLedger::new(db.clone());

    let user_id = Uuid::new_v4();
    ledger
        .update_balances(
            user_id,
            BalanceDeltas {
                deposit: dec!(2),
                bonus: dec!(1),
                winning: dec!(1),
            },
            "test seed",
            None,
        )
        .await
        .unwrap();

    let err = ledger
        .debit_for_contest_entry(user_id, dec!(10), Uuid::new_v4())
        .await
        .unwrap_err();
    match err {
        LedgerError::InsufficientFunds {
            required,
            available,
        } => {
            assert_eq!(required, dec!(10));
            assert_eq!(available, dec!(4));
        }
        other => panic!("expected InsufficientFunds, got {other:?}"),
    }

    // Balances untouched, no contest_entry row written.
    let wallet = ledger.get_wallet(user_id).await.unwrap();
    assert_eq!(wallet.deposit_balance, dec!(2));
    assert_eq!(wallet.bonus_balance, dec!(1));
    assert_eq!(wallet.winning_balance, dec!(1));
    let entries: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE tx_type = 'contest_entry'")
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(entries, 0);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn withdrawal_hold_release_complete_round_trip() {
    let docker = Cli::default();
    let node = support::postgres(&docker);
    let db = support::migrated_db(&node).await;
    let ledger = WalletLedger::new(db);

    let user_id = Uuid::new_v4();
    ledger
        .update_balances(
            user_id,
            BalanceDeltas {
                winning: dec!(50),
                ..Default::default()
            },
            "test seed",
            None,
        )
        .await
        .unwrap();

    let withdrawal_id = Uuid::new_v4();
    let held = ledger
        .hold_for_withdrawal(user_id, dec!(20), withdrawal_id)
        .await
        .unwrap();
    assert_eq!(held.winning, dec!(30));
    assert_eq!(held.held, dec!(20));

    let released = ledger
        .release_withdrawal_hold(user_id, dec!(20), withdrawal_id)
        .await
        .unwrap();
    assert_eq!(released.winning, dec!(50));
    assert_eq!(released.held, dec!(0));

    ledger
        .hold_for_withdrawal(user_id, dec!(20), withdrawal_id)
        .await
        .unwrap();
    let completed = ledger
        .complete_withdrawal(user_id, dec!(20), withdrawal_id)
        .await
        .unwrap();
    // The held money leaves the wallet entirely.
    assert_eq!(completed.winning, dec!(30));
    assert_eq!(completed.held, dec!(0));

    let over_release = ledger
        .release_withdrawal_hold(user_id, dec!(1), withdrawal_id)
        .await;
    assert!(matches!(
        over_release,
        Err(LedgerError::InsufficientFunds { .. })
    ));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn winning_credit_deduplicates_on_key() {
    let docker = Cli::default();
    let node = support::postgres(&docker);
    let db = support::migrated_db(&node).await;
    let ledger = WalletLedger::new(db);

    let user_id = Uuid::new_v4();
    let first = ledger
        .credit_winning(user_id, dec!(7.5), "promo payout", Some("promo:42"))
        .await
        .unwrap();
    assert!(!first.deduped);

    let second = ledger
        .credit_winning(user_id, dec!(7.5), "promo payout", Some("promo:42"))
        .await
        .unwrap();
    assert!(second.deduped);
    assert_eq!(second.transaction_id, first.transaction_id);

    let wallet = ledger.get_wallet(user_id).await.unwrap();
    assert_eq!(wallet.winning_balance, dec!(7.5));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn wallet_appears_on_first_credit() {
    let docker = Cli::default();
    let node = support::postgres(&docker);
    let db = support::migrated_db(&node).await;
    let ledger = WalletLedger::new(db);

    let user_id = Uuid::new_v4();
    assert!(matches!(
        ledger.get_wallet(user_id).await,
        Err(LedgerError::NotFound { .. })
    ));

    let receipt = ledger.credit_deposit(user_id, dec!(3.25), None).await.unwrap();
    assert_eq!(receipt.balances.deposit, dec!(3.25));

    let wallet = ledger.get_wallet(user_id).await.unwrap();
    assert_eq!(wallet.deposit_balance, dec!(3.25));
    assert_eq!(wallet.currency, "USDT");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn noop_adjustment_is_rejected() {
    let docker = Cli::default();
    let node = support::postgres(&docker);
    let db = support::migrated_db(&node).await;
    let ledger = WalletLedger::new(db);

    let err = ledger
        .update_balances(Uuid::new_v4(), BalanceDeltas::default(), "nothing", None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation { .. }));
}
