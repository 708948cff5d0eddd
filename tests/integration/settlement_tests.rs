//! Contest lifecycle, settlement and cancellation tests against
//! containerized PostgreSQL.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use testcontainers::clients::Cli;
use uuid::Uuid;

use contest_engine::{ContestDraft, ContestEngine};
use fanledger_core::{LedgerError, LogNotifier, PrizeSlot, PrizeStructure};
use fanledger_database::DatabaseManager;
use wallet_ledger::WalletLedger;

use crate::support;

fn services(db: &Arc<DatabaseManager>) -> (WalletLedger, ContestEngine) {
    let ledger = WalletLedger::new(db.clone());
    let engine = ContestEngine::new(db.clone(), Arc::new(LogNotifier));
    (ledger, engine)
}

fn draft(entry_fee: Decimal, commission_pct: Decimal, structure: PrizeStructure) -> ContestDraft {
    ContestDraft {
        title: "Friday Night Cup".to_string(),
        entry_fee,
        currency: "USDT".to_string(),
        max_players: 10,
        commission_pct,
        prize_structure: structure,
        starts_at: None,
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn winner_take_all_settlement_is_replayable() {
    let docker = Cli::default();
    let node = support::postgres(&docker);
    let db = support::migrated_db(&node).await;
    let (ledger, engine) = services(&db);
    let admin = Uuid::new_v4();

    let contest = engine
        .create_contest(draft(dec!(1), dec!(5), PrizeStructure::default()), admin)
        .await
        .unwrap();
    engine.open_contest(contest.id, admin).await.unwrap();

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    for user in [alice, bob] {
        ledger.credit_deposit(user, dec!(1), None).await.unwrap();
        engine.join_contest(contest.id, user).await.unwrap();
    }
    engine.close_contest(contest.id, admin).await.unwrap();

    let summary = engine.settle(contest.id, admin).await.unwrap();
    assert!(!summary.replayed);
    assert_eq!(summary.num_entries, 2);
    assert_eq!(summary.total_prize_pool, dec!(2));
    assert_eq!(summary.commission, dec!(0.1));
    assert_eq!(summary.distributable_pool, dec!(1.9));
    assert_eq!(summary.payouts.len(), 1);
    // No recorded rankings, so position 1 goes to the earliest entry.
    assert_eq!(summary.payouts[0].position, 1);
    assert_eq!(summary.payouts[0].user_id, alice);
    assert_eq!(summary.payouts[0].amount, dec!(1.9));

    let winner = ledger.get_wallet(alice).await.unwrap();
    assert_eq!(winner.winning_balance, dec!(1.9));
    assert_eq!(winner.deposit_balance, dec!(0));

    // Replay returns the recorded summary without moving money again.
    let replay = engine.settle(contest.id, admin).await.unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.payouts.len(), 1);
    assert_eq!(
        replay.payouts[0].transaction_id,
        summary.payouts[0].transaction_id
    );
    let winner = ledger.get_wallet(alice).await.unwrap();
    assert_eq!(winner.winning_balance, dec!(1.9));

    assert!(matches!(
        engine.cancel(contest.id, admin).await,
        Err(LedgerError::AlreadySettled { .. })
    ));
    let row = engine.get_contest(contest.id).await.unwrap();
    assert_eq!(row.status, "settled");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn ranked_results_drive_the_payout_order() {
    let docker = Cli::default();
    let node = support::postgres(&docker);
    let db = support::migrated_db(&node).await;
    let (ledger, engine) = services(&db);
    let admin = Uuid::new_v4();

    let structure = PrizeStructure(vec![
        PrizeSlot {
            position: 1,
            percentage: dec!(50),
        },
        PrizeSlot {
            position: 2,
            percentage: dec!(30),
        },
        PrizeSlot {
            position: 3,
            percentage: dec!(20),
        },
    ]);
    let contest = engine
        .create_contest(draft(dec!(1), dec!(5), structure), admin)
        .await
        .unwrap();
    engine.open_contest(contest.id, admin).await.unwrap();

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let carol = Uuid::new_v4();
    for user in [alice, bob, carol] {
        ledger.credit_deposit(user, dec!(1), None).await.unwrap();
        engine.join_contest(contest.id, user).await.unwrap();
    }
    engine.close_contest(contest.id, admin).await.unwrap();
    engine
        .record_results(contest.id, &[(carol, 1), (alice, 2), (bob, 3)], admin)
        .await
        .unwrap();

    // Pool 3.00, commission 0.15, distributable 2.85 split 50/30/20.
    let summary = engine.settle(contest.id, admin).await.unwrap();
    assert_eq!(summary.distributable_pool, dec!(2.85));
    assert_eq!(summary.payouts.len(), 3);
    for payout in &summary.payouts {
        let (expected_user, expected_amount) = match payout.position {
            1 => (carol, dec!(1.425)),
            2 => (alice, dec!(0.855)),
            3 => (bob, dec!(0.57)),
            other => panic!("unexpected position {other}"),
        };
        assert_eq!(payout.user_id, expected_user);
        assert_eq!(payout.amount, expected_amount);
    }

    let first = ledger.get_wallet(carol).await.unwrap();
    assert_eq!(first.winning_balance, dec!(1.425));
    let third = ledger.get_wallet(bob).await.unwrap();
    assert_eq!(third.winning_balance, dec!(0.57));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn double_join_is_rejected_and_charged_once() {
    let docker = Cli::default();
    let node = support::postgres(&docker);
    let db = support::migrated_db(&node).await;
    let (ledger, engine) = services(&db);
    let admin = Uuid::new_v4();

    let contest = engine
        .create_contest(draft(dec!(2.5), dec!(10), PrizeStructure::default()), admin)
        .await
        .unwrap();
    engine.open_contest(contest.id, admin).await.unwrap();

    let user = Uuid::new_v4();
    ledger.credit_deposit(user, dec!(5), None).await.unwrap();
    engine.join_contest(contest.id, user).await.unwrap();

    let err = engine.join_contest(contest.id, user).await.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyJoined { .. }));

    let wallet = ledger.get_wallet(user).await.unwrap();
    assert_eq!(wallet.deposit_balance, dec!(2.5));
    let entries = engine.contest_entries(contest.id).await.unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn cancellation_refunds_land_in_the_deposit_bucket() {
    let docker = Cli::default();
    let node = support::postgres(&docker);
    let db = support::migrated_db(&node).await;
    let (ledger, engine) = services(&db);
    let admin = Uuid::new_v4();

    let contest = engine
        .create_contest(draft(dec!(2), dec!(5), PrizeStructure::default()), admin)
        .await
        .unwrap();
    engine.open_contest(contest.id, admin).await.unwrap();

    // One entry paid from deposit, the other from winnings.
    let alice = Uuid::new_v4();
    ledger.credit_deposit(alice, dec!(2), None).await.unwrap();
    let bob = Uuid::new_v4();
    ledger
        .credit_winning(bob, dec!(2), "prior win", None)
        .await
        .unwrap();
    engine.join_contest(contest.id, alice).await.unwrap();
    engine.join_contest(contest.id, bob).await.unwrap();

    let summary = engine.cancel(contest.id, admin).await.unwrap();
    assert!(!summary.replayed);
    assert_eq!(summary.participants, 2);
    assert_eq!(summary.refunded, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total_refunded, dec!(4));
    assert!(summary.failures.is_empty());

    // Refunds always land in the deposit bucket, whatever the fee drew from.
    let alice_wallet = ledger.get_wallet(alice).await.unwrap();
    assert_eq!(alice_wallet.deposit_balance, dec!(2));
    let bob_wallet = ledger.get_wallet(bob).await.unwrap();
    assert_eq!(bob_wallet.deposit_balance, dec!(2));
    assert_eq!(bob_wallet.winning_balance, dec!(0));

    let replay = engine.cancel(contest.id, admin).await.unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.refunded, 2);
    let bob_wallet = ledger.get_wallet(bob).await.unwrap();
    assert_eq!(bob_wallet.deposit_balance, dec!(2));

    assert!(matches!(
        engine.settle(contest.id, admin).await,
        Err(LedgerError::AlreadyCancelled { .. })
    ));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn settlement_requires_a_closed_contest() {
    let docker = Cli::default();
    let node = support::postgres(&docker);
    let db = support::migrated_db(&node).await;
    let (ledger, engine) = services(&db);
    let admin = Uuid::new_v4();

    let contest = engine
        .create_contest(draft(dec!(1), dec!(0), PrizeStructure::default()), admin)
        .await
        .unwrap();
    engine.open_contest(contest.id, admin).await.unwrap();
    let user = Uuid::new_v4();
    ledger.credit_deposit(user, dec!(1), None).await.unwrap();
    engine.join_contest(contest.id, user).await.unwrap();

    let err = engine.settle(contest.id, admin).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));

    // Nothing moved; the fee is still debited and no winnings were paid.
    let wallet = ledger.get_wallet(user).await.unwrap();
    assert_eq!(wallet.deposit_balance, dec!(0));
    assert_eq!(wallet.winning_balance, dec!(0));
}
