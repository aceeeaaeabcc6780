//! Commission at-most-once integration tests
//!
//! Ignored by default; run with a configured DATABASE_URL:
//! `cargo test -p affiliate-engine -- --ignored`

use affiliate_engine::{CommissionConfig, CommissionEngine, CommissionOutcome};
use ledger_core::{
    AccountKind, ApplyOutcome, ApplyRequest, DatabaseConfig, EntryKind, EntryStatus,
    LedgerConfig, LedgerStore, TransactionApplier,
};
use rust_decimal_macros::dec;
use uuid::Uuid;

async fn open_store() -> LedgerStore {
    LedgerStore::open(&DatabaseConfig::from_env())
        .await
        .expect("database available for integration tests")
}

fn unique_user() -> i64 {
    2_000_000 + rand::random::<u32>() as i64
}

async fn qualifying_deposit(
    applier: &TransactionApplier,
    user_id: i64,
    nonce: u64,
) -> Uuid {
    let outcome = applier
        .apply(&ApplyRequest {
            user_id,
            kind: EntryKind::Deposit,
            amount: dec!(20.00),
            external_identifier: format!("deposit_{}_{}", user_id, nonce),
            target_status: EntryStatus::Completed,
            description: None,
            provider_reference: None,
        })
        .await
        .unwrap();

    match outcome {
        ApplyOutcome::Applied(applied) => applied.entry_id,
        ApplyOutcome::AlreadyProcessed { entry_id } => entry_id,
    }
}

#[tokio::test]
#[ignore] // Only run with database available
async fn test_first_qualifying_deposit_credits_affiliate_once() {
    let store = open_store().await;
    let applier = TransactionApplier::new(store.pool().clone(), LedgerConfig::default());
    let engine = CommissionEngine::new(store.pool().clone(), CommissionConfig::default());

    let affiliate_id = unique_user();
    let user_id = unique_user();
    store
        .create_account(affiliate_id, AccountKind::DemoAffiliate, None, None)
        .await
        .unwrap();
    store
        .create_account(user_id, AccountKind::Real, Some(affiliate_id), Some("CODE1".into()))
        .await
        .unwrap();

    let entry_id = qualifying_deposit(&applier, user_id, 1).await;
    let outcome = engine
        .maybe_credit_commission(user_id, dec!(20.00), EntryStatus::Completed, entry_id)
        .await
        .unwrap();
    assert!(matches!(outcome, CommissionOutcome::Credited { .. }));

    let affiliate = store.get_account(affiliate_id).await.unwrap();
    assert_eq!(affiliate.demo_balance, dec!(10.00));

    let commission = engine
        .commission_for(affiliate_id, user_id)
        .await
        .unwrap()
        .expect("commission row recorded");
    assert_eq!(commission.amount, dec!(10.00));

    let history = engine.history_for_affiliate(affiliate_id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].referred_user_id, user_id);

    // Replayed webhook for the same entry: existence check short-circuits
    let replay = engine
        .maybe_credit_commission(user_id, dec!(20.00), EntryStatus::Completed, entry_id)
        .await
        .unwrap();
    assert!(matches!(replay, CommissionOutcome::AlreadyCredited));

    // A later qualifying deposit never adds a second commission
    let second_entry = qualifying_deposit(&applier, user_id, 2).await;
    let second = engine
        .maybe_credit_commission(user_id, dec!(20.00), EntryStatus::Completed, second_entry)
        .await
        .unwrap();
    assert!(matches!(second, CommissionOutcome::AlreadyCredited));

    let affiliate = store.get_account(affiliate_id).await.unwrap();
    assert_eq!(affiliate.demo_balance, dec!(10.00));
}

#[tokio::test]
#[ignore] // Only run with database available
async fn test_later_deposit_does_not_disqualify_the_first() {
    let store = open_store().await;
    let applier = TransactionApplier::new(store.pool().clone(), LedgerConfig::default());
    let engine = CommissionEngine::new(store.pool().clone(), CommissionConfig::default());

    let affiliate_id = unique_user();
    let user_id = unique_user();
    store
        .create_account(affiliate_id, AccountKind::DemoAffiliate, None, None)
        .await
        .unwrap();
    store
        .create_account(user_id, AccountKind::Real, Some(affiliate_id), Some("CODE2".into()))
        .await
        .unwrap();

    // Both deposits land before either commission run starts
    let first_entry = qualifying_deposit(&applier, user_id, 1).await;
    let second_entry = qualifying_deposit(&applier, user_id, 2).await;

    // The run for the second deposit sees the earlier one and bows out
    let later = engine
        .maybe_credit_commission(user_id, dec!(20.00), EntryStatus::Completed, second_entry)
        .await
        .unwrap();
    assert!(matches!(later, CommissionOutcome::NotEligible(_)));

    // The run for the genuinely first deposit must still credit
    let first = engine
        .maybe_credit_commission(user_id, dec!(20.00), EntryStatus::Completed, first_entry)
        .await
        .unwrap();
    assert!(matches!(first, CommissionOutcome::Credited { .. }));

    let affiliate = store.get_account(affiliate_id).await.unwrap();
    assert_eq!(affiliate.demo_balance, dec!(10.00));
}

#[tokio::test]
#[ignore] // Only run with database available
async fn test_racing_commission_runs_credit_exactly_once() {
    let store = open_store().await;
    let applier = TransactionApplier::new(store.pool().clone(), LedgerConfig::default());
    let engine = CommissionEngine::new(store.pool().clone(), CommissionConfig::default());

    let affiliate_id = unique_user();
    let user_id = unique_user();
    store
        .create_account(affiliate_id, AccountKind::DemoAffiliate, None, None)
        .await
        .unwrap();
    store
        .create_account(user_id, AccountKind::Real, Some(affiliate_id), Some("CODE3".into()))
        .await
        .unwrap();

    let first_entry = qualifying_deposit(&applier, user_id, 1).await;
    let second_entry = qualifying_deposit(&applier, user_id, 2).await;

    // Two webhook deliveries race into the commission step. Whatever the
    // interleaving, the pair constraint lets exactly one run credit.
    let (a, b) = tokio::join!(
        engine.maybe_credit_commission(user_id, dec!(20.00), EntryStatus::Completed, first_entry),
        engine.maybe_credit_commission(user_id, dec!(20.00), EntryStatus::Completed, second_entry),
    );
    a.unwrap();
    b.unwrap();

    let affiliate = store.get_account(affiliate_id).await.unwrap();
    assert_eq!(affiliate.demo_balance, dec!(10.00));
    assert!(engine
        .commission_for(affiliate_id, user_id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
#[ignore] // Only run with database available
async fn test_unreferred_user_earns_no_commission() {
    let store = open_store().await;
    let applier = TransactionApplier::new(store.pool().clone(), LedgerConfig::default());
    let engine = CommissionEngine::new(store.pool().clone(), CommissionConfig::default());

    let user_id = unique_user();
    store
        .create_account(user_id, AccountKind::Real, None, None)
        .await
        .unwrap();

    let entry_id = qualifying_deposit(&applier, user_id, 1).await;
    let outcome = engine
        .maybe_credit_commission(user_id, dec!(20.00), EntryStatus::Completed, entry_id)
        .await
        .unwrap();
    assert!(matches!(outcome, CommissionOutcome::NotEligible(_)));
}

#[tokio::test]
#[ignore] // Only run with database available
async fn test_below_threshold_deposit_is_not_qualifying() {
    let store = open_store().await;
    let engine = CommissionEngine::new(store.pool().clone(), CommissionConfig::default());

    let outcome = engine
        .maybe_credit_commission(unique_user(), dec!(19.99), EntryStatus::Completed, Uuid::now_v7())
        .await
        .unwrap();
    assert!(matches!(outcome, CommissionOutcome::NotEligible(_)));
}
