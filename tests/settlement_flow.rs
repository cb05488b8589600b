//! End-to-end ledger scenarios over the in-memory store

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use tutorpay::commission::{CommissionRates, CommissionResolver, DeliveryMode};
use tutorpay::config::CommissionConfig;
use tutorpay::directory::{ClassRecord, StaticDirectory};
use tutorpay::escrow::{EscrowError, EscrowManager, EscrowStatus};
use tutorpay::ledger::{LedgerStore, MemoryStore, TransactionKind};
use tutorpay::notify::RecordingNotifier;
use tutorpay::retry::RetryPolicy;
use tutorpay::wallet::{WalletError, WalletManager};

const SETTLEMENT: i64 = 0;
const LEARNER: i64 = 1;
const TUTOR: i64 = 2;
const GROUP_CLASS: i64 = 20;

struct Platform {
    store: Arc<MemoryStore>,
    wallets: Arc<WalletManager>,
    escrows: EscrowManager,
    notifier: Arc<RecordingNotifier>,
}

fn platform() -> Platform {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn LedgerStore> = store.clone();
    let wallets = Arc::new(WalletManager::new(dyn_store.clone(), "VND", SETTLEMENT));
    let commission = Arc::new(CommissionResolver::new(
        dyn_store.clone(),
        CommissionRates::from(&CommissionConfig::default()),
    ));
    let directory = Arc::new(StaticDirectory::with_open_users());
    directory.add_class(ClassRecord {
        class_id: GROUP_CLASS,
        tutor_user_id: Some(TUTOR),
        capacity: 8,
        mode: DeliveryMode::Offline,
    });
    let notifier = Arc::new(RecordingNotifier::new());
    let escrows = EscrowManager::new(
        dyn_store,
        wallets.clone(),
        commission,
        directory,
        notifier.clone(),
    );
    Platform {
        store,
        wallets,
        escrows,
        notifier,
    }
}

async fn balance(p: &Platform, user_id: i64) -> Decimal {
    p.wallets.wallet(user_id).await.unwrap().balance
}

async fn assert_consistent(p: &Platform, user_id: i64) {
    let report = p.wallets.verify_consistency(user_id).await.unwrap();
    assert!(report.consistent, "ledger drift for user {}: {:?}", user_id, report);
}

#[tokio::test]
async fn deposit_then_withdraw_keeps_ledger_in_step() {
    let p = platform();
    p.wallets.deposit(LEARNER, dec!(100000), None).await.unwrap();
    let receipt = p.wallets.withdraw(LEARNER, dec!(30000), Some("cash out".into())).await.unwrap();

    assert_eq!(receipt.wallet.balance, dec!(70000));
    let kinds: Vec<_> = p
        .wallets
        .transactions(LEARNER)
        .await
        .unwrap()
        .iter()
        .map(|t| t.kind)
        .collect();
    assert_eq!(kinds, vec![TransactionKind::Credit, TransactionKind::Debit]);
    assert_consistent(&p, LEARNER).await;
}

#[tokio::test]
async fn release_pays_tutor_net_of_commission() {
    let p = platform();
    p.wallets.deposit(LEARNER, dec!(500000), None).await.unwrap();

    let escrow = p
        .escrows
        .pay_escrow(LEARNER, GROUP_CLASS, dec!(500000), dec!(0.12))
        .await
        .unwrap();
    assert_eq!(escrow.status, EscrowStatus::Held);
    assert_eq!(balance(&p, LEARNER).await, Decimal::ZERO);
    assert_eq!(balance(&p, SETTLEMENT).await, dec!(500000));

    let released = p.escrows.release(escrow.id).await.unwrap();
    assert_eq!(released.commission_amount, Some(dec!(60000)));
    assert_eq!(released.net_amount, Some(dec!(440000)));
    assert_eq!(balance(&p, TUTOR).await, dec!(440000));
    // Commission stays behind in settlement
    assert_eq!(balance(&p, SETTLEMENT).await, dec!(60000));

    for user in [LEARNER, TUTOR, SETTLEMENT] {
        assert_consistent(&p, user).await;
    }
    assert_eq!(p.notifier.events_for(TUTOR), vec!["escrow_released"]);

    // Terminal: neither a second release nor a refund is possible
    assert!(matches!(
        p.escrows.release(escrow.id).await.unwrap_err(),
        EscrowError::InvalidState { .. }
    ));
    assert!(matches!(
        p.escrows.refund(escrow.id).await.unwrap_err(),
        EscrowError::InvalidState { .. }
    ));
}

#[tokio::test]
async fn refund_returns_full_gross() {
    let p = platform();
    p.wallets.deposit(LEARNER, dec!(300000), None).await.unwrap();
    let escrow = p
        .escrows
        .pay_escrow_for_class(LEARNER, GROUP_CLASS, dec!(300000))
        .await
        .unwrap();
    // Group offline default rate
    assert_eq!(escrow.commission_rate, dec!(0.18));

    let refunded = p.escrows.refund(escrow.id).await.unwrap();
    assert_eq!(refunded.status, EscrowStatus::Refunded);
    assert_eq!(refunded.commission_amount, None);
    assert_eq!(balance(&p, LEARNER).await, dec!(300000));
    assert_eq!(balance(&p, SETTLEMENT).await, Decimal::ZERO);
    assert_consistent(&p, LEARNER).await;

    // Terminal: a second refund and a late release both bounce
    assert!(matches!(
        p.escrows.refund(escrow.id).await.unwrap_err(),
        EscrowError::InvalidState { .. }
    ));
    assert!(matches!(
        p.escrows.release(escrow.id).await.unwrap_err(),
        EscrowError::InvalidState { .. }
    ));
    assert_eq!(balance(&p, LEARNER).await, dec!(300000));
    assert_eq!(balance(&p, SETTLEMENT).await, Decimal::ZERO);
    assert!(p.wallets.wallet(TUTOR).await.is_err());
    assert_eq!(p.store.entry_count(), 1 + 2 + 2);
}

#[tokio::test]
async fn frozen_wallet_still_receives_refund() {
    let p = platform();
    p.wallets.deposit(LEARNER, dec!(200000), None).await.unwrap();
    let escrow = p
        .escrows
        .pay_escrow(LEARNER, GROUP_CLASS, dec!(200000), dec!(0.15))
        .await
        .unwrap();
    p.wallets.freeze(LEARNER).await.unwrap();

    assert!(matches!(
        p.wallets.deposit(LEARNER, dec!(1), None).await.unwrap_err(),
        WalletError::WalletFrozen(LEARNER)
    ));
    p.escrows.refund(escrow.id).await.unwrap();
    assert_eq!(balance(&p, LEARNER).await, dec!(200000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_withdrawals_never_overdraw() {
    let p = platform();
    p.wallets.deposit(LEARNER, dec!(100000), None).await.unwrap();
    let retry = RetryPolicy::new(50, Duration::from_millis(1));

    let tasks = (0..10).map(|_| {
        let wallets = p.wallets.clone();
        tokio::spawn(async move {
            let wallets = wallets.as_ref();
            retry
                .run(move || wallets.withdraw(LEARNER, dec!(20000), None))
                .await
        })
    });
    let results = futures::future::join_all(tasks).await;

    let mut succeeded = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert!(matches!(e, WalletError::InsufficientBalance { .. }), "{}", e),
        }
    }
    assert_eq!(succeeded, 5);
    assert_eq!(balance(&p, LEARNER).await, Decimal::ZERO);
    assert_eq!(p.store.entry_count(), 1 + 5);
    assert_consistent(&p, LEARNER).await;
}
