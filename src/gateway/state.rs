use std::sync::Arc;

use crate::commission::{CommissionRates, CommissionResolver};
use crate::config::AppConfig;
use crate::directory::StaticDirectory;
use crate::escrow::EscrowManager;
use crate::ledger::LedgerStore;
use crate::notify::NotificationDispatcher;
use crate::payment::{HttpTransport, MoMoProvider, PayOsProvider, PaymentService};
use crate::retry::RetryPolicy;
use crate::wallet::WalletManager;
use crate::withdrawal::WithdrawalProcessor;

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub wallets: Arc<WalletManager>,
    pub escrows: Arc<EscrowManager>,
    pub commission: Arc<CommissionResolver>,
    pub payments: Arc<PaymentService>,
    pub withdrawals: Arc<WithdrawalProcessor>,
    /// Applied around mutations that can lose an optimistic race
    pub retry: RetryPolicy,
}

impl AppState {
    /// Wire every component over one store. Both providers share `transport`.
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn LedgerStore>,
        directory: Arc<StaticDirectory>,
        notifier: Arc<dyn NotificationDispatcher>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        let wallets = Arc::new(WalletManager::new(
            store.clone(),
            config.ledger.currency.clone(),
            config.ledger.settlement_user_id,
        ));
        let commission = Arc::new(CommissionResolver::new(
            store.clone(),
            CommissionRates::from(&config.commission),
        ));
        let escrows = Arc::new(EscrowManager::new(
            store.clone(),
            wallets.clone(),
            commission.clone(),
            directory.clone(),
            notifier.clone(),
        ));
        let payments = Arc::new(
            PaymentService::new(
                store.clone(),
                wallets.clone(),
                escrows.clone(),
                directory,
                notifier.clone(),
                retry,
            )
            .with_provider(Arc::new(MoMoProvider::new(config.momo.clone(), transport.clone())))
            .with_provider(Arc::new(PayOsProvider::new(config.payos.clone(), transport))),
        );
        let withdrawals = Arc::new(WithdrawalProcessor::new(
            store.clone(),
            wallets.clone(),
            notifier,
            &config.withdrawal,
        ));

        Self {
            store,
            wallets,
            escrows,
            commission,
            payments,
            withdrawals,
            retry,
        }
    }
}
