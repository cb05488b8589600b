//! In-process ledger store
//!
//! Same atomicity and optimistic-concurrency semantics as the PostgreSQL
//! store: a unit of work is validated in full against the current state
//! before any of it is applied. Used by tests and by `--memory` mode.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use super::store::{LedgerStore, RowWrite, StoreError, UnitOfWork};
use super::types::{Transaction, Wallet};
use crate::commission::CommissionRates;
use crate::core_types::{EscrowId, PaymentId, UserId, WalletId, WithdrawalId};
use crate::escrow::Escrow;
use crate::payment::{Payment, PaymentLog, ProviderKind};
use crate::withdrawal::WithdrawalRequest;

#[derive(Default)]
struct State {
    wallets: HashMap<WalletId, Wallet>,
    wallet_by_user: HashMap<UserId, WalletId>,
    entries: Vec<Transaction>,
    escrows: HashMap<EscrowId, Escrow>,
    payments: HashMap<PaymentId, Payment>,
    orders: HashMap<(ProviderKind, String), PaymentId>,
    logs: Vec<PaymentLog>,
    withdrawals: HashMap<WithdrawalId, WithdrawalRequest>,
    rates: Option<CommissionRates>,
}

/// Thread-safe in-memory store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock happens before any mutation is
        // applied (validation runs first), so the state is still coherent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of ledger entries across all wallets
    pub fn entry_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// All wallets, for invariant sweeps in tests and diagnostics
    pub fn all_wallets(&self) -> Vec<Wallet> {
        self.lock().wallets.values().cloned().collect()
    }

    /// Every payment log in write order
    pub fn all_payment_logs(&self) -> Vec<PaymentLog> {
        self.lock().logs.clone()
    }
}

/// Check every guard of `uow`; returns the balance each touched wallet will hold.
fn validate(state: &State, uow: &UnitOfWork) -> Result<HashMap<WalletId, Decimal>, StoreError> {
    let deltas = uow.balance_deltas()?;
    let mut balances = HashMap::with_capacity(uow.wallets.len());

    for (wallet_id, touch) in &uow.wallets {
        let wallet = state
            .wallets
            .get(wallet_id)
            .ok_or_else(|| StoreError::NotFound(format!("wallet {}", wallet_id)))?;
        if wallet.version != touch.expected_version {
            return Err(StoreError::Conflict(format!(
                "wallet {} version {} != expected {}",
                wallet_id, wallet.version, touch.expected_version
            )));
        }
        let delta = deltas.get(wallet_id).copied().unwrap_or_default();
        let balance = wallet.balance.checked_add(delta).ok_or_else(|| {
            StoreError::Invariant(format!("wallet {} balance overflows", wallet_id))
        })?;
        if balance < Decimal::ZERO {
            return Err(StoreError::Invariant(format!(
                "wallet {} would go negative",
                wallet_id
            )));
        }
        balances.insert(*wallet_id, balance);
    }

    for write in &uow.escrows {
        match write {
            RowWrite::Insert(escrow) if state.escrows.contains_key(&escrow.id) => {
                return Err(StoreError::Duplicate(format!("escrow {}", escrow.id)));
            }
            RowWrite::Insert(_) => {}
            RowWrite::Update { expected, row } => match state.escrows.get(&row.id) {
                None => return Err(StoreError::NotFound(format!("escrow {}", row.id))),
                Some(current) if current.status != *expected => {
                    return Err(StoreError::Conflict(format!(
                        "escrow {} is {}, expected {}",
                        row.id, current.status, expected
                    )));
                }
                Some(_) => {}
            },
        }
    }

    for write in &uow.payments {
        match write {
            RowWrite::Insert(payment) => {
                if state.payments.contains_key(&payment.id)
                    || state
                        .orders
                        .contains_key(&(payment.provider, payment.order_id.clone()))
                {
                    return Err(StoreError::Duplicate(format!(
                        "payment {} / order {}",
                        payment.id, payment.order_id
                    )));
                }
            }
            RowWrite::Update { expected, row } => match state.payments.get(&row.id) {
                None => return Err(StoreError::NotFound(format!("payment {}", row.id))),
                Some(current) if current.guard() != *expected => {
                    return Err(StoreError::Conflict(format!(
                        "payment {} changed (status {})",
                        row.id, current.status
                    )));
                }
                Some(_) => {}
            },
        }
    }

    for write in &uow.withdrawals {
        match write {
            RowWrite::Insert(request) if state.withdrawals.contains_key(&request.id) => {
                return Err(StoreError::Duplicate(format!("withdrawal {}", request.id)));
            }
            RowWrite::Insert(_) => {}
            RowWrite::Update { expected, row } => match state.withdrawals.get(&row.id) {
                None => return Err(StoreError::NotFound(format!("withdrawal {}", row.id))),
                Some(current) if current.status != *expected => {
                    return Err(StoreError::Conflict(format!(
                        "withdrawal {} is {}, expected {}",
                        row.id, current.status, expected
                    )));
                }
                Some(_) => {}
            },
        }
    }

    Ok(balances)
}

#[async_trait]
impl LedgerStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, StoreError> {
        Ok(self.lock().wallets.get(&id).cloned())
    }

    async fn wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>, StoreError> {
        let state = self.lock();
        Ok(state
            .wallet_by_user
            .get(&user_id)
            .and_then(|id| state.wallets.get(id))
            .cloned())
    }

    async fn create_wallet(&self, user_id: UserId, currency: &str) -> Result<Wallet, StoreError> {
        let mut state = self.lock();
        if let Some(existing) = state
            .wallet_by_user
            .get(&user_id)
            .and_then(|id| state.wallets.get(id))
        {
            return Ok(existing.clone());
        }
        let wallet = Wallet::new(user_id, currency);
        state.wallet_by_user.insert(user_id, wallet.id);
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn transactions(&self, wallet_id: WalletId) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .lock()
            .entries
            .iter()
            .filter(|e| e.wallet_id == wallet_id)
            .cloned()
            .collect())
    }

    async fn escrow(&self, id: EscrowId) -> Result<Option<Escrow>, StoreError> {
        Ok(self.lock().escrows.get(&id).cloned())
    }

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.lock().payments.get(&id).cloned())
    }

    async fn payment_by_order(
        &self,
        provider: ProviderKind,
        order_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let state = self.lock();
        Ok(state
            .orders
            .get(&(provider, order_id.to_string()))
            .and_then(|id| state.payments.get(id))
            .cloned())
    }

    async fn payment_logs(&self, id: PaymentId) -> Result<Vec<PaymentLog>, StoreError> {
        Ok(self
            .lock()
            .logs
            .iter()
            .filter(|l| l.payment_id == id)
            .cloned()
            .collect())
    }

    async fn withdrawal(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>, StoreError> {
        Ok(self.lock().withdrawals.get(&id).cloned())
    }

    async fn withdrawals_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<WithdrawalRequest>, StoreError> {
        let mut requests: Vec<_> = self
            .lock()
            .withdrawals
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(requests)
    }

    async fn commission_rates(&self) -> Result<Option<CommissionRates>, StoreError> {
        Ok(self.lock().rates.clone())
    }

    async fn save_commission_rates(&self, rates: &CommissionRates) -> Result<(), StoreError> {
        self.lock().rates = Some(rates.clone());
        Ok(())
    }

    async fn commit(&self, uow: UnitOfWork) -> Result<(), StoreError> {
        let mut state = self.lock();
        let balances = validate(&state, &uow)?;

        let now = Utc::now();
        for (wallet_id, touch) in &uow.wallets {
            if let Some(wallet) = state.wallets.get_mut(wallet_id) {
                if let Some(balance) = balances.get(wallet_id) {
                    wallet.balance = *balance;
                }
                if let Some(frozen) = touch.set_frozen {
                    wallet.is_frozen = frozen;
                }
                wallet.version += 1;
                wallet.updated_at = now;
            }
        }
        state.entries.extend(uow.entries);

        for write in uow.escrows {
            let (RowWrite::Insert(escrow) | RowWrite::Update { row: escrow, .. }) = write;
            state.escrows.insert(escrow.id, escrow);
        }
        for write in uow.payments {
            let (RowWrite::Insert(payment) | RowWrite::Update { row: payment, .. }) = write;
            state
                .orders
                .insert((payment.provider, payment.order_id.clone()), payment.id);
            state.payments.insert(payment.id, payment);
        }
        state.logs.extend(uow.payment_logs);
        for write in uow.withdrawals {
            let (RowWrite::Insert(request) | RowWrite::Update { row: request, .. }) = write;
            state.withdrawals.insert(request.id, request);
        }
        Ok(())
    }
}
