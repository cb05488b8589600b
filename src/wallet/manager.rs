//! Wallet Manager
//!
//! Owns user-facing balance operations. Every mutation is a single unit of
//! work: balance change and ledger entry commit together or not at all.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use super::error::WalletError;
use crate::core_types::{UserId, WalletId};
use crate::ledger::{
    LedgerStore, MAX_AMOUNT, Transaction, TransactionKind, UnitOfWork, Wallet, ledger_sum,
};

/// Result of a committed wallet mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletReceipt {
    /// Wallet as of this commit
    pub wallet: Wallet,
    pub transactions: Vec<Transaction>,
}

/// Balance vs ledger audit for one wallet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub wallet_id: WalletId,
    pub balance: Decimal,
    pub ledger_sum: Decimal,
    pub entries: usize,
    pub consistent: bool,
}

#[inline]
pub(crate) fn ensure_positive(amount: Decimal) -> Result<(), WalletError> {
    if amount > Decimal::ZERO && amount <= MAX_AMOUNT {
        Ok(())
    } else {
        Err(WalletError::InvalidAmount)
    }
}

#[inline]
pub(crate) fn ensure_active(wallet: &Wallet) -> Result<(), WalletError> {
    if wallet.is_frozen {
        Err(WalletError::WalletFrozen(wallet.user_id))
    } else {
        Ok(())
    }
}

#[inline]
pub(crate) fn ensure_covers(wallet: &Wallet, amount: Decimal) -> Result<(), WalletError> {
    if wallet.can_cover(amount) {
        Ok(())
    } else {
        Err(WalletError::InsufficientBalance {
            user_id: wallet.user_id,
            available: wallet.balance,
            requested: amount,
        })
    }
}

fn overflow(wallet_id: WalletId) -> WalletError {
    WalletError::Storage(format!("balance of wallet {} overflows", wallet_id))
}

/// Wallet as the store will hold it once `entries` are committed
pub(crate) fn projected(wallet: &Wallet, entries: &[Transaction]) -> Result<Wallet, WalletError> {
    let mut next = wallet.clone();
    next.balance = ledger_sum(entries.iter().filter(|e| e.wallet_id == wallet.id))
        .and_then(|delta| wallet.balance.checked_add(delta))
        .ok_or_else(|| overflow(wallet.id))?;
    next.version += 1;
    Ok(next)
}

pub struct WalletManager {
    store: Arc<dyn LedgerStore>,
    currency: String,
    settlement_user_id: UserId,
}

impl WalletManager {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        currency: impl Into<String>,
        settlement_user_id: UserId,
    ) -> Self {
        Self {
            store,
            currency: currency.into(),
            settlement_user_id,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn settlement_user_id(&self) -> UserId {
        self.settlement_user_id
    }

    /// Idempotent: concurrent first calls all see the same wallet
    pub async fn get_or_create_wallet(&self, user_id: UserId) -> Result<Wallet, WalletError> {
        if let Some(wallet) = self.store.wallet_by_user(user_id).await? {
            return Ok(wallet);
        }
        let wallet = self.store.create_wallet(user_id, &self.currency).await?;
        tracing::info!(user_id, wallet_id = %wallet.id, "Wallet created");
        Ok(wallet)
    }

    /// Existing wallet only; reads never create
    pub async fn wallet(&self, user_id: UserId) -> Result<Wallet, WalletError> {
        self.store
            .wallet_by_user(user_id)
            .await?
            .ok_or(WalletError::WalletNotFound(user_id))
    }

    /// Platform settlement wallet (escrowed funds and retained commission)
    pub async fn settlement_wallet(&self) -> Result<Wallet, WalletError> {
        self.get_or_create_wallet(self.settlement_user_id).await
    }

    pub async fn deposit(
        &self,
        user_id: UserId,
        amount: Decimal,
        note: Option<String>,
    ) -> Result<WalletReceipt, WalletError> {
        ensure_positive(amount)?;
        let wallet = self.get_or_create_wallet(user_id).await?;
        ensure_active(&wallet)?;

        let entry = Transaction::record(wallet.id, TransactionKind::Credit, amount).with_note(note);
        let receipt = self.commit_single(&wallet, entry).await?;
        tracing::info!(
            user_id,
            amount = %amount,
            balance = %receipt.wallet.balance,
            "Deposit committed"
        );
        Ok(receipt)
    }

    pub async fn withdraw(
        &self,
        user_id: UserId,
        amount: Decimal,
        note: Option<String>,
    ) -> Result<WalletReceipt, WalletError> {
        ensure_positive(amount)?;
        let wallet = self.wallet(user_id).await?;
        ensure_active(&wallet)?;
        ensure_covers(&wallet, amount)?;

        let entry = Transaction::record(wallet.id, TransactionKind::Debit, amount).with_note(note);
        let receipt = self.commit_single(&wallet, entry).await?;
        tracing::info!(
            user_id,
            amount = %amount,
            balance = %receipt.wallet.balance,
            "Withdraw committed"
        );
        Ok(receipt)
    }

    /// Move funds between two users. The receipt's wallet is the sender's.
    pub async fn transfer(
        &self,
        from: UserId,
        to: UserId,
        amount: Decimal,
        note: Option<String>,
    ) -> Result<WalletReceipt, WalletError> {
        if from == to {
            return Err(WalletError::SameWallet);
        }
        ensure_positive(amount)?;

        let source = self.wallet(from).await?;
        let target = self.get_or_create_wallet(to).await?;
        ensure_active(&source)?;
        ensure_active(&target)?;
        ensure_covers(&source, amount)?;

        let out = Transaction::record(source.id, TransactionKind::TransferOut, amount)
            .with_note(note.clone())
            .with_counterparty(to);
        let inn = Transaction::record(target.id, TransactionKind::TransferIn, amount)
            .with_note(note)
            .with_counterparty(from);

        let mut uow = UnitOfWork::new();
        uow.post(&source, out.clone()).post(&target, inn.clone());
        self.store.commit(uow).await?;

        let transactions = vec![out, inn];
        tracing::info!(from, to, amount = %amount, "Transfer committed");
        Ok(WalletReceipt {
            wallet: projected(&source, &transactions)?,
            transactions,
        })
    }

    pub async fn freeze(&self, user_id: UserId) -> Result<Wallet, WalletError> {
        self.set_frozen(user_id, true).await
    }

    pub async fn unfreeze(&self, user_id: UserId) -> Result<Wallet, WalletError> {
        self.set_frozen(user_id, false).await
    }

    async fn set_frozen(&self, user_id: UserId, frozen: bool) -> Result<Wallet, WalletError> {
        let wallet = self.wallet(user_id).await?;
        if wallet.is_frozen == frozen {
            return Ok(wallet);
        }
        let mut uow = UnitOfWork::new();
        uow.set_frozen(&wallet, frozen);
        self.store.commit(uow).await?;

        tracing::warn!(user_id, frozen, "Wallet freeze flag changed");
        let mut next = projected(&wallet, &[])?;
        next.is_frozen = frozen;
        Ok(next)
    }

    /// Ledger history, oldest first
    pub async fn transactions(&self, user_id: UserId) -> Result<Vec<Transaction>, WalletError> {
        let wallet = self.wallet(user_id).await?;
        Ok(self.store.transactions(wallet.id).await?)
    }

    /// Recompute the balance from the ledger and compare
    pub async fn verify_consistency(
        &self,
        user_id: UserId,
    ) -> Result<ConsistencyReport, WalletError> {
        let wallet = self.wallet(user_id).await?;
        let entries = self.store.transactions(wallet.id).await?;
        let sum = ledger_sum(&entries).ok_or_else(|| overflow(wallet.id))?;
        let consistent = sum == wallet.balance;
        if !consistent {
            tracing::error!(
                user_id,
                wallet_id = %wallet.id,
                balance = %wallet.balance,
                ledger_sum = %sum,
                "Wallet balance diverged from ledger"
            );
        }
        Ok(ConsistencyReport {
            wallet_id: wallet.id,
            balance: wallet.balance,
            ledger_sum: sum,
            entries: entries.len(),
            consistent,
        })
    }

    async fn commit_single(
        &self,
        wallet: &Wallet,
        entry: Transaction,
    ) -> Result<WalletReceipt, WalletError> {
        let mut uow = UnitOfWork::new();
        uow.post(wallet, entry.clone());
        self.store.commit(uow).await?;

        let transactions = vec![entry];
        Ok(WalletReceipt {
            wallet: projected(wallet, &transactions)?,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryStore;
    use rust_decimal_macros::dec;

    fn manager() -> WalletManager {
        WalletManager::new(Arc::new(MemoryStore::new()), "VND", 0)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let wallets = manager();
        let a = wallets.get_or_create_wallet(1).await.unwrap();
        let b = wallets.get_or_create_wallet(1).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.balance, Decimal::ZERO);
        assert_eq!(a.currency, "VND");
    }

    #[tokio::test]
    async fn test_deposit_then_withdraw() {
        let wallets = manager();
        let receipt = wallets.deposit(1, dec!(100000), None).await.unwrap();
        assert_eq!(receipt.wallet.balance, dec!(100000));

        let receipt = wallets
            .withdraw(1, dec!(40000), Some("cash out".into()))
            .await
            .unwrap();
        assert_eq!(receipt.wallet.balance, dec!(60000));
        assert_eq!(receipt.transactions[0].amount, dec!(-40000));
        assert_eq!(wallets.wallet(1).await.unwrap().balance, dec!(60000));
    }

    #[tokio::test]
    async fn test_withdraw_insufficient_leaves_state_untouched() {
        let wallets = manager();
        wallets.deposit(1, dec!(60000), None).await.unwrap();

        let err = wallets.withdraw(1, dec!(70000), None).await.unwrap_err();
        assert!(matches!(err, WalletError::InsufficientBalance { .. }));
        assert_eq!(wallets.wallet(1).await.unwrap().balance, dec!(60000));
        assert_eq!(wallets.transactions(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_amounts_rejected() {
        let wallets = manager();
        assert_eq!(
            wallets.deposit(1, Decimal::ZERO, None).await.unwrap_err(),
            WalletError::InvalidAmount
        );
        assert_eq!(
            wallets.deposit(1, dec!(-5), None).await.unwrap_err(),
            WalletError::InvalidAmount
        );
    }

    #[tokio::test]
    async fn test_oversized_deposit_rejected_without_panic() {
        let wallets = manager();
        assert_eq!(
            wallets.deposit(1, Decimal::MAX, None).await.unwrap_err(),
            WalletError::InvalidAmount
        );
        wallets.deposit(1, MAX_AMOUNT, None).await.unwrap();
        let receipt = wallets.deposit(1, Decimal::ONE, None).await.unwrap();
        assert_eq!(receipt.wallet.balance, MAX_AMOUNT + Decimal::ONE);
        assert!(wallets.verify_consistency(1).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn test_transfer_cross_references_counterparties() {
        let wallets = manager();
        wallets.deposit(1, dec!(500), None).await.unwrap();
        let receipt = wallets.transfer(1, 2, dec!(200), None).await.unwrap();
        assert_eq!(receipt.wallet.balance, dec!(300));

        let out = &receipt.transactions[0];
        let inn = &receipt.transactions[1];
        assert_eq!(out.kind, TransactionKind::TransferOut);
        assert_eq!(out.counterparty_user_id, Some(2));
        assert_eq!(inn.kind, TransactionKind::TransferIn);
        assert_eq!(inn.counterparty_user_id, Some(1));
        assert_eq!(wallets.wallet(2).await.unwrap().balance, dec!(200));
    }

    #[tokio::test]
    async fn test_transfer_to_self_rejected() {
        let wallets = manager();
        wallets.deposit(1, dec!(500), None).await.unwrap();
        assert_eq!(
            wallets.transfer(1, 1, dec!(1), None).await.unwrap_err(),
            WalletError::SameWallet
        );
    }

    #[tokio::test]
    async fn test_frozen_wallet_rejects_mutations() {
        let wallets = manager();
        wallets.deposit(1, dec!(500), None).await.unwrap();
        assert!(wallets.freeze(1).await.unwrap().is_frozen);

        assert_eq!(
            wallets.deposit(1, dec!(1), None).await.unwrap_err(),
            WalletError::WalletFrozen(1)
        );
        assert_eq!(
            wallets.transfer(2, 1, dec!(1), None).await.unwrap_err(),
            WalletError::WalletNotFound(2)
        );

        wallets.unfreeze(1).await.unwrap();
        wallets.withdraw(1, dec!(100), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_consistency() {
        let wallets = manager();
        wallets.deposit(1, dec!(1000), None).await.unwrap();
        wallets.transfer(1, 2, dec!(250), None).await.unwrap();
        wallets.withdraw(2, dec!(50), None).await.unwrap();

        for user in [1, 2] {
            let report = wallets.verify_consistency(user).await.unwrap();
            assert!(report.consistent);
        }
        assert_eq!(wallets.verify_consistency(2).await.unwrap().ledger_sum, dec!(200));
    }
}
