//! Withdrawal Processor
//!
//! The default path debits the wallet and completes the request in one unit
//! of work; payout happens outside this service. The review path keeps a
//! request Pending until an operator approves it, and only then moves money.

use std::sync::Arc;

use rust_decimal::Decimal;

use super::error::WithdrawalError;
use super::types::{RecipientInfo, WithdrawalMethod, WithdrawalRequest, WithdrawalStatus};
use crate::config::WithdrawalConfig;
use crate::core_types::{UserId, WithdrawalId};
use crate::ledger::{LedgerStore, Transaction, TransactionKind, UnitOfWork};
use crate::notify::{self, NotificationDispatcher, SettlementEvent};
use crate::wallet::WalletManager;
use crate::wallet::manager::{ensure_active, ensure_covers};

pub struct WithdrawalProcessor {
    store: Arc<dyn LedgerStore>,
    wallets: Arc<WalletManager>,
    notifier: Arc<dyn NotificationDispatcher>,
    min_amount: Decimal,
}

impl WithdrawalProcessor {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        wallets: Arc<WalletManager>,
        notifier: Arc<dyn NotificationDispatcher>,
        config: &WithdrawalConfig,
    ) -> Self {
        Self {
            store,
            wallets,
            notifier,
            min_amount: config.min_amount,
        }
    }

    pub fn min_amount(&self) -> Decimal {
        self.min_amount
    }

    pub async fn get(
        &self,
        withdrawal_id: WithdrawalId,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        self.store
            .withdrawal(withdrawal_id)
            .await?
            .ok_or(WithdrawalError::WithdrawalNotFound(withdrawal_id))
    }

    /// Newest first
    pub async fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<WithdrawalRequest>, WithdrawalError> {
        Ok(self.store.withdrawals_for_user(user_id).await?)
    }

    fn validate(
        &self,
        amount: Decimal,
        method: WithdrawalMethod,
        recipient: &RecipientInfo,
    ) -> Result<(), WithdrawalError> {
        if amount <= Decimal::ZERO {
            return Err(WithdrawalError::InvalidAmount);
        }
        if amount < self.min_amount {
            return Err(WithdrawalError::BelowMinimum {
                amount,
                minimum: self.min_amount,
            });
        }
        if recipient.account_name.trim().is_empty() {
            return Err(WithdrawalError::InvalidRecipient("account name is required"));
        }
        if recipient.account_number.trim().is_empty() {
            return Err(WithdrawalError::InvalidRecipient("account number is required"));
        }
        if method == WithdrawalMethod::BankTransfer
            && recipient.bank_name.as_deref().is_none_or(|b| b.trim().is_empty())
        {
            return Err(WithdrawalError::InvalidRecipient(
                "bank name is required for bank transfers",
            ));
        }
        Ok(())
    }

    /// Debit `request.amount` from its owner's wallet and move the request
    /// from `expected` to `next` in the same unit of work.
    async fn debit(
        &self,
        request: &WithdrawalRequest,
        expected: Option<WithdrawalStatus>,
        next: WithdrawalStatus,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        let wallet = self.wallets.wallet(request.user_id).await?;
        ensure_active(&wallet)?;
        ensure_covers(&wallet, request.amount)?;

        let entry = Transaction::record(wallet.id, TransactionKind::Debit, request.amount)
            .with_note(Some(format!("withdrawal {}", request.id)))
            .with_reference(request.id);
        let mut moved = request.transitioned(next);
        moved.transaction_id = Some(entry.id);

        let mut uow = UnitOfWork::new();
        uow.post(&wallet, entry);
        match expected {
            None => uow.insert_withdrawal(moved.clone()),
            Some(expected) => uow.update_withdrawal(expected, moved.clone()),
        };
        self.store.commit(uow).await?;
        Ok(moved)
    }

    /// Cash out immediately: debit and complete in one step
    pub async fn request(
        &self,
        user_id: UserId,
        amount: Decimal,
        method: WithdrawalMethod,
        recipient: RecipientInfo,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        self.validate(amount, method, &recipient)?;
        let pending =
            WithdrawalRequest::new(user_id, amount, method, recipient, WithdrawalStatus::Pending);
        let completed = self.debit(&pending, None, WithdrawalStatus::Completed).await?;

        tracing::info!(
            withdrawal_id = %completed.id,
            user_id,
            amount = %amount,
            method = ?method,
            "Withdrawal completed"
        );
        notify::dispatch(
            self.notifier.as_ref(),
            user_id,
            SettlementEvent::WithdrawalCompleted {
                withdrawal_id: completed.id,
                amount,
            },
        )
        .await;
        Ok(completed)
    }

    /// File a request for operator review. No funds move until `approve`.
    pub async fn submit_for_review(
        &self,
        user_id: UserId,
        amount: Decimal,
        method: WithdrawalMethod,
        recipient: RecipientInfo,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        self.validate(amount, method, &recipient)?;
        let wallet = self.wallets.wallet(user_id).await?;
        ensure_active(&wallet)?;
        ensure_covers(&wallet, amount)?;

        let pending =
            WithdrawalRequest::new(user_id, amount, method, recipient, WithdrawalStatus::Pending);
        let mut uow = UnitOfWork::new();
        uow.insert_withdrawal(pending.clone());
        self.store.commit(uow).await?;

        tracing::info!(
            withdrawal_id = %pending.id,
            user_id,
            amount = %amount,
            "Withdrawal awaiting review"
        );
        Ok(pending)
    }

    fn require(
        request: &WithdrawalRequest,
        allowed: &[WithdrawalStatus],
        action: &'static str,
    ) -> Result<(), WithdrawalError> {
        if allowed.contains(&request.status) {
            Ok(())
        } else {
            Err(WithdrawalError::InvalidState {
                withdrawal_id: request.id,
                status: request.status,
                action,
            })
        }
    }

    /// Status-only transition, no ledger effect
    async fn transition(
        &self,
        request: &WithdrawalRequest,
        next: WithdrawalStatus,
        reason: Option<String>,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        let mut moved = request.transitioned(next);
        if reason.is_some() {
            moved.reason = reason;
        }
        let mut uow = UnitOfWork::new();
        uow.update_withdrawal(request.status, moved.clone());
        self.store.commit(uow).await?;
        tracing::info!(
            withdrawal_id = %moved.id,
            from = %request.status,
            to = %next,
            "Withdrawal transitioned"
        );
        Ok(moved)
    }

    /// Owner withdraws a request still awaiting review
    pub async fn cancel(
        &self,
        user_id: UserId,
        withdrawal_id: WithdrawalId,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        let request = self.get(withdrawal_id).await?;
        if request.user_id != user_id {
            return Err(WithdrawalError::Forbidden);
        }
        Self::require(&request, &[WithdrawalStatus::Pending], "cancel")?;
        self.transition(&request, WithdrawalStatus::Cancelled, None).await
    }

    /// Pending → Approved, debiting the wallet
    pub async fn approve(
        &self,
        withdrawal_id: WithdrawalId,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        let request = self.get(withdrawal_id).await?;
        Self::require(&request, &[WithdrawalStatus::Pending], "approve")?;
        let approved = self
            .debit(&request, Some(WithdrawalStatus::Pending), WithdrawalStatus::Approved)
            .await?;
        tracing::info!(
            withdrawal_id = %approved.id,
            amount = %approved.amount,
            "Withdrawal approved"
        );
        Ok(approved)
    }

    pub async fn reject(
        &self,
        withdrawal_id: WithdrawalId,
        reason: String,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        let request = self.get(withdrawal_id).await?;
        Self::require(&request, &[WithdrawalStatus::Pending], "reject")?;
        self.transition(&request, WithdrawalStatus::Rejected, Some(reason)).await
    }

    pub async fn mark_processing(
        &self,
        withdrawal_id: WithdrawalId,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        let request = self.get(withdrawal_id).await?;
        Self::require(&request, &[WithdrawalStatus::Approved], "mark processing")?;
        self.transition(&request, WithdrawalStatus::Processing, None).await
    }

    pub async fn complete(
        &self,
        withdrawal_id: WithdrawalId,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        let request = self.get(withdrawal_id).await?;
        Self::require(
            &request,
            &[WithdrawalStatus::Approved, WithdrawalStatus::Processing],
            "complete",
        )?;
        let completed = self.transition(&request, WithdrawalStatus::Completed, None).await?;
        notify::dispatch(
            self.notifier.as_ref(),
            completed.user_id,
            SettlementEvent::WithdrawalCompleted {
                withdrawal_id: completed.id,
                amount: completed.amount,
            },
        )
        .await;
        Ok(completed)
    }

    /// Payout failed downstream: return the funds with a `RefundIn`.
    /// Frozen wallets are still credited.
    pub async fn fail(
        &self,
        withdrawal_id: WithdrawalId,
        reason: String,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        let request = self.get(withdrawal_id).await?;
        Self::require(
            &request,
            &[WithdrawalStatus::Approved, WithdrawalStatus::Processing],
            "fail",
        )?;
        let wallet = self.wallets.wallet(request.user_id).await?;

        let mut failed = request.transitioned(WithdrawalStatus::Failed);
        failed.reason = Some(reason);
        let mut uow = UnitOfWork::new();
        uow.post(
            &wallet,
            Transaction::record(wallet.id, TransactionKind::RefundIn, request.amount)
                .with_note(Some(format!("withdrawal {} returned", request.id)))
                .with_reference(request.id),
        )
        .update_withdrawal(request.status, failed.clone());
        self.store.commit(uow).await?;

        tracing::warn!(
            withdrawal_id = %failed.id,
            reason = ?failed.reason,
            "Withdrawal failed, funds returned"
        );
        notify::dispatch(
            self.notifier.as_ref(),
            failed.user_id,
            SettlementEvent::WithdrawalReturned {
                withdrawal_id: failed.id,
                amount: failed.amount,
            },
        )
        .await;
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryStore;
    use crate::notify::RecordingNotifier;
    use rust_decimal_macros::dec;

    struct Fixture {
        wallets: Arc<WalletManager>,
        processor: WithdrawalProcessor,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let wallets = Arc::new(WalletManager::new(store.clone(), "VND", 0));
        let notifier = Arc::new(RecordingNotifier::new());
        let processor = WithdrawalProcessor::new(
            store,
            wallets.clone(),
            notifier.clone(),
            &WithdrawalConfig {
                min_amount: dec!(50000),
            },
        );
        Fixture {
            wallets,
            processor,
            notifier,
        }
    }

    fn bank() -> RecipientInfo {
        RecipientInfo {
            account_name: "NGUYEN VAN A".into(),
            account_number: "0123456789".into(),
            bank_name: Some("VCB".into()),
        }
    }

    #[tokio::test]
    async fn test_request_debits_and_completes() {
        let f = fixture();
        f.wallets.deposit(7, dec!(200000), None).await.unwrap();

        let done = f
            .processor
            .request(7, dec!(150000), WithdrawalMethod::BankTransfer, bank())
            .await
            .unwrap();
        assert_eq!(done.status, WithdrawalStatus::Completed);
        assert!(done.transaction_id.is_some());
        assert_eq!(f.wallets.wallet(7).await.unwrap().balance, dec!(50000));
        assert_eq!(f.notifier.events_for(7), vec!["withdrawal_completed"]);
    }

    #[tokio::test]
    async fn test_withdraw_entire_balance() {
        let f = fixture();
        f.wallets.deposit(8, dec!(50000), None).await.unwrap();

        let done = f
            .processor
            .request(8, dec!(50000), WithdrawalMethod::BankTransfer, bank())
            .await
            .unwrap();
        assert_eq!(done.status, WithdrawalStatus::Completed);
        assert_eq!(f.wallets.wallet(8).await.unwrap().balance, Decimal::ZERO);

        let entries = f.wallets.transactions(8).await.unwrap();
        let debits: Vec<_> = entries
            .iter()
            .filter(|t| t.kind == TransactionKind::Debit)
            .collect();
        assert_eq!(debits.len(), 1);
        assert_eq!(debits[0].amount, dec!(-50000));
        assert_eq!(done.transaction_id, Some(debits[0].id));
        assert!(f.wallets.verify_consistency(8).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn test_request_validation() {
        let f = fixture();
        f.wallets.deposit(7, dec!(100000), None).await.unwrap();

        let below = f
            .processor
            .request(7, dec!(10000), WithdrawalMethod::EWallet, bank())
            .await
            .unwrap_err();
        assert_eq!(below.code(), "BELOW_MINIMUM");

        let mut no_bank = bank();
        no_bank.bank_name = None;
        let err = f
            .processor
            .request(7, dec!(60000), WithdrawalMethod::BankTransfer, no_bank)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_RECIPIENT");

        let short = f
            .processor
            .request(7, dec!(150000), WithdrawalMethod::EWallet, bank())
            .await
            .unwrap_err();
        assert_eq!(short.code(), "INSUFFICIENT_BALANCE");
        assert_eq!(f.wallets.wallet(7).await.unwrap().balance, dec!(100000));
    }

    #[tokio::test]
    async fn test_frozen_wallet_cannot_withdraw() {
        let f = fixture();
        f.wallets.deposit(7, dec!(100000), None).await.unwrap();
        f.wallets.freeze(7).await.unwrap();

        let err = f
            .processor
            .request(7, dec!(60000), WithdrawalMethod::EWallet, bank())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "WALLET_FROZEN");
    }

    #[tokio::test]
    async fn test_review_path_moves_money_on_approve_only() {
        let f = fixture();
        f.wallets.deposit(7, dec!(100000), None).await.unwrap();

        let pending = f
            .processor
            .submit_for_review(7, dec!(80000), WithdrawalMethod::BankTransfer, bank())
            .await
            .unwrap();
        assert_eq!(f.wallets.wallet(7).await.unwrap().balance, dec!(100000));

        let approved = f.processor.approve(pending.id).await.unwrap();
        assert_eq!(approved.status, WithdrawalStatus::Approved);
        assert_eq!(f.wallets.wallet(7).await.unwrap().balance, dec!(20000));

        f.processor.mark_processing(pending.id).await.unwrap();
        let failed = f.processor.fail(pending.id, "bank rejected".into()).await.unwrap();
        assert_eq!(failed.status, WithdrawalStatus::Failed);
        assert_eq!(f.wallets.wallet(7).await.unwrap().balance, dec!(100000));
        assert!(f.wallets.verify_consistency(7).await.unwrap().consistent);

        let err = f.processor.complete(pending.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_WITHDRAWAL_STATE");
    }

    #[tokio::test]
    async fn test_cancel_is_owner_only_and_pending_only() {
        let f = fixture();
        f.wallets.deposit(7, dec!(100000), None).await.unwrap();
        let pending = f
            .processor
            .submit_for_review(7, dec!(60000), WithdrawalMethod::EWallet, bank())
            .await
            .unwrap();

        assert_eq!(
            f.processor.cancel(8, pending.id).await.unwrap_err(),
            WithdrawalError::Forbidden
        );
        let cancelled = f.processor.cancel(7, pending.id).await.unwrap();
        assert_eq!(cancelled.status, WithdrawalStatus::Cancelled);
        assert_eq!(
            f.processor.cancel(7, pending.id).await.unwrap_err().code(),
            "INVALID_WITHDRAWAL_STATE"
        );

        let done = f
            .processor
            .request(7, dec!(60000), WithdrawalMethod::EWallet, bank())
            .await
            .unwrap();
        assert!(f.processor.cancel(7, done.id).await.is_err());
        assert_eq!(f.processor.list_for_user(7).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reject_keeps_reason() {
        let f = fixture();
        f.wallets.deposit(7, dec!(100000), None).await.unwrap();
        let pending = f
            .processor
            .submit_for_review(7, dec!(60000), WithdrawalMethod::EWallet, bank())
            .await
            .unwrap();
        let rejected = f.processor.reject(pending.id, "name mismatch".into()).await.unwrap();
        assert_eq!(rejected.status, WithdrawalStatus::Rejected);
        assert_eq!(rejected.reason.as_deref(), Some("name mismatch"));
    }
}
