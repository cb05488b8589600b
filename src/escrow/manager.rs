//! Escrow Manager
//!
//! Holds a payer's funds in the settlement wallet until a class proceeds,
//! then releases them to the tutor net of commission or refunds the payer.
//! Each operation is one unit of work guarded by the escrow's status, so a
//! retried release or refund can never pay twice.

use std::sync::Arc;

use rust_decimal::Decimal;

use super::error::EscrowError;
use super::state::EscrowStatus;
use super::types::Escrow;
use crate::commission::{CommissionResolver, calculate_commission, validate_rate};
use crate::core_types::{ClassId, EscrowId, UserId};
use crate::directory::{ClassDirectory, TutorLookup};
use crate::ledger::{LedgerStore, MAX_AMOUNT, Transaction, TransactionKind, UnitOfWork};
use crate::notify::{self, NotificationDispatcher, SettlementEvent};
use crate::wallet::WalletManager;
use crate::wallet::manager::{ensure_active, ensure_covers};

/// Where a captured gateway payment landed
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum GatewayHold {
    /// The payment funded the escrow
    Held(Escrow),
    /// The escrow was funded already; the payer's wallet holds the gross
    Surplus { payer_user_id: UserId },
}

pub struct EscrowManager {
    store: Arc<dyn LedgerStore>,
    wallets: Arc<WalletManager>,
    commission: Arc<CommissionResolver>,
    classes: Arc<dyn ClassDirectory>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl EscrowManager {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        wallets: Arc<WalletManager>,
        commission: Arc<CommissionResolver>,
        classes: Arc<dyn ClassDirectory>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            wallets,
            commission,
            classes,
            notifier,
        }
    }

    pub async fn get(&self, escrow_id: EscrowId) -> Result<Escrow, EscrowError> {
        self.store
            .escrow(escrow_id)
            .await?
            .ok_or(EscrowError::EscrowNotFound(escrow_id))
    }

    /// Live commission rate for the class's shape
    pub async fn resolve_rate(&self, class_id: ClassId) -> Result<Decimal, EscrowError> {
        let shape = self
            .classes
            .class_shape(class_id)
            .await
            .ok_or(EscrowError::ClassNotFound(class_id))?;
        Ok(self.commission.resolve(shape.capacity, shape.mode).await?)
    }

    async fn resolve_tutor(&self, class_id: ClassId) -> Result<UserId, EscrowError> {
        match self.classes.resolve_tutor(class_id).await {
            TutorLookup::Found(tutor) => Ok(tutor),
            TutorLookup::ClassNotFound => Err(EscrowError::ClassNotFound(class_id)),
            TutorLookup::TutorUnresolved => {
                tracing::warn!(class_id, "Class has no resolvable tutor");
                Err(EscrowError::TutorUnresolved(class_id))
            }
        }
    }

    fn validate_terms(gross: Decimal, rate: Decimal) -> Result<(), EscrowError> {
        if gross <= Decimal::ZERO || gross > MAX_AMOUNT {
            return Err(EscrowError::InvalidAmount);
        }
        validate_rate(rate).map_err(|_| EscrowError::InvalidCommissionRate(rate))?;
        Ok(())
    }

    /// Hold `gross` from the payer's wallet at a caller-supplied rate
    pub async fn pay_escrow(
        &self,
        payer: UserId,
        class_id: ClassId,
        gross: Decimal,
        rate: Decimal,
    ) -> Result<Escrow, EscrowError> {
        Self::validate_terms(gross, rate)?;
        let tutor = self.resolve_tutor(class_id).await?;

        let payer_wallet = self.wallets.wallet(payer).await?;
        ensure_active(&payer_wallet)?;
        ensure_covers(&payer_wallet, gross)?;
        let settlement = self.wallets.settlement_wallet().await?;

        let escrow = Escrow::new(class_id, payer, tutor, gross, rate, EscrowStatus::Held);
        let mut uow = UnitOfWork::new();
        uow.post(
            &payer_wallet,
            Transaction::record(payer_wallet.id, TransactionKind::Debit, gross)
                .with_counterparty(settlement.user_id)
                .with_reference(escrow.id),
        )
        .post(
            &settlement,
            Transaction::record(settlement.id, TransactionKind::EscrowIn, gross)
                .with_counterparty(payer)
                .with_reference(escrow.id),
        )
        .insert_escrow(escrow.clone());
        self.store.commit(uow).await?;

        tracing::info!(
            escrow_id = %escrow.id,
            class_id,
            payer,
            tutor,
            gross = %gross,
            rate = %rate,
            "Escrow held"
        );
        self.announce(&escrow).await;
        Ok(escrow)
    }

    /// Hold at the rate the live table gives for this class
    pub async fn pay_escrow_for_class(
        &self,
        payer: UserId,
        class_id: ClassId,
        gross: Decimal,
    ) -> Result<Escrow, EscrowError> {
        let rate = self.resolve_rate(class_id).await?;
        self.pay_escrow(payer, class_id, gross, rate).await
    }

    /// Create an escrow to be funded by a gateway payment. No money moves
    /// until the payment is confirmed.
    pub async fn open_for_gateway(
        &self,
        payer: UserId,
        class_id: ClassId,
        gross: Decimal,
        rate: Decimal,
    ) -> Result<Escrow, EscrowError> {
        Self::validate_terms(gross, rate)?;
        let tutor = self.resolve_tutor(class_id).await?;

        let escrow = Escrow::new(
            class_id,
            payer,
            tutor,
            gross,
            rate,
            EscrowStatus::AwaitingPayment,
        );
        let mut uow = UnitOfWork::new();
        uow.insert_escrow(escrow.clone());
        self.store.commit(uow).await?;

        tracing::info!(
            escrow_id = %escrow.id,
            class_id,
            payer,
            gross = %gross,
            "Escrow awaiting payment"
        );
        Ok(escrow)
    }

    fn require(
        escrow: &Escrow,
        status: EscrowStatus,
        action: &'static str,
    ) -> Result<(), EscrowError> {
        if escrow.status == status {
            Ok(())
        } else {
            Err(EscrowError::InvalidState {
                escrow_id: escrow.id,
                status: escrow.status,
                action,
            })
        }
    }

    /// Pay the tutor net of commission. Only legal from Held.
    pub async fn release(&self, escrow_id: EscrowId) -> Result<Escrow, EscrowError> {
        let escrow = self.get(escrow_id).await?;
        Self::require(&escrow, EscrowStatus::Held, "release")?;

        let split = calculate_commission(escrow.gross_amount, escrow.commission_rate);
        let settlement = self.wallets.settlement_wallet().await?;
        if !settlement.can_cover(split.net) {
            tracing::error!(
                escrow_id = %escrow.id,
                available = %settlement.balance,
                required = %split.net,
                "Settlement wallet cannot cover release"
            );
            return Err(EscrowError::InsufficientSettlementFunds {
                available: settlement.balance,
                required: split.net,
            });
        }
        let tutor_wallet = self.wallets.get_or_create_wallet(escrow.tutor_user_id).await?;

        let mut released = escrow.transitioned(EscrowStatus::Released);
        released.commission_amount = Some(split.commission);
        released.net_amount = Some(split.net);

        let mut uow = UnitOfWork::new();
        uow.post(
            &settlement,
            Transaction::record(settlement.id, TransactionKind::PayoutOut, split.net)
                .with_counterparty(escrow.tutor_user_id)
                .with_reference(escrow.id),
        )
        .post(
            &tutor_wallet,
            Transaction::record(tutor_wallet.id, TransactionKind::PayoutIn, split.net)
                .with_counterparty(settlement.user_id)
                .with_reference(escrow.id),
        )
        .post(
            &settlement,
            Transaction::record(settlement.id, TransactionKind::Commission, split.commission)
                .with_reference(escrow.id),
        )
        .update_escrow(EscrowStatus::Held, released.clone());
        self.store.commit(uow).await?;

        tracing::info!(
            escrow_id = %escrow.id,
            tutor = escrow.tutor_user_id,
            commission = %split.commission,
            net = %split.net,
            "Escrow released"
        );
        self.announce(&released).await;
        Ok(released)
    }

    /// Return the full gross to the payer's wallet. Only legal from Held.
    pub async fn refund(&self, escrow_id: EscrowId) -> Result<Escrow, EscrowError> {
        let escrow = self.get(escrow_id).await?;
        Self::require(&escrow, EscrowStatus::Held, "refund")?;

        let settlement = self.wallets.settlement_wallet().await?;
        if !settlement.can_cover(escrow.gross_amount) {
            return Err(EscrowError::InsufficientSettlementFunds {
                available: settlement.balance,
                required: escrow.gross_amount,
            });
        }
        let payer_wallet = self.wallets.get_or_create_wallet(escrow.payer_user_id).await?;

        let refunded = escrow.transitioned(EscrowStatus::Refunded);
        let mut uow = UnitOfWork::new();
        uow.post(
            &settlement,
            Transaction::record(settlement.id, TransactionKind::RefundOut, escrow.gross_amount)
                .with_counterparty(escrow.payer_user_id)
                .with_reference(escrow.id),
        )
        .post(
            &payer_wallet,
            Transaction::record(payer_wallet.id, TransactionKind::RefundIn, escrow.gross_amount)
                .with_counterparty(settlement.user_id)
                .with_reference(escrow.id),
        )
        .update_escrow(EscrowStatus::Held, refunded.clone());
        self.store.commit(uow).await?;

        tracing::info!(
            escrow_id = %escrow.id,
            payer = escrow.payer_user_id,
            gross = %escrow.gross_amount,
            "Escrow refunded"
        );
        self.announce(&refunded).await;
        Ok(refunded)
    }

    /// Stage a captured gateway payment into `uow`. Settlement is always
    /// credited with the gross. The first payment moves the escrow
    /// AwaitingPayment → Held; any later one finds it funded and passes the
    /// gross on to the payer's wallet.
    pub(crate) async fn stage_gateway_hold(
        &self,
        uow: &mut UnitOfWork,
        escrow_id: EscrowId,
        amount: Decimal,
        reference: &str,
    ) -> Result<GatewayHold, EscrowError> {
        let escrow = self.get(escrow_id).await?;
        if escrow.gross_amount != amount {
            return Err(EscrowError::InvalidAmount);
        }
        let settlement = self.wallets.settlement_wallet().await?;
        uow.post(
            &settlement,
            Transaction::record(settlement.id, TransactionKind::EscrowIn, escrow.gross_amount)
                .with_counterparty(escrow.payer_user_id)
                .with_reference(reference),
        );

        if escrow.status == EscrowStatus::AwaitingPayment {
            let held = escrow.transitioned(EscrowStatus::Held);
            uow.update_escrow(EscrowStatus::AwaitingPayment, held.clone());
            return Ok(GatewayHold::Held(held));
        }

        tracing::warn!(
            escrow_id = %escrow.id,
            status = %escrow.status,
            payment = reference,
            "Escrow already funded; crediting payer wallet"
        );
        let payer_wallet = self.wallets.get_or_create_wallet(escrow.payer_user_id).await?;
        uow.post(
            &settlement,
            Transaction::record(settlement.id, TransactionKind::RefundOut, escrow.gross_amount)
                .with_counterparty(escrow.payer_user_id)
                .with_reference(reference),
        )
        .post(
            &payer_wallet,
            Transaction::record(payer_wallet.id, TransactionKind::RefundIn, escrow.gross_amount)
                .with_counterparty(settlement.user_id)
                .with_note(Some(format!("surplus payment for escrow {}", escrow.id)))
                .with_reference(reference),
        );
        Ok(GatewayHold::Surplus {
            payer_user_id: escrow.payer_user_id,
        })
    }

    /// Check that a gateway refund of this escrow could be reversed
    pub(crate) async fn check_gateway_refund(
        &self,
        escrow_id: EscrowId,
    ) -> Result<Escrow, EscrowError> {
        let escrow = self.get(escrow_id).await?;
        Self::require(&escrow, EscrowStatus::Held, "refund")?;
        Ok(escrow)
    }

    /// Stage Held → Refunded for money the gateway returned to the payer
    /// directly: settlement gives up the gross, the payer wallet is untouched.
    pub(crate) async fn stage_gateway_refund(
        &self,
        uow: &mut UnitOfWork,
        escrow_id: EscrowId,
        reference: &str,
    ) -> Result<Escrow, EscrowError> {
        let escrow = self.check_gateway_refund(escrow_id).await?;
        let settlement = self.wallets.settlement_wallet().await?;
        if !settlement.can_cover(escrow.gross_amount) {
            return Err(EscrowError::InsufficientSettlementFunds {
                available: settlement.balance,
                required: escrow.gross_amount,
            });
        }

        let refunded = escrow.transitioned(EscrowStatus::Refunded);
        uow.post(
            &settlement,
            Transaction::record(settlement.id, TransactionKind::RefundOut, escrow.gross_amount)
                .with_counterparty(escrow.payer_user_id)
                .with_reference(reference),
        )
        .update_escrow(EscrowStatus::Held, refunded.clone());
        Ok(refunded)
    }

    /// Post-commit notification for the escrow's current state
    pub(crate) async fn announce(&self, escrow: &Escrow) {
        let (user, event) = match escrow.status {
            EscrowStatus::AwaitingPayment => return,
            EscrowStatus::Held => (
                escrow.payer_user_id,
                SettlementEvent::EscrowHeld {
                    escrow_id: escrow.id,
                    class_id: escrow.class_id,
                    amount: escrow.gross_amount,
                },
            ),
            EscrowStatus::Released => (
                escrow.tutor_user_id,
                SettlementEvent::EscrowReleased {
                    escrow_id: escrow.id,
                    class_id: escrow.class_id,
                    net_amount: escrow.net_amount.unwrap_or_default(),
                },
            ),
            EscrowStatus::Refunded => (
                escrow.payer_user_id,
                SettlementEvent::EscrowRefunded {
                    escrow_id: escrow.id,
                    class_id: escrow.class_id,
                    amount: escrow.gross_amount,
                },
            ),
        };
        notify::dispatch(self.notifier.as_ref(), user, event).await;
    }
}
