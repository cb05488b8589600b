//! Payment Service
//!
//! The provider-independent half of the gateway adapters. Every state
//! transition of a [`Payment`] happens here, once for both providers:
//!
//! ```text
//! create_payment ──► PENDING ──callback/query ok──► PAID ──refund──► REFUNDED
//!                       │                            ▲
//!                       └──rejected/failed──► FAILED ┘ (late success)
//! ```
//!
//! Idempotency rests on the payment row: reconciliation commits the status
//! change, the audit log and the business effect in one unit of work guarded
//! by the status the caller read. A duplicate callback either finds the
//! payment settled or loses the optimistic race, re-reads, and finds it
//! settled. Either way the effect is applied at most once.
//!
//! Provider round trips are never part of a unit of work and are bounded by
//! the provider's timeout.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::error::PaymentError;
use super::provider::{
    CallbackAck, CreateOrder, CreateReply, PaymentProvider, RefundReply, RemoteStatus, whole_amount,
};
use super::types::{LogDirection, Payment, PaymentContext, PaymentLog, PaymentStatus, ProviderKind};
use crate::core_types::{PaymentId, UserId};
use crate::directory::UserDirectory;
use crate::escrow::manager::GatewayHold;
use crate::escrow::{Escrow, EscrowManager, EscrowStatus};
use crate::ledger::{LedgerStore, Transaction, TransactionKind, UnitOfWork};
use crate::notify::{self, NotificationDispatcher, SettlementEvent};
use crate::retry::{RetryPolicy, Retryable};
use crate::wallet::WalletManager;
use crate::wallet::manager::ensure_covers;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub provider: ProviderKind,
    pub amount: Decimal,
    pub context: PaymentContext,
    #[serde(default)]
    pub description: Option<String>,
}

/// Provider evidence about one payment, from a callback or a status query
#[derive(Debug, Clone)]
struct Evidence {
    success: bool,
    amount: Option<Decimal>,
    result_code: String,
    transaction_ref: Option<String>,
    log: PaymentLog,
}

/// What reconciliation did
#[derive(Debug, Clone)]
enum Reconciled {
    /// Paid or Refunded already; only the log was written
    AlreadySettled(Payment),
    Paid {
        payment: Payment,
        escrow: Option<Escrow>,
    },
    /// Paid, but the business effect is left for `retry`
    PaidWithoutEffect(Payment),
    Failed(Payment),
    /// No status change
    Unchanged(Payment),
}

impl Reconciled {
    fn payment(&self) -> &Payment {
        match self {
            Reconciled::AlreadySettled(p)
            | Reconciled::Paid { payment: p, .. }
            | Reconciled::PaidWithoutEffect(p)
            | Reconciled::Failed(p)
            | Reconciled::Unchanged(p) => p,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Reconciled::AlreadySettled(_) => "already processed",
            Reconciled::Paid { .. } => "payment confirmed",
            Reconciled::PaidWithoutEffect(_) => "payment confirmed, settlement pending",
            Reconciled::Failed(_) => "payment failed",
            Reconciled::Unchanged(_) => "no change",
        }
    }
}

fn error_payload(e: &PaymentError) -> Value {
    json!({ "code": e.code(), "error": e.to_string() })
}

fn error_log(payment_id: PaymentId, action: &str, e: &PaymentError) -> PaymentLog {
    PaymentLog::new(payment_id, LogDirection::Error, action, error_payload(e))
}

/// Bound one provider round trip; dropping the future cancels it
async fn bounded<T>(
    kind: ProviderKind,
    timeout: Duration,
    call: impl Future<Output = Result<T, PaymentError>>,
) -> Result<T, PaymentError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(PaymentError::ProviderUnavailable {
            provider: kind,
            reason: format!("no reply within {}ms", timeout.as_millis()),
        }),
    }
}

pub struct PaymentService {
    store: Arc<dyn LedgerStore>,
    wallets: Arc<WalletManager>,
    escrows: Arc<EscrowManager>,
    users: Arc<dyn UserDirectory>,
    notifier: Arc<dyn NotificationDispatcher>,
    providers: HashMap<ProviderKind, Arc<dyn PaymentProvider>>,
    retry: RetryPolicy,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        wallets: Arc<WalletManager>,
        escrows: Arc<EscrowManager>,
        users: Arc<dyn UserDirectory>,
        notifier: Arc<dyn NotificationDispatcher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            wallets,
            escrows,
            users,
            notifier,
            providers: HashMap::new(),
            retry,
        }
    }

    /// Register a provider; a second one of the same kind replaces the first
    pub fn with_provider(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn provider(&self, kind: ProviderKind) -> Result<&Arc<dyn PaymentProvider>, PaymentError> {
        self.providers
            .get(&kind)
            .ok_or(PaymentError::ProviderNotConfigured(kind))
    }

    pub async fn payment(&self, payment_id: PaymentId) -> Result<Payment, PaymentError> {
        self.store
            .payment(payment_id)
            .await?
            .ok_or(PaymentError::PaymentNotFound(payment_id))
    }

    pub async fn logs(&self, payment_id: PaymentId) -> Result<Vec<PaymentLog>, PaymentError> {
        self.payment(payment_id).await?;
        Ok(self.store.payment_logs(payment_id).await?)
    }

    async fn record(&self, log: PaymentLog) -> Result<(), PaymentError> {
        let mut uow = UnitOfWork::new();
        uow.log(log);
        self.store.commit(uow).await?;
        Ok(())
    }

    /// Re-read the payment, apply `change`, write it back with `logs`.
    /// Retried on optimistic conflicts.
    async fn amend<F>(
        &self,
        payment_id: PaymentId,
        logs: &[PaymentLog],
        change: F,
    ) -> Result<Payment, PaymentError>
    where
        F: Fn(&mut Payment) + Sync,
    {
        let change = &change;
        self.retry
            .run(move || async move {
                let current = self.payment(payment_id).await?;
                let mut next = current.clone();
                change(&mut next);
                next.updated_at = Utc::now();

                let mut uow = UnitOfWork::new();
                uow.update_payment(current.guard(), next.clone());
                for log in logs {
                    uow.log(log.clone());
                }
                self.store.commit(uow).await?;
                Ok(next)
            })
            .await
    }

    // ========================================================================
    // Create
    // ========================================================================

    async fn validate_context(
        &self,
        user_id: UserId,
        amount: Decimal,
        context: PaymentContext,
    ) -> Result<(), PaymentError> {
        match context {
            PaymentContext::Escrow(escrow_id) => {
                let escrow = self.escrows.get(escrow_id).await?;
                if escrow.payer_user_id != user_id {
                    return Err(PaymentError::Forbidden);
                }
                if escrow.status != EscrowStatus::AwaitingPayment {
                    return Err(PaymentError::EscrowNotPayable {
                        escrow_id,
                        status: escrow.status,
                    });
                }
                if escrow.gross_amount != amount {
                    return Err(PaymentError::AmountMismatch {
                        expected: escrow.gross_amount,
                        actual: amount,
                    });
                }
            }
            PaymentContext::WalletDeposit(target) => {
                if target != user_id {
                    return Err(PaymentError::Forbidden);
                }
                if !self.users.user_exists(user_id).await {
                    return Err(PaymentError::UserNotFound(user_id));
                }
            }
        }
        Ok(())
    }

    /// Open a payment with the provider and return it with its checkout
    /// URL / QR payload. The Pending row and its request log are persisted
    /// before the provider is called.
    pub async fn create_payment(
        &self,
        user_id: UserId,
        request: CreatePaymentRequest,
    ) -> Result<Payment, PaymentError> {
        let provider = self.provider(request.provider)?.clone();
        whole_amount(request.amount)?;
        self.validate_context(user_id, request.amount, request.context).await?;

        let (order_id, request_id) = provider.new_order_ids();
        let payment = Payment::new(
            request.provider,
            order_id,
            request_id,
            user_id,
            request.amount,
            request.context,
        );
        let order = CreateOrder {
            order_id: payment.order_id.clone(),
            request_id: payment.request_id.clone(),
            amount: payment.amount,
            description: request
                .description
                .unwrap_or_else(|| format!("Thanh toan {}", payment.order_id)),
            extra_data: String::new(),
        };

        let mut uow = UnitOfWork::new();
        uow.insert_payment(payment.clone()).log(PaymentLog::new(
            payment.id,
            LogDirection::Request,
            "create",
            json!({
                "orderId": order.order_id,
                "requestId": order.request_id,
                "amount": order.amount,
                "description": order.description,
            }),
        ));
        self.store.commit(uow).await?;
        tracing::info!(
            payment_id = %payment.id,
            provider = %payment.provider,
            order_id = %payment.order_id,
            user_id,
            amount = %payment.amount,
            "Payment created"
        );

        let reply = bounded(provider.kind(), provider.timeout(), provider.create(&order)).await;
        match reply {
            Err(e) => {
                // Outcome unknown: leave Pending for a callback or status query
                tracing::warn!(payment_id = %payment.id, error = %e, "Provider create failed");
                self.record(error_log(payment.id, "create", &e)).await?;
                Err(e)
            }
            Ok(CreateReply::Rejected { code, message, raw }) => {
                let log = PaymentLog::new(payment.id, LogDirection::Response, "create", raw);
                let result_code = code.clone();
                let failed = self
                    .amend(payment.id, &[log], |p| {
                        if p.status == PaymentStatus::Pending {
                            p.status = PaymentStatus::Failed;
                            p.result_code = Some(result_code.clone());
                        }
                    })
                    .await?;
                tracing::warn!(
                    payment_id = %payment.id,
                    code = %code,
                    message = %message,
                    "Provider rejected payment"
                );
                if failed.status == PaymentStatus::Failed {
                    notify::dispatch(
                        self.notifier.as_ref(),
                        user_id,
                        SettlementEvent::PaymentFailed { payment_id: payment.id },
                    )
                    .await;
                }
                Err(PaymentError::ProviderRejected {
                    provider: payment.provider,
                    code,
                    message,
                })
            }
            Ok(CreateReply::Created { checkout_url, qr_code, raw }) => {
                let log = PaymentLog::new(payment.id, LogDirection::Response, "create", raw);
                self.amend(payment.id, &[log], |p| {
                    p.checkout_url = checkout_url.clone();
                    p.qr_code = qr_code.clone();
                })
                .await
            }
        }
    }

    // ========================================================================
    // Reconciliation (callback and query share it)
    // ========================================================================

    /// Stage the payment's business effect into `uow`. A payment for an
    /// escrow that is already funded becomes a deposit to the payer's wallet.
    async fn stage_effect(
        &self,
        uow: &mut UnitOfWork,
        payment: &mut Payment,
    ) -> Result<Option<Escrow>, PaymentError> {
        let reference = payment.id.to_string();
        match payment.context {
            PaymentContext::Escrow(escrow_id) => {
                match self
                    .escrows
                    .stage_gateway_hold(uow, escrow_id, payment.amount, &reference)
                    .await?
                {
                    GatewayHold::Held(held) => Ok(Some(held)),
                    GatewayHold::Surplus { payer_user_id } => {
                        payment.context = PaymentContext::WalletDeposit(payer_user_id);
                        Ok(None)
                    }
                }
            }
            PaymentContext::WalletDeposit(user_id) => {
                let wallet = self.wallets.get_or_create_wallet(user_id).await?;
                uow.post(
                    &wallet,
                    Transaction::record(wallet.id, TransactionKind::Credit, payment.amount)
                        .with_note(Some(format!("{} {}", payment.provider, payment.order_id)))
                        .with_reference(reference),
                );
                Ok(None)
            }
        }
    }

    async fn reconcile_once(
        &self,
        payment_id: PaymentId,
        evidence: &Evidence,
    ) -> Result<Reconciled, PaymentError> {
        let current = self.payment(payment_id).await?;
        let guard = current.guard();

        if current.status.is_settled() {
            self.record(evidence.log.clone()).await?;
            return Ok(Reconciled::AlreadySettled(current));
        }

        if !evidence.success {
            if current.status == PaymentStatus::Failed {
                self.record(evidence.log.clone()).await?;
                return Ok(Reconciled::Unchanged(current));
            }
            let mut failed = current.clone();
            failed.status = PaymentStatus::Failed;
            failed.result_code = Some(evidence.result_code.clone());
            failed.updated_at = Utc::now();
            let mut uow = UnitOfWork::new();
            uow.update_payment(guard, failed.clone()).log(evidence.log.clone());
            self.store.commit(uow).await?;
            return Ok(Reconciled::Failed(failed));
        }

        if let Some(amount) = evidence.amount.filter(|a| *a != current.amount) {
            tracing::error!(
                payment_id = %current.id,
                expected = %current.amount,
                actual = %amount,
                "Provider reported a different amount"
            );
            let mismatch = PaymentError::AmountMismatch {
                expected: current.amount,
                actual: amount,
            };
            let mut uow = UnitOfWork::new();
            uow.log(evidence.log.clone())
                .log(error_log(current.id, &evidence.log.action, &mismatch));
            if current.status == PaymentStatus::Failed {
                self.store.commit(uow).await?;
                return Ok(Reconciled::Unchanged(current));
            }
            let mut failed = current.clone();
            failed.status = PaymentStatus::Failed;
            failed.result_code = Some(mismatch.code().to_string());
            failed.updated_at = Utc::now();
            uow.update_payment(guard, failed.clone());
            self.store.commit(uow).await?;
            return Ok(Reconciled::Failed(failed));
        }

        let now = Utc::now();
        let mut paid = current.clone();
        paid.status = PaymentStatus::Paid;
        paid.result_code = Some(evidence.result_code.clone());
        paid.transaction_ref = evidence.transaction_ref.clone().or(paid.transaction_ref);
        paid.paid_at = Some(now);
        paid.updated_at = now;

        let mut uow = UnitOfWork::new();
        uow.log(evidence.log.clone());
        match self.stage_effect(&mut uow, &mut paid).await {
            Ok(escrow) => {
                paid.effect_applied = true;
                uow.update_payment(guard, paid.clone());
                self.store.commit(uow).await?;
                Ok(Reconciled::Paid { payment: paid, escrow })
            }
            Err(e) if e.is_conflict() => Err(e),
            Err(e) => {
                tracing::error!(
                    payment_id = %paid.id,
                    error = %e,
                    "Payment confirmed but its effect could not be applied"
                );
                // The staged effect is discarded with this unit of work
                let mut uow = UnitOfWork::new();
                uow.update_payment(guard, paid.clone())
                    .log(evidence.log.clone())
                    .log(error_log(paid.id, "effect", &e));
                self.store.commit(uow).await?;
                Ok(Reconciled::PaidWithoutEffect(paid))
            }
        }
    }

    async fn reconcile(
        &self,
        payment_id: PaymentId,
        evidence: Evidence,
    ) -> Result<Reconciled, PaymentError> {
        let evidence = &evidence;
        let outcome = self
            .retry
            .run(move || self.reconcile_once(payment_id, evidence))
            .await?;

        match &outcome {
            Reconciled::Paid { payment, escrow } => {
                tracing::info!(
                    payment_id = %payment.id,
                    amount = %payment.amount,
                    "Payment confirmed"
                );
                notify::dispatch(
                    self.notifier.as_ref(),
                    payment.user_id,
                    SettlementEvent::PaymentSucceeded {
                        payment_id: payment.id,
                        amount: payment.amount,
                    },
                )
                .await;
                if let Some(escrow) = escrow {
                    self.escrows.announce(escrow).await;
                }
            }
            Reconciled::PaidWithoutEffect(payment) => {
                notify::dispatch(
                    self.notifier.as_ref(),
                    payment.user_id,
                    SettlementEvent::PaymentSucceeded {
                        payment_id: payment.id,
                        amount: payment.amount,
                    },
                )
                .await;
            }
            Reconciled::Failed(payment) => {
                tracing::info!(
                    payment_id = %payment.id,
                    result_code = ?payment.result_code,
                    "Payment failed"
                );
                notify::dispatch(
                    self.notifier.as_ref(),
                    payment.user_id,
                    SettlementEvent::PaymentFailed { payment_id: payment.id },
                )
                .await;
            }
            Reconciled::AlreadySettled(payment) => {
                tracing::debug!(payment_id = %payment.id, "Duplicate notification ignored");
            }
            Reconciled::Unchanged(_) => {}
        }
        Ok(outcome)
    }

    /// Handle an IPN / webhook. Returns the acknowledgement to render; an
    /// `Err` means nothing was recorded and the provider should redeliver.
    pub async fn handle_callback(
        &self,
        kind: ProviderKind,
        payload: &Value,
    ) -> Result<CallbackAck, PaymentError> {
        let provider = self.provider(kind)?;
        let notice = match provider.verify_callback(payload) {
            Ok(notice) => notice,
            Err(e) => {
                tracing::warn!(provider = %kind, error = %e, "Callback rejected");
                return Ok(CallbackAck::rejected(None, e.to_string()));
            }
        };

        let Some(payment) = self.store.payment_by_order(kind, &notice.order_id).await? else {
            tracing::warn!(
                provider = %kind,
                order_id = %notice.order_id,
                "Callback for unknown order"
            );
            return Ok(CallbackAck::accepted(Some(notice.order_id), "unknown order"));
        };

        let evidence = Evidence {
            success: notice.success,
            amount: Some(notice.amount),
            result_code: notice.result_code,
            transaction_ref: notice.transaction_ref,
            log: PaymentLog::new(payment.id, LogDirection::Callback, "callback", payload.clone()),
        };
        let outcome = self.reconcile(payment.id, evidence).await?;
        Ok(CallbackAck::accepted(Some(notice.order_id), outcome.message()))
    }

    /// Acknowledgement in the provider's wire shape
    pub fn render_ack(
        &self,
        kind: ProviderKind,
        ack: &CallbackAck,
    ) -> Result<(u16, Value), PaymentError> {
        Ok(self.provider(kind)?.render_ack(ack))
    }

    /// Ask the provider for the payment's status and reconcile
    pub async fn query_status(&self, payment_id: PaymentId) -> Result<Payment, PaymentError> {
        let payment = self.payment(payment_id).await?;
        let provider = self.provider(payment.provider)?;

        let query = provider.query(&payment);
        let report = match bounded(provider.kind(), provider.timeout(), query).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(payment_id = %payment.id, error = %e, "Status query failed");
                self.record(error_log(payment.id, "query", &e)).await?;
                return Err(e);
            }
        };

        let log = PaymentLog::new(payment.id, LogDirection::Response, "query", report.raw.clone());
        match report.status {
            RemoteStatus::Pending => {
                self.record(log).await?;
                Ok(payment)
            }
            status => {
                let evidence = Evidence {
                    success: status == RemoteStatus::Paid,
                    amount: report.amount,
                    result_code: report.result_code,
                    transaction_ref: report.transaction_ref,
                    log,
                };
                let outcome = self.reconcile(payment.id, evidence).await?;
                Ok(outcome.payment().clone())
            }
        }
    }

    // ========================================================================
    // Refund
    // ========================================================================

    /// Whether the effect can be reversed right now; checked before the
    /// provider is asked to return any money.
    async fn check_reversal(&self, payment: &Payment) -> Result<(), PaymentError> {
        if !payment.effect_applied {
            return Ok(());
        }
        match payment.context {
            PaymentContext::Escrow(escrow_id) => {
                self.escrows.check_gateway_refund(escrow_id).await?;
            }
            PaymentContext::WalletDeposit(user_id) => {
                let wallet = self.wallets.wallet(user_id).await?;
                ensure_covers(&wallet, payment.amount)?;
            }
        }
        Ok(())
    }

    async fn stage_reversal(
        &self,
        uow: &mut UnitOfWork,
        payment: &Payment,
    ) -> Result<Option<Escrow>, PaymentError> {
        if !payment.effect_applied {
            return Ok(None);
        }
        let reference = payment.id.to_string();
        match payment.context {
            PaymentContext::Escrow(escrow_id) => Ok(Some(
                self.escrows
                    .stage_gateway_refund(uow, escrow_id, &reference)
                    .await?,
            )),
            PaymentContext::WalletDeposit(user_id) => {
                let wallet = self.wallets.wallet(user_id).await?;
                ensure_covers(&wallet, payment.amount)?;
                uow.post(
                    &wallet,
                    Transaction::record(wallet.id, TransactionKind::RefundOut, payment.amount)
                        .with_note(Some(format!(
                            "{} refund {}",
                            payment.provider, payment.order_id
                        )))
                        .with_reference(reference),
                );
                Ok(None)
            }
        }
    }

    async fn commit_refund(
        &self,
        payment_id: PaymentId,
        log: &PaymentLog,
    ) -> Result<(Payment, Option<Escrow>), PaymentError> {
        let current = self.payment(payment_id).await?;
        if current.status != PaymentStatus::Paid {
            return Err(PaymentError::InvalidState {
                payment_id,
                status: current.status,
                action: "refund",
            });
        }
        let mut refunded = current.clone();
        refunded.status = PaymentStatus::Refunded;
        refunded.updated_at = Utc::now();

        let mut uow = UnitOfWork::new();
        uow.log(log.clone());
        match self.stage_reversal(&mut uow, &current).await {
            Ok(escrow) => {
                uow.update_payment(current.guard(), refunded.clone());
                self.store.commit(uow).await?;
                Ok((refunded, escrow))
            }
            Err(e) if e.is_conflict() => Err(e),
            Err(e) => {
                // The money already left the gateway; record that much
                tracing::error!(
                    payment_id = %payment_id,
                    error = %e,
                    "Refund succeeded but could not be reversed in the ledger"
                );
                let mut uow = UnitOfWork::new();
                uow.update_payment(current.guard(), refunded.clone())
                    .log(log.clone())
                    .log(error_log(payment_id, "refund", &e));
                self.store.commit(uow).await?;
                Ok((refunded, None))
            }
        }
    }

    /// Full refund through the provider; reverses the business effect.
    pub async fn refund(
        &self,
        payment_id: PaymentId,
        amount: Option<Decimal>,
    ) -> Result<Payment, PaymentError> {
        let payment = self.payment(payment_id).await?;
        if payment.status != PaymentStatus::Paid {
            return Err(PaymentError::InvalidState {
                payment_id,
                status: payment.status,
                action: "refund",
            });
        }
        let amount = amount.unwrap_or(payment.amount);
        if amount != payment.amount {
            return Err(PaymentError::AmountMismatch {
                expected: payment.amount,
                actual: amount,
            });
        }
        if payment.transaction_ref.is_none() {
            return Err(PaymentError::InvalidState {
                payment_id,
                status: payment.status,
                action: "refund without a gateway transaction reference",
            });
        }
        self.check_reversal(&payment).await?;

        let provider = self.provider(payment.provider)?;
        self.record(PaymentLog::new(
            payment.id,
            LogDirection::Request,
            "refund",
            json!({ "amount": amount, "transactionRef": payment.transaction_ref }),
        ))
        .await?;

        let call = provider.refund(&payment, amount);
        let reply = match bounded(provider.kind(), provider.timeout(), call).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(payment_id = %payment.id, error = %e, "Refund request failed");
                self.record(error_log(payment.id, "refund", &e)).await?;
                return Err(e);
            }
        };

        let raw = match reply {
            RefundReply::Rejected { code, message, raw } => {
                self.record(PaymentLog::new(payment.id, LogDirection::Response, "refund", raw))
                    .await?;
                tracing::warn!(
                    payment_id = %payment.id,
                    code = %code,
                    message = %message,
                    "Provider rejected refund"
                );
                return Err(PaymentError::ProviderRejected {
                    provider: payment.provider,
                    code,
                    message,
                });
            }
            RefundReply::Refunded { raw, .. } => raw,
        };

        let log = PaymentLog::new(payment.id, LogDirection::Response, "refund", raw);
        let log = &log;
        let (refunded, escrow) = self
            .retry
            .run(move || self.commit_refund(payment_id, log))
            .await?;

        tracing::info!(payment_id = %refunded.id, amount = %amount, "Payment refunded");
        notify::dispatch(
            self.notifier.as_ref(),
            refunded.user_id,
            SettlementEvent::PaymentRefunded {
                payment_id: refunded.id,
                amount,
            },
        )
        .await;
        if let Some(escrow) = escrow {
            self.escrows.announce(&escrow).await;
        }
        Ok(refunded)
    }

    // ========================================================================
    // Retry
    // ========================================================================

    async fn apply_pending_effect(
        &self,
        payment_id: PaymentId,
    ) -> Result<(Payment, Option<Escrow>), PaymentError> {
        let current = self.payment(payment_id).await?;
        if !current.needs_effect() {
            return Ok((current, None));
        }
        let mut applied = current.clone();
        applied.effect_applied = true;
        applied.updated_at = Utc::now();

        let mut uow = UnitOfWork::new();
        let escrow = self.stage_effect(&mut uow, &mut applied).await?;
        uow.update_payment(current.guard(), applied.clone()).log(PaymentLog::new(
            payment_id,
            LogDirection::Response,
            "retry",
            json!({ "effect_applied": true }),
        ));
        self.store.commit(uow).await?;
        Ok((applied, escrow))
    }

    /// Re-apply the business effect of a Paid payment whose effect failed.
    /// Only the initiating user may ask; a no-op once applied.
    pub async fn retry(
        &self,
        payment_id: PaymentId,
        user_id: UserId,
    ) -> Result<Payment, PaymentError> {
        let payment = self.payment(payment_id).await?;
        if payment.user_id != user_id {
            return Err(PaymentError::Forbidden);
        }
        if payment.status != PaymentStatus::Paid {
            return Err(PaymentError::InvalidState {
                payment_id,
                status: payment.status,
                action: "retry",
            });
        }
        if payment.effect_applied {
            return Ok(payment);
        }

        let (payment, escrow) = self
            .retry
            .run(move || self.apply_pending_effect(payment_id))
            .await?;
        tracing::info!(payment_id = %payment.id, "Payment effect applied on retry");
        if let Some(escrow) = escrow {
            self.escrows.announce(&escrow).await;
        }
        Ok(payment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commission::{CommissionRates, CommissionResolver, DeliveryMode};
    use crate::config::{CommissionConfig, MoMoConfig};
    use crate::directory::{ClassRecord, StaticDirectory};
    use crate::ledger::MemoryStore;
    use crate::notify::RecordingNotifier;
    use crate::payment::momo::MoMoProvider;
    use crate::core_types::{EscrowId, WalletId, WithdrawalId};
    use crate::ledger::{StoreError, Wallet};
    use crate::payment::transport::{MockTransport, TransportError};
    use crate::withdrawal::WithdrawalRequest;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    const SETTLEMENT: UserId = 0;
    const PAYER: UserId = 1;
    const TUTOR: UserId = 2;
    const CLASS: i64 = 10;

    struct Fixture {
        store: Arc<MemoryStore>,
        wallets: Arc<WalletManager>,
        escrows: Arc<EscrowManager>,
        transport: Arc<MockTransport>,
        momo: Arc<MoMoProvider>,
        notifier: Arc<RecordingNotifier>,
        service: PaymentService,
    }

    fn momo_config() -> MoMoConfig {
        MoMoConfig {
            partner_code: "MOMOTEST".into(),
            access_key: "access".into(),
            secret_key: "secret".into(),
            create_url: "https://momo.test/create".into(),
            query_url: "https://momo.test/query".into(),
            refund_url: "https://momo.test/refund".into(),
            redirect_url: "https://app.test/result".into(),
            ipn_url: "https://api.test/ipn".into(),
            request_type: "captureWallet".into(),
            timeout_ms: 200,
        }
    }

    /// Memory store whose next wallet lookup fails once armed
    struct FlakyStore {
        inner: Arc<MemoryStore>,
        fail_next_wallet_read: AtomicBool,
    }

    #[async_trait]
    impl LedgerStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, StoreError> {
            self.inner.wallet(id).await
        }

        async fn wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>, StoreError> {
            if self.fail_next_wallet_read.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Database("connection reset".into()));
            }
            self.inner.wallet_by_user(user_id).await
        }

        async fn create_wallet(
            &self,
            user_id: UserId,
            currency: &str,
        ) -> Result<Wallet, StoreError> {
            self.inner.create_wallet(user_id, currency).await
        }

        async fn transactions(&self, wallet_id: WalletId) -> Result<Vec<Transaction>, StoreError> {
            self.inner.transactions(wallet_id).await
        }

        async fn escrow(&self, id: EscrowId) -> Result<Option<Escrow>, StoreError> {
            self.inner.escrow(id).await
        }

        async fn payment(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
            self.inner.payment(id).await
        }

        async fn payment_by_order(
            &self,
            provider: ProviderKind,
            order_id: &str,
        ) -> Result<Option<Payment>, StoreError> {
            self.inner.payment_by_order(provider, order_id).await
        }

        async fn payment_logs(&self, id: PaymentId) -> Result<Vec<PaymentLog>, StoreError> {
            self.inner.payment_logs(id).await
        }

        async fn withdrawal(
            &self,
            id: WithdrawalId,
        ) -> Result<Option<WithdrawalRequest>, StoreError> {
            self.inner.withdrawal(id).await
        }

        async fn withdrawals_for_user(
            &self,
            user_id: UserId,
        ) -> Result<Vec<WithdrawalRequest>, StoreError> {
            self.inner.withdrawals_for_user(user_id).await
        }

        async fn commission_rates(&self) -> Result<Option<CommissionRates>, StoreError> {
            self.inner.commission_rates().await
        }

        async fn save_commission_rates(&self, rates: &CommissionRates) -> Result<(), StoreError> {
            self.inner.save_commission_rates(rates).await
        }

        async fn commit(&self, uow: UnitOfWork) -> Result<(), StoreError> {
            self.inner.commit(uow).await
        }
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        fixture_over(store.clone(), store)
    }

    fn fixture_over(store: Arc<MemoryStore>, dyn_store: Arc<dyn LedgerStore>) -> Fixture {
        let wallets = Arc::new(WalletManager::new(dyn_store.clone(), "VND", SETTLEMENT));
        let commission = Arc::new(CommissionResolver::new(
            dyn_store.clone(),
            CommissionRates::from(&CommissionConfig::default()),
        ));
        let directory = Arc::new(StaticDirectory::with_open_users());
        directory.add_class(ClassRecord {
            class_id: CLASS,
            tutor_user_id: Some(TUTOR),
            capacity: 1,
            mode: DeliveryMode::Online,
        });
        let notifier = Arc::new(RecordingNotifier::new());
        let escrows = Arc::new(EscrowManager::new(
            dyn_store.clone(),
            wallets.clone(),
            commission,
            directory.clone(),
            notifier.clone(),
        ));
        let transport = Arc::new(MockTransport::new());
        let momo = Arc::new(MoMoProvider::new(momo_config(), transport.clone()));
        let service = PaymentService::new(
            dyn_store,
            wallets.clone(),
            escrows.clone(),
            directory,
            notifier.clone(),
            RetryPolicy::new(3, Duration::ZERO),
        )
        .with_provider(momo.clone());
        Fixture {
            store,
            wallets,
            escrows,
            transport,
            momo,
            notifier,
            service,
        }
    }

    fn created_reply() -> Value {
        json!({"resultCode": 0, "message": "ok", "payUrl": "https://pay.momo.test/x"})
    }

    fn deposit_request(amount: Decimal) -> CreatePaymentRequest {
        CreatePaymentRequest {
            provider: ProviderKind::MoMo,
            amount,
            context: PaymentContext::WalletDeposit(PAYER),
            description: None,
        }
    }

    fn ipn(f: &Fixture, payment: &Payment, result_code: i64) -> Value {
        let mut payload = json!({
            "partnerCode": "MOMOTEST",
            "orderId": payment.order_id,
            "requestId": payment.request_id,
            "amount": payment.amount,
            "orderInfo": "x",
            "orderType": "momo_wallet",
            "transId": 99001,
            "resultCode": result_code,
            "message": "done",
            "payType": "qr",
            "responseTime": 1,
            "extraData": "",
        });
        f.momo.sign_ipn(&mut payload).unwrap();
        payload
    }

    #[tokio::test]
    async fn test_create_persists_pending_with_checkout_url() {
        let f = fixture();
        f.transport.push_reply(created_reply());

        let payment = f.service.create_payment(PAYER, deposit_request(dec!(100000))).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.checkout_url.as_deref(), Some("https://pay.momo.test/x"));

        let logs = f.service.logs(payment.id).await.unwrap();
        let directions: Vec<_> = logs.iter().map(|l| l.direction).collect();
        assert_eq!(directions, vec![LogDirection::Request, LogDirection::Response]);
    }

    #[tokio::test]
    async fn test_create_rejects_fractional_amount() {
        let f = fixture();
        let err = f
            .service
            .create_payment(PAYER, deposit_request(dec!(1000.5)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");
        assert_eq!(f.transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_create_rejected_by_provider_marks_failed() {
        let f = fixture();
        f.transport.push_reply(json!({"resultCode": 22, "message": "bad amount"}));

        let err = f
            .service
            .create_payment(PAYER, deposit_request(dec!(100000)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ProviderRejected { ref code, .. } if code == "22"));
        assert_eq!(f.notifier.events_for(PAYER), vec!["payment_failed"]);
    }

    #[tokio::test]
    async fn test_create_network_failure_stays_pending() {
        let f = fixture();
        f.transport.push_error(TransportError::Network("connection reset".into()));

        let err = f
            .service
            .create_payment(PAYER, deposit_request(dec!(100000)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PROVIDER_UNAVAILABLE");

        let logs: Vec<PaymentLog> = f.store.all_payment_logs();
        let payment = f.service.payment(logs[0].payment_id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(logs.last().map(|l| l.direction), Some(LogDirection::Error));
    }

    #[tokio::test]
    async fn test_create_timeout_stays_pending() {
        let f = fixture();
        f.transport.set_delay(Some(Duration::from_millis(500)));
        f.transport.push_reply(created_reply());

        let err = f
            .service
            .create_payment(PAYER, deposit_request(dec!(100000)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_deposit_callback_is_idempotent() {
        let f = fixture();
        f.transport.push_reply(created_reply());
        let payment = f.service.create_payment(PAYER, deposit_request(dec!(100000))).await.unwrap();
        let payload = ipn(&f, &payment, 0);

        for _ in 0..3 {
            let ack = f.service.handle_callback(ProviderKind::MoMo, &payload).await.unwrap();
            assert!(ack.accepted);
        }

        let wallet = f.wallets.wallet(PAYER).await.unwrap();
        assert_eq!(wallet.balance, dec!(100000));
        let paid = f.service.payment(payment.id).await.unwrap();
        assert_eq!(paid.status, PaymentStatus::Paid);
        assert!(paid.effect_applied);
        assert_eq!(paid.transaction_ref.as_deref(), Some("99001"));
        assert_eq!(f.notifier.events_for(PAYER), vec!["payment_succeeded"]);
    }

    #[tokio::test]
    async fn test_tampered_callback_changes_nothing() {
        let f = fixture();
        f.transport.push_reply(created_reply());
        let payment = f.service.create_payment(PAYER, deposit_request(dec!(100000))).await.unwrap();
        let mut payload = ipn(&f, &payment, 0);
        payload["amount"] = json!(999999);

        let ack = f.service.handle_callback(ProviderKind::MoMo, &payload).await.unwrap();
        assert!(!ack.accepted);
        assert_eq!(
            f.service.payment(payment.id).await.unwrap().status,
            PaymentStatus::Pending
        );
        assert!(f.wallets.wallet(PAYER).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_then_late_success() {
        let f = fixture();
        f.transport.push_reply(created_reply());
        let payment = f.service.create_payment(PAYER, deposit_request(dec!(50000))).await.unwrap();

        f.service
            .handle_callback(ProviderKind::MoMo, &ipn(&f, &payment, 1006))
            .await
            .unwrap();
        assert_eq!(
            f.service.payment(payment.id).await.unwrap().status,
            PaymentStatus::Failed
        );

        f.service
            .handle_callback(ProviderKind::MoMo, &ipn(&f, &payment, 0))
            .await
            .unwrap();
        assert_eq!(
            f.service.payment(payment.id).await.unwrap().status,
            PaymentStatus::Paid
        );
        assert_eq!(f.wallets.wallet(PAYER).await.unwrap().balance, dec!(50000));
    }

    #[tokio::test]
    async fn test_escrow_payment_holds_escrow() {
        let f = fixture();
        let escrow = f
            .escrows
            .open_for_gateway(PAYER, CLASS, dec!(300000), dec!(0.10))
            .await
            .unwrap();
        f.transport.push_reply(created_reply());
        let payment = f
            .service
            .create_payment(
                PAYER,
                CreatePaymentRequest {
                    provider: ProviderKind::MoMo,
                    amount: dec!(300000),
                    context: PaymentContext::Escrow(escrow.id),
                    description: Some("Học phí".into()),
                },
            )
            .await
            .unwrap();

        f.service
            .handle_callback(ProviderKind::MoMo, &ipn(&f, &payment, 0))
            .await
            .unwrap();

        assert_eq!(f.escrows.get(escrow.id).await.unwrap().status, EscrowStatus::Held);
        assert_eq!(f.wallets.settlement_wallet().await.unwrap().balance, dec!(300000));
    }

    #[tokio::test]
    async fn test_escrow_payment_rules() {
        let f = fixture();
        let escrow = f
            .escrows
            .open_for_gateway(PAYER, CLASS, dec!(300000), dec!(0.10))
            .await
            .unwrap();
        let request = |amount| CreatePaymentRequest {
            provider: ProviderKind::MoMo,
            amount,
            context: PaymentContext::Escrow(escrow.id),
            description: None,
        };

        let err = f.service.create_payment(PAYER, request(dec!(1000))).await.unwrap_err();
        assert_eq!(err.code(), "AMOUNT_MISMATCH");
        let err = f.service.create_payment(TUTOR, request(dec!(300000))).await.unwrap_err();
        assert_eq!(err, PaymentError::Forbidden);
    }

    #[tokio::test]
    async fn test_effect_failure_leaves_paid_for_retry() {
        let memory = Arc::new(MemoryStore::new());
        let flaky = Arc::new(FlakyStore {
            inner: memory.clone(),
            fail_next_wallet_read: AtomicBool::new(false),
        });
        let f = fixture_over(memory, flaky.clone());
        f.transport.push_reply(created_reply());
        let payment = f.service.create_payment(PAYER, deposit_request(dec!(70000))).await.unwrap();

        flaky.fail_next_wallet_read.store(true, Ordering::SeqCst);
        let ack = f
            .service
            .handle_callback(ProviderKind::MoMo, &ipn(&f, &payment, 0))
            .await
            .unwrap();
        assert_eq!(ack.message, "payment confirmed, settlement pending");

        let stuck = f.service.payment(payment.id).await.unwrap();
        assert_eq!(stuck.status, PaymentStatus::Paid);
        assert!(!stuck.effect_applied);
        assert_eq!(f.store.entry_count(), 0);

        assert_eq!(
            f.service.retry(payment.id, TUTOR).await.unwrap_err(),
            PaymentError::Forbidden
        );
        let applied = f.service.retry(payment.id, PAYER).await.unwrap();
        assert!(applied.effect_applied);
        assert_eq!(f.wallets.wallet(PAYER).await.unwrap().balance, dec!(70000));

        // Once applied, neither a second retry nor a redelivery credits again
        assert!(f.service.retry(payment.id, PAYER).await.unwrap().effect_applied);
        f.service
            .handle_callback(ProviderKind::MoMo, &ipn(&f, &payment, 0))
            .await
            .unwrap();
        assert_eq!(f.wallets.wallet(PAYER).await.unwrap().balance, dec!(70000));
        assert_eq!(f.store.entry_count(), 1);
        assert!(f.wallets.verify_consistency(PAYER).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn test_second_escrow_payment_credits_payer_wallet() {
        let f = fixture();
        let escrow = f
            .escrows
            .open_for_gateway(PAYER, CLASS, dec!(200000), dec!(0.10))
            .await
            .unwrap();
        let request = CreatePaymentRequest {
            provider: ProviderKind::MoMo,
            amount: dec!(200000),
            context: PaymentContext::Escrow(escrow.id),
            description: None,
        };
        f.transport.push_reply(created_reply());
        let first = f.service.create_payment(PAYER, request.clone()).await.unwrap();
        f.transport.push_reply(created_reply());
        let second = f.service.create_payment(PAYER, request).await.unwrap();

        f.service
            .handle_callback(ProviderKind::MoMo, &ipn(&f, &first, 0))
            .await
            .unwrap();
        f.service
            .handle_callback(ProviderKind::MoMo, &ipn(&f, &second, 0))
            .await
            .unwrap();

        let surplus = f.service.payment(second.id).await.unwrap();
        assert_eq!(surplus.status, PaymentStatus::Paid);
        assert!(surplus.effect_applied);
        assert_eq!(surplus.context, PaymentContext::WalletDeposit(PAYER));
        assert_eq!(f.escrows.get(escrow.id).await.unwrap().status, EscrowStatus::Held);
        assert_eq!(f.wallets.settlement_wallet().await.unwrap().balance, dec!(200000));
        assert_eq!(f.wallets.wallet(PAYER).await.unwrap().balance, dec!(200000));
        assert!(f.service.retry(second.id, PAYER).await.unwrap().effect_applied);

        // Refunding the surplus takes it back from the wallet, the escrow stays held
        f.transport.push_reply(json!({"resultCode": 0, "transId": 778, "message": "ok"}));
        f.service.refund(second.id, None).await.unwrap();
        assert_eq!(f.wallets.wallet(PAYER).await.unwrap().balance, Decimal::ZERO);
        assert_eq!(f.escrows.get(escrow.id).await.unwrap().status, EscrowStatus::Held);
        assert_eq!(f.wallets.settlement_wallet().await.unwrap().balance, dec!(200000));
        for user in [PAYER, SETTLEMENT] {
            assert!(f.wallets.verify_consistency(user).await.unwrap().consistent);
        }
    }

    #[tokio::test]
    async fn test_query_reconciles_like_callback() {
        let f = fixture();
        f.transport.push_reply(created_reply());
        let payment = f.service.create_payment(PAYER, deposit_request(dec!(70000))).await.unwrap();

        f.transport.push_reply(json!({"resultCode": 1000, "message": "pending"}));
        let pending = f.service.query_status(payment.id).await.unwrap();
        assert_eq!(pending.status, PaymentStatus::Pending);

        f.transport.push_reply(
            json!({"resultCode": 0, "amount": 70000, "transId": 5501, "message": "ok"}),
        );
        let paid = f.service.query_status(payment.id).await.unwrap();
        assert_eq!(paid.status, PaymentStatus::Paid);
        assert_eq!(f.wallets.wallet(PAYER).await.unwrap().balance, dec!(70000));
    }

    #[tokio::test]
    async fn test_refund_reverses_deposit() {
        let f = fixture();
        f.transport.push_reply(created_reply());
        let payment = f.service.create_payment(PAYER, deposit_request(dec!(80000))).await.unwrap();
        f.service
            .handle_callback(ProviderKind::MoMo, &ipn(&f, &payment, 0))
            .await
            .unwrap();

        assert_eq!(
            f.service.refund(payment.id, Some(dec!(1000))).await.unwrap_err().code(),
            "AMOUNT_MISMATCH"
        );

        f.transport.push_reply(json!({"resultCode": 0, "transId": 777, "message": "ok"}));
        let refunded = f.service.refund(payment.id, None).await.unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        assert_eq!(f.wallets.wallet(PAYER).await.unwrap().balance, Decimal::ZERO);

        let again = f.service.refund(payment.id, None).await.unwrap_err();
        assert_eq!(again.code(), "INVALID_PAYMENT_STATE");
    }

    #[tokio::test]
    async fn test_refund_precheck_blocks_spent_deposit() {
        let f = fixture();
        f.transport.push_reply(created_reply());
        let payment = f.service.create_payment(PAYER, deposit_request(dec!(80000))).await.unwrap();
        f.service
            .handle_callback(ProviderKind::MoMo, &ipn(&f, &payment, 0))
            .await
            .unwrap();
        f.wallets.withdraw(PAYER, dec!(50000), None).await.unwrap();

        let sent_before = f.transport.sent_count();
        let err = f.service.refund(payment.id, None).await.unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
        assert_eq!(f.transport.sent_count(), sent_before);
    }
}
