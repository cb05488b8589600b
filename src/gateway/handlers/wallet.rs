//! Wallet handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};

use super::super::state::AppState;
use super::super::types::{AmountRequest, ApiResult, TransactionView, TransferRequest, ok};
use super::helpers::Caller;
use crate::core_types::UserId;
use crate::ledger::Wallet;
use crate::wallet::{ConsistencyReport, WalletReceipt};

/// GET /api/v1/wallet
///
/// The caller's wallet, created on first access.
pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
) -> ApiResult<Wallet> {
    let wallets = state.wallets.as_ref();
    let wallet = state
        .retry
        .run(move || wallets.get_or_create_wallet(user_id))
        .await?;
    ok(wallet)
}

/// POST /api/v1/wallet/deposit
pub async fn deposit(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(req): Json<AmountRequest>,
) -> ApiResult<WalletReceipt> {
    let wallets = state.wallets.as_ref();
    let receipt = state
        .retry
        .run(move || wallets.deposit(user_id, req.amount, req.note.clone()))
        .await?;
    ok(receipt)
}

/// POST /api/v1/wallet/withdraw
pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(req): Json<AmountRequest>,
) -> ApiResult<WalletReceipt> {
    let wallets = state.wallets.as_ref();
    let receipt = state
        .retry
        .run(move || wallets.withdraw(user_id, req.amount, req.note.clone()))
        .await?;
    ok(receipt)
}

/// POST /api/v1/wallet/transfer
pub async fn transfer(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(req): Json<TransferRequest>,
) -> ApiResult<WalletReceipt> {
    let wallets = state.wallets.as_ref();
    let receipt = state
        .retry
        .run(move || wallets.transfer(user_id, req.to_user_id, req.amount, req.note.clone()))
        .await?;
    ok(receipt)
}

/// GET /api/v1/wallet/transactions
///
/// Oldest first. Sum `balance_delta`, not `amount`, to reproduce the balance.
pub async fn transactions(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
) -> ApiResult<Vec<TransactionView>> {
    let entries = state.wallets.transactions(user_id).await?;
    ok(entries.into_iter().map(TransactionView::from).collect())
}

/// GET /api/v1/admin/wallets/{user_id}/transactions
///
/// Any wallet's ledger, the settlement wallet included.
pub async fn wallet_transactions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Vec<TransactionView>> {
    let entries = state.wallets.transactions(user_id).await?;
    ok(entries.into_iter().map(TransactionView::from).collect())
}

/// GET /api/v1/wallet/consistency
pub async fn consistency(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
) -> ApiResult<ConsistencyReport> {
    ok(state.wallets.verify_consistency(user_id).await?)
}

/// POST /api/v1/admin/wallets/{user_id}/freeze
pub async fn freeze(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Wallet> {
    let wallets = state.wallets.as_ref();
    ok(state.retry.run(move || wallets.freeze(user_id)).await?)
}

/// POST /api/v1/admin/wallets/{user_id}/unfreeze
pub async fn unfreeze(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Wallet> {
    let wallets = state.wallets.as_ref();
    ok(state.retry.run(move || wallets.unfreeze(user_id)).await?)
}
