pub mod handlers;
pub mod state;
pub mod types;

use axum::{
    Router,
    routing::{get, patch, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;

use handlers::{commission, escrow, payment, wallet, withdrawal};
use state::AppState;

/// Full route table
///
/// Caller routes read the identity from `X-User-Id`. Admin routes carry no
/// identity of their own and must sit behind the operator network.
pub fn build_router(state: Arc<AppState>) -> Router {
    let wallet_routes = Router::new()
        .route("/", get(wallet::get_wallet))
        .route("/deposit", post(wallet::deposit))
        .route("/withdraw", post(wallet::withdraw))
        .route("/transfer", post(wallet::transfer))
        .route("/transactions", get(wallet::transactions))
        .route("/consistency", get(wallet::consistency));

    let escrow_routes = Router::new()
        .route("/", post(escrow::pay_escrow))
        .route("/class", post(escrow::pay_escrow_for_class))
        .route("/gateway", post(escrow::open_for_gateway))
        .route("/{escrow_id}", get(escrow::get_escrow));

    // Static segments win over `{payment_id}` in axum's matcher
    let payment_routes = Router::new()
        .route("/", post(payment::create_payment))
        .route("/momo/ipn", post(payment::momo_ipn))
        .route("/payos/webhook", post(payment::payos_webhook))
        .route("/{payment_id}", get(payment::get_payment))
        .route("/{payment_id}/query", post(payment::query_payment))
        .route("/{payment_id}/retry", post(payment::retry_payment))
        .route("/{payment_id}/logs", get(payment::payment_logs));

    let withdrawal_routes = Router::new()
        .route(
            "/",
            post(withdrawal::request_withdrawal).get(withdrawal::list_withdrawals),
        )
        .route("/{withdrawal_id}/cancel", post(withdrawal::cancel_withdrawal));

    let admin_routes = Router::new()
        .route("/commission", patch(commission::update_rates))
        .route("/wallets/{user_id}/transactions", get(wallet::wallet_transactions))
        .route("/wallets/{user_id}/freeze", post(wallet::freeze))
        .route("/wallets/{user_id}/unfreeze", post(wallet::unfreeze))
        .route("/escrows/{escrow_id}/release", post(escrow::release))
        .route("/escrows/{escrow_id}/refund", post(escrow::refund))
        .route("/payments/{payment_id}/refund", post(payment::refund_payment))
        .route("/withdrawals/{withdrawal_id}/approve", post(withdrawal::approve))
        .route(
            "/withdrawals/{withdrawal_id}/processing",
            post(withdrawal::mark_processing),
        )
        .route("/withdrawals/{withdrawal_id}/complete", post(withdrawal::complete))
        .route("/withdrawals/{withdrawal_id}/fail", post(withdrawal::fail))
        .route("/withdrawals/{withdrawal_id}/reject", post(withdrawal::reject));

    Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        .route("/api/v1/commission", get(commission::get_rates))
        .nest("/api/v1/wallet", wallet_routes)
        .nest("/api/v1/escrows", escrow_routes)
        .nest("/api/v1/payments", payment_routes)
        .nest("/api/v1/withdrawals", withdrawal_routes)
        .nest("/api/v1/admin", admin_routes)
        .with_state(state)
}

/// Start HTTP Gateway server
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        tracing::error!(%addr, error = %e, "Failed to bind; is the port already in use?");
        anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
    })?;

    tracing::info!(%addr, "Gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
