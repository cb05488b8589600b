//! PostgreSQL schema for the financial core
//!
//! Every statement is idempotent so `init_schema` can run on each start.

use anyhow::{Context, Result};
use sqlx::PgPool;

/// Create all tables and indexes if they do not exist
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    tracing::info!("Initializing PostgreSQL schema...");

    for (name, ddl) in [
        ("wallets_tb", CREATE_WALLETS_TABLE),
        ("ledger_transactions_tb", CREATE_TRANSACTIONS_TABLE),
        ("ledger_transactions_tb index", CREATE_TRANSACTIONS_INDEX),
        ("escrows_tb", CREATE_ESCROWS_TABLE),
        ("payments_tb", CREATE_PAYMENTS_TABLE),
        ("payment_logs_tb", CREATE_PAYMENT_LOGS_TABLE),
        ("payment_logs_tb index", CREATE_PAYMENT_LOGS_INDEX),
        ("withdrawals_tb", CREATE_WITHDRAWALS_TABLE),
        ("withdrawals_tb index", CREATE_WITHDRAWALS_INDEX),
        ("commission_rates_tb", CREATE_COMMISSION_RATES_TABLE),
    ] {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create {}", name))?;
    }

    tracing::info!("PostgreSQL schema initialized successfully");
    Ok(())
}

/// Balance is a cached projection of the ledger; the CHECK is the last line
/// against overdraft if an optimistic check is ever bypassed.
const CREATE_WALLETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS wallets_tb (
    wallet_id    TEXT PRIMARY KEY,
    user_id      BIGINT NOT NULL UNIQUE,
    balance      NUMERIC(30, 8) NOT NULL DEFAULT 0 CHECK (balance >= 0),
    currency     VARCHAR(8) NOT NULL,
    is_frozen    BOOLEAN NOT NULL DEFAULT FALSE,
    version      BIGINT NOT NULL DEFAULT 1,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_transactions_tb (
    transaction_id        TEXT PRIMARY KEY,
    wallet_id             TEXT NOT NULL REFERENCES wallets_tb (wallet_id),
    amount                NUMERIC(30, 8) NOT NULL,
    kind                  SMALLINT NOT NULL,
    status                VARCHAR(16) NOT NULL,
    note                  TEXT,
    counterparty_user_id  BIGINT,
    reference             TEXT,
    created_at            TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_TRANSACTIONS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_ledger_transactions_wallet
    ON ledger_transactions_tb (wallet_id, created_at)
"#;

const CREATE_ESCROWS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS escrows_tb (
    escrow_id          TEXT PRIMARY KEY,
    class_id           BIGINT NOT NULL,
    payer_user_id      BIGINT NOT NULL,
    tutor_user_id      BIGINT NOT NULL,
    gross_amount       NUMERIC(30, 8) NOT NULL CHECK (gross_amount > 0),
    commission_rate    NUMERIC(10, 6) NOT NULL CHECK (commission_rate > 0 AND commission_rate <= 1),
    status             SMALLINT NOT NULL,
    commission_amount  NUMERIC(30, 8),
    net_amount         NUMERIC(30, 8),
    created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    held_at            TIMESTAMPTZ,
    released_at        TIMESTAMPTZ,
    refunded_at        TIMESTAMPTZ
)
"#;

const CREATE_PAYMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS payments_tb (
    payment_id       TEXT PRIMARY KEY,
    provider         SMALLINT NOT NULL,
    order_id         TEXT NOT NULL,
    request_id       TEXT NOT NULL,
    user_id          BIGINT NOT NULL,
    amount           NUMERIC(30, 8) NOT NULL CHECK (amount > 0),
    status           SMALLINT NOT NULL,
    context_type     SMALLINT NOT NULL,
    context_id       TEXT NOT NULL,
    result_code      TEXT,
    transaction_ref  TEXT,
    checkout_url     TEXT,
    qr_code          TEXT,
    effect_applied   BOOLEAN NOT NULL DEFAULT FALSE,
    paid_at          TIMESTAMPTZ,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (provider, order_id)
)
"#;

const CREATE_PAYMENT_LOGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS payment_logs_tb (
    log_id      TEXT PRIMARY KEY,
    payment_id  TEXT NOT NULL REFERENCES payments_tb (payment_id),
    direction   SMALLINT NOT NULL,
    action      VARCHAR(32) NOT NULL,
    payload     JSONB NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_PAYMENT_LOGS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_payment_logs_payment
    ON payment_logs_tb (payment_id, created_at)
"#;

const CREATE_WITHDRAWALS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS withdrawals_tb (
    withdrawal_id   TEXT PRIMARY KEY,
    user_id         BIGINT NOT NULL,
    amount          NUMERIC(30, 8) NOT NULL CHECK (amount > 0),
    method          SMALLINT NOT NULL,
    account_name    TEXT NOT NULL,
    account_number  TEXT NOT NULL,
    bank_name       TEXT,
    status          SMALLINT NOT NULL,
    transaction_id  TEXT,
    reason          TEXT,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_WITHDRAWALS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_withdrawals_user
    ON withdrawals_tb (user_id, created_at DESC)
"#;

/// Singleton row, pinned to id 1
const CREATE_COMMISSION_RATES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS commission_rates_tb (
    id                  SMALLINT PRIMARY KEY CHECK (id = 1),
    one_to_one_online   NUMERIC(10, 6) NOT NULL,
    one_to_one_offline  NUMERIC(10, 6) NOT NULL,
    group_online        NUMERIC(10, 6) NOT NULL,
    group_offline       NUMERIC(10, 6) NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;
