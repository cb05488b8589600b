use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::core_types::UserId;
use crate::directory::ClassRecord;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL. Absent: in-memory store (dev/test only)
    #[serde(default)]
    pub postgres_url: Option<String>,
    pub ledger: LedgerConfig,
    pub commission: CommissionConfig,
    #[serde(default)]
    pub withdrawal: WithdrawalConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub momo: MoMoConfig,
    pub payos: PayOsConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Reserved user id owning the platform settlement wallet
    pub settlement_user_id: UserId,
    pub currency: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            settlement_user_id: 0,
            currency: "VND".to_string(),
        }
    }
}

/// Default commission table, served until an administrator saves one
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CommissionConfig {
    pub one_to_one_online: Decimal,
    pub one_to_one_offline: Decimal,
    pub group_online: Decimal,
    pub group_offline: Decimal,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            one_to_one_online: Decimal::new(10, 2),
            one_to_one_offline: Decimal::new(12, 2),
            group_online: Decimal::new(15, 2),
            group_offline: Decimal::new(18, 2),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WithdrawalConfig {
    pub min_amount: Decimal,
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            min_amount: Decimal::from(50_000),
        }
    }
}

/// Caller-side retry on optimistic-concurrency conflicts
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 20,
        }
    }
}

/// Stand-in for the scheduling and identity services
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DirectoryConfig {
    /// Treat every positive user id as existing
    #[serde(default)]
    pub open_users: bool,
    #[serde(default)]
    pub classes: Vec<ClassRecord>,
}

/// Wallet-style gateway credentials and endpoints
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MoMoConfig {
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: String,
    pub create_url: String,
    pub query_url: String,
    pub refund_url: String,
    pub redirect_url: String,
    pub ipn_url: String,
    #[serde(default = "default_momo_request_type")]
    pub request_type: String,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

/// QR-style gateway credentials and endpoints
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PayOsConfig {
    pub client_id: String,
    pub api_key: String,
    pub checksum_key: String,
    pub create_url: String,
    /// `{orderCode}` is substituted with the order code
    pub query_url: String,
    /// `{orderCode}` is substituted with the order code
    pub refund_url: String,
    pub return_url: String,
    pub cancel_url: String,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_momo_request_type() -> String {
    "captureWallet".to_string()
}

fn default_provider_timeout_ms() -> u64 {
    10_000
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}
