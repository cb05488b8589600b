//! Commission resolution
//!
//! Rates are fractions in (0, 1]: 0.12 = 12%. The rate applied to an escrow is
//! snapshotted at hold time; later edits to the table only affect escrows
//! held afterwards.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CommissionConfig;
use crate::ledger::{LedgerStore, StoreError};

/// Decimal places commission is rounded to
pub const COMMISSION_DP: u32 = 2;

#[derive(Debug, Error)]
pub enum CommissionError {
    #[error("Commission rate must be in (0, 1], got {0}")]
    InvalidRate(Decimal),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CommissionError {
    pub fn code(&self) -> &'static str {
        match self {
            CommissionError::InvalidRate(_) => "INVALID_COMMISSION_RATE",
            CommissionError::Store(e) => e.code(),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            CommissionError::InvalidRate(_) => 400,
            CommissionError::Store(e) => e.http_status(),
        }
    }
}

/// How a class is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Online,
    Offline,
}

/// Commission bucket, keyed by (party count, delivery mode)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionType {
    OneToOneOnline,
    OneToOneOffline,
    GroupOnline,
    GroupOffline,
}

impl fmt::Display for CommissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommissionType::OneToOneOnline => "one_to_one_online",
            CommissionType::OneToOneOffline => "one_to_one_offline",
            CommissionType::GroupOnline => "group_online",
            CommissionType::GroupOffline => "group_offline",
        };
        write!(f, "{}", s)
    }
}

/// Classify a class. Capacity of exactly one is one-to-one, anything else is
/// a group. No other signal takes part in the classification.
#[inline]
pub fn determine_type(capacity: u32, mode: DeliveryMode) -> CommissionType {
    match (capacity == 1, mode) {
        (true, DeliveryMode::Online) => CommissionType::OneToOneOnline,
        (true, DeliveryMode::Offline) => CommissionType::OneToOneOffline,
        (false, DeliveryMode::Online) => CommissionType::GroupOnline,
        (false, DeliveryMode::Offline) => CommissionType::GroupOffline,
    }
}

/// Rates must lie in (0, 1]
pub fn validate_rate(rate: Decimal) -> Result<Decimal, CommissionError> {
    if rate > Decimal::ZERO && rate <= Decimal::ONE {
        Ok(rate)
    } else {
        Err(CommissionError::InvalidRate(rate))
    }
}

/// Singleton rate table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRates {
    pub one_to_one_online: Decimal,
    pub one_to_one_offline: Decimal,
    pub group_online: Decimal,
    pub group_offline: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl CommissionRates {
    pub fn rate_for(&self, kind: CommissionType) -> Decimal {
        match kind {
            CommissionType::OneToOneOnline => self.one_to_one_online,
            CommissionType::OneToOneOffline => self.one_to_one_offline,
            CommissionType::GroupOnline => self.group_online,
            CommissionType::GroupOffline => self.group_offline,
        }
    }

    /// Apply a partial patch. Only supplied fields change; every supplied
    /// rate is validated before anything is applied.
    pub fn patched(&self, patch: &RatePatch) -> Result<Self, CommissionError> {
        let pick = |new: Option<Decimal>, old: Decimal| new.map(validate_rate).unwrap_or(Ok(old));
        Ok(Self {
            one_to_one_online: pick(patch.one_to_one_online, self.one_to_one_online)?,
            one_to_one_offline: pick(patch.one_to_one_offline, self.one_to_one_offline)?,
            group_online: pick(patch.group_online, self.group_online)?,
            group_offline: pick(patch.group_offline, self.group_offline)?,
            updated_at: Utc::now(),
        })
    }
}

impl From<&CommissionConfig> for CommissionRates {
    fn from(cfg: &CommissionConfig) -> Self {
        Self {
            one_to_one_online: cfg.one_to_one_online,
            one_to_one_offline: cfg.one_to_one_offline,
            group_online: cfg.group_online,
            group_offline: cfg.group_offline,
            updated_at: Utc::now(),
        }
    }
}

/// Partial update for the rate table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatePatch {
    pub one_to_one_online: Option<Decimal>,
    pub one_to_one_offline: Option<Decimal>,
    pub group_online: Option<Decimal>,
    pub group_offline: Option<Decimal>,
}

/// Result of splitting a gross amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommissionSplit {
    pub commission: Decimal,
    pub net: Decimal,
}

/// Split `gross` into platform commission and tutor net.
///
/// Commission is rounded to 2 dp, midpoint away from zero, so fractional
/// units never systematically under-credit the platform. `commission + net`
/// always equals `gross` exactly.
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use tutorpay::commission::calculate_commission;
/// let split = calculate_commission(Decimal::from(500_000), Decimal::new(12, 2));
/// assert_eq!(split.commission, Decimal::from(60_000));
/// assert_eq!(split.net, Decimal::from(440_000));
/// ```
pub fn calculate_commission(gross: Decimal, rate: Decimal) -> CommissionSplit {
    let commission = (gross * rate)
        .round_dp_with_strategy(COMMISSION_DP, RoundingStrategy::MidpointAwayFromZero);
    CommissionSplit {
        commission,
        net: gross - commission,
    }
}

/// Reads and edits the live rate table
pub struct CommissionResolver {
    store: Arc<dyn LedgerStore>,
    defaults: CommissionRates,
}

impl CommissionResolver {
    /// `defaults` are served until an administrator saves a table
    pub fn new(store: Arc<dyn LedgerStore>, defaults: CommissionRates) -> Self {
        Self { store, defaults }
    }

    pub async fn current_rates(&self) -> Result<CommissionRates, CommissionError> {
        Ok(self
            .store
            .commission_rates()
            .await?
            .unwrap_or_else(|| self.defaults.clone()))
    }

    pub async fn current_rate(&self, kind: CommissionType) -> Result<Decimal, CommissionError> {
        Ok(self.current_rates().await?.rate_for(kind))
    }

    /// Live rate for a class of the given shape
    pub async fn resolve(
        &self,
        capacity: u32,
        mode: DeliveryMode,
    ) -> Result<Decimal, CommissionError> {
        self.current_rate(determine_type(capacity, mode)).await
    }

    pub async fn update_rates(&self, patch: RatePatch) -> Result<CommissionRates, CommissionError> {
        let updated = self.current_rates().await?.patched(&patch)?;
        self.store.save_commission_rates(&updated).await?;
        tracing::info!(
            one_to_one_online = %updated.one_to_one_online,
            one_to_one_offline = %updated.one_to_one_offline,
            group_online = %updated.group_online,
            group_offline = %updated.group_offline,
            "Commission rates updated"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryStore;
    use rust_decimal_macros::dec;

    fn defaults() -> CommissionRates {
        CommissionRates {
            one_to_one_online: dec!(0.10),
            one_to_one_offline: dec!(0.12),
            group_online: dec!(0.15),
            group_offline: dec!(0.18),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_determine_type() {
        assert_eq!(
            determine_type(1, DeliveryMode::Online),
            CommissionType::OneToOneOnline
        );
        assert_eq!(
            determine_type(1, DeliveryMode::Offline),
            CommissionType::OneToOneOffline
        );
        assert_eq!(
            determine_type(5, DeliveryMode::Online),
            CommissionType::GroupOnline
        );
        // Zero capacity is not "exactly one", so it classifies as a group
        assert_eq!(
            determine_type(0, DeliveryMode::Offline),
            CommissionType::GroupOffline
        );
    }

    #[test]
    fn test_calculate_commission_basic() {
        let split = calculate_commission(dec!(500000), dec!(0.12));
        assert_eq!(split.commission, dec!(60000));
        assert_eq!(split.net, dec!(440000));
    }

    #[test]
    fn test_calculate_commission_rounds_midpoint_away_from_zero() {
        // 0.125 -> 0.13
        let split = calculate_commission(dec!(1.25), dec!(0.1));
        assert_eq!(split.commission, dec!(0.13));
        assert_eq!(split.net, dec!(1.12));
    }

    #[test]
    fn test_commission_conservation() {
        for (gross, rate) in [
            (dec!(333333), dec!(0.15)),
            (dec!(1), dec!(0.333)),
            (dec!(99999.99), dec!(0.07)),
            (dec!(250000), dec!(1)),
        ] {
            let split = calculate_commission(gross, rate);
            assert_eq!(split.commission + split.net, gross);
        }
    }

    #[test]
    fn test_validate_rate() {
        assert!(validate_rate(dec!(1)).is_ok());
        assert!(validate_rate(dec!(0.0001)).is_ok());
        assert!(validate_rate(dec!(0)).is_err());
        assert!(validate_rate(dec!(1.01)).is_err());
        assert!(validate_rate(dec!(-0.1)).is_err());
    }

    #[test]
    fn test_patch_only_touches_supplied_fields() {
        let rates = defaults();
        let patched = rates
            .patched(&RatePatch {
                group_online: Some(dec!(0.2)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(patched.group_online, dec!(0.2));
        assert_eq!(patched.one_to_one_online, rates.one_to_one_online);
        assert_eq!(patched.group_offline, rates.group_offline);
        assert!(patched.updated_at >= rates.updated_at);
    }

    #[test]
    fn test_patch_rejects_invalid_rate_atomically() {
        let rates = defaults();
        let result = rates.patched(&RatePatch {
            one_to_one_online: Some(dec!(0.3)),
            group_offline: Some(dec!(2)),
            ..Default::default()
        });
        assert!(matches!(result, Err(CommissionError::InvalidRate(_))));
    }

    #[tokio::test]
    async fn test_resolver_serves_defaults_then_saved_table() {
        let store = Arc::new(MemoryStore::new());
        let resolver = CommissionResolver::new(store, defaults());

        assert_eq!(
            resolver.resolve(1, DeliveryMode::Online).await.unwrap(),
            dec!(0.10)
        );

        resolver
            .update_rates(RatePatch {
                one_to_one_online: Some(dec!(0.08)),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(
            resolver
                .current_rate(CommissionType::OneToOneOnline)
                .await
                .unwrap(),
            dec!(0.08)
        );
        assert_eq!(
            resolver
                .current_rate(CommissionType::GroupOffline)
                .await
                .unwrap(),
            dec!(0.18)
        );
    }
}
