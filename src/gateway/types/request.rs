//! Request bodies
//!
//! Amounts accept a JSON number or a decimal string.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::core_types::{ClassId, UserId};
use crate::withdrawal::{RecipientInfo, WithdrawalMethod};

#[derive(Debug, Clone, Deserialize)]
pub struct AmountRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferRequest {
    pub to_user_id: UserId,
    pub amount: Decimal,
    #[serde(default)]
    pub note: Option<String>,
}

/// Hold at a caller-supplied commission rate
#[derive(Debug, Clone, Deserialize)]
pub struct PayEscrowRequest {
    pub class_id: ClassId,
    pub amount: Decimal,
    pub commission_rate: Decimal,
}

/// Hold (or open for gateway funding) at the server-resolved rate
#[derive(Debug, Clone, Deserialize)]
pub struct ClassEscrowRequest {
    pub class_id: ClassId,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefundRequest {
    /// Defaults to the full payment amount
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalApiRequest {
    pub amount: Decimal,
    pub method: WithdrawalMethod,
    pub recipient: RecipientInfo,
    /// File for operator review instead of completing immediately
    #[serde(default)]
    pub review: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_accepts_string_and_number() {
        let a: AmountRequest = serde_json::from_str(r#"{"amount": "150000.50"}"#).unwrap();
        assert_eq!(a.amount, dec!(150000.50));
        let b: AmountRequest =
            serde_json::from_str(r#"{"amount": 200000, "note": "top up"}"#).unwrap();
        assert_eq!(b.amount, dec!(200000));
        assert_eq!(b.note.as_deref(), Some("top up"));
    }

    #[test]
    fn test_withdrawal_request_shape() {
        let req: WithdrawalApiRequest = serde_json::from_str(
            r#"{
                "amount": "60000",
                "method": "BANK_TRANSFER",
                "recipient": {"account_name": "A", "account_number": "1", "bank_name": "VCB"}
            }"#,
        )
        .unwrap();
        assert_eq!(req.method, WithdrawalMethod::BankTransfer);
        assert!(!req.review);
    }
}
