//! Gateway types module
//!
//! - [`request`]: request bodies
//! - [`response`]: response envelope, error mapping and error codes

pub mod request;
pub mod response;

pub use request::{
    AmountRequest, ClassEscrowRequest, PayEscrowRequest, ReasonRequest, RefundRequest,
    TransferRequest, WithdrawalApiRequest,
};
pub use response::{ApiError, ApiResponse, ApiResult, TransactionView, error_codes, ok};
