//! Payment gateway adapters
//!
//! - [`service`]: provider-independent lifecycle, idempotency and effects
//! - [`provider`]: the contract each gateway implements
//! - [`momo`] / [`payos`]: the two gateways
//! - [`signature`]: HMAC signing and text normalization they share
//! - [`transport`]: JSON-over-HTTP seam

pub mod error;
pub mod momo;
pub mod payos;
pub mod provider;
pub mod service;
pub mod signature;
pub mod transport;
pub mod types;

pub use error::PaymentError;
pub use momo::MoMoProvider;
pub use payos::PayOsProvider;
pub use provider::{CallbackAck, PaymentProvider};
pub use service::{CreatePaymentRequest, PaymentService};
pub use transport::{HttpTransport, MockTransport, ReqwestTransport};
pub use types::{LogDirection, Payment, PaymentContext, PaymentLog, PaymentStatus, ProviderKind};
