//! Core domain types for the Crypto Pay SDK.
//!
//! Provides the credential wrapper, inbound webhook delivery and update
//! types, pagination primitives, remote API resource models, the shared
//! error taxonomy, and the clock abstraction used for deterministic retry
//! and replay-expiry testing. The client and webhook crates both build on
//! these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod resources;
pub mod time;

pub use error::{CryptoPayError, ErrorCategory, RemoteErrorBody, Result, TransportError};
pub use models::{Credential, Page, ReplayKey, Update, WebhookDelivery};
pub use resources::{
    App, Asset, Balance, Currency, ExchangeRate, Invoice, InvoiceStatus, PaidButtonName, Transfer,
};
pub use time::{Clock, RealClock, TestClock};
