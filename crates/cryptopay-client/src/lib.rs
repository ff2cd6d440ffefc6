//! Outbound side of the Crypto Pay SDK.
//!
//! Every API call goes through a `RequestExecutor`, which sends it over a
//! `Transport`, sorts each result into success, a retryable failure or a
//! fatal failure, and retries with exponential backoff until the call
//! succeeds or the budget runs out. List endpoints are exposed as lazy,
//! restartable `PageCursor` streams.
//!
//! # Example
//!
//! ```no_run
//! use cryptopay_client::{ClientConfig, CryptoPayClient, RetryConfig};
//! use cryptopay_core::{Credential, CryptoPayError};
//!
//! # async fn example() -> Result<(), CryptoPayError> {
//! let client = CryptoPayClient::new(
//!     Credential::new("1234:AA..."),
//!     ClientConfig::default(),
//!     RetryConfig::with_max_retries(3),
//! )?;
//!
//! let app = client.get_me().await?;
//! println!("authenticated as {}", app.name);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod executor;
pub mod pagination;
pub mod retry;
pub mod transport;

pub use api::{CreateInvoice, CryptoPayClient, InvoiceQuery, TransferRequest};
pub use cryptopay_core::{CryptoPayError as ClientError, Result};
pub use executor::{classify_response, execute_attempts, RequestExecutor};
pub use pagination::PageCursor;
pub use retry::{AttemptOutcome, RetryConfig, MAX_RETRY_AFTER};
pub use transport::{
    ClientConfig, HttpTransport, Network, Transport, TransportRequest, TransportResponse,
};
