//! Typed Crypto Pay API client.
//!
//! Every method validates its arguments locally, then goes through the shared
//! `RequestExecutor`, so all calls get the same retry, backoff and deadline
//! behaviour.

use std::sync::Arc;

use cryptopay_core::{
    App, Asset, Balance, Credential, CryptoPayError, Currency, ExchangeRate, Invoice,
    InvoiceStatus, Page, PaidButtonName, Result, Transfer,
};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::{
    executor::RequestExecutor,
    pagination::PageCursor,
    retry::RetryConfig,
    transport::{ClientConfig, HttpTransport, Network, Transport, TransportRequest},
};

/// Largest page the API serves.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Page size used when none is given.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Longest invoice lifetime accepted by the API, in seconds (31 days).
pub const MAX_INVOICE_EXPIRES_IN: u32 = 2_678_400;

/// Parameters of `createInvoice`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateInvoice {
    /// Invoice currency
    pub asset: Asset,
    /// Amount as a decimal string
    pub amount: String,
    /// Description shown to the payer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Message shown after payment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_message: Option<String>,
    /// Button shown after payment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_btn_name: Option<PaidButtonName>,
    /// URL opened by the paid button
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_btn_url: Option<String>,
    /// Opaque payload echoed back in webhooks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// Whether the payer may leave a comment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_comments: Option<bool>,
    /// Whether the payer may pay anonymously
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_anonymous: Option<bool>,
    /// Invoice lifetime in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u32>,
    /// Asset to swap the payment into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap_to: Option<String>,
}

impl CreateInvoice {
    /// Invoice for `amount` of `asset` with no optional fields set.
    pub fn new(asset: Asset, amount: impl Into<String>) -> Self {
        Self {
            asset,
            amount: amount.into(),
            description: None,
            hidden_message: None,
            paid_btn_name: None,
            paid_btn_url: None,
            payload: None,
            allow_comments: None,
            allow_anonymous: None,
            expires_in: None,
            swap_to: None,
        }
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the payload.
    pub fn payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Sets the invoice lifetime.
    pub fn expires_in(mut self, seconds: u32) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    /// Sets the paid button.
    pub fn paid_button(mut self, name: PaidButtonName, url: impl Into<String>) -> Self {
        self.paid_btn_name = Some(name);
        self.paid_btn_url = Some(url.into());
        self
    }

    fn validate(&self) -> Result<()> {
        validate_amount(&self.amount)?;
        if let Some(expires_in) = self.expires_in {
            if !(1..=MAX_INVOICE_EXPIRES_IN).contains(&expires_in) {
                return Err(CryptoPayError::validation(format!(
                    "expires_in must be between 1 and {MAX_INVOICE_EXPIRES_IN} seconds"
                )));
            }
        }
        Ok(())
    }
}

/// Parameters of `transfer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRequest {
    /// Recipient Telegram user id
    pub user_id: i64,
    /// Transferred currency
    pub asset: Asset,
    /// Amount as a decimal string
    pub amount: String,
    /// Idempotency key for the transfer
    pub spend_id: String,
    /// Comment shown to the recipient
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Suppress the recipient notification
    pub disable_send_notification: bool,
}

impl TransferRequest {
    /// Transfer with no comment and notifications enabled.
    pub fn new(
        user_id: i64,
        asset: Asset,
        amount: impl Into<String>,
        spend_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            asset,
            amount: amount.into(),
            spend_id: spend_id.into(),
            comment: None,
            disable_send_notification: false,
        }
    }

    fn validate(&self) -> Result<()> {
        validate_amount(&self.amount)?;
        if self.spend_id.trim().is_empty() {
            return Err(CryptoPayError::validation("spend_id cannot be empty"));
        }
        Ok(())
    }
}

/// Filters for `getInvoices`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceQuery {
    /// Only invoices in this currency
    pub asset: Option<Asset>,
    /// Only these invoice ids
    pub invoice_ids: Option<Vec<i64>>,
    /// Only invoices in this status
    pub status: Option<InvoiceStatus>,
}

impl InvoiceQuery {
    /// Query matching every invoice.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one asset.
    pub fn asset(mut self, asset: Asset) -> Self {
        self.asset = Some(asset);
        self
    }

    /// Restricts to one status.
    pub fn status(mut self, status: InvoiceStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restricts to the given ids.
    pub fn invoice_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.invoice_ids = Some(ids.into_iter().collect());
        self
    }

    /// Restricts to ids given as a comma-separated string such as `"1, 2"`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoPayError::Validation` if the string holds no ids or a
    /// part is not a positive integer.
    pub fn invoice_ids_csv(self, ids: &str) -> Result<Self> {
        let parsed = ids
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<i64>().ok().filter(|id| *id > 0).ok_or_else(|| {
                    CryptoPayError::validation("invoice_ids string must contain positive integer IDs")
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if parsed.is_empty() {
            return Err(CryptoPayError::validation("invoice_ids string cannot be empty"));
        }
        Ok(self.invoice_ids(parsed))
    }

    fn to_request(&self, offset: u64, count: u32) -> Result<TransportRequest> {
        validate_count(count)?;

        let mut request = TransportRequest::get("/getInvoices");
        if let Some(asset) = self.asset {
            request = request.with_query("asset", asset.as_str());
        }
        if let Some(ids) = &self.invoice_ids {
            request = request.with_query("invoice_ids", normalize_invoice_ids(ids)?);
        }
        if let Some(status) = self.status {
            request = request.with_query("status", status.as_str());
        }
        if offset > 0 {
            request = request.with_query("offset", offset);
        }
        Ok(request.with_query("count", count))
    }
}

#[derive(Debug, Deserialize)]
struct InvoiceList {
    items: Vec<Invoice>,
}

/// Joins invoice ids into the comma-separated form the API expects.
///
/// # Errors
///
/// Returns `CryptoPayError::Validation` for an empty list or a non-positive
/// id.
pub fn normalize_invoice_ids(ids: &[i64]) -> Result<String> {
    if ids.is_empty() {
        return Err(CryptoPayError::validation("invoice_ids list cannot be empty"));
    }
    if ids.iter().any(|id| *id <= 0) {
        return Err(CryptoPayError::validation("invoice_ids list must contain positive integers"));
    }
    Ok(ids.iter().map(i64::to_string).collect::<Vec<_>>().join(","))
}

fn validate_count(count: u32) -> Result<()> {
    if !(1..=MAX_PAGE_SIZE).contains(&count) {
        return Err(CryptoPayError::validation(format!(
            "count must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }
    Ok(())
}

fn validate_amount(amount: &str) -> Result<()> {
    match amount.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => Ok(()),
        _ => Err(CryptoPayError::validation("amount must be greater than 0")),
    }
}

/// Crypto Pay API client.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct CryptoPayClient {
    executor: RequestExecutor,
}

impl CryptoPayClient {
    /// Creates a client over HTTP.
    ///
    /// # Errors
    ///
    /// Returns `CryptoPayError::Configuration` if the HTTP transport cannot
    /// be built.
    pub fn new(credential: Credential, config: ClientConfig, retry: RetryConfig) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(credential, config)?);
        Ok(Self::from_executor(RequestExecutor::new(transport, retry)))
    }

    /// Client for `network` with default timeout and no retries.
    pub fn for_network(credential: Credential, network: Network) -> Result<Self> {
        Self::new(credential, ClientConfig::for_network(network), RetryConfig::default())
    }

    /// Client over an existing executor.
    pub fn from_executor(executor: RequestExecutor) -> Self {
        Self { executor }
    }

    /// Executor shared by all calls.
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Returns the application owning the token.
    pub async fn get_me(&self) -> Result<App> {
        self.executor.execute(TransportRequest::get("/getMe")).await
    }

    /// Creates an invoice.
    ///
    /// # Errors
    ///
    /// Returns `CryptoPayError::Validation` for a non-positive amount or an
    /// out-of-range `expires_in`, before any request is sent.
    pub async fn create_invoice(&self, invoice: &CreateInvoice) -> Result<Invoice> {
        invoice.validate()?;
        let body = to_json(invoice)?;
        self.executor.execute(TransportRequest::post("/createInvoice").with_json(body)).await
    }

    /// Sends coins to a user.
    pub async fn transfer(&self, transfer: &TransferRequest) -> Result<Transfer> {
        transfer.validate()?;
        let body = to_json(transfer)?;
        self.executor.execute(TransportRequest::post("/transfer").with_json(body)).await
    }

    /// Fetches one page of invoices.
    ///
    /// # Errors
    ///
    /// Returns `CryptoPayError::Validation` if `count` is outside 1..=1000 or
    /// the id filter is invalid.
    pub async fn get_invoices(
        &self,
        query: &InvoiceQuery,
        offset: u64,
        count: u32,
    ) -> Result<Vec<Invoice>> {
        let request = query.to_request(offset, count)?;
        let list: InvoiceList = self.executor.execute(request).await?;
        Ok(list.items)
    }

    /// Cursor over all invoices matching `query`.
    ///
    /// Nothing is fetched until one of the cursor's streams is polled.
    pub fn invoice_cursor(
        &self,
        query: InvoiceQuery,
        page_size: u32,
        start_offset: u64,
    ) -> Result<PageCursor<'static, Invoice>> {
        validate_count(page_size)?;
        query.to_request(start_offset, page_size)?;

        let client = self.clone();
        PageCursor::new(
            move |offset, count| {
                let client = client.clone();
                let query = query.clone();
                async move {
                    let items = client.get_invoices(&query, offset, count).await?;
                    Ok(Page::from_window(items, offset, count))
                }
            },
            start_offset,
            page_size,
        )
    }

    /// Stream of invoice pages matching `query`.
    pub fn iter_invoice_pages(
        &self,
        query: InvoiceQuery,
        page_size: u32,
        start_offset: u64,
    ) -> Result<BoxStream<'static, Result<Vec<Invoice>>>> {
        Ok(self.invoice_cursor(query, page_size, start_offset)?.pages())
    }

    /// Stream of individual invoices matching `query`.
    pub fn iter_invoices(
        &self,
        query: InvoiceQuery,
        page_size: u32,
        start_offset: u64,
    ) -> Result<BoxStream<'static, Result<Invoice>>> {
        Ok(self.invoice_cursor(query, page_size, start_offset)?.items())
    }

    /// Returns balances of every currency.
    pub async fn get_balances(&self) -> Result<Vec<Balance>> {
        self.executor.execute(TransportRequest::get("/getBalance")).await
    }

    /// Returns current exchange rates.
    pub async fn get_exchange_rates(&self) -> Result<Vec<ExchangeRate>> {
        self.executor.execute(TransportRequest::get("/getExchangeRates")).await
    }

    /// Returns supported currencies.
    pub async fn get_currencies(&self) -> Result<Vec<Currency>> {
        self.executor.execute(TransportRequest::get("/getCurrencies")).await
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| CryptoPayError::validation(format!("failed to encode request: {e}")))
}
