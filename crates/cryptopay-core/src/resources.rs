//! Crypto Pay API resource models.
//!
//! Only the fields the SDK relies on are typed. Responses are decoded
//! leniently: unknown fields are ignored and most fields are optional, since
//! the remote schema grows over time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Application the API token belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    /// Application id
    pub app_id: i64,
    /// Application name
    pub name: String,
    /// Bot that processes payments for this app
    pub payment_processing_bot_username: String,
}

/// Cryptocurrency supported by invoices and transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    /// Bitcoin
    Btc,
    /// Toncoin
    Ton,
    /// Ether
    Eth,
    /// Tether
    Usdt,
    /// USD Coin
    Usdc,
    /// Binance USD
    Busd,
}

impl Asset {
    /// Ticker as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Btc => "BTC",
            Self::Ton => "TON",
            Self::Eth => "ETH",
            Self::Usdt => "USDT",
            Self::Usdc => "USDC",
            Self::Busd => "BUSD",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    /// Awaiting payment
    Active,
    /// Paid by the user
    Paid,
    /// Expired before payment
    Expired,
    /// Status not known to this SDK version
    #[serde(other)]
    Unknown,
}

impl InvoiceStatus {
    /// Status as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paid => "paid",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }
}

/// Label of the button shown after an invoice is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaidButtonName {
    /// "View Item"
    ViewItem,
    /// "Open Channel"
    OpenChannel,
    /// "Open Bot"
    OpenBot,
    /// "Return"
    Callback,
}

/// Invoice as returned by `createInvoice` and `getInvoices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Invoice id
    pub invoice_id: i64,
    /// Current status
    pub status: InvoiceStatus,
    /// Invoice hash
    #[serde(default)]
    pub hash: Option<String>,
    /// Asset ticker
    #[serde(default)]
    pub asset: Option<String>,
    /// Amount as a decimal string
    #[serde(default)]
    pub amount: Option<String>,
    /// Payment URL for the user
    #[serde(default)]
    pub pay_url: Option<String>,
    /// Description shown to the user
    #[serde(default)]
    pub description: Option<String>,
    /// Creation timestamp (ISO 8601)
    #[serde(default)]
    pub created_at: Option<String>,
    /// Payment timestamp (ISO 8601)
    #[serde(default)]
    pub paid_at: Option<String>,
    /// Whether the payer may leave a comment
    #[serde(default)]
    pub allow_comments: Option<bool>,
    /// Whether the payer may pay anonymously
    #[serde(default)]
    pub allow_anonymous: Option<bool>,
    /// Opaque payload attached at creation
    #[serde(default)]
    pub payload: Option<String>,
}

/// Completed transfer to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    /// Transfer id
    pub transfer_id: i64,
    /// Recipient Telegram user id
    pub user_id: i64,
    /// Asset ticker
    pub asset: String,
    /// Amount as a decimal string
    pub amount: String,
    /// Transfer status, `completed` on success
    pub status: String,
    /// Completion timestamp (ISO 8601)
    #[serde(default)]
    pub completed_at: Option<String>,
    /// Comment sent with the transfer
    #[serde(default)]
    pub comment: Option<String>,
}

/// Balance of one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Currency code
    pub currency_code: String,
    /// Available amount as a decimal string
    pub available: String,
    /// Amount held by pending operations
    #[serde(default)]
    pub onhold: Option<String>,
}

/// Exchange rate between two currencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    /// Whether the rate is currently valid
    pub is_valid: bool,
    /// Source currency
    pub source: String,
    /// Target currency
    pub target: String,
    /// Rate as a decimal string
    pub rate: String,
}

/// Currency supported by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    /// Whether this is a blockchain asset
    pub is_blockchain: bool,
    /// Whether this is a stablecoin
    pub is_stablecoin: bool,
    /// Whether this is fiat money
    pub is_fiat: bool,
    /// Display name
    pub name: String,
    /// Currency code
    pub code: String,
    /// Project URL
    #[serde(default)]
    pub url: Option<String>,
    /// Number of decimal places
    pub decimals: u32,
}
