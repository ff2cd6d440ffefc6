//! Outbound HTTP transport for Crypto Pay API calls.
//!
//! The executor talks to the API through the `Transport` trait so retry and
//! classification logic can be exercised against scripted responses. The
//! production implementation wraps a pooled `reqwest::Client`.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use cryptopay_core::{Credential, CryptoPayError, Result, TransportError};
use http::{HeaderMap, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

/// Base URL of the production API.
pub const MAINNET_BASE_URL: &str = "https://pay.crypt.bot/api";

/// Base URL of the testnet API.
pub const TESTNET_BASE_URL: &str = "https://testnet-pay.crypt.bot/api";

/// Header carrying the API token on every outbound request (`Crypto-Pay-API-Token`).
pub const API_TOKEN_HEADER: &str = "crypto-pay-api-token";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Crypto Pay deployment to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Production network
    #[default]
    Mainnet,
    /// Test network
    Testnet,
}

impl Network {
    /// Base URL for this network.
    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Mainnet => MAINNET_BASE_URL,
            Self::Testnet => TESTNET_BASE_URL,
        }
    }
}

/// Configuration for the HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API base URL without trailing slash.
    pub base_url: String,
    /// Default timeout applied to each request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_network(Network::Mainnet)
    }
}

impl ClientConfig {
    /// Configuration pointing at a known network.
    pub fn for_network(network: Network) -> Self {
        Self::with_base_url(network.base_url())
    }

    /// Configuration pointing at a custom base URL, e.g. a mock server.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: concat!("cryptopay-rs/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// One outbound API request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the base URL, e.g. `/getMe`.
    pub path: String,
    /// Extra request headers.
    pub headers: HeaderMap,
    /// Query string parameters.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<serde_json::Value>,
    /// Per-request timeout overriding the transport default.
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    /// Creates a request with no query, body or extra headers.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    /// Creates a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Creates a POST request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Appends a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Sets the JSON body.
    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Overrides the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Response observed by the transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw response body.
    pub body: Bytes,
    /// Time spent on the request.
    pub duration: Duration,
}

impl TransportResponse {
    /// Builds a response from parts, mainly for scripted transports.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, headers: HeaderMap::new(), body: body.into(), duration: Duration::ZERO }
    }

    /// Builds a JSON response.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string())
    }

    /// Adds a header, ignoring values that are not valid header text.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Returns a header value if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// First `limit` characters of the body, lossily decoded.
    pub fn text_prefix(&self, limit: usize) -> String {
        String::from_utf8_lossy(&self.body).chars().take(limit).collect()
    }
}

/// Sends API requests.
///
/// Implementations report failures that happen before a status is observed
/// as `TransportError`; every HTTP status, success or not, is a response.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends one request.
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError>;
}

/// Transport backed by a pooled `reqwest::Client`.
///
/// The API token is installed as a default sensitive header at construction
/// and never appears in logs.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
    credential: Credential,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.config.base_url)
            .field("timeout", &self.config.timeout)
            .field("credential", &self.credential)
            .finish()
    }
}

impl HttpTransport {
    /// Creates a transport with the given credential and configuration.
    ///
    /// # Errors
    ///
    /// Returns `CryptoPayError::Configuration` if the token is not a valid
    /// header value or the HTTP client cannot be built.
    pub fn new(credential: Credential, config: ClientConfig) -> Result<Self> {
        let mut token = HeaderValue::from_str(credential.expose()).map_err(|_| {
            CryptoPayError::configuration("API token contains invalid header characters")
        })?;
        token.set_sensitive(true);

        let mut default_headers = HeaderMap::new();
        default_headers.insert(API_TOKEN_HEADER, token);

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .default_headers(default_headers)
            .build()
            .map_err(|e| {
                CryptoPayError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config, credential })
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let start_time = std::time::Instant::now();
        let timeout = request.timeout.unwrap_or(self.config.timeout);

        let span = info_span!(
            "cryptopay_request",
            method = %request.method,
            path = %request.path,
            app = %self.credential.masked(),
        );

        async move {
            let mut http_request = self
                .client
                .request(request.method.clone(), self.url(&request.path))
                .headers(request.headers)
                .timeout(timeout);

            if !request.query.is_empty() {
                http_request = http_request.query(&request.query);
            }
            if let Some(body) = &request.body {
                http_request = http_request.json(body);
            }

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {}", e);
                    return Err(map_reqwest_error(&e, timeout));
                },
            };

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(|e| {
                tracing::warn!("failed to read response body: {}", e);
                map_reqwest_error(&e, timeout)
            })?;
            let duration = start_time.elapsed();

            tracing::debug!(status, duration_ms = duration.as_millis(), "received response");

            Ok(TransportResponse { status, headers, body, duration })
        }
        .instrument(span)
        .await
    }
}

fn map_reqwest_error(error: &reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        return TransportError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        };
    }
    if error.is_connect() {
        return TransportError::Connect { message: error.to_string() };
    }
    if error.is_builder() || error.is_redirect() {
        return TransportError::Request { message: error.to_string() };
    }
    TransportError::Network { message: error.to_string() }
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn transport_for(server: &MockServer) -> HttpTransport {
        HttpTransport::new(
            Credential::new("1234:secret"),
            ClientConfig::with_base_url(format!("{}/api", server.uri())),
        )
        .unwrap()
    }

    #[test]
    fn network_base_urls() {
        assert_eq!(ClientConfig::default().base_url, MAINNET_BASE_URL);
        assert_eq!(ClientConfig::for_network(Network::Testnet).base_url, TESTNET_BASE_URL);
        assert_eq!(ClientConfig::default().timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn sends_token_header_and_query() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/getInvoices"))
            .and(matchers::header(API_TOKEN_HEADER, "1234:secret"))
            .and(matchers::query_param("count", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let response = transport
            .send(TransportRequest::get("/getInvoices").with_query("count", 10))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, Bytes::from_static(br#"{"ok":true}"#));
    }

    #[tokio::test]
    async fn posts_json_body() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/createInvoice"))
            .and(matchers::body_json(serde_json::json!({"asset": "TON", "amount": "1"})))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let response = transport
            .send(
                TransportRequest::post("/createInvoice")
                    .with_json(serde_json::json!({"asset": "TON", "amount": "1"})),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn error_statuses_are_responses() {
        let server = MockServer::start().await;

        Mock::given(matchers::any())
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_string("Too Many Requests")
                    .append_header("Retry-After", "3"),
            )
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let response = transport.send(TransportRequest::get("/getMe")).await.unwrap();

        assert_eq!(response.status, 429);
        assert_eq!(response.header("retry-after"), Some("3"));
        assert_eq!(response.text_prefix(3), "Too");
    }

    #[tokio::test]
    async fn slow_responses_time_out() {
        let server = MockServer::start().await;

        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let error = transport
            .send(TransportRequest::get("/getMe").with_timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();

        assert_eq!(error, TransportError::Timeout { timeout_ms: 50 });
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let transport = HttpTransport::new(
            Credential::new("1234:secret"),
            ClientConfig::with_base_url("http://127.0.0.1:1"),
        )
        .unwrap();

        let error = transport.send(TransportRequest::get("/getMe")).await.unwrap_err();

        assert!(matches!(error, TransportError::Connect { .. } | TransportError::Network { .. }));
    }

    #[test]
    fn debug_output_masks_token() {
        let transport =
            HttpTransport::new(Credential::new("1234:topsecret"), ClientConfig::default()).unwrap();

        assert!(!format!("{transport:?}").contains("topsecret"));
    }

    #[test]
    fn invalid_token_is_configuration_error() {
        let result = HttpTransport::new(Credential::new("bad\ntoken"), ClientConfig::default());
        assert!(matches!(result, Err(CryptoPayError::Configuration(_))));
    }
}
