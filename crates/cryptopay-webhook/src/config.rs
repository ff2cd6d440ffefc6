//! Configuration for the Crypto Pay webhook listener and API client.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use cryptopay_client::{ClientConfig, Network, RetryConfig};
use cryptopay_core::Credential;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use http::HeaderName;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    crypto::SIGNATURE_HEADER,
    dispatcher::{DispatchMode, WebhookDispatcher, WebhookHandler},
    replay::{InMemoryReplayStore, ReplayFailureMode, ReplayGuard, ReplayStore},
    server::ListenerConfig,
};

const CONFIG_FILE: &str = "config.toml";

/// Prefix of every environment variable read by `Config::load`.
pub const ENV_PREFIX: &str = "CRYPTOPAY_";

/// Longest accepted replay key lifetime: one year.
pub const MAX_REPLAY_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Interval of the in-memory replay store sweeper.
const REPLAY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Complete configuration with defaults, file, and environment overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed with `CRYPTOPAY_` (highest priority)
/// 2. Configuration file (`config.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Only the API token has no usable default.
///
/// # Example
///
/// ```no_run
/// use cryptopay_webhook::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Listening on {}:{}{}", config.host, config.port, config.webhook_path);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Credentials
    /// Crypto Pay API token, used for outbound calls and webhook signatures.
    ///
    /// Environment variable: `CRYPTOPAY_API_TOKEN`
    #[serde(default, skip_serializing)]
    pub api_token: Credential,

    // Listener
    /// Listener bind address.
    ///
    /// Environment variable: `CRYPTOPAY_HOST`
    #[serde(default = "default_host")]
    pub host: String,
    /// Listener bind port.
    ///
    /// Environment variable: `CRYPTOPAY_PORT`
    #[serde(default = "default_port")]
    pub port: u16,
    /// Route receiving webhooks.
    ///
    /// Environment variable: `CRYPTOPAY_WEBHOOK_PATH`
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    /// Request timeout in seconds, callback included.
    ///
    /// Environment variable: `CRYPTOPAY_REQUEST_TIMEOUT`
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// Header carrying the webhook signature.
    ///
    /// Environment variable: `CRYPTOPAY_SIGNATURE_HEADER`
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    /// Whether responses wait for the callback.
    ///
    /// Environment variable: `CRYPTOPAY_DISPATCH_MODE`
    #[serde(default)]
    pub dispatch_mode: DispatchMode,

    // Replay protection
    /// How long replay keys stay registered, in seconds.
    ///
    /// Environment variable: `CRYPTOPAY_REPLAY_TTL_SECS`
    #[serde(default = "default_replay_ttl_secs")]
    pub replay_ttl_secs: u64,
    /// Behaviour when the replay store fails.
    ///
    /// Environment variable: `CRYPTOPAY_REPLAY_FAILURE_MODE`
    #[serde(default)]
    pub replay_failure_mode: ReplayFailureMode,
    /// Redis URL for a shared replay store. In-memory when unset.
    ///
    /// Environment variable: `CRYPTOPAY_REDIS_URL`
    #[serde(default)]
    pub redis_url: Option<String>,

    // API client
    /// Crypto Pay network.
    ///
    /// Environment variable: `CRYPTOPAY_NETWORK`
    #[serde(default)]
    pub network: Network,
    /// Base URL override, e.g. for a mock API.
    ///
    /// Environment variable: `CRYPTOPAY_API_BASE_URL`
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Per-request timeout for API calls in milliseconds.
    ///
    /// Environment variable: `CRYPTOPAY_CLIENT_TIMEOUT_MS`
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,

    // Retry
    /// Retries after the first attempt of an API call.
    ///
    /// Environment variable: `CRYPTOPAY_MAX_RETRIES`
    #[serde(default)]
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds.
    ///
    /// Environment variable: `CRYPTOPAY_RETRY_BACKOFF_MS`
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Maximum delay between retries in milliseconds.
    ///
    /// Environment variable: `CRYPTOPAY_RETRY_MAX_DELAY_MS`
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Jitter factor for retry timing (0.0 to 1.0).
    ///
    /// Environment variable: `CRYPTOPAY_RETRY_JITTER_FACTOR`
    #[serde(default)]
    pub retry_jitter_factor: f64,
    /// HTTP statuses retried as transient.
    ///
    /// Environment variable: `CRYPTOPAY_RETRYABLE_STATUS_CODES`, e.g.
    /// `[429,503]`
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,

    // Logging
    /// Log filter used when `RUST_LOG` is unset.
    ///
    /// Environment variable: `CRYPTOPAY_RUST_LOG`
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment
    /// variable overrides, then validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX));

        Self::from_figment(&figment)
    }

    /// Extracts and validates configuration from an arbitrary figment.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction or validation fails.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to the client's retry configuration.
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_backoff_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
            retryable_status_codes: self.retryable_status_codes.iter().copied().collect(),
        }
    }

    /// Convert to the client's transport configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        let mut config = match &self.api_base_url {
            Some(base_url) => ClientConfig::with_base_url(base_url.trim_end_matches('/')),
            None => ClientConfig::for_network(self.network),
        };
        config.timeout = Duration::from_millis(self.client_timeout_ms);
        config
    }

    /// Convert to listener configuration.
    pub fn to_listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            host: self.host.clone(),
            port: self.port,
            path: self.webhook_path.clone(),
            request_timeout: Duration::from_secs(self.request_timeout),
        }
    }

    /// Resolve the listener socket address from host and port.
    ///
    /// Host names are resolved the same way the listener resolves them when
    /// binding.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not resolve to a socket address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        self.to_listener_config()
            .socket_addr()
            .with_context(|| format!("Invalid server address {}:{}", self.host, self.port))
    }

    /// Signature header as a typed header name.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured name is not a valid header name.
    pub fn signature_header_name(&self) -> Result<HeaderName> {
        HeaderName::from_bytes(self.signature_header.as_bytes())
            .context("Invalid signature header name")
    }

    /// API token with the secret part masked, for logging.
    pub fn api_token_masked(&self) -> String {
        self.api_token.masked()
    }

    /// Opens the configured replay store.
    ///
    /// Uses Redis when `redis_url` is set, otherwise an in-memory store
    /// with a background sweeper.
    ///
    /// # Errors
    ///
    /// Returns an error if Redis cannot be reached, or if `redis_url` is set
    /// but the `redis` feature is disabled.
    pub async fn replay_store(&self) -> Result<Arc<dyn ReplayStore>> {
        match &self.redis_url {
            #[cfg(feature = "redis")]
            Some(url) => {
                let store = crate::replay::RedisReplayStore::connect(url, "cryptopay")
                    .await
                    .context("Failed to connect to Redis replay store")?;
                info!("using Redis replay store");
                Ok(Arc::new(store))
            },
            #[cfg(not(feature = "redis"))]
            Some(_) => anyhow::bail!("redis_url is set but the `redis` feature is disabled"),
            None => {
                let store = Arc::new(InMemoryReplayStore::new());
                InMemoryReplayStore::spawn_sweeper(&store, REPLAY_SWEEP_INTERVAL);
                info!("using in-memory replay store");
                Ok(store)
            },
        }
    }

    /// Replay guard over `store` with the configured TTL and failure mode.
    pub fn replay_guard(&self, store: Arc<dyn ReplayStore>) -> ReplayGuard {
        ReplayGuard::new(store)
            .with_ttl(Duration::from_secs(self.replay_ttl_secs))
            .with_failure_mode(self.replay_failure_mode)
    }

    /// Builds a dispatcher for `handler` from this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the replay store cannot be opened or the
    /// signature header is invalid.
    pub async fn build_dispatcher(&self, handler: impl WebhookHandler) -> Result<WebhookDispatcher> {
        let store = self.replay_store().await?;
        Ok(WebhookDispatcher::new(&self.api_token, handler)
            .with_replay(self.replay_guard(store))
            .with_dispatch_mode(self.dispatch_mode)
            .with_signature_header(self.signature_header_name()?))
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<()> {
        if self.api_token.is_empty() {
            anyhow::bail!("api_token is required (set CRYPTOPAY_API_TOKEN)");
        }

        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if !self.webhook_path.starts_with('/') {
            anyhow::bail!("webhook_path must start with '/'");
        }

        self.parse_server_addr()?;

        if self.request_timeout == 0 {
            anyhow::bail!("request_timeout must be greater than 0");
        }

        self.signature_header_name()?;

        if self.replay_ttl_secs == 0 || self.replay_ttl_secs > MAX_REPLAY_TTL_SECS {
            anyhow::bail!("replay_ttl_secs must be between 1 and {MAX_REPLAY_TTL_SECS}");
        }

        if self.client_timeout_ms == 0 {
            anyhow::bail!("client_timeout_ms must be greater than 0");
        }

        if self.retry_backoff_ms > self.retry_max_delay_ms {
            anyhow::bail!("retry_backoff_ms cannot exceed retry_max_delay_ms");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }

        if let Some(status) =
            self.retryable_status_codes.iter().find(|status| !(100..=599).contains(*status))
        {
            anyhow::bail!("retryable_status_codes contains invalid HTTP status {status}");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_token: Credential::default(),
            host: default_host(),
            port: default_port(),
            webhook_path: default_webhook_path(),
            request_timeout: default_request_timeout(),
            signature_header: default_signature_header(),
            dispatch_mode: DispatchMode::default(),
            replay_ttl_secs: default_replay_ttl_secs(),
            replay_failure_mode: ReplayFailureMode::default(),
            redis_url: None,
            network: Network::default(),
            api_base_url: None,
            client_timeout_ms: default_client_timeout_ms(),
            max_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_jitter_factor: 0.0,
            retryable_status_codes: default_retryable_status_codes(),
            rust_log: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    2203
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_signature_header() -> String {
    SIGNATURE_HEADER.to_string()
}

fn default_replay_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_client_timeout_ms() -> u64 {
    5000
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_retryable_status_codes() -> Vec<u16> {
    cryptopay_client::retry::DEFAULT_RETRYABLE_STATUS_CODES.to_vec()
}

fn default_log_level() -> String {
    "info".to_string()
}
