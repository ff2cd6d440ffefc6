//! Crypto Pay webhook listener.
//!
//! Loads configuration, checks the API token against `getMe`, and serves
//! verified, deduplicated webhook updates until CTRL+C or SIGTERM.

use anyhow::{Context, Result};
use async_trait::async_trait;
use cryptopay_client::CryptoPayClient;
use cryptopay_core::Update;
use cryptopay_webhook::{AppState, Config, WebhookHandler, WebhookListener};
use http::HeaderMap;
use tracing::{info, warn};

/// Logs every update it receives.
struct LoggingHandler;

#[async_trait]
impl WebhookHandler for LoggingHandler {
    async fn handle(&self, update: Update, _headers: HeaderMap) -> Result<()> {
        match update.invoice() {
            Some(invoice) => info!(
                update_type = update.kind(),
                update_id = update.update_id,
                invoice_id = invoice.invoice_id,
                status = invoice.status.as_str(),
                asset = invoice.asset.as_deref(),
                amount = invoice.amount.as_deref(),
                "webhook update received"
            ),
            None => info!(
                update_type = update.kind(),
                update_id = update.update_id,
                "webhook update received"
            ),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log)?;

    info!(
        api_token = %config.api_token_masked(),
        network = ?config.network,
        max_retries = config.max_retries,
        "Configuration loaded"
    );

    check_credentials(&config).await;

    let dispatcher = config.build_dispatcher(LoggingHandler).await?;
    let listener = WebhookListener::new(AppState::new(dispatcher), config.to_listener_config());

    listener.serve().await.context("Webhook listener failed")?;

    info!("Shutdown complete");
    Ok(())
}

/// Initializes tracing, preferring `RUST_LOG` over the configured filter.
fn init_tracing(fallback: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{fallback},cryptopay=debug,tower_http=debug")))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Calls `getMe` so a wrong token or network shows up at startup.
///
/// Failures are logged, not fatal: the listener only needs the token for
/// signature checks.
async fn check_credentials(config: &Config) {
    let client = match CryptoPayClient::new(
        config.api_token.clone(),
        config.to_client_config(),
        config.to_retry_config(),
    ) {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Could not build API client");
            return;
        },
    };

    match client.get_me().await {
        Ok(app) => info!(app_id = app.app_id, app_name = %app.name, "API token verified"),
        Err(e) => warn!(error = %e, "API token check failed"),
    }
}
