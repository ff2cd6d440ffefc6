//! HTTP server for the webhook listener.
//!
//! Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Request/response tracing
//! 3. Timeout enforcement
//! 4. Handler execution
//!
//! The server stops accepting connections on CTRL+C or SIGTERM and lets
//! in-flight deliveries finish.

use std::{
    future::Future,
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{handlers, AppState};

/// Where Crypto Pay webhook documentation lives.
pub const WEBHOOK_DOCS_URL: &str = "https://help.crypt.bot/crypto-pay-api#Webhook";

/// Response header carrying the generated request id.
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Bind address, route and timeout of the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Route receiving webhooks, starting with `/`.
    pub path: String,
    /// Upper bound on request handling, callback included.
    pub request_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 2203,
            path: "/webhook".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ListenerConfig {
    /// Resolves host and port to a socket address.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the host cannot be resolved.
    pub fn socket_addr(&self) -> std::io::Result<SocketAddr> {
        (self.host.as_str(), self.port).to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "host resolved to no address")
        })
    }

    /// Public URL of the webhook route, as shown in the startup banner.
    pub fn url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.path)
    }
}

/// Creates the router with the webhook and health routes and middleware.
pub fn create_router(state: AppState, config: &ListenerConfig) -> Router {
    Router::new()
        .route(&config.path, post(handlers::receive_webhook))
        .route("/health", get(handlers::health_check))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Tags each request with a fresh id and echoes it as `X-Request-Id`.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// Webhook listener: router plus the address it serves on.
#[derive(Debug, Clone)]
pub struct WebhookListener {
    state: AppState,
    config: ListenerConfig,
}

impl WebhookListener {
    /// Creates a listener serving `state` with `config`.
    pub fn new(state: AppState, config: ListenerConfig) -> Self {
        Self { state, config }
    }

    /// Listener configuration.
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Builds the router without binding.
    pub fn router(&self) -> Router {
        create_router(self.state.clone(), &self.config)
    }

    /// Binds the configured address and serves until CTRL+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if binding fails.
    pub async fn serve(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.socket_addr()?).await?;
        self.serve_on(listener, shutdown_signal()).await
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the listener fails.
    pub async fn serve_on(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let actual_addr = listener.local_addr()?;
        let app = self.router();

        log_banner(&self.config, actual_addr);

        axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

        info!("webhook listener stopped gracefully");
        Ok(())
    }
}

/// Starts the listener with graceful shutdown support.
///
/// # Errors
///
/// Returns an I/O error if the port is in use or the host cannot be
/// resolved.
pub async fn start_server(state: AppState, config: ListenerConfig) -> std::io::Result<()> {
    WebhookListener::new(state, config).serve().await
}

fn log_banner(config: &ListenerConfig, bound: SocketAddr) {
    info!(docs = WEBHOOK_DOCS_URL, "[Webhook Listener]");
    info!(bound = %bound, "listening on {} (press CTRL+C to stop)", config.url());
}

/// Waits for CTRL+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    warn!("Waiting for in-flight webhook callbacks to complete");
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use cryptopay_core::Credential;
    use http::StatusCode;
    use tower::ServiceExt;

    use super::*;
    use crate::{handler_fn, WebhookDispatcher};

    fn state() -> AppState {
        let handler = handler_fn(|_update, _headers| async { Ok::<(), anyhow::Error>(()) });
        AppState::new(WebhookDispatcher::new(&Credential::new("test-token"), handler))
    }

    #[test]
    fn default_listener_matches_crypto_pay_conventions() {
        let config = ListenerConfig::default();

        assert_eq!(config.url(), "http://0.0.0.0:2203/webhook");
        assert_eq!(config.socket_addr().unwrap().port(), 2203);
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let router = create_router(state(), &ListenerConfig::default());

        let response = router
            .oneshot(http::Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let request_id = response.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(request_id).is_ok());
    }

    #[tokio::test]
    async fn webhook_route_rejects_get() {
        let router = create_router(state(), &ListenerConfig::default());

        let response = router
            .oneshot(http::Request::builder().uri("/webhook").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
