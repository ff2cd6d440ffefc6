//! Health check for the webhook listener.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use cryptopay_core::Clock;
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::{replay::ReplayStore, AppState};

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// When the check ran
    pub timestamp: DateTime<Utc>,
    /// Individual component checks
    pub checks: HealthChecks,
    /// Service version
    pub version: String,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Everything operational
    Healthy,
    /// Replay store down, deliveries are rejected
    Unhealthy,
}

/// Individual component results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Replay store connectivity
    pub replay_store: ComponentHealth,
}

/// Health of one component.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Component status
    pub status: ComponentStatus,
    /// Error message when down
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Probe duration in milliseconds
    pub response_time_ms: u64,
}

/// Component-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy
    Up,
    /// Component is failing
    Down,
}

/// Runs health probes against the listener's dependencies.
pub struct HealthService {
    clock: Arc<dyn Clock>,
}

impl HealthService {
    /// Creates a health service reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Probes the replay store.
    pub async fn health_check(&self, store: &dyn ReplayStore) -> HealthResponse {
        let started = self.clock.now();

        let (status, message) = match store.health_check().await {
            Ok(()) => (ComponentStatus::Up, None),
            Err(store_error) => {
                error!(error = %store_error, "replay store health check failed");
                (ComponentStatus::Down, Some(store_error.to_string()))
            },
        };
        let elapsed = self.clock.now().saturating_duration_since(started);

        HealthResponse {
            status: match status {
                ComponentStatus::Up => HealthStatus::Healthy,
                ComponentStatus::Down => HealthStatus::Unhealthy,
            },
            timestamp: self.clock.now_utc(),
            checks: HealthChecks {
                replay_store: ComponentHealth {
                    status,
                    message,
                    response_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                },
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Health check endpoint handler.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let service = HealthService::new(state.clock.clone());
    let response = service.health_check(state.dispatcher.replay().store().as_ref()).await;

    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(status = ?response.status, "health check completed");

    (status_code, Json(response)).into_response()
}
