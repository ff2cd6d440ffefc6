//! Request execution with bounded retries.
//!
//! `RequestExecutor` sends a request through the transport, classifies each
//! result into an `AttemptOutcome`, and drives the retry loop. Backoff waits
//! go through the injected `Clock`, so they suspend only the calling task and
//! can be observed in tests. An optional deadline bounds the whole call,
//! retries included.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use cryptopay_core::{
    Clock, CryptoPayError, ErrorCategory, RealClock, RemoteErrorBody, Result, TransportError,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    retry::{parse_retry_after, AttemptOutcome, RetryConfig},
    transport::{Transport, TransportRequest, TransportResponse},
};

/// Characters of a non-JSON body kept in error names.
const ERROR_TEXT_LIMIT: usize = 100;

/// Runs `attempt` until it succeeds, fails fatally, or the retry budget is
/// spent.
///
/// `attempt` receives the zero-based attempt index. Retryable failures wait
/// `config.delay_for(index, retry_after)` on `clock` before the next attempt.
/// Once the budget is spent the last error is returned wrapped in
/// `RetriesExhausted`; with `max_retries == 0` it is returned as is.
pub async fn execute_attempts<T, F, Fut>(
    config: &RetryConfig,
    clock: &dyn Clock,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AttemptOutcome<T>>,
{
    let mut attempt_index: u32 = 0;

    loop {
        match attempt(attempt_index).await {
            AttemptOutcome::Success(value) => {
                if attempt_index > 0 {
                    debug!(attempts = attempt_index + 1, "request succeeded after retries");
                }
                return Ok(value);
            },
            AttemptOutcome::FatalFailure(error) => {
                debug!(
                    attempt = attempt_index + 1,
                    category = %ErrorCategory::from(&error),
                    "request failed permanently: {}",
                    error
                );
                return Err(error);
            },
            AttemptOutcome::RetryableFailure { error, retry_after } => {
                if attempt_index >= config.max_retries {
                    if config.max_retries == 0 {
                        return Err(error);
                    }
                    warn!(
                        attempts = attempt_index + 1,
                        "retry budget exhausted: {}",
                        error
                    );
                    return Err(CryptoPayError::retries_exhausted(attempt_index + 1, error));
                }

                let delay = config.delay_for(attempt_index, retry_after);
                warn!(
                    attempt = attempt_index + 1,
                    max_attempts = config.max_attempts(),
                    delay_ms = delay.as_millis(),
                    category = %ErrorCategory::from(&error),
                    "retrying request: {}",
                    error
                );
                if !delay.is_zero() {
                    clock.sleep(delay).await;
                }
                attempt_index += 1;
            },
        }
    }
}

/// Maps one transport result onto an attempt outcome.
///
/// Timeouts, connection and network failures and statuses in the retryable
/// set are retryable; the latter carry any `Retry-After` hint. Requests that
/// cannot be built are fatal. A 200 must wrap its payload in
/// `result`. Every other status is a fatal remote error.
pub fn classify_response(
    result: std::result::Result<TransportResponse, TransportError>,
    config: &RetryConfig,
    now: DateTime<Utc>,
) -> AttemptOutcome<serde_json::Value> {
    let response = match result {
        Ok(response) => response,
        Err(error) if error.is_retryable() => return AttemptOutcome::retryable(error),
        Err(error) => return AttemptOutcome::fatal(error),
    };

    if config.is_retryable_status(response.status) {
        let retry_after =
            response.header("retry-after").and_then(|value| parse_retry_after(value, now));
        return AttemptOutcome::RetryableFailure { error: remote_error(&response), retry_after };
    }

    match handle_response(&response) {
        Ok(result) => AttemptOutcome::Success(result),
        Err(error) => AttemptOutcome::FatalFailure(error),
    }
}

/// Extracts the `result` payload of a response, or the error it carries.
fn handle_response(response: &TransportResponse) -> Result<serde_json::Value> {
    let payload: serde_json::Value = serde_json::from_slice(&response.body).map_err(|_| {
        CryptoPayError::invalid_response(
            response.status,
            format!("Invalid JSON response: {}", response.text_prefix(ERROR_TEXT_LIMIT)),
        )
    })?;

    if response.status == 200 {
        return match payload {
            serde_json::Value::Object(mut map) if map.contains_key("result") => {
                Ok(map.remove("result").unwrap_or_default())
            },
            _ => Err(CryptoPayError::invalid_response(
                200,
                "Malformed success response: missing 'result'",
            )),
        };
    }

    Err(error_from_payload(response, &payload))
}

/// Builds the remote error for a non-success response.
fn remote_error(response: &TransportResponse) -> CryptoPayError {
    match serde_json::from_slice::<serde_json::Value>(&response.body) {
        Ok(payload) => error_from_payload(response, &payload),
        Err(_) => http_error(response),
    }
}

fn error_from_payload(response: &TransportResponse, payload: &serde_json::Value) -> CryptoPayError {
    payload
        .get("error")
        .filter(|error| error.is_object())
        .and_then(|error| serde_json::from_value::<RemoteErrorBody>(error.clone()).ok())
        .map_or_else(|| http_error(response), CryptoPayError::from_remote_body)
}

fn http_error(response: &TransportResponse) -> CryptoPayError {
    CryptoPayError::remote(
        response.status,
        format!("HTTPError: {}", response.text_prefix(ERROR_TEXT_LIMIT)),
    )
}

/// Executes API requests with retry, backoff and an optional deadline.
///
/// Cheap to clone; clones share the transport and clock.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    retry: RetryConfig,
    clock: Arc<dyn Clock>,
    deadline: Option<Duration>,
}

impl RequestExecutor {
    /// Creates an executor using the real clock and no deadline.
    pub fn new(transport: Arc<dyn Transport>, retry: RetryConfig) -> Self {
        Self { transport, retry, clock: Arc::new(RealClock::new()), deadline: None }
    }

    /// Replaces the clock used for backoff waits.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets a deadline applied to every call made through `execute`.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Retry configuration in use.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Sends `request`, retrying transient failures, and decodes the
    /// `result` payload as `T`.
    ///
    /// # Errors
    ///
    /// - `RemoteApi` for non-retryable statuses, or retryable ones when no
    ///   retries are configured
    /// - `RetriesExhausted` when every allowed attempt failed transiently
    /// - `Timeout` when the executor's deadline elapsed
    /// - `InvalidResponse` when the body is not a valid API envelope or does
    ///   not decode as `T`
    pub async fn execute<T: DeserializeOwned>(&self, request: TransportRequest) -> Result<T> {
        match self.deadline {
            Some(deadline) => self.execute_with_deadline(request, deadline).await,
            None => self.run(request).await,
        }
    }

    /// Like `execute`, bounded by `deadline` across all attempts and waits.
    ///
    /// When the deadline elapses the in-flight attempt is dropped and no
    /// further retries happen.
    pub async fn execute_with_deadline<T: DeserializeOwned>(
        &self,
        request: TransportRequest,
        deadline: Duration,
    ) -> Result<T> {
        let path = request.path.clone();
        match tokio::time::timeout(deadline, self.run(request)).await {
            Ok(result) => result,
            Err(_) => {
                let deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
                warn!(path = %path, deadline_ms, "request deadline exceeded");
                Err(CryptoPayError::timeout(deadline_ms))
            },
        }
    }

    async fn run<T: DeserializeOwned>(&self, request: TransportRequest) -> Result<T> {
        let span = info_span!(
            "cryptopay_call",
            call_id = %Uuid::new_v4(),
            method = %request.method,
            path = %request.path,
        );

        async move {
            let value = execute_attempts(&self.retry, self.clock.as_ref(), |attempt_index| {
                let request = request.clone();
                async move {
                    debug!(attempt = attempt_index + 1, "sending request");
                    let result = self.transport.send(request).await;
                    classify_response(result, &self.retry, self.clock.now_utc())
                }
            })
            .await?;

            serde_json::from_value(value).map_err(|e| {
                CryptoPayError::invalid_response(200, format!("unexpected result shape: {e}"))
            })
        }
        .instrument(span)
        .await
    }
}
